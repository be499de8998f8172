use anyhow::{anyhow, Result};
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;
use vulkanalia_vma::{self as vma, Alloc};

use super::context::GpuContext;

// Single-mip 2D image in device memory, owned together with its allocation
pub struct DeviceImage {
    allocator: Rc<vma::Allocator>,
    image: vk::Image,
    allocation: vma::Allocation,
}

impl DeviceImage {
    pub unsafe fn new(
        ctx: &GpuContext,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Result<Self> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::_1);

        let options = vma::AllocationOptions {
            usage: vma::MemoryUsage::AutoPreferDevice,
            ..Default::default()
        };

        let allocator = ctx.allocator().clone();
        let (image, allocation) = allocator.create_image(info, &options).map_err(|e| {
            anyhow!(
                "Failed to allocate {}x{} {:?} image: {}",
                extent.width,
                extent.height,
                format,
                e
            )
        })?;

        Ok(Self {
            allocator,
            image,
            allocation,
        })
    }

    pub fn handle(&self) -> vk::Image {
        self.image
    }
}

impl Drop for DeviceImage {
    fn drop(&mut self) {
        unsafe { self.allocator.destroy_image(self.image, self.allocation) }
    }
}
