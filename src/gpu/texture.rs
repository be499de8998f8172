use anyhow::{Context, Result};
use std::path::Path;
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;

use super::buffer::{Buffer, BufferClass};
use super::context::GpuContext;
use super::image::DeviceImage;

const SHEET_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

// Sampled RGBA image holding every bunny region
pub struct SpriteSheet {
    device: Rc<Device>,
    view: vk::ImageView,
    sampler: vk::Sampler,
    image: DeviceImage,
    width: u32,
    height: u32,
}

impl SpriteSheet {
    pub unsafe fn load(ctx: &GpuContext, path: &Path) -> Result<Self> {
        let img = image::open(path)
            .with_context(|| format!("Failed to load sprite sheet {}", path.display()))?
            .to_rgba8();
        let (width, height) = (img.width(), img.height());
        log::info!("Loaded sprite sheet {} ({}x{})", path.display(), width, height);

        Self::from_rgba(ctx, width, height, img.as_raw())
    }

    pub unsafe fn from_rgba(ctx: &GpuContext, width: u32, height: u32, pixels: &[u8]) -> Result<Self> {
        let device = ctx.device.clone();

        let mut staging = Buffer::new(
            ctx,
            BufferClass::Staging,
            vk::BufferUsageFlags::empty(),
            pixels.len() as u64,
            false,
        )?;
        staging.upload(pixels)?;

        let mut sheet = Self {
            device: device.clone(),
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            image: DeviceImage::new(
                ctx,
                SHEET_FORMAT,
                vk::Extent2D { width, height },
                vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            )?,
            width,
            height,
        };
        let image = sheet.image.handle();

        let staging_buffer = staging.handle();
        ctx.submit_one_shot(|device, command_buffer| {
            transition_image_layout(
                device,
                command_buffer,
                image,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            );

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(0)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1)
                        .build(),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                });

            device.cmd_copy_buffer_to_image(
                command_buffer,
                staging_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );

            transition_image_layout(
                device,
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            );
        })?;

        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::_2D)
            .format(SHEET_FORMAT)
            .subresource_range(color_subresource_range());

        sheet.view = device.create_image_view(&info, None)?;

        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .anisotropy_enable(false)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .mip_lod_bias(0.0)
            .min_lod(0.0)
            .max_lod(0.0);

        sheet.sampler = device.create_sampler(&info, None)?;

        Ok(sheet)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn descriptor(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for SpriteSheet {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.sampler, None);
            self.device.destroy_image_view(self.view, None);
        }
    }
}

fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::builder()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
        .build()
}

unsafe fn transition_image_layout(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_stage_mask, src_access_mask, dst_stage_mask, dst_access_mask) =
        if new_layout == vk::ImageLayout::TRANSFER_DST_OPTIMAL {
            (
                vk::PipelineStageFlags2::TOP_OF_PIPE,
                vk::AccessFlags2::empty(),
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
            )
        } else {
            (
                vk::PipelineStageFlags2::ALL_TRANSFER,
                vk::AccessFlags2::TRANSFER_WRITE,
                vk::PipelineStageFlags2::FRAGMENT_SHADER,
                vk::AccessFlags2::SHADER_READ,
            )
        };

    let barrier = vk::ImageMemoryBarrier2::builder()
        .src_stage_mask(src_stage_mask)
        .src_access_mask(src_access_mask)
        .dst_stage_mask(dst_stage_mask)
        .dst_access_mask(dst_access_mask)
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(color_subresource_range());

    let dependency_info =
        vk::DependencyInfo::builder().image_memory_barriers(std::slice::from_ref(&barrier));

    device.cmd_pipeline_barrier2(command_buffer, &dependency_info);
}
