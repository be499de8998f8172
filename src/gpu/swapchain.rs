use anyhow::Result;
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;
use vulkanalia::vk::KhrSwapchainExtension;

use super::context::GpuContext;

pub enum AcquireOutcome {
    Acquired { index: u32, suboptimal: bool },
    OutOfDate,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    // The chain no longer matches the surface (suboptimal included).
    OutOfDate,
}

pub struct PresentationChain {
    device: Rc<Device>,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
}

impl PresentationChain {
    pub unsafe fn new(ctx: &GpuContext, width: u32, height: u32, vsync: bool) -> Result<Self> {
        let mut chain = Self {
            device: ctx.device.clone(),
            swapchain: vk::SwapchainKHR::null(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            views: Vec::new(),
        };
        chain.recreate(ctx, width, height, vsync)?;
        Ok(chain)
    }

    // Builds a chain for the current surface, retiring the previous one.
    // Returns the new image count.
    pub unsafe fn recreate(
        &mut self,
        ctx: &GpuContext,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<usize> {
        let support = ctx.swapchain_support()?;
        let capabilities = support.capabilities;

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, vsync);
        let extent = choose_extent(&capabilities, width, height);
        let image_count = choose_image_count(&capabilities);

        let indices = ctx.queue_families;
        let mut queue_family_indices = vec![];
        let image_sharing_mode = if indices.graphics != indices.present {
            queue_family_indices.push(indices.graphics);
            queue_family_indices.push(indices.present);
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        };

        let old_swapchain = self.swapchain;

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(image_sharing_mode)
            .queue_family_indices(&queue_family_indices)
            .pre_transform(choose_pre_transform(&capabilities))
            .composite_alpha(choose_composite_alpha(&capabilities))
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = self.device.create_swapchain_khr(&info, None)?;

        self.destroy_views();
        if !old_swapchain.is_null() {
            self.device.destroy_swapchain_khr(old_swapchain, None);
        }

        self.swapchain = swapchain;
        self.format = surface_format.format;
        self.extent = extent;
        self.images = self.device.get_swapchain_images_khr(swapchain)?;
        self.views = self
            .images
            .iter()
            .map(|i| {
                let info = vk::ImageViewCreateInfo::builder()
                    .image(*i)
                    .view_type(vk::ImageViewType::_2D)
                    .format(self.format)
                    .subresource_range(
                        vk::ImageSubresourceRange::builder()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .base_mip_level(0)
                            .level_count(1)
                            .base_array_layer(0)
                            .layer_count(1)
                            .build(),
                    );

                self.device.create_image_view(&info, None)
            })
            .collect::<Result<Vec<_>, _>>()?;

        log::info!(
            "Presentation chain: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            surface_format.format,
            present_mode
        );

        Ok(self.images.len())
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn views(&self) -> &[vk::ImageView] {
        &self.views
    }

    pub unsafe fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        let result = self.device.acquire_next_image_khr(
            self.swapchain,
            u64::MAX,
            semaphore,
            vk::Fence::null(),
        );

        match result {
            Ok((index, code)) => Ok(AcquireOutcome::Acquired {
                index,
                suboptimal: code == vk::SuccessCode::SUBOPTIMAL_KHR,
            }),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    pub unsafe fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let wait_semaphores = &[wait];
        let swapchains = &[self.swapchain];
        let image_indices = &[index];
        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        match self.device.queue_present_khr(queue, &info) {
            Ok(vk::SuccessCode::SUBOPTIMAL_KHR) | Err(vk::ErrorCode::OUT_OF_DATE_KHR) => {
                Ok(PresentOutcome::OutOfDate)
            }
            Ok(_) => Ok(PresentOutcome::Presented),
            Err(e) => Err(e.into()),
        }
    }

    unsafe fn destroy_views(&mut self) {
        self.views
            .drain(..)
            .for_each(|v| self.device.destroy_image_view(v, None));
    }
}

impl Drop for PresentationChain {
    fn drop(&mut self) {
        unsafe {
            self.destroy_views();
            if !self.swapchain.is_null() {
                self.device.destroy_swapchain_khr(self.swapchain, None);
            }
        }
    }
}

pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    match formats {
        [only] if only.format == vk::Format::UNDEFINED => vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: only.color_space,
        },
        _ => formats
            .iter()
            .cloned()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
            .or_else(|| formats.first().cloned())
            .unwrap_or(vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            }),
    }
}

pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        capabilities.current_extent
    } else {
        let clamp = |min: u32, max: u32, v: u32| min.max(max.min(v));
        vk::Extent2D::builder()
            .width(clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
                width,
            ))
            .height(clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
                height,
            ))
            .build()
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let mut image_count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 && image_count > capabilities.max_image_count {
        image_count = capabilities.max_image_count;
    }
    image_count
}

pub fn choose_pre_transform(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::SurfaceTransformFlagsKHR {
    if capabilities
        .supported_transforms
        .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
    {
        vk::SurfaceTransformFlagsKHR::IDENTITY
    } else {
        capabilities.current_transform
    }
}

pub fn choose_composite_alpha(
    capabilities: &vk::SurfaceCapabilitiesKHR,
) -> vk::CompositeAlphaFlagsKHR {
    [
        vk::CompositeAlphaFlagsKHR::OPAQUE,
        vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        vk::CompositeAlphaFlagsKHR::INHERIT,
    ]
    .into_iter()
    .find(|flag| capabilities.supported_composite_alpha.contains(*flag))
    .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 8,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY
                | vk::SurfaceTransformFlagsKHR::ROTATE_90,
            current_transform: vk::SurfaceTransformFlagsKHR::ROTATE_90,
            supported_composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            ..Default::default()
        }
    }

    fn format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn vsync_always_uses_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn uncapped_prefers_mailbox_then_immediate() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(choose_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);

        let no_mailbox = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(
            choose_present_mode(&no_mailbox, false),
            vk::PresentModeKHR::IMMEDIATE
        );

        let fifo_only = [vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&fifo_only, false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn undefined_surface_format_means_free_choice() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED)]);
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn bgra_unorm_is_preferred_over_first_entry() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::B8G8R8A8_UNORM
        );

        let formats = [
            format(vk::Format::R8G8B8A8_SRGB),
            format(vk::Format::A2B10G10R10_UNORM_PACK32),
        ];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R8G8B8A8_SRGB
        );
    }

    #[test]
    fn extent_follows_surface_or_clamps_request() {
        let mut caps = capabilities();
        let extent = choose_extent(&caps, 8000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));

        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&caps, 1280, 720);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn image_count_is_one_above_minimum_within_maximum() {
        let mut caps = capabilities();
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        // zero means no upper limit
        caps.max_image_count = 0;
        caps.min_image_count = 9;
        assert_eq!(choose_image_count(&caps), 10);
    }

    #[test]
    fn transform_and_alpha_fall_back_in_order() {
        let mut caps = capabilities();
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::IDENTITY
        );
        caps.supported_transforms = vk::SurfaceTransformFlagsKHR::ROTATE_90;
        assert_eq!(
            choose_pre_transform(&caps),
            vk::SurfaceTransformFlagsKHR::ROTATE_90
        );

        assert_eq!(
            choose_composite_alpha(&caps),
            vk::CompositeAlphaFlagsKHR::OPAQUE
        );
        caps.supported_composite_alpha =
            vk::CompositeAlphaFlagsKHR::INHERIT | vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED;
        assert_eq!(
            choose_composite_alpha(&caps),
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED
        );
    }
}
