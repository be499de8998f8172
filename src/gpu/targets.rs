use anyhow::{anyhow, Result};
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;

use super::context::GpuContext;
use super::image::DeviceImage;

pub const DEPTH_FORMAT_CANDIDATES: &[vk::Format] = &[
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
    vk::Format::D16_UNORM_S8_UINT,
    vk::Format::D16_UNORM,
];

pub fn choose_depth_format<F>(candidates: &[vk::Format], features: F) -> Option<vk::Format>
where
    F: Fn(vk::Format) -> vk::FormatFeatureFlags,
{
    candidates.iter().copied().find(|&format| {
        features(format).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D32_SFLOAT_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
    )
}

pub unsafe fn supported_depth_format(ctx: &GpuContext) -> Result<vk::Format> {
    choose_depth_format(DEPTH_FORMAT_CANDIDATES, |format| {
        ctx.instance
            .get_physical_device_format_properties(ctx.physical_device, format)
            .optimal_tiling_features
    })
    .ok_or_else(|| anyhow!("No supported depth format."))
}

// Single-subpass pass: colour cleared and presented, depth cleared and discarded.
pub struct RenderPass {
    device: Rc<Device>,
    render_pass: vk::RenderPass,
}

impl RenderPass {
    pub unsafe fn new(
        ctx: &GpuContext,
        color_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<Self> {
        let color_attachment = vk::AttachmentDescription::builder()
            .format(color_format)
            .samples(vk::SampleCountFlags::_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

        let depth_attachment = vk::AttachmentDescription::builder()
            .format(depth_format)
            .samples(vk::SampleCountFlags::_1)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .stencil_load_op(vk::AttachmentLoadOp::CLEAR)
            .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let color_reference = vk::AttachmentReference::builder()
            .attachment(0)
            .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);

        let depth_reference = vk::AttachmentReference::builder()
            .attachment(1)
            .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL);

        let color_attachments = &[color_reference];
        let subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(color_attachments)
            .depth_stencil_attachment(&depth_reference);

        // The acquire semaphore is waited at colour output; depth is reused every frame
        let dependency = vk::SubpassDependency::builder()
            .src_subpass(vk::SUBPASS_EXTERNAL)
            .dst_subpass(0)
            .src_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
            )
            .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
            .dst_stage_mask(
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
            )
            .dst_access_mask(
                vk::AccessFlags::COLOR_ATTACHMENT_WRITE
                    | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

        let attachments = &[color_attachment, depth_attachment];
        let subpasses = &[subpass];
        let dependencies = &[dependency];
        let info = vk::RenderPassCreateInfo::builder()
            .attachments(attachments)
            .subpasses(subpasses)
            .dependencies(dependencies);

        let render_pass = ctx.device.create_render_pass(&info, None)?;

        Ok(Self {
            device: ctx.device.clone(),
            render_pass,
        })
    }

    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) }
    }
}

pub struct DepthBuffer {
    device: Rc<Device>,
    view: vk::ImageView,
    image: DeviceImage,
}

impl DepthBuffer {
    pub unsafe fn new(ctx: &GpuContext, format: vk::Format, extent: vk::Extent2D) -> Result<Self> {
        let mut depth = Self {
            device: ctx.device.clone(),
            view: vk::ImageView::null(),
            image: DeviceImage::new(
                ctx,
                format,
                extent,
                vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            )?,
        };

        let mut aspect_mask = vk::ImageAspectFlags::DEPTH;
        if has_stencil(format) {
            aspect_mask |= vk::ImageAspectFlags::STENCIL;
        }

        let info = vk::ImageViewCreateInfo::builder()
            .image(depth.image.handle())
            .view_type(vk::ImageViewType::_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(aspect_mask)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            );

        depth.view = depth.device.create_image_view(&info, None)?;

        Ok(depth)
    }

    pub fn view(&self) -> vk::ImageView {
        self.view
    }
}

impl Drop for DepthBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_image_view(self.view, None);
        }
    }
}

pub struct Framebuffers {
    device: Rc<Device>,
    framebuffers: Vec<vk::Framebuffer>,
}

impl Framebuffers {
    pub unsafe fn new(
        ctx: &GpuContext,
        render_pass: &RenderPass,
        color_views: &[vk::ImageView],
        depth: &DepthBuffer,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut result = Self {
            device: ctx.device.clone(),
            framebuffers: Vec::with_capacity(color_views.len()),
        };

        for &view in color_views {
            let attachments = &[view, depth.view()];
            let info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass.handle())
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            result
                .framebuffers
                .push(result.device.create_framebuffer(&info, None)?);
        }

        Ok(result)
    }

    pub fn get(&self, index: usize) -> vk::Framebuffer {
        self.framebuffers[index]
    }
}

impl Drop for Framebuffers {
    fn drop(&mut self) {
        unsafe {
            self.framebuffers
                .drain(..)
                .for_each(|f| self.device.destroy_framebuffer(f, None));
        }
    }
}
