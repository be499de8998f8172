use anyhow::Result;
use std::mem::size_of_val;
use std::time::Instant;
use vulkanalia::prelude::v1_3::*;

use crate::batch::{InstanceAllocator, InstanceStorage, SpriteBatchManager};
use crate::config::Options;
use crate::gpu::buffer::{Buffer, BufferClass};
use crate::gpu::context::{ContextOptions, GpuContext};
use crate::gpu::frames::{FrameRing, SlotValidity};
use crate::gpu::pipeline::{ShaderPaths, SpritePipeline};
use crate::gpu::recorder::{build_frame, FrameTarget, Scene};
use crate::gpu::swapchain::{AcquireOutcome, PresentOutcome, PresentationChain};
use crate::gpu::targets::{supported_depth_format, DepthBuffer, Framebuffers, RenderPass};
use crate::gpu::texture::SpriteSheet;
use crate::input::InputEvent;
use crate::platform::SurfaceProvider;
use crate::sprite::{sheet_vertices, Bounds, QUAD_INDICES};
use crate::timing::{FpsCounter, FrameClock};

// Physics and spawning for one frame. A spawn makes every recorded frame
// stale.
pub fn advance_scene<S, A>(
    batches: &mut SpriteBatchManager<S>,
    validity: &mut SlotValidity,
    dt: f32,
    bounds: Bounds,
    allocator: &A,
) -> Result<()>
where
    S: InstanceStorage,
    A: InstanceAllocator<Storage = S>,
{
    if batches.update(dt, bounds, allocator)? > 0 {
        validity.invalidate_all();
    }
    Ok(())
}

// Drawable size and whether frames should be produced for it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Drawable {
    drawable: Drawable,
}

impl Drawable {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            drawable: Drawable::new(width, height),
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    pub fn is_suspended(&self) -> bool {
        self.drawable.is_suspended()
    }

    // Returns true when rendering resumes after a 0x0 period
    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        self.size = (width, height);
        if width == 0 || height == 0 {
            if !self.suspended {
                log::info!("Drawable area is empty; rendering suspended");
            }
            self.suspended = true;
            return false;
        }
        self.resized = true;
        if self.suspended {
            log::info!("Rendering resumed at {}x{}", width, height);
            self.suspended = false;
            return true;
        }
        false
    }

    // Clears the pending rebuild, reporting whether there was one
    pub fn take_resized(&mut self) -> bool {
        std::mem::take(&mut self.resized)
    }

    pub fn suspend(&mut self) {
        self.suspended = true;
    }
}

// Fields drop top to bottom, so the context is declared last
pub struct Renderer {
    batches: SpriteBatchManager<Buffer>,
    frames: FrameRing,
    framebuffers: Framebuffers,
    depth: DepthBuffer,
    pipeline: SpritePipeline,
    render_pass: RenderPass,
    quad_indices: Buffer,
    quad_vertices: Buffer,
    _sheet: SpriteSheet,
    chain: PresentationChain,
    depth_format: vk::Format,
    vsync: bool,
    drawable: Drawable,
    clock: FrameClock,
    fps: FpsCounter,
    ctx: GpuContext,
}

impl Renderer {
    pub unsafe fn new(provider: &dyn SurfaceProvider, options: &Options) -> Result<Self> {
        let ctx = GpuContext::new(
            Some(provider),
            &ContextOptions {
                validation: options.validation,
                gpu: options.gpu,
                list_gpus: options.list_gpus,
            },
        )?;
        log::info!("Using `{}`", ctx.device_name());

        let (width, height) = provider.drawable_size();
        let chain = PresentationChain::new(&ctx, width, height, options.vsync)?;

        let sheet = SpriteSheet::load(&ctx, &options.sheet)?;

        let vertices = sheet_vertices(sheet.width(), sheet.height());
        let mut quad_vertices = Buffer::new(
            &ctx,
            BufferClass::Device,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            size_of_val(vertices.as_slice()) as u64,
            false,
        )?;
        quad_vertices.upload_from_staging(&ctx, bytemuck::cast_slice(&vertices))?;

        let mut quad_indices = Buffer::new(
            &ctx,
            BufferClass::Device,
            vk::BufferUsageFlags::INDEX_BUFFER,
            size_of_val(QUAD_INDICES) as u64,
            false,
        )?;
        quad_indices.upload_from_staging(&ctx, bytemuck::cast_slice(QUAD_INDICES))?;

        let depth_format = supported_depth_format(&ctx)?;
        log::info!("Depth format: {:?}", depth_format);

        let render_pass = RenderPass::new(&ctx, chain.format(), depth_format)?;
        let pipeline = SpritePipeline::new(
            &ctx,
            &render_pass,
            &sheet,
            &ShaderPaths {
                vertex: &options.vertex_shader,
                fragment: &options.fragment_shader,
            },
        )?;

        let depth = DepthBuffer::new(&ctx, depth_format, chain.extent())?;
        let framebuffers =
            Framebuffers::new(&ctx, &render_pass, chain.views(), &depth, chain.extent())?;
        let frames = FrameRing::new(&ctx, chain.image_count())?;

        let batches = SpriteBatchManager::new(options.batch_size, options.seed)?;

        Ok(Self {
            batches,
            frames,
            framebuffers,
            depth,
            pipeline,
            render_pass,
            quad_indices,
            quad_vertices,
            _sheet: sheet,
            chain,
            depth_format,
            vsync: options.vsync,
            drawable: Drawable::new(width, height),
            clock: FrameClock::new(),
            fps: FpsCounter::new(Instant::now()),
            ctx,
        })
    }

    pub fn is_suspended(&self) -> bool {
        self.drawable.is_suspended()
    }

    pub fn sprite_count(&self) -> u64 {
        self.batches.sprite_count()
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointerDown => self.batches.press(),
            InputEvent::PointerUp => self.batches.release(),
            InputEvent::Resized { width, height } => self.resize(width, height),
            InputEvent::CloseRequested => {}
        }
    }

    // The chain is rebuilt before the next frame
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.drawable.resize(width, height) {
            self.clock.reset();
        }
    }

    // Runs one frame. Returns the frame rate whenever a measurement window
    // closes.
    pub unsafe fn render_frame(&mut self) -> Result<Option<u32>> {
        if self.drawable.is_suspended() {
            return Ok(None);
        }
        if self.drawable.take_resized() {
            self.recreate()?;
            if self.drawable.is_suspended() {
                return Ok(None);
            }
        }

        let dt = self.clock.tick();
        let extent = self.chain.extent();
        let bounds = Bounds::new(extent.width, extent.height);

        advance_scene(
            &mut self.batches,
            self.frames.validity_mut(),
            dt,
            bounds,
            &self.ctx,
        )?;
        self.batches.flush()?;

        let (index, suboptimal) =
            match self.chain.acquire_next_image(self.frames.spare_semaphore())? {
                AcquireOutcome::Acquired { index, suboptimal } => (index, suboptimal),
                AcquireOutcome::OutOfDate => {
                    self.recreate()?;
                    return Ok(None);
                }
            };
        let slot_index = index as usize;

        let slot = self.frames.begin(slot_index)?;

        let recorded = self.frames.validity_mut().record_if_stale(slot_index, || {
            build_frame(
                &self.ctx.device,
                slot.command_buffer,
                &FrameTarget {
                    render_pass: &self.render_pass,
                    framebuffer: self.framebuffers.get(slot_index),
                    extent,
                },
                &Scene {
                    pipeline: &self.pipeline,
                    quad_vertices: &self.quad_vertices,
                    quad_indices: &self.quad_indices,
                },
                self.batches.batches(),
            )
        })?;
        if recorded {
            log::debug!(
                "Recorded slot {} ({} batches)",
                slot_index,
                self.batches.batches().len()
            );
        }

        let wait_semaphore_submit_info = vk::SemaphoreSubmitInfo::builder()
            .semaphore(slot.image_acquired)
            .stage_mask(vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);

        let command_buffer_submit_info =
            vk::CommandBufferSubmitInfo::builder().command_buffer(slot.command_buffer);

        let signal_semaphore_submit_info = vk::SemaphoreSubmitInfo::builder()
            .semaphore(slot.render_complete)
            .stage_mask(vk::PipelineStageFlags2::ALL_GRAPHICS);

        let submit_info = vk::SubmitInfo2::builder()
            .wait_semaphore_infos(std::slice::from_ref(&wait_semaphore_submit_info))
            .command_buffer_infos(std::slice::from_ref(&command_buffer_submit_info))
            .signal_semaphore_infos(std::slice::from_ref(&signal_semaphore_submit_info));

        self.ctx
            .device
            .queue_submit2(self.ctx.graphics_queue, &[submit_info], slot.fence)?;

        let presented = self
            .chain
            .present(self.ctx.present_queue, index, slot.render_complete)?;

        if suboptimal || presented == PresentOutcome::OutOfDate {
            self.recreate()?;
        }

        Ok(self.fps.frame(Instant::now()))
    }

    unsafe fn recreate(&mut self) -> Result<()> {
        self.ctx.wait_idle()?;
        self.drawable.take_resized();

        let current = self.ctx.swapchain_support()?.capabilities.current_extent;
        if current.width == 0 || current.height == 0 {
            self.drawable.suspend();
            return Ok(());
        }

        let (width, height) = self.drawable.size();
        let count = self.chain.recreate(&self.ctx, width, height, self.vsync)?;
        let extent = self.chain.extent();

        self.depth = DepthBuffer::new(&self.ctx, self.depth_format, extent)?;
        self.framebuffers = Framebuffers::new(
            &self.ctx,
            &self.render_pass,
            self.chain.views(),
            &self.depth,
            extent,
        )?;

        self.frames.rebuild(count)?;

        self.ctx.wait_idle()?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.ctx.wait_idle() {
                log::warn!("Device wait before teardown failed: {}", e);
            }
        }
        self.batches.clear();
        log::info!("Renderer shut down after {} bunnies", self.batches.sprite_count());
    }
}
