use anyhow::Result;
use std::mem::size_of;
use vulkanalia::prelude::v1_3::*;

use super::buffer::Buffer;
use super::pipeline::{PushConstants, SpritePipeline};
use super::targets::RenderPass;
use crate::batch::{InstanceStorage, SpriteBatch};
use crate::sprite::{
    projection, Vertex, INSTANCE_BUFFER_BIND_ID, QUAD_INDICES, VERTEX_BUFFER_BIND_ID,
    VERTICES_PER_QUAD,
};

const CLEAR_COLOR: [f32; 4] = [1.0, 1.0, 1.0, 1.0];

// One instanced draw: a region's quad repeated for every sprite of a batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawCall<B> {
    pub vertex_offset: u64,
    pub instances: B,
    pub instance_count: u32,
}

pub fn draw_calls<S: InstanceStorage>(batches: &[SpriteBatch<S>]) -> Vec<DrawCall<&S>> {
    batches
        .iter()
        .filter(|batch| !batch.is_empty())
        .map(|batch| DrawCall {
            vertex_offset: (batch.region().index() * VERTICES_PER_QUAD * size_of::<Vertex>())
                as u64,
            instances: batch.storage(),
            instance_count: batch.len() as u32,
        })
        .collect()
}

pub struct Scene<'a> {
    pub pipeline: &'a SpritePipeline,
    pub quad_vertices: &'a Buffer,
    pub quad_indices: &'a Buffer,
}

pub struct FrameTarget<'a> {
    pub render_pass: &'a RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
}

// Records the full frame for one slot. The slot's fence must be signalled.
pub unsafe fn build_frame(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    target: &FrameTarget<'_>,
    scene: &Scene<'_>,
    batches: &[SpriteBatch<Buffer>],
) -> Result<()> {
    device.reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())?;

    let info = vk::CommandBufferBeginInfo::builder();
    device.begin_command_buffer(command_buffer, &info)?;

    let render_area = vk::Rect2D::builder()
        .offset(vk::Offset2D::default())
        .extent(target.extent);

    let color_clear_value = vk::ClearValue {
        color: vk::ClearColorValue {
            float32: CLEAR_COLOR,
        },
    };

    let depth_clear_value = vk::ClearValue {
        depth_stencil: vk::ClearDepthStencilValue {
            depth: 1.0,
            stencil: 0,
        },
    };

    let clear_values = &[color_clear_value, depth_clear_value];
    let info = vk::RenderPassBeginInfo::builder()
        .render_pass(target.render_pass.handle())
        .framebuffer(target.framebuffer)
        .render_area(render_area)
        .clear_values(clear_values);

    device.cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);

    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(target.extent.width as f32)
        .height(target.extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0);

    device.cmd_set_viewport(command_buffer, 0, &[viewport]);

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(target.extent);

    device.cmd_set_scissor(command_buffer, 0, &[scissor]);

    device.cmd_bind_pipeline(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        scene.pipeline.handle(),
    );
    device.cmd_bind_descriptor_sets(
        command_buffer,
        vk::PipelineBindPoint::GRAPHICS,
        scene.pipeline.layout(),
        0,
        &[scene.pipeline.descriptor_set()],
        &[],
    );

    let push_constants = PushConstants {
        projection: projection(target.extent.width, target.extent.height),
    };
    device.cmd_push_constants(
        command_buffer,
        scene.pipeline.layout(),
        vk::ShaderStageFlags::VERTEX,
        0,
        bytemuck::bytes_of(&push_constants),
    );

    for call in draw_calls(batches) {
        device.cmd_bind_vertex_buffers(
            command_buffer,
            VERTEX_BUFFER_BIND_ID,
            &[scene.quad_vertices.handle()],
            &[call.vertex_offset],
        );
        device.cmd_bind_vertex_buffers(
            command_buffer,
            INSTANCE_BUFFER_BIND_ID,
            &[call.instances.handle()],
            &[0],
        );
        device.cmd_bind_index_buffer(
            command_buffer,
            scene.quad_indices.handle(),
            0,
            vk::IndexType::UINT16,
        );
        device.cmd_draw_indexed(
            command_buffer,
            QUAD_INDICES.len() as u32,
            call.instance_count,
            0,
            0,
            0,
        );
    }

    device.cmd_end_render_pass(command_buffer);
    device.end_command_buffer(command_buffer)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sprite::{Sprite, SpriteInstance, TextureRegion};

    #[derive(Debug, PartialEq)]
    struct Tagged(u32);

    impl InstanceStorage for Tagged {
        fn write_instances(&mut self, _: &[SpriteInstance]) -> Result<()> {
            Ok(())
        }
    }

    fn batch(region: usize, len: usize, tag: u32) -> SpriteBatch<Tagged> {
        let mut rng = fastrand::Rng::with_seed(1);
        let region = TextureRegion::new(region);
        let sprites = (0..len).map(|_| Sprite::spawn(region, &mut rng)).collect();
        SpriteBatch::new(sprites, region, Tagged(tag)).unwrap()
    }

    #[test]
    fn one_draw_per_batch_in_creation_order() {
        let batches = vec![batch(2, 5, 10), batch(0, 3, 11), batch(4, 7, 12)];

        let calls = draw_calls(&batches);

        let tags: Vec<u32> = calls.iter().map(|c| c.instances.0).collect();
        assert_eq!(tags, vec![10, 11, 12]);
        let counts: Vec<u32> = calls.iter().map(|c| c.instance_count).collect();
        assert_eq!(counts, vec![5, 3, 7]);
    }

    #[test]
    fn vertex_offset_selects_region_quad() {
        let batches = vec![batch(0, 1, 0), batch(1, 1, 1), batch(4, 1, 4)];

        let offsets: Vec<u64> = draw_calls(&batches).iter().map(|c| c.vertex_offset).collect();

        // four 16 byte vertices per quad
        assert_eq!(offsets, vec![0, 64, 256]);
    }

    #[test]
    fn empty_batches_are_skipped() {
        let batches = vec![batch(0, 0, 0), batch(1, 2, 1)];

        let calls = draw_calls(&batches);

        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].instances, &Tagged(1));
    }

    #[test]
    fn no_batches_means_clear_only() {
        assert!(draw_calls::<Tagged>(&[]).is_empty());
    }
}
