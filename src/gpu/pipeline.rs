use anyhow::{anyhow, bail, Context, Result};
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;
use std::path::Path;
use std::rc::Rc;
use vulkanalia::prelude::v1_3::*;

use super::context::GpuContext;
use super::targets::RenderPass;
use super::texture::SpriteSheet;
use crate::sprite::{SpriteInstance, Vertex};

const SPIRV_MAGIC: u32 = 0x0723_0203;

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct PushConstants {
    pub projection: [[f32; 4]; 4],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    fn kind(self) -> shaderc::ShaderKind {
        match self {
            Self::Vertex => shaderc::ShaderKind::Vertex,
            Self::Fragment => shaderc::ShaderKind::Fragment,
        }
    }

    fn flags(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }
}

pub fn spirv_words(bytes: &[u8]) -> Result<Vec<u32>> {
    if bytes.is_empty() || bytes.len() % 4 != 0 {
        bail!("SPIR-V blob length {} is not a multiple of 4.", bytes.len());
    }
    let words = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect::<Vec<_>>();
    if words[0] != SPIRV_MAGIC {
        bail!("Missing SPIR-V magic number (found {:#010x}).", words[0]);
    }
    Ok(words)
}

// Loads `.spv` files as precompiled SPIR-V, anything else as GLSL source.
pub fn load_shader(path: &Path, stage: ShaderStage) -> Result<Vec<u32>> {
    let is_binary = path.extension().is_some_and(|e| e == "spv");

    if is_binary {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {}", path.display()))?;
        return spirv_words(&bytes).with_context(|| format!("Invalid shader {}", path.display()));
    }

    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shader {}", path.display()))?;

    let compiler = shaderc::Compiler::new()
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("Failed to initialise the shader compiler."))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let compiled = compiler
        .compile_into_spirv(&source, stage.kind(), &file_name, "main", None)
        .map_err(|e| anyhow!("Failed to compile {:?} shader {}: {}", stage, path.display(), e))?;

    Ok(compiled.as_binary().to_vec())
}

unsafe fn create_shader_module(device: &Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::builder()
        .code_size(std::mem::size_of_val(code))
        .code(code);

    Ok(device.create_shader_module(&info, None)?)
}

pub struct ShaderPaths<'a> {
    pub vertex: &'a Path,
    pub fragment: &'a Path,
}

pub struct SpritePipeline {
    device: Rc<Device>,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set: vk::DescriptorSet,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl SpritePipeline {
    pub unsafe fn new(
        ctx: &GpuContext,
        render_pass: &RenderPass,
        sheet: &SpriteSheet,
        shaders: &ShaderPaths<'_>,
    ) -> Result<Self> {
        let vertex_code = load_shader(shaders.vertex, ShaderStage::Vertex)?;
        let fragment_code = load_shader(shaders.fragment, ShaderStage::Fragment)?;

        let device = ctx.device.clone();
        let mut result = Self {
            device: device.clone(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set: vk::DescriptorSet::null(),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        };

        let bindings = &[vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::FRAGMENT)
            .build()];

        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        result.descriptor_set_layout = device.create_descriptor_set_layout(&layout_info, None)?;

        let pool_sizes = &[vk::DescriptorPoolSize::builder()
            .type_(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .descriptor_count(1)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(pool_sizes)
            .max_sets(1);
        result.descriptor_pool = device.create_descriptor_pool(&pool_info, None)?;

        let set_layouts = &[result.descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(result.descriptor_pool)
            .set_layouts(set_layouts);
        result.descriptor_set = device.allocate_descriptor_sets(&alloc_info)?[0];

        let image_info = sheet.descriptor();
        let descriptor_write = vk::WriteDescriptorSet::builder()
            .dst_set(result.descriptor_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&image_info));
        device.update_descriptor_sets(
            std::slice::from_ref(&descriptor_write),
            &[] as &[vk::CopyDescriptorSet],
        );

        let push_constant_ranges = &[vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(size_of::<PushConstants>() as u32)
            .build()];

        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        result.layout = device.create_pipeline_layout(&layout_info, None)?;

        let vertex_module = create_shader_module(&device, &vertex_code)?;
        let fragment_module = match create_shader_module(&device, &fragment_code) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vertex_module, None);
                return Err(e);
            }
        };

        let pipeline = result.create_pipeline(render_pass, vertex_module, fragment_module);

        device.destroy_shader_module(vertex_module, None);
        device.destroy_shader_module(fragment_module, None);

        result.pipeline = pipeline?;
        Ok(result)
    }

    unsafe fn create_pipeline(
        &self,
        render_pass: &RenderPass,
        vertex_module: vk::ShaderModule,
        fragment_module: vk::ShaderModule,
    ) -> Result<vk::Pipeline> {
        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(ShaderStage::Vertex.flags())
            .module(vertex_module)
            .name(b"main\0");

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(ShaderStage::Fragment.flags())
            .module(fragment_module)
            .name(b"main\0");

        let binding_descriptions = &[
            Vertex::binding_description(),
            SpriteInstance::binding_description(),
        ];
        let attribute_descriptions = &SpriteInstance::attribute_descriptions();
        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(binding_descriptions)
            .vertex_attribute_descriptions(attribute_descriptions);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisample_state = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::_1);

        // Sprites are painted in draw order; the depth attachment is only cleared
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(false)
            .depth_write_enable(false)
            .depth_compare_op(vk::CompareOp::LESS_OR_EQUAL)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::all())
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD);

        let attachments = &[attachment];
        let color_blend_state = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        let dynamic_states = &[vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(dynamic_states);

        let stages = &[vert_stage, frag_stage];
        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(render_pass.handle())
            .subpass(0);

        let pipelines =
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[info], None)?;
        Ok(pipelines.0[0])
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }
}

impl Drop for SpritePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
            // Freeing the pool frees its set
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn spirv_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn spirv_blob_is_read_as_little_endian_words() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 7, 42, 0];
        assert_eq!(spirv_words(&spirv_bytes(&words)).unwrap(), words);
    }

    #[test]
    fn truncated_or_foreign_blobs_are_rejected() {
        let mut bytes = spirv_bytes(&[SPIRV_MAGIC, 1]);
        bytes.pop();
        assert!(spirv_words(&bytes).is_err());
        assert!(spirv_words(&[]).is_err());
        assert!(spirv_words(&spirv_bytes(&[0xdead_beef, 1])).is_err());
    }

    #[test]
    fn spv_extension_loads_binary_without_compiling() {
        let mut file = tempfile::Builder::new().suffix(".spv").tempfile().unwrap();
        let words = [SPIRV_MAGIC, 0x0001_0300, 0, 8, 0];
        file.write_all(&spirv_bytes(&words)).unwrap();

        let loaded = load_shader(file.path(), ShaderStage::Vertex).unwrap();

        assert_eq!(loaded, words);
    }

    #[test]
    fn missing_shader_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.frag.spv");

        let err = load_shader(&missing, ShaderStage::Fragment).unwrap_err();

        assert!(err.to_string().contains("missing.frag.spv"));
    }

    #[test]
    fn push_constants_hold_one_matrix() {
        assert_eq!(size_of::<PushConstants>(), 64);
    }
}
