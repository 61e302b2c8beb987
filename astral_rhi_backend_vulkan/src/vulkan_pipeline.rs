//! Vulkan pipeline states
//!
//! Vulkan bakes vertex strides into the pipeline, but the RHI supplies them
//! at `bind_vertex_buffer` time. A graphics pipeline therefore compiles
//! variants lazily: the recorder combines the pipeline cache key with its
//! vertex-stride digest at draw time and asks for the matching variant.
//! Compute pipelines have no strides and compile eagerly.

use std::ffi::CStr;
use std::sync::{Arc, Mutex};

use ash::vk;
use rustc_hash::FxHashMap;

use astral_rhi::{
    rhi_err, ComputePipelineDesc, GraphicsPipelineDesc, PipelineBindPoint, PipelineState,
    RhiResult, Shader,
};

use crate::vulkan_context::GpuContext;
use crate::vulkan_convert::{
    blend_factor_to_vk, blend_op_to_vk, compare_op_to_vk, cull_mode_to_vk, fill_mode_to_vk,
    format_to_vk, shader_stage_to_vk, stencil_op_to_vk, topology_to_vk, vertex_input_rate_to_vk,
};
use crate::vulkan_destroy::Zombie;
use crate::vulkan_shader::VulkanShader;

const ENTRY_POINT: &CStr = c"main";

/// Vulkan pipeline state
pub struct VulkanPipeline {
    key: u64,
    bind_point: PipelineBindPoint,
    /// Retained for lazy variant compilation (graphics only)
    graphics_desc: Option<GraphicsPipelineDesc>,
    /// The single pipeline for compute; empty for graphics
    compute_pipeline: Option<vk::Pipeline>,
    /// Stride-digest variants compiled so far
    variants: Mutex<FxHashMap<u64, vk::Pipeline>>,
    debug_name: Option<String>,
    ctx: Arc<GpuContext>,
}

fn shader_module(shader: &astral_rhi::ShaderHandle) -> vk::ShaderModule {
    shader
        .as_any()
        .downcast_ref::<VulkanShader>()
        .map(|s| s.module)
        .unwrap_or(vk::ShaderModule::null())
}

impl VulkanPipeline {
    pub fn graphics(ctx: Arc<GpuContext>, desc: GraphicsPipelineDesc) -> RhiResult<Self> {
        let key = desc.cache_key();
        let debug_name = desc.debug_name.clone();
        Ok(Self {
            key,
            bind_point: PipelineBindPoint::Graphics,
            graphics_desc: Some(desc),
            compute_pipeline: None,
            variants: Mutex::new(FxHashMap::default()),
            debug_name,
            ctx,
        })
    }

    pub fn compute(ctx: Arc<GpuContext>, desc: ComputePipelineDesc) -> RhiResult<Self> {
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module(&desc.compute_shader))
            .name(ENTRY_POINT);

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(stage)
            .layout(ctx.bindless.pipeline_layout());

        let pipeline = unsafe {
            ctx.device
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|e| rhi_err!("Failed to create compute pipeline: {:?}", e.1))?[0]
        };
        ctx.set_object_name(pipeline, desc.debug_name.as_deref());

        Ok(Self {
            key: desc.cache_key(),
            bind_point: PipelineBindPoint::Compute,
            graphics_desc: None,
            compute_pipeline: Some(pipeline),
            variants: Mutex::new(FxHashMap::default()),
            debug_name: desc.debug_name,
            ctx,
        })
    }

    /// The compute pipeline; null for graphics states
    pub(crate) fn compute_pipeline(&self) -> vk::Pipeline {
        self.compute_pipeline.unwrap_or(vk::Pipeline::null())
    }

    /// Get (or compile) the graphics variant for the given combined key and
    /// vertex strides
    pub(crate) fn variant(
        &self,
        combined_key: u64,
        strides: &FxHashMap<u32, u32>,
    ) -> RhiResult<vk::Pipeline> {
        let mut variants = self.variants.lock().unwrap();
        if let Some(pipeline) = variants.get(&combined_key) {
            return Ok(*pipeline);
        }
        let pipeline = self.compile_variant(strides)?;
        variants.insert(combined_key, pipeline);
        Ok(pipeline)
    }

    fn compile_variant(&self, strides: &FxHashMap<u32, u32>) -> RhiResult<vk::Pipeline> {
        let desc = self
            .graphics_desc
            .as_ref()
            .ok_or_else(|| rhi_err!("variant() called on a non-graphics pipeline"))?;

        // Mesh pipelines arrive with a Mesh-stage shader in the vertex slot
        let mut stages = vec![vk::PipelineShaderStageCreateInfo::default()
            .stage(shader_stage_to_vk(desc.vertex_shader.stage()))
            .module(shader_module(&desc.vertex_shader))
            .name(ENTRY_POINT)];
        if let Some(ps) = &desc.pixel_shader {
            stages.push(
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(vk::ShaderStageFlags::FRAGMENT)
                    .module(shader_module(ps))
                    .name(ENTRY_POINT),
            );
        }

        // Vertex input: one binding per slot referenced by the attributes,
        // stride taken from the bind-time map
        let mut bindings: Vec<vk::VertexInputBindingDescription> = Vec::new();
        let attributes: Vec<vk::VertexInputAttributeDescription> = desc
            .input_layout
            .attributes
            .iter()
            .map(|attr| {
                if !bindings.iter().any(|b| b.binding == attr.binding) {
                    bindings.push(vk::VertexInputBindingDescription {
                        binding: attr.binding,
                        stride: strides.get(&attr.binding).copied().unwrap_or(0),
                        input_rate: vertex_input_rate_to_vk(attr.input_rate),
                    });
                }
                vk::VertexInputAttributeDescription {
                    location: attr.location,
                    binding: attr.binding,
                    format: format_to_vk(attr.format),
                    offset: attr.offset,
                }
            })
            .collect();

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly_state = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(topology_to_vk(desc.topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let raster = &desc.rasterizer;
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(fill_mode_to_vk(raster.fill_mode))
            .cull_mode(cull_mode_to_vk(raster.cull_mode))
            .front_face(if raster.front_counter_clockwise {
                vk::FrontFace::COUNTER_CLOCKWISE
            } else {
                vk::FrontFace::CLOCKWISE
            })
            .depth_bias_enable(raster.depth_bias != 0.0 || raster.depth_bias_slope != 0.0)
            .depth_bias_constant_factor(raster.depth_bias)
            .depth_bias_slope_factor(raster.depth_bias_slope)
            .depth_clamp_enable(!raster.depth_clip)
            .line_width(1.0);

        let sample_count = desc.render_target_formats.sample_count.max(1);
        let sample_mask = [desc.sample_mask];
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::from_raw(sample_count))
            .sample_mask(&sample_mask)
            .alpha_to_coverage_enable(desc.blend.alpha_to_coverage);

        let ds = &desc.depth_stencil;
        let stencil_op = |fail, depth_fail, pass, compare| {
            vk::StencilOpState {
                fail_op: stencil_op_to_vk(fail),
                pass_op: stencil_op_to_vk(pass),
                depth_fail_op: stencil_op_to_vk(depth_fail),
                compare_op: compare_op_to_vk(compare),
                compare_mask: ds.stencil_read_mask as u32,
                write_mask: ds.stencil_write_mask as u32,
                reference: 0, // dynamic
            }
        };
        let depth_stencil_state = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(ds.depth_test)
            .depth_write_enable(ds.depth_write)
            .depth_compare_op(compare_op_to_vk(ds.depth_compare))
            .stencil_test_enable(ds.stencil_test)
            .front(stencil_op(
                ds.front_fail,
                ds.front_depth_fail,
                ds.front_pass,
                ds.front_compare,
            ))
            .back(stencil_op(
                ds.back_fail,
                ds.back_depth_fail,
                ds.back_pass,
                ds.back_compare,
            ));

        let color_count = desc.render_target_formats.color.len();
        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..color_count)
            .map(|i| {
                let target = desc
                    .blend
                    .targets
                    .get(i)
                    .copied()
                    .unwrap_or_default();
                vk::PipelineColorBlendAttachmentState::default()
                    .blend_enable(target.blend_enable)
                    .src_color_blend_factor(blend_factor_to_vk(target.src_color))
                    .dst_color_blend_factor(blend_factor_to_vk(target.dst_color))
                    .color_blend_op(blend_op_to_vk(target.color_op))
                    .src_alpha_blend_factor(blend_factor_to_vk(target.src_alpha))
                    .dst_alpha_blend_factor(blend_factor_to_vk(target.dst_alpha))
                    .alpha_blend_op(blend_op_to_vk(target.alpha_op))
                    .color_write_mask(vk::ColorComponentFlags::from_raw(target.write_mask as u32))
            })
            .collect();
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);

        let mut dynamic_states = vec![
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::STENCIL_REFERENCE,
            vk::DynamicState::BLEND_CONSTANTS,
        ];
        if self.ctx.shading_rate_loader.is_some() {
            dynamic_states.push(vk::DynamicState::FRAGMENT_SHADING_RATE_KHR);
        }
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        // Dynamic rendering: attachment formats instead of a render pass object
        let color_formats: Vec<vk::Format> = desc
            .render_target_formats
            .color
            .iter()
            .map(|f| format_to_vk(*f))
            .collect();
        let mut rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&color_formats);
        if let Some(depth) = desc.render_target_formats.depth_stencil {
            rendering_info = rendering_info.depth_attachment_format(format_to_vk(depth));
            if depth.has_stencil() {
                rendering_info = rendering_info.stencil_attachment_format(format_to_vk(depth));
            }
        }

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .depth_stencil_state(&depth_stencil_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(self.ctx.bindless.pipeline_layout())
            .push_next(&mut rendering_info);

        let pipeline = unsafe {
            self.ctx
                .device
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|e| rhi_err!("Failed to create graphics pipeline: {:?}", e.1))?[0]
        };
        self.ctx.set_object_name(pipeline, self.debug_name.as_deref());
        Ok(pipeline)
    }
}

impl PipelineState for VulkanPipeline {
    fn cache_key(&self) -> u64 {
        self.key
    }

    fn bind_point(&self) -> PipelineBindPoint {
        self.bind_point
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

impl Drop for VulkanPipeline {
    fn drop(&mut self) {
        if let Some(pipeline) = self.compute_pipeline.take() {
            self.ctx.destroy.push(Zombie::Pipeline(pipeline));
        }
        for (_, pipeline) in self.variants.lock().unwrap().drain() {
            self.ctx.destroy.push(Zombie::Pipeline(pipeline));
        }
    }
}
