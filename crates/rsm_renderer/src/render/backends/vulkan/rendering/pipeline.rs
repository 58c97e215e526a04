//! Graphics and compute pipelines

use ash::{vk, Device};

use super::shader::ShaderModule;
use super::vertex_layout::VulkanVertexLayout;
use crate::render::backends::vulkan::{RenderError, RenderResult};
use crate::scene::MaterialFlags;

/// Fixed-function state of a graphics pipeline
#[derive(Debug, Clone, Copy)]
pub struct GraphicsPipelineDesc {
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Subpass index
    pub subpass: u32,
    /// Consume the scene vertex buffer; fullscreen passes generate vertices
    pub vertex_input: bool,
    /// Colour attachments written
    pub color_attachments: u32,
    /// Add the output to the attachment instead of replacing it
    pub additive_blend: bool,
    /// Depth test enabled
    pub depth_test: bool,
    /// Depth writes enabled
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare: vk::CompareOp,
    /// Faces culled
    pub cull_mode: vk::CullModeFlags,
}

impl GraphicsPipelineDesc {
    /// Scene geometry with depth test and write
    pub fn geometry(render_pass: vk::RenderPass, color_attachments: u32, depth_compare: vk::CompareOp) -> Self {
        Self {
            render_pass,
            subpass: 0,
            vertex_input: true,
            color_attachments,
            additive_blend: false,
            depth_test: true,
            depth_write: true,
            depth_compare,
            cull_mode: vk::CullModeFlags::BACK,
        }
    }

    /// Fullscreen triangle without depth
    pub fn fullscreen(render_pass: vk::RenderPass, color_attachments: u32) -> Self {
        Self {
            render_pass,
            subpass: 0,
            vertex_input: false,
            color_attachments,
            additive_blend: false,
            depth_test: false,
            depth_write: false,
            depth_compare: vk::CompareOp::ALWAYS,
            cull_mode: vk::CullModeFlags::NONE,
        }
    }

    /// Blend `src + dst` into every colour attachment
    pub fn additive(mut self) -> Self {
        self.additive_blend = true;
        self
    }

    /// Cull according to the material's double-sidedness
    pub fn with_material(mut self, flags: MaterialFlags) -> Self {
        self.cull_mode = cull_mode_for(flags);
        self
    }
}

/// `NONE` for double-sided materials, `BACK` otherwise
pub fn cull_mode_for(flags: MaterialFlags) -> vk::CullModeFlags {
    if flags.contains(MaterialFlags::DOUBLE_SIDED) {
        vk::CullModeFlags::NONE
    } else {
        vk::CullModeFlags::BACK
    }
}

/// Pipeline and its layout with RAII cleanup
pub struct Pipeline {
    device: Device,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    /// Create a graphics pipeline with dynamic viewport and scissor
    pub fn graphics(
        device: &Device,
        desc: &GraphicsPipelineDesc,
        vertex_shader: &ShaderModule,
        fragment_shader: &ShaderModule,
        set_layouts: &[vk::DescriptorSetLayout],
    ) -> RenderResult<Self> {
        let layout = create_layout(device, set_layouts)?;
        let stages = [vertex_shader.stage_info(), fragment_shader.stage_info()];

        let bindings = [VulkanVertexLayout::binding_description()];
        let attributes = VulkanVertexLayout::attribute_descriptions();
        let vertex_input = if desc.vertex_input {
            vk::PipelineVertexInputStateCreateInfo::builder()
                .vertex_binding_descriptions(&bindings)
                .vertex_attribute_descriptions(&attributes)
                .build()
        } else {
            vk::PipelineVertexInputStateCreateInfo::default()
        };

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        // World-space CCW stays CCW after the Y/Z flip of the projection
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(desc.cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(desc.depth_test)
            .depth_write_enable(desc.depth_write)
            .depth_compare_op(desc.depth_compare);

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = (0..desc.color_attachments)
            .map(|_| {
                vk::PipelineColorBlendAttachmentState::builder()
                    .color_write_mask(vk::ColorComponentFlags::RGBA)
                    .blend_enable(desc.additive_blend)
                    .src_color_blend_factor(vk::BlendFactor::ONE)
                    .dst_color_blend_factor(vk::BlendFactor::ONE)
                    .color_blend_op(vk::BlendOp::ADD)
                    .src_alpha_blend_factor(vk::BlendFactor::ONE)
                    .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                    .alpha_blend_op(vk::BlendOp::ADD)
                    .build()
            })
            .collect();
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(desc.render_pass)
            .subpass(desc.subpass)
            .build();

        let result =
            unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
        Self::finish(device, result, layout, vk::PipelineBindPoint::GRAPHICS)
    }

    /// Create a compute pipeline
    pub fn compute(device: &Device, shader: &ShaderModule, set_layouts: &[vk::DescriptorSetLayout]) -> RenderResult<Self> {
        let layout = create_layout(device, set_layouts)?;
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(shader.stage_info())
            .layout(layout)
            .build();
        let result = unsafe { device.create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None) };
        Self::finish(device, result, layout, vk::PipelineBindPoint::COMPUTE)
    }

    fn finish(
        device: &Device,
        result: Result<Vec<vk::Pipeline>, (Vec<vk::Pipeline>, vk::Result)>,
        layout: vk::PipelineLayout,
        bind_point: vk::PipelineBindPoint,
    ) -> RenderResult<Self> {
        match result {
            Ok(pipelines) => match pipelines.first() {
                Some(&pipeline) => {
                    log::debug!("[PIPELINE] Created {bind_point:?} pipeline {pipeline:?}");
                    Ok(Self {
                        device: device.clone(),
                        pipeline,
                        layout,
                        bind_point,
                    })
                }
                None => {
                    unsafe { device.destroy_pipeline_layout(layout, None) };
                    Err(RenderError::InitializationFailed("driver returned no pipeline".to_string()))
                }
            },
            Err((_, error)) => {
                log::error!("[PIPELINE] Pipeline creation failed: {error:?}");
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(RenderError::Api(error))
            }
        }
    }

    /// Get pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// Get layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Graphics or compute
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    /// Bind the pipeline
    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_bind_pipeline(cmd, self.bind_point, self.pipeline) };
    }

    /// Bind `sets` starting at set 0
    pub fn bind_sets(&self, cmd: vk::CommandBuffer, sets: &[vk::DescriptorSet], dynamic_offsets: &[u32]) {
        unsafe {
            self.device
                .cmd_bind_descriptor_sets(cmd, self.bind_point, self.layout, 0, sets, dynamic_offsets);
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.pipeline, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_layout(device: &Device, set_layouts: &[vk::DescriptorSetLayout]) -> RenderResult<vk::PipelineLayout> {
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(set_layouts);
    Ok(unsafe { device.create_pipeline_layout(&layout_info, None) }?)
}

/// Viewport covering `rect` with the full depth range
pub fn viewport_for(rect: vk::Rect2D) -> vk::Viewport {
    vk::Viewport {
        x: rect.offset.x as f32,
        y: rect.offset.y as f32,
        width: rect.extent.width as f32,
        height: rect.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

/// Set the dynamic viewport and scissor to `rect`
pub fn set_viewport_and_scissor(device: &Device, cmd: vk::CommandBuffer, rect: vk::Rect2D) {
    unsafe {
        device.cmd_set_viewport(cmd, 0, &[viewport_for(rect)]);
        device.cmd_set_scissor(cmd, 0, &[rect]);
    }
}
