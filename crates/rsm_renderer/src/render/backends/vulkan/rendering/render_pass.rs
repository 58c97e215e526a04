//! Single-subpass render passes and framebuffers
//!
//! Every pass of the pipeline uses exactly one subpass. Layout changes between
//! passes are issued by the transition controller, so each attachment here
//! declares the layout it is in when the pass starts and leaves it in the
//! subpass layout.

use ash::{vk, Device};

use crate::render::backends::vulkan::RenderResult;

/// How an attachment is used by the subpass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentRole {
    /// Colour output
    Color,
    /// Depth output
    Depth,
    /// Subpass input read by the fragment shader
    Input,
}

/// One framebuffer attachment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachmentDesc {
    /// Image format
    pub format: vk::Format,
    /// Role in the subpass
    pub role: AttachmentRole,
    /// Load operation
    pub load_op: vk::AttachmentLoadOp,
    /// Layout when the render pass begins
    pub initial_layout: vk::ImageLayout,
    /// Layout during the subpass and after it
    pub layout: vk::ImageLayout,
}

impl AttachmentDesc {
    /// Colour target cleared at the start of the pass
    pub fn color_clear(format: vk::Format) -> Self {
        Self {
            format,
            role: AttachmentRole::Color,
            load_op: vk::AttachmentLoadOp::CLEAR,
            initial_layout: vk::ImageLayout::UNDEFINED,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    /// Colour target whose contents are kept and added to
    pub fn color_load(format: vk::Format) -> Self {
        Self {
            format,
            role: AttachmentRole::Color,
            load_op: vk::AttachmentLoadOp::LOAD,
            initial_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        }
    }

    /// Depth target cleared to 1.0
    pub fn depth_clear(format: vk::Format) -> Self {
        Self {
            format,
            role: AttachmentRole::Depth,
            load_op: vk::AttachmentLoadOp::CLEAR,
            initial_layout: vk::ImageLayout::UNDEFINED,
            layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        }
    }

    /// Input attachment already transitioned for shader reads
    pub fn input(format: vk::Format) -> Self {
        Self {
            format,
            role: AttachmentRole::Input,
            load_op: vk::AttachmentLoadOp::LOAD,
            initial_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    fn description(&self) -> vk::AttachmentDescription {
        // Inputs are stored too: later passes of the frame sample them
        vk::AttachmentDescription {
            format: self.format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: self.load_op,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: self.initial_layout,
            final_layout: self.layout,
            ..Default::default()
        }
    }
}

/// References of one subpass, grouped by role
#[derive(Debug, Default)]
pub struct SubpassRefs {
    /// Colour outputs in declaration order
    pub color: Vec<vk::AttachmentReference>,
    /// Inputs in declaration order
    pub input: Vec<vk::AttachmentReference>,
    /// Depth output, if any
    pub depth: Option<vk::AttachmentReference>,
}

impl SubpassRefs {
    /// Group `attachments` by role
    pub fn from_attachments(attachments: &[AttachmentDesc]) -> Self {
        let mut refs = Self::default();
        for (index, attachment) in attachments.iter().enumerate() {
            let reference = vk::AttachmentReference {
                attachment: index as u32,
                layout: attachment.layout,
            };
            match attachment.role {
                AttachmentRole::Color => refs.color.push(reference),
                AttachmentRole::Input => refs.input.push(reference),
                AttachmentRole::Depth => refs.depth = Some(reference),
            }
        }
        refs
    }
}

// Orders the pass after the previous frame's use of the same images
fn external_dependency() -> vk::SubpassDependency {
    vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS
            | vk::PipelineStageFlags::FRAGMENT_SHADER
            | vk::PipelineStageFlags::COMPUTE_SHADER,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
            | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
            | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ
            | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }
}

/// Render pass wrapper with RAII cleanup
pub struct RenderPass {
    device: Device,
    render_pass: vk::RenderPass,
    attachments: Vec<AttachmentDesc>,
}

impl RenderPass {
    /// Create a single-subpass render pass over `attachments`
    pub fn new(device: &Device, name: &str, attachments: &[AttachmentDesc]) -> RenderResult<Self> {
        let descriptions: Vec<vk::AttachmentDescription> = attachments.iter().map(AttachmentDesc::description).collect();
        let refs = SubpassRefs::from_attachments(attachments);

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&refs.color)
            .input_attachments(&refs.input);
        if let Some(depth) = refs.depth.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth);
        }
        let subpasses = [subpass.build()];
        let dependencies = [external_dependency()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&descriptions)
            .subpasses(&subpasses)
            .dependencies(&dependencies);
        let render_pass = unsafe { device.create_render_pass(&create_info, None) }?;
        log::debug!("Created render pass '{name}' with {} attachments", attachments.len());

        Ok(Self {
            device: device.clone(),
            render_pass,
            attachments: attachments.to_vec(),
        })
    }

    /// Get the render pass handle
    pub fn handle(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Attachments in framebuffer order
    pub fn attachments(&self) -> &[AttachmentDesc] {
        &self.attachments
    }

    /// Number of colour outputs
    pub fn color_count(&self) -> u32 {
        self.attachments
            .iter()
            .filter(|a| a.role == AttachmentRole::Color)
            .count() as u32
    }

    /// Clear values in attachment order: colours to `clear_color`, depth to 1.0
    pub fn clear_values(&self, clear_color: [f32; 4]) -> Vec<vk::ClearValue> {
        self.attachments
            .iter()
            .map(|a| match a.role {
                AttachmentRole::Depth => vk::ClearValue {
                    depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
                },
                _ => vk::ClearValue {
                    color: vk::ClearColorValue { float32: clear_color },
                },
            })
            .collect()
    }

    /// Begin the pass over the whole framebuffer
    pub fn begin(&self, cmd: vk::CommandBuffer, framebuffer: &Framebuffer, clear_values: &[vk::ClearValue]) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(self.render_pass)
            .framebuffer(framebuffer.handle())
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: framebuffer.extent(),
            })
            .clear_values(clear_values);
        unsafe {
            self.device
                .cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    /// End the pass
    pub fn end(&self, cmd: vk::CommandBuffer) {
        unsafe { self.device.cmd_end_render_pass(cmd) };
    }
}

impl Drop for RenderPass {
    fn drop(&mut self) {
        unsafe { self.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Framebuffer wrapper with RAII cleanup
pub struct Framebuffer {
    device: Device,
    framebuffer: vk::Framebuffer,
    extent: vk::Extent2D,
}

impl Framebuffer {
    /// Create a framebuffer binding `views` in the render pass's attachment order
    pub fn new(device: &Device, render_pass: &RenderPass, views: &[vk::ImageView], extent: vk::Extent2D) -> RenderResult<Self> {
        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass.handle())
            .attachments(views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { device.create_framebuffer(&create_info, None) }?;
        Ok(Self {
            device: device.clone(),
            framebuffer,
            extent,
        })
    }

    /// Get the framebuffer handle
    pub fn handle(&self) -> vk::Framebuffer {
        self.framebuffer
    }

    /// Size of every attachment
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        unsafe { self.device.destroy_framebuffer(self.framebuffer, None) };
    }
}
