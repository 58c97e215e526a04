//! Vulkan rendering components: shaders, pipelines, render passes, commands

pub mod commands;
pub mod pipeline;
pub mod render_pass;
pub mod shader;
pub mod vertex_layout;

pub use commands::{begin_one_time, submit_one_time, CommandPool, CommandRing, RingCursor, SlotFence, SlotWait};
pub use pipeline::{cull_mode_for, set_viewport_and_scissor, GraphicsPipelineDesc, Pipeline};
pub use render_pass::{AttachmentDesc, AttachmentRole, Framebuffer, RenderPass};
pub use shader::{ShaderCache, ShaderLocator, ShaderModule, ShaderStage};
pub use vertex_layout::VulkanVertexLayout;
