//! # Rendering System
//!
//! Deferred renderer with one-bounce global illumination from reflective
//! shadow maps.
//!
//! ## Frame
//!
//! - **G-Buffer**: camera-view world position, normal, albedo, specular, motion and an HDR seed
//! - **RSM**: per-light world position, normal and flux into one quadrant of a 2×2 atlas
//! - **Direct lighting**: full-screen PBR shading with PCF shadows, added onto the HDR target
//! - **Indirect lighting**: half-resolution irradiance gathered from the RSM
//! - **Aggregator**: compute blend of direct and upsampled indirect light
//!
//! Image layout transitions between the phases come from [`transitions`],
//! which synthesizes them from per-pass manifests and audits the result.

/// Graphics backend implementations
pub mod backends;

pub mod batch;
pub mod constants;
pub mod defines;
pub mod frustum;
pub mod passes;
pub mod reference;
pub mod renderer;
pub mod ring;
pub mod sampling;
pub mod transitions;

pub use backends::vulkan::{DeviceContext, RenderError, RenderResult};
pub use batch::{Batch, BatchBuilder, BatchLists, BatchStats, EveryPrimitive, PrimitiveStates};
pub use constants::{LightConstants, PerFrameConstants, PerObjectConstants, MAX_LIGHTS};
pub use renderer::{
    ExternalPasses, FrameContext, FrameStats, NoExternalPasses, Presenter, Renderer, RendererState, LOAD_DONE,
};
pub use ring::{ConstantAllocation, ConstantRing};
pub use sampling::{RotationNoise, SamplingKernel};
