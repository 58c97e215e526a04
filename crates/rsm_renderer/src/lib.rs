//! # RSM Renderer
//!
//! A Vulkan deferred renderer with reflective shadow map global illumination.
//!
//! ## Features
//!
//! - **Deferred shading**: G-Buffer, full-screen PBR direct lighting with PCF shadows
//! - **Reflective shadow maps**: light-view position, normal and flux in a 2×2 atlas
//! - **Indirect light**: half-resolution one-bounce gather, blended by a compute pass
//! - **Synthesized barriers**: layout transitions derived from pass manifests and audited
//! - **Reference pipeline**: host-side rendition of every pass for tests and headless output
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rsm_renderer::prelude::*;
//!
//! fn frame(scene: &Scene, camera: &Camera) -> Result<(), RenderError> {
//!     let mut reference = ReferenceRenderer::new(&RendererConfig::default(), 640, 480)?;
//!     let frame = reference.render(scene, camera, &RendererState::default())?;
//!     log::info!("drew {} batches", frame.stats.gbuffer.visible);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod foundation;
pub mod render;
pub mod scene;

/// Common imports for renderer users
pub mod prelude {
    pub use crate::{
        config::{Config, ConfigError, RendererConfig},
        foundation::math::{Mat4, Mat4Ext, Vec2, Vec3, Vec4},
        render::{
            reference::{ReferenceFrame, ReferenceRenderer},
            DeviceContext, ExternalPasses, FrameStats, NoExternalPasses, Presenter, RenderError, RenderResult,
            Renderer, RendererState,
        },
        scene::{Camera, Light, LightKind, Material, Mesh, MeshData, Primitive, Scene, SceneCollaborator},
    };
}
