//! Viewer configuration

use rsm_renderer::config::{Config, RendererConfig};
use serde::{Deserialize, Serialize};

/// Window, camera and renderer settings of the viewer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// Window width in screen coordinates
    pub width: u32,
    /// Window height in screen coordinates
    pub height: u32,
    /// Open on the primary monitor
    pub fullscreen: bool,
    /// Enable the Khronos validation layer
    pub validation: bool,
    /// Vertical field of view in radians
    pub fov: f32,
    /// Near clip plane
    pub near: f32,
    /// Far clip plane
    pub far: f32,
    /// Multiplier applied before tone mapping
    pub exposure: f32,
    /// Pipeline tunables
    pub renderer: RendererConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            fullscreen: false,
            validation: cfg!(debug_assertions),
            fov: std::f32::consts::FRAC_PI_4,
            near: 0.1,
            far: 1000.0,
            exposure: 1.0,
            renderer: RendererConfig::default(),
        }
    }
}

impl Config for ViewerConfig {}
