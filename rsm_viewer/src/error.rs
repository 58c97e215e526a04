//! Viewer errors

use rsm_renderer::config::ConfigError;
use rsm_renderer::render::RenderError;
use thiserror::Error;

use crate::window::WindowError;

/// Anything that stops the viewer
#[derive(Error, Debug)]
pub enum ViewerError {
    /// Bad command line
    #[error("{0}")]
    Usage(String),

    /// Window system failure
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Renderer failure
    #[error(transparent)]
    Render(#[from] RenderError),

    /// Unreadable configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Writing the reference image failed
    #[error("Image output failed: {0}")]
    Image(#[from] image::ImageError),
}

/// Result alias for the viewer
pub type ViewerResult<T> = Result<T, ViewerError>;
