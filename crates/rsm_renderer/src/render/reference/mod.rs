//! Host-side reference pipeline
//!
//! A software rendition of the deferred RSM frame used to check the GPU
//! passes against known-good images and to render without a device.

pub mod image;
pub mod passes;
pub mod raster;
pub mod shading;

pub use image::{Image2D, Rect};
pub use passes::{ReferenceFrame, ReferenceRenderer, SurfaceOutput, SurfaceTargets};
pub use raster::{Cull, Fragment, Rasterizer};
pub use shading::{LightSurfaces, Surface};
