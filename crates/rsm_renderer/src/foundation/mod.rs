//! Foundation module - Core utilities and types
//!
//! - Math types and Vulkan-space projection helpers
//! - Logging initialisation

pub mod logging;
pub mod math;
