//! Renderer configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{Config, ConfigError};

/// Tunables of the deferred RSM pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Frames in flight; sizes the constant ring and the command ring
    pub back_buffer_count: u32,
    /// Command buffers available to one frame
    pub command_lists_per_back_buffer: u32,
    /// Total bytes of the per-frame constant ring, split evenly across frames
    pub constant_ring_size: u64,
    /// Edge of one RSM quadrant in texels; the atlas is twice this per axis
    pub shadow_map_size: u32,
    /// Direct/indirect blend weight used by the aggregator, in [0, 1]
    pub di_weight: f32,
    /// Image-based lighting intensity written to the per-frame constants
    pub ibl_factor: f32,
    /// Emissive intensity written to the per-frame constants
    pub emissive_factor: f32,
    /// Seed for the RSM sample offsets and rotation noise
    pub sample_seed: u64,
    /// Number of RSM samples gathered per pixel
    pub sample_count: u32,
    /// Edge of the square rotation-noise texture
    pub noise_dimension: u32,
    /// Directory searched first for SPIR-V and GLSL shaders
    pub shader_dir: PathBuf,
    /// Worker threads used to build pipelines at scene load
    pub pipeline_workers: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            back_buffer_count: 3,
            command_lists_per_back_buffer: 8,
            constant_ring_size: 20 * 1024 * 1024,
            shadow_map_size: 1024,
            di_weight: 0.5,
            ibl_factor: 0.36,
            emissive_factor: 1.0,
            sample_seed: 0x5EED_2005,
            sample_count: 100,
            noise_dimension: 64,
            shader_dir: PathBuf::from("target/shaders"),
            pipeline_workers: 4,
        }
    }
}

impl Config for RendererConfig {}

impl RendererConfig {
    /// Check ranges and clamp soft limits
    ///
    /// Hard errors are values the pipeline cannot be built with; `di_weight`
    /// is clamped into [0, 1] instead.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.back_buffer_count == 0 {
            return Err(ConfigError::Invalid {
                field: "back_buffer_count",
                reason: "at least one frame must be in flight".to_string(),
            });
        }
        if self.command_lists_per_back_buffer < 2 {
            return Err(ConfigError::Invalid {
                field: "command_lists_per_back_buffer",
                reason: "a frame records two command buffers".to_string(),
            });
        }
        if self.shadow_map_size == 0 {
            return Err(ConfigError::Invalid {
                field: "shadow_map_size",
                reason: "must be non-zero".to_string(),
            });
        }
        if self.sample_count == 0 || self.noise_dimension == 0 {
            return Err(ConfigError::Invalid {
                field: "sample_count",
                reason: "sample count and noise dimension must be non-zero".to_string(),
            });
        }
        if self.constant_ring_size < u64::from(self.back_buffer_count) * 64 * 1024 {
            return Err(ConfigError::Invalid {
                field: "constant_ring_size",
                reason: format!("{} bytes is too small for {} frames", self.constant_ring_size, self.back_buffer_count),
            });
        }
        if !(0.0..=1.0).contains(&self.di_weight) {
            log::warn!("di_weight {} outside [0, 1], clamping", self.di_weight);
            self.di_weight = self.di_weight.clamp(0.0, 1.0);
        }
        self.pipeline_workers = self.pipeline_workers.max(1);
        Ok(self)
    }

    /// Size of the RSM atlas: two quadrants per axis
    pub fn atlas_size(&self) -> u32 {
        self.shadow_map_size * 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let config = RendererConfig::default();
        assert_eq!(config.back_buffer_count, 3);
        assert_eq!(config.command_lists_per_back_buffer, 8);
        assert_eq!(config.constant_ring_size, 20 * 1024 * 1024);
        assert_eq!(config.shadow_map_size, 1024);
        assert_eq!(config.atlas_size(), 2048);
        assert_eq!(config.sample_count, 100);
        assert_eq!(config.noise_dimension, 64);
        assert!((config.di_weight - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RendererConfig = toml::from_str("di_weight = 0.25\nshadow_map_size = 512").unwrap();
        assert!((config.di_weight - 0.25).abs() < f32::EPSILON);
        assert_eq!(config.shadow_map_size, 512);
        assert_eq!(config.back_buffer_count, 3);
    }

    #[test]
    fn test_ron_round_trip_through_file() {
        let dir = std::env::temp_dir().join(format!("rsm_renderer_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("renderer.ron");

        let config = RendererConfig { di_weight: 0.75, ..RendererConfig::default() };
        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();

        assert_eq!(loaded, config);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_unsupported_extension_is_rejected() {
        let result = RendererConfig::load_from_file("renderer.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_validation_clamps_weight_and_rejects_zero_frames() {
        let clamped = RendererConfig { di_weight: 1.5, ..RendererConfig::default() }
            .validated()
            .unwrap();
        assert!((clamped.di_weight - 1.0).abs() < f32::EPSILON);

        let zero_frames = RendererConfig { back_buffer_count: 0, ..RendererConfig::default() };
        assert!(matches!(zero_frames.validated(), Err(ConfigError::Invalid { field: "back_buffer_count", .. })));
    }
}
