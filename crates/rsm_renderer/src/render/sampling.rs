//! RSM sampling kernel
//!
//! The indirect pass gathers a fixed set of offsets around the shading point's
//! projection in the RSM, each rotated by a per-pixel angle read from a tiled
//! noise texture. Both are generated once from a seeded [`StdRng`], so two
//! pipelines built with the same seed sample identically.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::foundation::math::{constants, Vec2};

/// Standard deviation of the offset distribution
pub const OFFSET_SIGMA: f32 = 0.36;

/// Kernel radius in quadrant UV units; offsets are scaled by it before sampling
pub const SAMPLE_RADIUS: f32 = 0.2;

/// Disk-biased sample offsets in [-1, 1]²
#[derive(Debug, Clone, PartialEq)]
pub struct SamplingKernel {
    offsets: Vec<Vec2>,
}

impl SamplingKernel {
    /// `count` offsets with both coordinates drawn from N(0, σ) truncated to [-1, 1]
    pub fn generate(seed: u64, count: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let offsets = (0..count)
            .map(|_| Vec2::new(truncated_normal(&mut rng), truncated_normal(&mut rng)))
            .collect();
        Self { offsets }
    }

    /// Offsets in generation order
    pub fn offsets(&self) -> &[Vec2] {
        &self.offsets
    }

    /// Number of offsets
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether the kernel is empty
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Weight of sample `i`: its squared x offset
    pub fn weight(offset: &Vec2) -> f32 {
        offset.x * offset.x
    }

    /// std140 payload: two offsets per `vec4`, odd counts padded with zero
    pub fn to_uniform_data(&self) -> Vec<[f32; 4]> {
        self.offsets
            .chunks(2)
            .map(|pair| match pair {
                [a, b] => [a.x, a.y, b.x, b.y],
                [a] => [a.x, a.y, 0.0, 0.0],
                _ => [0.0; 4],
            })
            .collect()
    }
}

/// Tileable per-texel rotation amounts in [0, 1)
#[derive(Debug, Clone, PartialEq)]
pub struct RotationNoise {
    dimension: u32,
    values: Vec<f32>,
}

impl RotationNoise {
    /// `dimension²` uniform values, row-major
    pub fn generate(seed: u64, dimension: u32) -> Self {
        // Decorrelate from the kernel, which uses the same seed
        let mut rng = StdRng::seed_from_u64(seed ^ 0x9E37_79B9_7F4A_7C15);
        let values = (0..dimension * dimension).map(|_| rng.gen::<f32>()).collect();
        Self { dimension, values }
    }

    /// Edge length in texels
    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// Row-major values
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Value at pixel `(x, y)` with wraparound
    pub fn at(&self, x: u32, y: u32) -> f32 {
        if self.dimension == 0 {
            return 0.0;
        }
        let x = x % self.dimension;
        let y = y % self.dimension;
        self.values[(y * self.dimension + x) as usize]
    }

    /// Value at texture coordinate `uv` with repeat addressing and `tiling` repetitions
    pub fn sample_repeat(&self, uv: Vec2, tiling: f32) -> f32 {
        let dim = self.dimension as f32;
        let u = (uv.x * tiling).rem_euclid(1.0);
        let v = (uv.y * tiling).rem_euclid(1.0);
        self.at((u * dim) as u32, (v * dim) as u32)
    }

    /// Raw `R32_SFLOAT` texel bytes
    pub fn to_texture_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.values).to_vec()
    }
}

/// Rotate `offset` by `angle01` turns
pub fn rotate(offset: Vec2, angle01: f32) -> Vec2 {
    let (sin, cos) = (angle01 * constants::TAU).sin_cos();
    Vec2::new(offset.x * cos - offset.y * sin, offset.x * sin + offset.y * cos)
}

// Box–Muller, rejecting deviates outside [-1, 1]
fn truncated_normal(rng: &mut StdRng) -> f32 {
    loop {
        let u1: f32 = rng.gen_range(f32::EPSILON..1.0);
        let u2: f32 = rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (constants::TAU * u2).cos() * OFFSET_SIGMA;
        if (-1.0..=1.0).contains(&z) {
            return z;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_kernel_is_bit_identical_for_equal_seeds() {
        let a = SamplingKernel::generate(42, 100);
        let b = SamplingKernel::generate(42, 100);
        assert_eq!(a.len(), 100);
        let bits = |k: &SamplingKernel| k.offsets().iter().map(|o| (o.x.to_bits(), o.y.to_bits())).collect::<Vec<_>>();
        assert_eq!(bits(&a), bits(&b));
        assert_ne!(a, SamplingKernel::generate(43, 100));
    }

    #[test]
    fn test_kernel_is_truncated_and_centered() {
        let kernel = SamplingKernel::generate(7, 4000);
        assert!(kernel.offsets().iter().all(|o| o.x.abs() <= 1.0 && o.y.abs() <= 1.0));

        let n = kernel.len() as f32;
        let mean_x = kernel.offsets().iter().map(|o| o.x).sum::<f32>() / n;
        let var_x = kernel.offsets().iter().map(|o| (o.x - mean_x).powi(2)).sum::<f32>() / n;
        assert!(mean_x.abs() < 0.03, "mean {mean_x}");
        // Truncation at ~2.8σ barely shrinks the spread
        assert!((var_x.sqrt() - OFFSET_SIGMA).abs() < 0.03, "sigma {}", var_x.sqrt());
    }

    #[test]
    fn test_noise_range_and_determinism() {
        let noise = RotationNoise::generate(11, 64);
        assert_eq!(noise.values().len(), 64 * 64);
        assert!(noise.values().iter().all(|v| (0.0..1.0).contains(v)));
        assert_eq!(noise, RotationNoise::generate(11, 64));
        assert_eq!(noise.to_texture_bytes().len(), 64 * 64 * 4);
    }

    #[test]
    fn test_noise_wraps() {
        let noise = RotationNoise::generate(3, 8);
        assert_relative_eq!(noise.at(9, 17), noise.at(1, 1));
        assert_relative_eq!(noise.sample_repeat(Vec2::new(1.25, 0.0), 1.0), noise.sample_repeat(Vec2::new(0.25, 0.0), 1.0));
    }

    #[test]
    fn test_rotate_quarter_turn() {
        let rotated = rotate(Vec2::new(1.0, 0.0), 0.25);
        assert_relative_eq!(rotated, Vec2::new(0.0, 1.0), epsilon = 1e-6);
        assert_relative_eq!(rotate(Vec2::new(0.3, -0.2), 0.0), Vec2::new(0.3, -0.2));
    }

    #[test]
    fn test_uniform_data_packs_pairs() {
        let kernel = SamplingKernel::generate(1, 3);
        let data = kernel.to_uniform_data();
        assert_eq!(data.len(), 2);
        assert_relative_eq!(data[0][2], kernel.offsets()[1].x);
        assert_relative_eq!(data[1][2], 0.0);
    }
}
