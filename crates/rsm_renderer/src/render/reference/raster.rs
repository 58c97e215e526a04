//! Triangle rasteriser
//!
//! Follows the Vulkan conventions the GPU passes rely on: NDC `y = -1` is the
//! top of the viewport, depth is kept in [0, 1], a triangle is front-facing
//! when its framebuffer-space area is positive under the Vulkan sign
//! convention (`VK_FRONT_FACE_COUNTER_CLOCKWISE`) and the depth test is
//! `LESS_OR_EQUAL`. Pixels are sampled at their centres.

use super::image::{Image2D, Rect};
use crate::foundation::math::{Vec2, Vec3, Vec4};

/// Face culling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cull {
    /// Keep every triangle
    None,
    /// Drop back-facing triangles
    Back,
}

/// One covered pixel that passed the depth test
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    /// Column
    pub x: u32,
    /// Row
    pub y: u32,
    /// Depth written to the depth buffer
    pub depth: f32,
    /// Perspective-correct weights of the three vertices
    pub barycentric: Vec3,
    /// Whether the triangle faces the viewer
    pub front_facing: bool,
}

/// Rasteriser state: viewport and scissor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rasterizer {
    /// NDC to pixel mapping
    pub viewport: Rect,
    /// Pixels outside are never written
    pub scissor: Rect,
}

// Twice the signed area of (a, b, c); negative for front faces in framebuffer space
fn edge(a: Vec2, b: Vec2, c: Vec2) -> f32 {
    (b.x - a.x) * (c.y - a.y) - (b.y - a.y) * (c.x - a.x)
}

impl Rasterizer {
    /// Viewport and scissor set to `viewport`
    pub fn new(viewport: Rect) -> Self {
        Self {
            viewport,
            scissor: viewport,
        }
    }

    /// Replace the scissor
    pub fn with_scissor(mut self, scissor: Rect) -> Self {
        self.scissor = scissor;
        self
    }

    fn to_window(&self, ndc: Vec3) -> Vec2 {
        Vec2::new(
            self.viewport.x as f32 + (ndc.x * 0.5 + 0.5) * self.viewport.width as f32,
            self.viewport.y as f32 + (ndc.y * 0.5 + 0.5) * self.viewport.height as f32,
        )
    }

    /// Rasterise the triangle with clip-space corners `clip`
    ///
    /// Calls `shade` for every fragment that passes the depth test, after the
    /// depth has been written. Triangles with a corner at or behind the eye
    /// plane are dropped. Returns the number of fragments shaded.
    pub fn draw_triangle<F>(&self, clip: [Vec4; 3], cull: Cull, depth: &mut Image2D<f32>, mut shade: F) -> usize
    where
        F: FnMut(Fragment),
    {
        if clip.iter().any(|c| c.w <= f32::EPSILON) {
            return 0;
        }
        let ndc = clip.map(|c| c.xyz() / c.w);
        let window = ndc.map(|n| self.to_window(n));

        let area = edge(window[0], window[1], window[2]);
        if area.abs() <= f32::EPSILON {
            return 0;
        }
        let front_facing = area < 0.0;
        if cull == Cull::Back && !front_facing {
            return 0;
        }

        let bounds = self.scissor.intersect(&depth.rect());
        let min_x = window.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).floor().max(bounds.x as f32) as u32;
        let min_y = window.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).floor().max(bounds.y as f32) as u32;
        let max_x = window
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min((bounds.x + bounds.width) as f32) as u32;
        let max_y = window
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min((bounds.y + bounds.height) as f32) as u32;

        let mut shaded = 0;
        for y in min_y..max_y {
            for x in min_x..max_x {
                let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(window[1], window[2], p) / area;
                let w1 = edge(window[2], window[0], p) / area;
                let w2 = edge(window[0], window[1], p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let z = w0 * ndc[0].z + w1 * ndc[1].z + w2 * ndc[2].z;
                if !(0.0..=1.0).contains(&z) {
                    continue;
                }
                match depth.get(x, y) {
                    Some(stored) if z <= stored => depth.set(x, y, z),
                    _ => continue,
                }

                let perspective = Vec3::new(w0 / clip[0].w, w1 / clip[1].w, w2 / clip[2].w);
                let barycentric = perspective / perspective.sum();
                shade(Fragment {
                    x,
                    y,
                    depth: z,
                    barycentric,
                    front_facing,
                });
                shaded += 1;
            }
        }
        shaded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // Counter-clockwise with +Y up, as the G-Buffer vertex shader sees it after the Y flip
    fn front_triangle(z: f32) -> [Vec4; 3] {
        [
            Vec4::new(-1.0, 1.0, z, 1.0),
            Vec4::new(1.0, 1.0, z, 1.0),
            Vec4::new(-1.0, -1.0, z, 1.0),
        ]
    }

    #[test]
    fn test_covers_half_the_viewport() {
        let raster = Rasterizer::new(Rect::sized(8, 8));
        let mut depth = Image2D::new(8, 8, 1.0);
        let count = raster.draw_triangle(front_triangle(0.5), Cull::None, &mut depth, |_| {});
        // Pixel centres on or below the diagonal
        assert_eq!(count, 36);
        assert_relative_eq!(depth.get(0, 7).unwrap(), 0.5, epsilon = 1e-6);
        assert_relative_eq!(depth.get(7, 0).unwrap(), 1.0);
    }

    #[test]
    fn test_back_faces_are_culled() {
        let raster = Rasterizer::new(Rect::sized(8, 8));
        let mut depth = Image2D::new(8, 8, 1.0);
        let [a, b, c] = front_triangle(0.5);

        assert!(raster.draw_triangle([a, b, c], Cull::Back, &mut depth, |f| assert!(f.front_facing)) > 0);
        let mut depth = Image2D::new(8, 8, 1.0);
        assert_eq!(raster.draw_triangle([a, c, b], Cull::Back, &mut depth, |_| {}), 0);
        assert!(raster.draw_triangle([a, c, b], Cull::None, &mut depth, |f| assert!(!f.front_facing)) > 0);
    }

    #[test]
    fn test_depth_test_keeps_nearest() {
        let raster = Rasterizer::new(Rect::sized(4, 4));
        let mut depth = Image2D::new(4, 4, 1.0);
        raster.draw_triangle(front_triangle(0.3), Cull::None, &mut depth, |_| {});
        let behind = raster.draw_triangle(front_triangle(0.6), Cull::None, &mut depth, |_| {});
        assert_eq!(behind, 0);
        let equal = raster.draw_triangle(front_triangle(0.3), Cull::None, &mut depth, |_| {});
        assert!(equal > 0);
    }

    #[test]
    fn test_scissor_limits_writes() {
        let viewport = Rect { x: 4, y: 0, width: 4, height: 4 };
        let raster = Rasterizer::new(viewport);
        let mut depth = Image2D::new(8, 4, 1.0);
        let full = [
            Vec4::new(-3.0, -3.0, 0.5, 1.0),
            Vec4::new(-3.0, 3.0, 0.5, 1.0),
            Vec4::new(3.0, 0.0, 0.5, 1.0),
        ];
        raster.draw_triangle(full, Cull::None, &mut depth, |f| assert!(viewport.contains(f.x, f.y)));
        assert!(depth.region(Rect::sized(4, 4)).all(|(_, _, d)| d == 1.0));
        assert!(depth.region(viewport).all(|(_, _, d)| (d - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_barycentrics_sum_to_one() {
        let raster = Rasterizer::new(Rect::sized(8, 8));
        let mut depth = Image2D::new(8, 8, 1.0);
        let clip = [
            Vec4::new(-2.0, 2.0, 1.0, 2.0),
            Vec4::new(1.0, 1.0, 0.5, 1.0),
            Vec4::new(-1.0, -1.0, 0.5, 1.0),
        ];
        raster.draw_triangle(clip, Cull::None, &mut depth, |f| {
            assert_relative_eq!(f.barycentric.sum(), 1.0, epsilon = 1e-5);
            assert!(f.barycentric.iter().all(|w| *w >= -1e-6));
        });
    }
}
