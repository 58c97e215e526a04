//! Host images and pixel rectangles

use ash::vk;

use crate::foundation::math::{Vec2, Vec4};

/// Pixel rectangle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    /// Left edge
    pub x: u32,
    /// Top edge
    pub y: u32,
    /// Width
    pub width: u32,
    /// Height
    pub height: u32,
}

impl Rect {
    /// Rectangle at the origin
    pub fn sized(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Whether pixel `(x, y)` lies inside
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x - self.x < self.width && y - self.y < self.height
    }

    /// Overlap of two rectangles; empty rectangles have zero size
    pub fn intersect(&self, other: &Rect) -> Rect {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.width).min(other.x + other.width);
        let y1 = (self.y + self.height).min(other.y + other.height);
        Rect {
            x: x0,
            y: y0,
            width: x1.saturating_sub(x0),
            height: y1.saturating_sub(y0),
        }
    }
}

impl From<vk::Rect2D> for Rect {
    fn from(rect: vk::Rect2D) -> Self {
        Self {
            x: rect.offset.x.max(0) as u32,
            y: rect.offset.y.max(0) as u32,
            width: rect.extent.width,
            height: rect.extent.height,
        }
    }
}

/// Row-major 2D image
#[derive(Debug, Clone, PartialEq)]
pub struct Image2D<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Copy> Image2D<T> {
    /// `width × height` image filled with `value`
    pub fn new(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; (width as usize) * (height as usize)],
        }
    }

    /// Width in pixels
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Whole-image rectangle
    pub fn rect(&self) -> Rect {
        Rect::sized(self.width, self.height)
    }

    fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Pixel `(x, y)`, `None` outside the image
    pub fn get(&self, x: u32, y: u32) -> Option<T> {
        self.index(x, y).map(|i| self.data[i])
    }

    /// Pixel at signed coordinates clamped to the edge
    pub fn clamped(&self, x: i64, y: i64) -> T {
        let x = x.clamp(0, i64::from(self.width.max(1)) - 1) as u32;
        let y = y.clamp(0, i64::from(self.height.max(1)) - 1) as u32;
        self.data[y as usize * self.width as usize + x as usize]
    }

    /// Write pixel `(x, y)`; writes outside the image are dropped
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        if let Some(i) = self.index(x, y) {
            self.data[i] = value;
        }
    }

    /// Row-major pixels
    pub fn pixels(&self) -> &[T] {
        &self.data
    }

    /// Pixels of `rect` with their coordinates
    pub fn region(&self, rect: Rect) -> impl Iterator<Item = (u32, u32, T)> + '_ {
        let rect = rect.intersect(&self.rect());
        (rect.y..rect.y + rect.height)
            .flat_map(move |y| (rect.x..rect.x + rect.width).map(move |x| (x, y)))
            .map(move |(x, y)| (x, y, self.data[y as usize * self.width as usize + x as usize]))
    }
}

impl Image2D<Vec4> {
    /// Linear filter at `uv` with clamp-to-edge addressing
    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.clamped(x0, y0).lerp(&self.clamped(x0 + 1, y0), fx);
        let bottom = self.clamped(x0, y0 + 1).lerp(&self.clamped(x0 + 1, y0 + 1), fx);
        top.lerp(&bottom, fy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rect_contains_and_intersects() {
        let a = Rect { x: 4, y: 4, width: 4, height: 4 };
        assert!(a.contains(4, 7));
        assert!(!a.contains(8, 4));
        assert!(!a.contains(3, 5));

        let b = Rect { x: 6, y: 0, width: 10, height: 5 };
        assert_eq!(a.intersect(&b), Rect { x: 6, y: 4, width: 2, height: 1 });
        assert_eq!(a.intersect(&Rect::sized(2, 2)).width, 0);
    }

    #[test]
    fn test_set_outside_is_ignored() {
        let mut image = Image2D::new(2, 2, 0u8);
        image.set(5, 0, 9);
        image.set(1, 1, 3);
        assert_eq!(image.pixels(), &[0, 0, 0, 3]);
        assert_eq!(image.get(2, 0), None);
        assert_eq!(image.clamped(-4, 9), 0);
        assert_eq!(image.clamped(7, 7), 3);
    }

    #[test]
    fn test_region_walks_rows() {
        let mut image = Image2D::new(3, 3, 0u32);
        image.set(2, 1, 7);
        let pixels: Vec<_> = image.region(Rect { x: 1, y: 1, width: 5, height: 1 }).collect();
        assert_eq!(pixels, vec![(1, 1, 0), (2, 1, 7)]);
    }

    #[test]
    fn test_bilinear_at_centres_and_between() {
        let mut image = Image2D::new(2, 1, Vec4::zeros());
        image.set(1, 0, Vec4::repeat(1.0));
        assert_relative_eq!(image.sample_bilinear(Vec2::new(0.25, 0.5)), Vec4::zeros());
        assert_relative_eq!(image.sample_bilinear(Vec2::new(0.75, 0.5)), Vec4::repeat(1.0));
        assert_relative_eq!(image.sample_bilinear(Vec2::new(0.5, 0.5)), Vec4::repeat(0.5));
        // Clamped beyond the edge
        assert_relative_eq!(image.sample_bilinear(Vec2::new(1.5, 0.5)), Vec4::repeat(1.0));
    }
}
