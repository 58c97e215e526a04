//! Geometry: vertices, primitives, meshes and bounding volumes

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;

use super::{MaterialFlags, MaterialKey};
use crate::foundation::math::{Mat4, Vec3, Vec4};

/// Interleaved vertex consumed by the G-Buffer and RSM pipelines
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// First texture coordinate set
    pub uv: [f32; 2],
}

impl Vertex {
    /// Create a vertex
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2]) -> Self {
        Self {
            position: position.into(),
            normal: normal.into(),
            uv,
        }
    }
}

/// Bounding sphere in object or world space
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    /// Centre
    pub center: Vec3,
    /// Radius
    pub radius: f32,
}

impl BoundingSphere {
    /// Sphere around the axis-aligned box of `points`
    pub fn from_points<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Self {
        let mut min = Vec3::repeat(f32::MAX);
        let mut max = Vec3::repeat(f32::MIN);
        let mut any = false;
        for p in points {
            min = min.inf(p);
            max = max.sup(p);
            any = true;
        }
        if !any {
            return Self {
                center: Vec3::zeros(),
                radius: 0.0,
            };
        }
        let center = (min + max) * 0.5;
        Self {
            center,
            radius: (max - center).norm(),
        }
    }

    /// Apply `world` conservatively: the radius scales by the largest axis scale
    pub fn transformed(&self, world: &Mat4) -> Self {
        let c = world * Vec4::new(self.center.x, self.center.y, self.center.z, 1.0);
        let scale = (0..3)
            .map(|i| world.fixed_view::<3, 1>(0, i).norm())
            .fold(0.0_f32, f32::max);
        Self {
            center: c.xyz(),
            radius: self.radius * scale,
        }
    }

    /// Smallest sphere containing both
    pub fn union(&self, other: &Self) -> Self {
        let offset = other.center - self.center;
        let distance = offset.norm();
        if distance + other.radius <= self.radius {
            return *self;
        }
        if distance + self.radius <= other.radius {
            return *other;
        }
        let radius = (distance + self.radius + other.radius) * 0.5;
        let center = self.center + offset * ((radius - self.radius) / distance);
        Self { center, radius }
    }
}

/// CPU-side triangle list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    /// Vertices
    pub vertices: Vec<Vertex>,
    /// Triangle indices into `vertices`
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Axis-aligned cube centred on the origin with outward normals
    pub fn cube(half_extent: f32) -> Self {
        let faces: [(Vec3, Vec3); 6] = [
            (Vec3::x(), Vec3::y()),
            (-Vec3::x(), Vec3::y()),
            (Vec3::y(), Vec3::z()),
            (-Vec3::y(), Vec3::z()),
            (Vec3::z(), Vec3::y()),
            (-Vec3::z(), Vec3::y()),
        ];

        let mut mesh = Self::default();
        for (normal, up) in faces {
            let right = up.cross(&normal);
            mesh.push_quad(normal * half_extent, right * half_extent, up * half_extent, normal);
        }
        mesh
    }

    /// Square in the XZ plane facing +Y, centred on the origin
    pub fn plane(half_extent: f32) -> Self {
        let mut mesh = Self::default();
        mesh.push_quad(
            Vec3::zeros(),
            Vec3::x() * half_extent,
            -Vec3::z() * half_extent,
            Vec3::y(),
        );
        mesh
    }

    // Counter-clockwise when viewed from the side `normal` points to
    fn push_quad(&mut self, center: Vec3, right: Vec3, up: Vec3, normal: Vec3) {
        let base = self.vertices.len() as u32;
        let corners = [
            (center - right - up, [0.0, 1.0]),
            (center + right - up, [1.0, 1.0]),
            (center + right + up, [1.0, 0.0]),
            (center - right + up, [0.0, 0.0]),
        ];
        self.vertices
            .extend(corners.iter().map(|(p, uv)| Vertex::new(*p, normal, *uv)));
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    /// Object-space bounding sphere
    pub fn bounds(&self) -> BoundingSphere {
        let points: Vec<Vec3> = self.vertices.iter().map(|v| Vec3::from(v.position)).collect();
        BoundingSphere::from_points(&points)
    }

    /// Iterate triangles as vertex triples
    pub fn triangles(&self) -> impl Iterator<Item = [&Vertex; 3]> + '_ {
        self.indices.chunks_exact(3).filter_map(move |tri| {
            Some([
                self.vertices.get(tri[0] as usize)?,
                self.vertices.get(tri[1] as usize)?,
                self.vertices.get(tri[2] as usize)?,
            ])
        })
    }
}

/// Non-owning GPU geometry handles; null until the scene uploads its buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpuGeometry {
    /// Vertex buffer holding [`Vertex`] records
    pub vertex_buffer: vk::Buffer,
    /// Index buffer of `u32` indices
    pub index_buffer: vk::Buffer,
    /// First index in `index_buffer`
    pub first_index: u32,
    /// Number of indices
    pub index_count: u32,
    /// Added to every index
    pub vertex_offset: i32,
}

impl GpuGeometry {
    /// Whether both buffers are bound
    pub fn is_uploaded(&self) -> bool {
        self.vertex_buffer != vk::Buffer::null() && self.index_buffer != vk::Buffer::null()
    }
}

/// Drawable piece of a mesh with one material
#[derive(Debug, Clone)]
pub struct Primitive {
    /// Material; `None` selects the scene's default material
    pub material: Option<MaterialKey>,
    /// Object-space bounds
    pub bounds: BoundingSphere,
    /// GPU buffers
    pub geometry: GpuGeometry,
    /// CPU copy of the geometry, kept for upload and software rendering
    pub mesh_data: Option<Arc<MeshData>>,
    /// Vertex attributes present in the geometry
    pub attributes: MaterialFlags,
}

impl Primitive {
    /// Primitive over CPU geometry, not yet uploaded
    pub fn from_data(material: Option<MaterialKey>, data: MeshData) -> Self {
        Self {
            material,
            bounds: data.bounds(),
            geometry: GpuGeometry {
                index_count: data.indices.len() as u32,
                ..GpuGeometry::default()
            },
            mesh_data: Some(Arc::new(data)),
            attributes: MaterialFlags::HAS_NORMAL | MaterialFlags::HAS_TEXCOORD_0,
        }
    }
}

/// Collection of primitives sharing a node transform
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    /// Primitives in draw order
    pub primitives: Vec<Primitive>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_has_outward_counter_clockwise_faces() {
        let cube = MeshData::cube(1.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);

        for [a, b, c] in cube.triangles() {
            let (a, b, c) = (Vec3::from(a.position), Vec3::from(b.position), Vec3::from(c.position));
            let face_normal = (b - a).cross(&(c - a)).normalize();
            let centroid = (a + b + c) / 3.0;
            assert!(face_normal.dot(&centroid) > 0.0, "face must wind outward");
        }
    }

    #[test]
    fn test_plane_faces_up() {
        let plane = MeshData::plane(2.0);
        let [a, b, c] = plane.triangles().next().unwrap();
        let (a, b, c) = (Vec3::from(a.position), Vec3::from(b.position), Vec3::from(c.position));
        assert_relative_eq!((b - a).cross(&(c - a)).normalize(), Vec3::y(), epsilon = 1e-6);
    }

    #[test]
    fn test_bounds_transform_scales_radius() {
        let sphere = MeshData::cube(1.0).bounds();
        assert_relative_eq!(sphere.radius, 3.0_f32.sqrt(), epsilon = 1e-6);

        let world = Mat4::new_translation(&Vec3::new(5.0, 0.0, 0.0)) * Mat4::new_scaling(2.0);
        let moved = sphere.transformed(&world);
        assert_relative_eq!(moved.center, Vec3::new(5.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(moved.radius, 2.0 * 3.0_f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_union_contains_both() {
        let a = BoundingSphere { center: Vec3::zeros(), radius: 1.0 };
        let b = BoundingSphere { center: Vec3::new(4.0, 0.0, 0.0), radius: 1.0 };
        let u = a.union(&b);
        assert_relative_eq!(u.center, Vec3::new(2.0, 0.0, 0.0), epsilon = 1e-6);
        assert_relative_eq!(u.radius, 3.0, epsilon = 1e-6);
        assert_eq!(a.union(&BoundingSphere { center: Vec3::zeros(), radius: 0.5 }), a);
    }

    #[test]
    fn test_primitive_from_data_counts_indices() {
        let primitive = Primitive::from_data(None, MeshData::cube(0.5));
        assert_eq!(primitive.geometry.index_count, 36);
        assert!(!primitive.geometry.is_uploaded());
        assert!(primitive.attributes.contains(MaterialFlags::HAS_NORMAL));
    }
}
