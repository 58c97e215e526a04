//! Scene data consumed by the renderer
//!
//! The renderer reads the scene through [`SceneCollaborator`] once per frame
//! and never mutates it. [`Scene`] is the in-memory implementation used by the
//! viewer and the tests.

mod camera;
mod light;
mod material;
mod memory;
mod mesh;

pub use camera::Camera;
pub use light::{Light, LightKind, DIRECTIONAL_DEPTH_BIAS, SPOT_DEPTH_BIAS};
pub use material::{Material, MaterialFlags, MaterialTexture, TextureKind};
pub use memory::Scene;
pub use mesh::{BoundingSphere, GpuGeometry, Mesh, MeshData, Primitive, Vertex};

use crate::foundation::math::Mat4;

slotmap::new_key_type! {
    /// Handle of a mesh in a scene
    pub struct MeshKey;
    /// Handle of a material in a scene
    pub struct MaterialKey;
}

/// Scene graph node with its flattened world transform
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Object to world transform this frame
    pub world: Mat4,
    /// Object to world transform last frame, for motion vectors
    pub prev_world: Mat4,
    /// Mesh drawn at this node
    pub mesh: Option<MeshKey>,
}

impl Node {
    /// Node that has not moved since last frame
    pub fn new(world: Mat4, mesh: Option<MeshKey>) -> Self {
        Self {
            world,
            prev_world: world,
            mesh,
        }
    }
}

/// Read-only view of a scene
pub trait SceneCollaborator {
    /// Nodes in traversal order
    fn nodes(&self) -> &[Node];

    /// Mesh by key
    fn mesh(&self, key: MeshKey) -> Option<&Mesh>;

    /// Every mesh with its key
    fn meshes(&self) -> Vec<(MeshKey, &Mesh)>;

    /// Material by key
    fn material(&self, key: MaterialKey) -> Option<&Material>;

    /// Fallback for primitives without a material
    fn default_material(&self) -> &Material;

    /// Lights in slot order
    fn lights(&self) -> &[Light];

    /// World-space bounds of every drawn primitive
    fn bounds(&self) -> BoundingSphere;

    /// Material a primitive is drawn with
    fn material_for(&self, primitive: &Primitive) -> &Material {
        primitive
            .material
            .and_then(|key| self.material(key))
            .unwrap_or_else(|| self.default_material())
    }
}
