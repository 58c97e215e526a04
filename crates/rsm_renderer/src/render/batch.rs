//! Batch builder shared by the G-Buffer and RSM passes
//!
//! Walks the scene in node order, culls each primitive's bounding sphere
//! against the frustum of `view_proj * world`, drops primitives whose pipeline
//! failed to build and allocates their per-object constants for this frame.

use ash::vk;
use std::collections::HashMap;

use super::constants::PerObjectConstants;
use super::frustum::Frustum;
use super::ring::{ConstantAllocation, ConstantRing};
use crate::foundation::math::Mat4;
use crate::scene::{Material, MeshKey, Primitive, SceneCollaborator};

/// Per-primitive render state lookup
///
/// `None` marks a primitive whose pipeline could not be created; such
/// primitives are skipped every frame.
pub trait PrimitiveStates {
    /// Compiled state, usually a pipeline
    type State;

    /// State of primitive `index` of `mesh`
    fn state(&self, mesh: MeshKey, index: usize) -> Option<&Self::State>;
}

impl<S> PrimitiveStates for HashMap<(MeshKey, usize), Option<S>> {
    type State = S;

    fn state(&self, mesh: MeshKey, index: usize) -> Option<&S> {
        self.get(&(mesh, index)).and_then(Option::as_ref)
    }
}

/// States for renderers without per-primitive pipelines
#[derive(Debug, Clone, Copy, Default)]
pub struct EveryPrimitive;

impl PrimitiveStates for EveryPrimitive {
    type State = ();

    fn state(&self, _mesh: MeshKey, _index: usize) -> Option<&()> {
        Some(&())
    }
}

/// One draw
#[derive(Debug, Clone)]
pub struct Batch<'a, S> {
    /// Geometry to draw
    pub primitive: &'a Primitive,
    /// Resolved material
    pub material: &'a Material,
    /// Compiled state
    pub state: &'a S,
    /// Mesh the primitive belongs to
    pub mesh: MeshKey,
    /// Primitive index within the mesh
    pub index: usize,
    /// Object to clip space
    pub model_view_proj: Mat4,
    /// This frame's per-object constants
    pub per_object: ConstantAllocation,
    /// Skinning matrices, when the primitive is skinned
    pub skinning: Option<vk::DescriptorBufferInfo>,
}

/// Counters of one build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    /// Primitives emitted
    pub visible: usize,
    /// Primitives outside the frustum
    pub culled: usize,
    /// Primitives without a compiled state
    pub failed: usize,
    /// Primitives dropped because the constant ring was full
    pub dropped: usize,
}

impl BatchStats {
    /// Add the counters of another build
    pub fn accumulate(&mut self, other: &Self) {
        self.visible += other.visible;
        self.culled += other.culled;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }
}

/// Batches split by blending
#[derive(Debug, Clone)]
pub struct BatchLists<'a, S> {
    /// Opaque and alpha-tested draws in node order
    pub opaque: Vec<Batch<'a, S>>,
    /// Alpha-blended draws in node order; built but not drawn
    pub transparent: Vec<Batch<'a, S>>,
    /// Counters
    pub stats: BatchStats,
}

impl<S> Default for BatchLists<'_, S> {
    fn default() -> Self {
        Self {
            opaque: Vec::new(),
            transparent: Vec::new(),
            stats: BatchStats::default(),
        }
    }
}

/// Builds the frame's draw lists
pub struct BatchBuilder;

impl BatchBuilder {
    /// Cull and allocate every primitive of `scene` against `view_proj`
    pub fn build<'a, C, P>(
        scene: &'a C,
        view_proj: &Mat4,
        states: &'a P,
        ring: &mut ConstantRing,
    ) -> BatchLists<'a, P::State>
    where
        C: SceneCollaborator + ?Sized,
        P: PrimitiveStates,
    {
        let mut lists = BatchLists::default();

        for node in scene.nodes() {
            let Some(mesh_key) = node.mesh else { continue };
            let Some(mesh) = scene.mesh(mesh_key) else { continue };

            let model_view_proj = view_proj * node.world;
            let frustum = Frustum::from_matrix(&model_view_proj);

            for (index, primitive) in mesh.primitives.iter().enumerate() {
                if !frustum.intersects_sphere(&primitive.bounds.center, primitive.bounds.radius) {
                    lists.stats.culled += 1;
                    continue;
                }

                let Some(state) = states.state(mesh_key, index) else {
                    lists.stats.failed += 1;
                    continue;
                };

                let material = scene.material_for(primitive);
                let constants = PerObjectConstants::new(&node.world, &node.prev_world, material);
                let per_object = match ring.alloc_constant(&constants) {
                    Ok(allocation) => allocation,
                    Err(err) => {
                        log::warn!("Dropped primitive {index} of {mesh_key:?}: {err}");
                        lists.stats.dropped += 1;
                        continue;
                    }
                };

                let batch = Batch {
                    primitive,
                    material,
                    state,
                    mesh: mesh_key,
                    index,
                    model_view_proj,
                    per_object,
                    skinning: None,
                };
                if material.is_transparent() {
                    lists.transparent.push(batch);
                } else {
                    lists.opaque.push(batch);
                }
                lists.stats.visible += 1;
            }
        }

        if lists.stats.failed > 0 {
            log::warn!("Skipped {} primitives without a pipeline", lists.stats.failed);
        }
        log::trace!(
            "Built {} opaque, {} transparent batches ({} culled)",
            lists.opaque.len(),
            lists.transparent.len(),
            lists.stats.culled
        );
        lists
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{constants, Mat4Ext, Vec3};
    use crate::scene::{Material, MaterialFlags, Mesh, MeshData, Scene};

    fn view_proj() -> Mat4 {
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 10.0), Vec3::zeros(), Vec3::y());
        Mat4::perspective(constants::QUARTER_PI, 1.0, 0.1, 100.0) * Mat4::vulkan_coordinate_transform() * view
    }

    fn ring() -> ConstantRing {
        ConstantRing::new_host(3 * 64 * 1024, 3, 256)
    }

    fn cube_scene(positions: &[Vec3]) -> (Scene, MeshKey) {
        let mut scene = Scene::new();
        let cube = scene.add_mesh(Mesh {
            primitives: vec![Primitive::from_data(None, MeshData::cube(0.5))],
        });
        for p in positions {
            scene.add_node(Mat4::new_translation(p), Some(cube));
        }
        (scene, cube)
    }

    #[test]
    fn test_culling_keeps_inside_and_drops_outside() {
        let (scene, _) = cube_scene(&[Vec3::zeros(), Vec3::new(100.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 50.0)]);
        let mut ring = ring();
        let lists = BatchBuilder::build(&scene, &view_proj(), &EveryPrimitive, &mut ring);

        assert_eq!(lists.opaque.len(), 1);
        assert_eq!(lists.stats.culled, 2);
        let drawn = lists.opaque[0].model_view_proj * crate::foundation::math::Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!(drawn.w > 0.0);
    }

    #[test]
    fn test_node_order_is_preserved() {
        let positions = [Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)];
        let (scene, _) = cube_scene(&positions);
        let mut ring = ring();
        let lists = BatchBuilder::build(&scene, &view_proj(), &EveryPrimitive, &mut ring);

        let offsets: Vec<u64> = lists.opaque.iter().map(|b| b.per_object.offset).collect();
        assert_eq!(offsets, vec![0, 256, 512]);
        for (batch, node) in lists.opaque.iter().zip(scene.nodes()) {
            assert_eq!(ring.read_as::<PerObjectConstants>(&batch.per_object).unwrap().world(), node.world);
        }
    }

    #[test]
    fn test_failed_pipelines_are_skipped() {
        let (scene, cube) = cube_scene(&[Vec3::zeros()]);
        let mut states: HashMap<(MeshKey, usize), Option<u32>> = HashMap::new();
        states.insert((cube, 0), None);

        let mut ring = ring();
        let lists = BatchBuilder::build(&scene, &view_proj(), &states, &mut ring);
        assert!(lists.opaque.is_empty());
        assert_eq!(lists.stats.failed, 1);
        assert_eq!(ring.used(), 0);

        states.insert((cube, 0), Some(7));
        let lists = BatchBuilder::build(&scene, &view_proj(), &states, &mut ring);
        assert_eq!(*lists.opaque[0].state, 7);
    }

    #[test]
    fn test_transparent_primitives_are_separated() {
        let mut scene = Scene::new();
        let glass = scene.add_material(Material {
            flags: MaterialFlags::ALPHA_BLEND,
            ..Material::default()
        });
        let mesh = scene.add_mesh(Mesh {
            primitives: vec![
                Primitive::from_data(None, MeshData::cube(0.5)),
                Primitive::from_data(Some(glass), MeshData::cube(0.5)),
            ],
        });
        scene.add_node(Mat4::identity(), Some(mesh));

        let mut ring = ring();
        let lists = BatchBuilder::build(&scene, &view_proj(), &EveryPrimitive, &mut ring);
        assert_eq!(lists.opaque.len(), 1);
        assert_eq!(lists.transparent.len(), 1);
        assert_eq!(lists.transparent[0].index, 1);
    }

    #[test]
    fn test_full_ring_drops_batches() {
        let (scene, _) = cube_scene(&[Vec3::zeros(), Vec3::new(1.0, 0.0, 0.0)]);
        let mut ring = ConstantRing::new_host(256, 1, 256);
        let lists = BatchBuilder::build(&scene, &view_proj(), &EveryPrimitive, &mut ring);
        assert_eq!(lists.opaque.len(), 1);
        assert_eq!(lists.stats.dropped, 1);
    }
}
