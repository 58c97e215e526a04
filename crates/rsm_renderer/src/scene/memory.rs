//! In-memory scene

use ash::vk;
use slotmap::SlotMap;

use super::{BoundingSphere, Light, Material, MaterialKey, Mesh, MeshKey, Node, SceneCollaborator};
use crate::foundation::math::Mat4;
use crate::render::backends::vulkan::resources::Buffer;
use crate::render::backends::vulkan::{DeviceContext, RenderResult};

/// Scene stored in slot maps
#[derive(Default)]
pub struct Scene {
    meshes: SlotMap<MeshKey, Mesh>,
    materials: SlotMap<MaterialKey, Material>,
    nodes: Vec<Node>,
    lights: Vec<Light>,
    default_material: Material,
    gpu_buffers: Vec<Buffer>,
}

impl Scene {
    /// Empty scene
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a mesh
    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshKey {
        self.meshes.insert(mesh)
    }

    /// Add a material
    pub fn add_material(&mut self, material: Material) -> MaterialKey {
        self.materials.insert(material)
    }

    /// Append a node; returns its index
    pub fn add_node(&mut self, world: Mat4, mesh: Option<MeshKey>) -> usize {
        self.nodes.push(Node::new(world, mesh));
        self.nodes.len() - 1
    }

    /// Append a light; returns its slot
    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    /// Mutable access to the lights
    pub fn lights_mut(&mut self) -> &mut [Light] {
        &mut self.lights
    }

    /// Move a node; its previous transform becomes `prev_world`
    pub fn set_node_world(&mut self, index: usize, world: Mat4) {
        if let Some(node) = self.nodes.get_mut(index) {
            node.prev_world = node.world;
            node.world = world;
        }
    }

    /// Mark every node as stationary for the next frame
    pub fn commit_transforms(&mut self) {
        for node in &mut self.nodes {
            node.prev_world = node.world;
        }
    }

    /// Refit every light's view-projection to the current scene bounds
    pub fn fit_lights(&mut self) {
        let bounds = self.bounds();
        for light in &mut self.lights {
            light.update_view_proj(&bounds);
        }
    }

    /// Upload every primitive's CPU geometry into host-visible buffers
    ///
    /// Already uploaded primitives are left alone.
    pub fn upload_geometry(&mut self, context: &DeviceContext) -> RenderResult<()> {
        let mut uploaded = 0usize;
        for mesh in self.meshes.values_mut() {
            for primitive in &mut mesh.primitives {
                if primitive.geometry.is_uploaded() {
                    continue;
                }
                let Some(data) = primitive.mesh_data.as_ref() else {
                    continue;
                };

                let vertex_bytes: &[u8] = bytemuck::cast_slice(&data.vertices);
                let index_bytes: &[u8] = bytemuck::cast_slice(&data.indices);
                if vertex_bytes.is_empty() || index_bytes.is_empty() {
                    continue;
                }

                let mut vertices = Buffer::new_mapped(
                    context,
                    vertex_bytes.len() as vk::DeviceSize,
                    vk::BufferUsageFlags::VERTEX_BUFFER,
                )?;
                vertices.write_bytes(0, vertex_bytes)?;
                let mut indices = Buffer::new_mapped(
                    context,
                    index_bytes.len() as vk::DeviceSize,
                    vk::BufferUsageFlags::INDEX_BUFFER,
                )?;
                indices.write_bytes(0, index_bytes)?;

                primitive.geometry.vertex_buffer = vertices.handle();
                primitive.geometry.index_buffer = indices.handle();
                primitive.geometry.first_index = 0;
                primitive.geometry.vertex_offset = 0;
                primitive.geometry.index_count = data.indices.len() as u32;

                self.gpu_buffers.push(vertices);
                self.gpu_buffers.push(indices);
                uploaded += 1;
            }
        }
        log::debug!("Uploaded geometry for {uploaded} primitives");
        Ok(())
    }

    /// Drop the GPU geometry and clear the handles
    pub fn release_geometry(&mut self) {
        for mesh in self.meshes.values_mut() {
            for primitive in &mut mesh.primitives {
                primitive.geometry.vertex_buffer = vk::Buffer::null();
                primitive.geometry.index_buffer = vk::Buffer::null();
            }
        }
        self.gpu_buffers.clear();
    }
}

impl SceneCollaborator for Scene {
    fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    fn mesh(&self, key: MeshKey) -> Option<&Mesh> {
        self.meshes.get(key)
    }

    fn meshes(&self) -> Vec<(MeshKey, &Mesh)> {
        self.meshes.iter().collect()
    }

    fn material(&self, key: MaterialKey) -> Option<&Material> {
        self.materials.get(key)
    }

    fn default_material(&self) -> &Material {
        &self.default_material
    }

    fn lights(&self) -> &[Light] {
        &self.lights
    }

    fn bounds(&self) -> BoundingSphere {
        self.nodes
            .iter()
            .filter_map(|node| Some((node, self.meshes.get(node.mesh?)?)))
            .flat_map(|(node, mesh)| mesh.primitives.iter().map(|p| p.bounds.transformed(&node.world)))
            .reduce(|a, b| a.union(&b))
            .unwrap_or(BoundingSphere {
                center: crate::foundation::math::Vec3::zeros(),
                radius: 1.0,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec3;
    use crate::scene::{MeshData, Primitive};
    use approx::assert_relative_eq;

    fn two_cube_scene() -> Scene {
        let mut scene = Scene::new();
        let cube = scene.add_mesh(Mesh {
            primitives: vec![Primitive::from_data(None, MeshData::cube(1.0))],
        });
        scene.add_node(Mat4::new_translation(&Vec3::new(-4.0, 0.0, 0.0)), Some(cube));
        scene.add_node(Mat4::new_translation(&Vec3::new(4.0, 0.0, 0.0)), Some(cube));
        scene
    }

    #[test]
    fn test_bounds_cover_all_nodes() {
        let scene = two_cube_scene();
        let bounds = scene.bounds();
        assert_relative_eq!(bounds.center, Vec3::zeros(), epsilon = 1e-5);
        assert_relative_eq!(bounds.radius, 4.0 + 3.0_f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn test_missing_material_falls_back_to_default() {
        let scene = two_cube_scene();
        let (_, mesh) = scene.meshes()[0];
        assert_eq!(scene.material_for(&mesh.primitives[0]), scene.default_material());
    }

    #[test]
    fn test_moving_a_node_keeps_previous_transform() {
        let mut scene = two_cube_scene();
        let before = scene.nodes()[0].world;
        scene.set_node_world(0, Mat4::identity());
        assert_eq!(scene.nodes()[0].prev_world, before);

        scene.commit_transforms();
        assert_eq!(scene.nodes()[0].prev_world, Mat4::identity());
    }

    #[test]
    fn test_empty_scene_has_unit_bounds() {
        assert_relative_eq!(Scene::new().bounds().radius, 1.0);
    }
}
