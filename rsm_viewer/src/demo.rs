//! Procedural demo scene: a white cube and a red wall on a grey floor, lit by the sun

use rsm_renderer::foundation::math::{Mat4, Vec3};
use rsm_renderer::scene::{Camera, Light, Material, Mesh, MeshData, Primitive, Scene};

use crate::config::ViewerConfig;

/// Initial sun direction (pointing away from the sun)
pub fn sun_direction() -> Vec3 {
    Vec3::new(-0.5, -1.0, -0.3).normalize()
}

/// `direction` turned around the vertical axis by `angle` radians
pub fn rotate_sun(direction: &Vec3, angle: f32) -> Vec3 {
    let (sin, cos) = angle.sin_cos();
    Vec3::new(
        direction.x * cos + direction.z * sin,
        direction.y,
        -direction.x * sin + direction.z * cos,
    )
}

fn single_primitive(scene: &mut Scene, material: Material, data: MeshData) -> Mesh {
    let material = scene.add_material(material);
    let mut mesh = Mesh::default();
    mesh.primitives.push(Primitive::from_data(Some(material), data));
    mesh
}

/// Scene with CPU geometry only; upload it before loading the renderer
pub fn demo_scene() -> Scene {
    let mut scene = Scene::new();

    let floor = single_primitive(&mut scene, Material::solid(Vec3::repeat(0.7), 0.9), MeshData::plane(4.0));
    let floor = scene.add_mesh(floor);
    scene.add_node(Mat4::new_translation(&Vec3::new(0.0, -0.5, 0.0)), Some(floor));

    let cube = single_primitive(&mut scene, Material::solid(Vec3::repeat(0.9), 0.6), MeshData::cube(0.5));
    let cube = scene.add_mesh(cube);
    scene.add_node(Mat4::identity(), Some(cube));

    // A flattened red box behind the cube bleeds colour onto the floor
    let wall = single_primitive(&mut scene, Material::solid(Vec3::new(0.8, 0.1, 0.1), 0.8), MeshData::cube(0.5));
    let wall = scene.add_mesh(wall);
    let wall_world = Mat4::new_translation(&Vec3::new(-1.5, 0.5, -1.0)) * Mat4::new_nonuniform_scaling(&Vec3::new(0.2, 2.0, 3.0));
    scene.add_node(wall_world, Some(wall));

    scene.add_light(Light::directional(sun_direction(), Vec3::new(1.0, 0.96, 0.9), 3.0));
    scene.commit_transforms();
    scene
}

/// Camera looking at the cube from the front right
pub fn demo_camera(config: &ViewerConfig, width: u32, height: u32) -> Camera {
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let mut camera = Camera::perspective(Vec3::new(3.0, 3.0, 5.0), config.fov, aspect, config.near, config.far);
    camera.look_at(Vec3::new(0.0, -0.2, 0.0));
    camera
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rsm_renderer::scene::SceneCollaborator;

    #[test]
    fn test_scene_contents() {
        let scene = demo_scene();
        assert_eq!(scene.nodes().len(), 3);
        assert_eq!(scene.lights().len(), 1);
        assert!(scene.lights()[0].casts_rsm());
        let bounds = scene.bounds();
        assert!(bounds.radius >= 4.0);
    }

    #[test]
    fn test_rotate_sun_keeps_elevation() {
        let start = sun_direction();
        let turned = rotate_sun(&start, 0.7);
        assert_relative_eq!(turned.y, start.y);
        assert_relative_eq!(turned.norm(), 1.0, epsilon = 1e-6);
        assert_relative_eq!(rotate_sun(&turned, -0.7), start, epsilon = 1e-6);
    }
}
