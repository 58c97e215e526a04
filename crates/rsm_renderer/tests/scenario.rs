//! A lit cube on a floor, rendered through the host reference pipeline

use approx::assert_relative_eq;
use rsm_renderer::config::RendererConfig;
use rsm_renderer::foundation::math::{project_point, Mat4, Vec3, Vec4};
use rsm_renderer::render::passes::quadrant_rect;
use rsm_renderer::render::reference::{ReferenceFrame, ReferenceRenderer, Rect};
use rsm_renderer::render::RendererState;
use rsm_renderer::scene::{Camera, Light, Material, Mesh, MeshData, Primitive, Scene};

const WIDTH: u32 = 160;
const HEIGHT: u32 = 120;
const MAP_SIZE: u32 = 128;
const CUBE_HALF: f32 = 0.5;
const FLOOR_Y: f32 = -0.5;

fn light_direction() -> Vec3 {
    Vec3::new(-0.5, -1.0, -0.3).normalize()
}

fn config() -> RendererConfig {
    RendererConfig {
        shadow_map_size: MAP_SIZE,
        constant_ring_size: 3 * 256 * 1024,
        ..RendererConfig::default()
    }
}

fn camera() -> Camera {
    let mut camera = Camera::perspective(
        Vec3::new(3.0, 3.0, 5.0),
        std::f32::consts::FRAC_PI_4,
        WIDTH as f32 / HEIGHT as f32,
        0.1,
        100.0,
    );
    camera.look_at(Vec3::new(0.3, -0.3, 0.0));
    camera
}

fn scene(with_cube: bool, with_floor: bool) -> Scene {
    let mut scene = Scene::new();
    let white = scene.add_material(Material::solid(Vec3::new(0.9, 0.9, 0.9), 0.8));

    if with_cube {
        let mut cube = Mesh::default();
        cube.primitives.push(Primitive::from_data(Some(white), MeshData::cube(CUBE_HALF)));
        let cube = scene.add_mesh(cube);
        scene.add_node(Mat4::identity(), Some(cube));
    }

    if with_floor {
        let mut floor = Mesh::default();
        floor.primitives.push(Primitive::from_data(Some(white), MeshData::plane(4.0)));
        let floor = scene.add_mesh(floor);
        scene.add_node(Mat4::new_translation(&Vec3::new(0.0, FLOOR_Y, 0.0)), Some(floor));
    }

    scene.add_light(Light::directional(light_direction(), Vec3::repeat(1.0), 3.0));
    scene.commit_transforms();
    scene
}

fn render(scene: &Scene) -> ReferenceFrame {
    let mut renderer = ReferenceRenderer::new(&config(), WIDTH, HEIGHT).expect("reference renderer");
    renderer
        .render(scene, &camera(), &RendererState::default())
        .expect("reference frame")
}

fn pixel_of(frame: &ReferenceFrame, point: &Vec3) -> (u32, u32) {
    let ndc = project_point(&frame.per_frame.view_proj(), point).expect("point in front of the camera");
    let x = ((ndc.x * 0.5 + 0.5) * WIDTH as f32).floor();
    let y = ((ndc.y * 0.5 + 0.5) * HEIGHT as f32).floor();
    assert!(x >= 0.0 && y >= 0.0 && x < WIDTH as f32 && y < HEIGHT as f32, "{point:?} off screen");
    (x as u32, y as u32)
}

fn on_cube_surface(p: &Vec3) -> bool {
    let extent = p.x.abs().max(p.y.abs()).max(p.z.abs());
    (extent - CUBE_HALF).abs() < 1e-3
}

#[test]
fn test_gbuffer_world_matches_cube_surface() {
    let frame = render(&scene(true, false));
    let world = &frame.camera.world;

    let mut covered = 0;
    for (x, y, texel) in world.region(world.rect()) {
        if texel.w <= 0.0 {
            continue;
        }
        covered += 1;
        let position = texel.xyz();
        assert!(on_cube_surface(&position), "pixel {x},{y} holds {position:?}");

        // The stored position projects back into its own pixel
        let ndc = project_point(&frame.per_frame.view_proj(), &position).expect("visible point");
        let px = (ndc.x * 0.5 + 0.5) * WIDTH as f32;
        let py = (ndc.y * 0.5 + 0.5) * HEIGHT as f32;
        assert_relative_eq!(px, x as f32 + 0.5, epsilon = 0.02);
        assert_relative_eq!(py, y as f32 + 0.5, epsilon = 0.02);
    }
    assert!(covered > 100, "cube covers only {covered} pixels");
    assert_eq!(frame.stats.gbuffer.visible, 1);
}

#[test]
fn test_flux_only_where_light_sees_cube() {
    let frame = render(&scene(true, false));
    let atlas = &frame.atlas;
    let quadrant: Rect = quadrant_rect(0, MAP_SIZE).into();
    let towards_light = -light_direction();

    let mut lit = 0;
    for (x, y, flux) in atlas.radiance.region(atlas.radiance.rect()) {
        let world = atlas.world.get(x, y).expect("texel in atlas");
        if !quadrant.contains(x, y) {
            assert_eq!(flux, Vec4::zeros(), "texel {x},{y} written outside quadrant 0");
            continue;
        }
        if world.w <= 0.0 {
            assert_eq!(flux, Vec4::zeros(), "flux without geometry at {x},{y}");
            continue;
        }

        lit += 1;
        assert!(flux.xyz().iter().all(|c| *c > 0.0));
        assert!(on_cube_surface(&world.xyz()));
        let normal = atlas.normal.get(x, y).expect("texel in atlas").xyz();
        assert!(normal.dot(&towards_light) > 0.0, "back face {normal:?} in the RSM");
    }
    assert!(lit > 0);
    assert_eq!(frame.per_frame.rsm_light_index(), -1);
}

#[test]
fn test_direct_light_on_cube_top() {
    let frame = render(&scene(true, true));
    let (x, y) = pixel_of(&frame, &Vec3::new(0.0, CUBE_HALF, 0.0));

    let world = frame.camera.world.get(x, y).expect("pixel on screen");
    assert!(world.w > 0.0);
    assert_relative_eq!(world.y, CUBE_HALF, epsilon = 1e-3);

    let seed = frame.camera.radiance.get(x, y).expect("pixel on screen");
    let direct = frame.direct.get(x, y).expect("pixel on screen");
    assert!(direct.xyz().iter().zip(seed.xyz().iter()).all(|(d, s)| d > s));
}

#[test]
fn test_floor_next_to_cube_receives_bounce() {
    let frame = render(&scene(true, true));
    let (x, y) = pixel_of(&frame, &Vec3::new(0.85, FLOOR_Y, 0.1));
    let (ix, iy) = (x / 2, y / 2);

    // The indirect pass shades the even camera texel of its pixel
    let world = frame.camera.world.get(ix * 2, iy * 2).expect("pixel on screen");
    assert!(world.w > 0.0);
    assert_relative_eq!(world.y, FLOOR_Y, epsilon = 1e-3);
    assert!(world.x > CUBE_HALF);

    let indirect = frame.indirect.get(ix, iy).expect("pixel in indirect output").xyz();
    let direct = frame.direct.get(ix * 2, iy * 2).expect("pixel on screen").xyz();
    assert!(indirect.iter().all(|c| *c > 0.0), "no bounce light: {indirect:?}");
    assert!(indirect.norm() < direct.norm(), "indirect {indirect:?} above direct {direct:?}");
}

#[test]
fn test_flat_floor_gets_no_bounce() {
    let frame = render(&scene(false, true));
    assert!(frame.camera.world.pixels().iter().any(|w| w.w > 0.0));
    assert!(frame.direct.pixels().iter().any(|d| d.x > 0.0));
    // Every RSM texel lies in the receiver's plane
    assert!(frame.indirect.pixels().iter().all(|i| i.xyz() == Vec3::zeros()));
}

#[test]
fn test_sample_offsets_are_reproducible() {
    let a = ReferenceRenderer::new(&config(), WIDTH, HEIGHT).expect("reference renderer");
    let b = ReferenceRenderer::new(&config(), WIDTH, HEIGHT).expect("reference renderer");
    assert_eq!(a.kernel().len(), 100);
    let bits = |r: &ReferenceRenderer| -> Vec<(u32, u32)> {
        r.kernel().offsets().iter().map(|o| (o.x.to_bits(), o.y.to_bits())).collect()
    };
    assert_eq!(bits(&a), bits(&b));
    assert_eq!(a.noise().values(), b.noise().values());
}

#[test]
fn test_output_blends_direct_and_indirect() {
    let frame = render(&scene(true, true));
    for (x, y, value) in frame.output.region(frame.output.rect()) {
        assert!(value.iter().all(|c| c.is_finite()), "non-finite output at {x},{y}");
    }
    // Half weight leaves at least half of the direct light
    let (x, y) = pixel_of(&frame, &Vec3::new(0.0, CUBE_HALF, 0.0));
    let direct = frame.direct.get(x, y).expect("pixel on screen");
    let output = frame.output.get(x, y).expect("pixel on screen");
    assert!(output.x >= direct.x * 0.5 - 1e-6);
}
