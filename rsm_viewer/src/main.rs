//! RSM viewer
//!
//! Opens a window and renders the demo scene with reflective shadow map
//! global illumination. Up/Down change the indirect weight, Left/Right turn
//! the sun. `--reference out.png` renders one frame on the CPU instead.

mod cli;
mod config;
mod demo;
mod error;
mod swapchain;
mod tonemap;
mod window;

use std::path::Path;
use std::time::Instant;

use ash::extensions::khr;
use ash::vk;

use rsm_renderer::config::Config;
use rsm_renderer::foundation::{logging, math::Vec3};
use rsm_renderer::render::backends::vulkan::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use rsm_renderer::render::reference::ReferenceRenderer;
use rsm_renderer::render::{RenderError, Renderer, RendererState, LOAD_DONE};

use cli::{Args, USAGE};
use config::ViewerConfig;
use demo::{demo_camera, demo_scene, rotate_sun, sun_direction};
use error::ViewerResult;
use swapchain::Swapchain;
use tonemap::{display_pixel, ToneMap};
use window::{Window, WindowInput};

fn main() {
    logging::init();

    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}

fn run() -> ViewerResult<()> {
    let args = Args::parse(std::env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => ViewerConfig::load_from_file(path)?,
        None => ViewerConfig::default(),
    };
    args.apply(&mut config);
    config.renderer = config.renderer.validated()?;

    match &args.reference {
        Some(path) => render_reference(&config, path),
        None => run_windowed(&config),
    }
}

fn render_reference(config: &ViewerConfig, path: &Path) -> ViewerResult<()> {
    let (width, height) = (config.width, config.height);
    let scene = demo_scene();
    let camera = demo_camera(config, width, height);

    let started = Instant::now();
    let mut renderer = ReferenceRenderer::new(&config.renderer, width, height)?;
    let frame = renderer.render(&scene, &camera, &RendererState::from_config(&config.renderer))?;
    log::info!(
        "Reference frame {width}x{height} in {:.2?}: {:?}",
        started.elapsed(),
        frame.stats
    );

    let output = image::RgbImage::from_fn(width, height, |x, y| {
        let radiance = frame.output.get(x, y).map_or_else(Vec3::zeros, |pixel| pixel.xyz());
        image::Rgb(display_pixel(radiance, config.exposure))
    });
    output.save(path)?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

fn resize(renderer: &mut Renderer, tone_map: &mut ToneMap, swapchain: &Swapchain) -> ViewerResult<()> {
    let extent = swapchain.extent();
    tone_map.set_targets(swapchain.views(), extent)?;
    renderer.on_resize(extent.width, extent.height)?;
    if let Some(views) = renderer.camera_views() {
        tone_map.bind_hdr(views.hdr);
    }
    Ok(())
}

fn run_windowed(config: &ViewerConfig) -> ViewerResult<()> {
    let mut window = Window::new("RSM Viewer", config.width, config.height, config.fullscreen)?;
    let extensions = window.required_instance_extensions()?;
    let instance = VulkanInstance::new("rsm_viewer", &extensions, config.validation)?;
    let surface = window.create_surface(instance.instance.handle())?;

    let surface_loader = khr::Surface::new(&instance.entry, &instance.instance);
    let present_support = |device: vk::PhysicalDevice, family: u32| {
        unsafe { surface_loader.get_physical_device_surface_support(device, family, surface) }.unwrap_or(false)
    };
    let device_extensions = [khr::Swapchain::name()];
    let physical = PhysicalDeviceInfo::select_suitable_device(&instance.instance, &device_extensions, &present_support)?;
    let device = LogicalDevice::new(&instance.instance, physical, &device_extensions)?;

    let (width, height) = window.framebuffer_size();
    let mut swapchain = Swapchain::new(
        &instance.entry,
        &instance.instance,
        &device,
        surface,
        vk::Extent2D { width, height },
        config.renderer.back_buffer_count,
    )?;
    let context = device.context();
    let mut tone_map = ToneMap::new(&context, config, swapchain.format())?;

    let mut scene = demo_scene();
    scene.upload_geometry(&context)?;
    let mut renderer = Renderer::new(context, config.renderer.clone())?;
    let mut stage = 0;
    while stage != LOAD_DONE {
        stage = renderer.load_scene(&scene, stage)?;
    }
    resize(&mut renderer, &mut tone_map, &swapchain)?;

    let extent = swapchain.extent();
    let mut camera = demo_camera(config, extent.width, extent.height);
    let mut state = RendererState::from_config(renderer.config());
    let mut sun = sun_direction();
    state.sun_direction = Some(sun);

    let started = Instant::now();
    let mut frames = 0u64;
    while !window.should_close() {
        let mut resized = false;
        for input in window.poll() {
            match input {
                WindowInput::Quit => {}
                WindowInput::Resized(..) => resized = true,
                WindowInput::AdjustWeight(step) => {
                    state.di_weight = (state.di_weight + step).clamp(0.0, 1.0);
                    log::info!("Indirect weight {:.2}", state.di_weight);
                }
                WindowInput::RotateSun(angle) => {
                    sun = rotate_sun(&sun, angle);
                    state.sun_direction = Some(sun);
                }
            }
        }

        if resized || swapchain.is_out_of_date() {
            let (width, height) = window.framebuffer_size();
            if width == 0 || height == 0 {
                window.wait_events();
                continue;
            }
            swapchain.rebuild(vk::Extent2D { width, height })?;
            resize(&mut renderer, &mut tone_map, &swapchain)?;
            let extent = swapchain.extent();
            camera.set_aspect(extent.width, extent.height);
        }

        match renderer.on_render(&scene, &camera, &state, &mut swapchain, &mut tone_map) {
            Ok(Some(_)) => frames += 1,
            Ok(None) => {}
            // The swap chain flagged itself; rebuilt at the top of the next iteration
            Err(RenderError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)) => {}
            Err(err) => return Err(err.into()),
        }
    }

    let seconds = started.elapsed().as_secs_f64();
    if seconds > 0.0 {
        log::info!("{frames} frames in {seconds:.1} s ({:.1} fps)", frames as f64 / seconds);
    }

    renderer.unload_scene()?;
    drop(renderer);
    scene.release_geometry();
    Ok(())
}
