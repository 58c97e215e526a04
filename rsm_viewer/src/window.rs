//! GLFW window with a Vulkan surface

use ash::vk;
use thiserror::Error;

/// Window system errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// `glfwInit` failed
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// No window could be opened
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result alias for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Input the viewer reacts to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WindowInput {
    /// Close requested by the user
    Quit,
    /// New framebuffer size in pixels
    Resized(u32, u32),
    /// Shift the indirect weight by the given amount
    AdjustWeight(f32),
    /// Rotate the sun around the vertical axis by the given angle in radians
    RotateSun(f32),
}

const WEIGHT_STEP: f32 = 0.05;
const SUN_STEP: f32 = 0.05;

/// GLFW window without a client API
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Open a window, on the primary monitor when `fullscreen` is set
    pub fn new(title: &str, width: u32, height: u32, fullscreen: bool) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        if !glfw.vulkan_supported() {
            return Err(WindowError::GlfwError("Vulkan loader not found".to_string()));
        }
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .with_primary_monitor(|glfw, monitor| {
                let mode = match monitor {
                    Some(monitor) if fullscreen => glfw::WindowMode::FullScreen(monitor),
                    _ => glfw::WindowMode::Windowed,
                };
                glfw.create_window(width, height, title, mode)
            })
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Block until an event arrives; used while minimised
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Poll GLFW and translate the events the viewer cares about
    pub fn poll(&mut self) -> Vec<WindowInput> {
        use glfw::{Action, Key, WindowEvent};

        self.glfw.poll_events();
        let mut inputs = Vec::new();
        for (_, event) in glfw::flush_messages(&self.events) {
            let input = match event {
                WindowEvent::Close | WindowEvent::Key(Key::Escape, _, Action::Press, _) => Some(WindowInput::Quit),
                WindowEvent::FramebufferSize(width, height) => {
                    Some(WindowInput::Resized(width.max(0) as u32, height.max(0) as u32))
                }
                WindowEvent::Key(key, _, Action::Press | Action::Repeat, _) => match key {
                    Key::Up => Some(WindowInput::AdjustWeight(WEIGHT_STEP)),
                    Key::Down => Some(WindowInput::AdjustWeight(-WEIGHT_STEP)),
                    Key::Left => Some(WindowInput::RotateSun(-SUN_STEP)),
                    Key::Right => Some(WindowInput::RotateSun(SUN_STEP)),
                    _ => None,
                },
                _ => None,
            };
            inputs.extend(input);
        }
        if inputs.contains(&WindowInput::Quit) {
            self.window.set_should_close(true);
        }
        inputs
    }

    /// Instance extensions GLFW needs to create a surface
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Failed to get required extensions".to_string()))
    }

    /// Create a surface for `instance`; the caller destroys it
    pub fn create_surface(&self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}
