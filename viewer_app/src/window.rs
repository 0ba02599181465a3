//! Window management using GLFW
//!
//! Provides the presentation surface for the Vulkan backend.

use ash::vk::{self, Handle};
use render_core::backends::vulkan::SurfaceProvider;
use render_core::render::{RenderError, RenderResult};
use thiserror::Error;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    #[error("GLFW initialization failed")]
    InitializationFailed,

    #[error("Window creation failed")]
    CreationFailed,
}

pub type WindowResult<T> = Result<T, WindowError>;

/// GLFW window configured for Vulkan
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    pub fn new(title: &str, width: u32, height: u32) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        // No OpenGL context
        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Poll and drain pending events
    pub fn poll_events(&mut self) -> Vec<glfw::WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events).map(|(_, event)| event).collect()
    }

    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }
}

impl SurfaceProvider for Window {
    fn required_instance_extensions(&self) -> RenderResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| RenderError::SurfaceUnsupported("GLFW reports no Vulkan support".to_string()))
    }

    fn create_surface(&mut self, instance: &ash::Instance) -> RenderResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self
            .window
            .create_window_surface(instance.handle(), std::ptr::null(), &mut surface);

        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(RenderError::SurfaceUnsupported(format!("glfwCreateWindowSurface: {result:?}")))
        }
    }
}
