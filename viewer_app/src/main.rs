//! Viewer for the render core
//!
//! Opens a window, registers a cube with a checkerboard material and runs
//! the frame loop. `T` swaps the albedo texture, `Escape` quits. An optional
//! PNG path on the command line replaces the initial texture. Settings are
//! read from `viewer.toml` when present.

mod window;

use glfw::{Action, Key, WindowEvent};
use render_core::backends::vulkan::VulkanBackend;
use render_core::core::config::ConfigError;
use render_core::foundation::logging;
use render_core::prelude::*;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use window::{Window, WindowError};

const CONFIG_PATH: &str = "viewer.toml";
const STATS_INTERVAL_FRAMES: u64 = 600;

#[derive(Error, Debug)]
enum ViewerError {
    #[error("Window: {0}")]
    Window(#[from] WindowError),

    #[error("Renderer: {0}")]
    Render(#[from] RenderError),

    #[error("Config: {0}")]
    Config(#[from] ConfigError),

    #[error("Image {path}: {source}")]
    Image {
        path: String,
        source: image::ImageError,
    },
}

fn load_config() -> Result<ApplicationConfig, ConfigError> {
    let config = if Path::new(CONFIG_PATH).exists() {
        ApplicationConfig::load_from_file(CONFIG_PATH)?
    } else {
        ApplicationConfig::new("viewer")
    };
    config.validate()?;
    Ok(config)
}

fn checkerboard(size: u32, cell: u32, a: [u8; 4], b: [u8; 4]) -> TextureData {
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let color = if (x / cell + y / cell) % 2 == 0 { a } else { b };
            pixels.extend_from_slice(&color);
        }
    }
    TextureData::rgba8_srgb(size, size, pixels)
}

fn load_png(path: &str) -> Result<TextureData, ViewerError> {
    let image = image::open(path)
        .map_err(|source| ViewerError::Image { path: path.to_string(), source })?
        .to_rgba8();
    let (width, height) = image.dimensions();
    Ok(TextureData::rgba8_srgb(width, height, image.into_raw()))
}

fn run() -> Result<(), ViewerError> {
    let config = load_config()?;
    logging::init_with_level(&config.logging.level);

    let mut window = Window::new(&config.renderer.application_name, 1280, 720)?;
    let backend = VulkanBackend::new(&mut window, &config.renderer)?;
    let (width, height) = window.framebuffer_size();
    let mut renderer = Renderer::initialize(&backend, &config.renderer, Extent2D::new(width, height))?;

    let albedo = match std::env::args().nth(1) {
        Some(path) => load_png(&path)?,
        None => checkerboard(256, 32, [230, 230, 230, 255], [40, 40, 40, 255]),
    };
    let cube = renderer.register_mesh(&MeshData::cube())?;
    let material = renderer
        .register_material(&MaterialDesc::new(MaterialParams::default()).with_texture(TextureSlot::Albedo, albedo))?;
    let scene = SceneData {
        pipeline: None,
        draws: vec![DrawItem { mesh: cube, material }],
        clear_color: [0.02, 0.02, 0.05, 1.0],
    };

    let started = Instant::now();
    let mut swaps = 0u32;
    while !window.should_close() {
        for event in window.poll_events() {
            match event {
                WindowEvent::FramebufferSize(w, h) => renderer.resize(w.max(0) as u32, h.max(0) as u32),
                WindowEvent::Key(Key::Escape, _, Action::Press, _) => window.set_should_close(true),
                WindowEvent::Key(Key::T, _, Action::Press, _) => {
                    swaps += 1;
                    let tint = [(swaps * 70 % 256) as u8, 120, 200, 255];
                    renderer.texture_swaps().enqueue(
                        material,
                        TextureSlot::Albedo,
                        checkerboard(256, 16 << (swaps % 3), tint, [10, 10, 10, 255]),
                    );
                }
                _ => {}
            }
        }

        let Some(frame) = renderer.begin_frame()? else {
            // Minimized
            std::thread::sleep(Duration::from_millis(16));
            continue;
        };
        renderer.record_scene(&frame, &scene)?;
        renderer.end_frame()?;

        for failure in renderer.texture_swaps().take_failures() {
            log::warn!("Texture swap for {:?} failed: {}", failure.slot, failure.error);
        }

        let stats = renderer.stats();
        if stats.frames_submitted % STATS_INTERVAL_FRAMES == 0 {
            let elapsed = started.elapsed().as_secs_f64();
            log::info!(
                "{} frames in {elapsed:.1}s, {} rebuilds, {} swaps ({} failed), {} skipped",
                stats.frames_submitted,
                stats.swapchain_rebuilds,
                stats.texture_swaps,
                stats.texture_swap_failures,
                stats.skipped_frames
            );
        }
    }

    renderer.shutdown()?;
    // Device and instance go before the window that owns the surface
    drop(renderer);
    drop(backend);
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        log::error!("{e}");
        eprintln!("viewer: {e}");
        std::process::exit(1);
    }
}
