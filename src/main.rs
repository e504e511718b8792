// =============================================================================
// FRAME-CORE DEMO HOST
// =============================================================================
//
// Minimal winit host around the rendering core. It provides the three things
// the renderer needs from the outside world:
//
//   window   -> surface handles, framebuffer size, resize notifications
//   camera   -> view/projection sampled once per frame
//   scene    -> static mesh + texture uploaded before the first frame
//
// FRAME FLOW (per redraw):
// 1. Sample the orbit camera
// 2. Renderer::draw_frame (wait -> acquire -> update -> record -> submit -> present)
// 3. Update the FPS counter in the title
//
// Any error out of the renderer is fatal: it is logged, the event loop exits
// and main returns it.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use frame_core::backend::scheduler::has_area;
use frame_core::backend::{FrameStatus, Renderer};
use frame_core::config::Config;
use frame_core::scene::{OrbitCamera, StaticScene};
use std::fs::File;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

const CONFIG_PATH: &str = "config.toml";

fn main() -> Result<()> {
    // Load configuration from config.toml; problems are reported once logging is up
    let (config, config_error) = Config::load_or_default(CONFIG_PATH);

    init_logging(&config)?;
    log::info!("Starting frame-core");
    match config_error {
        Some(e) => log::warn!("Failed to load {}: {:#}. Using defaults.", CONFIG_PATH, e),
        None => log::debug!("Config: {:?}", config),
    }
    log::info!(
        "Window: {}x{}, {} frames in flight",
        config.window.width,
        config.window.height,
        config.graphics.max_frames_in_flight
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Initialize logging, optionally redirected to the configured file
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = File::create(&config.debug.log_file)
            .with_context(|| format!("Failed to create log file {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer owns the surface and
/// must go before the window it was created from.
struct App {
    config: Config,
    scene: StaticScene,
    camera: OrbitCamera,
    start_time: Instant,

    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    /// First fatal error; main returns it after the loop exits
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let scene = StaticScene::new(config.scene.shape, config.scene.texture_size);
        let now = Instant::now();
        Self {
            config,
            scene,
            camera: OrbitCamera::default(),
            start_time: now,
            renderer: None,
            window: None,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal error: {:#}", error);
        self.fatal.get_or_insert(error);
        event_loop.exit();
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match Renderer::new(&self.config, &*window, window_extent(&window), &self.scene) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize renderer")),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }

            WindowEvent::RedrawRequested => {
                let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref())
                else {
                    return;
                };

                let extent = window_extent(window);
                let elapsed = self.start_time.elapsed().as_secs_f32();
                let camera = self.camera.matrices(elapsed, extent.width, extent.height);

                match renderer.draw_frame(&camera, extent) {
                    Ok(FrameStatus::Presented { .. }) => self.update_fps(),
                    Ok(status) => log::trace!("Frame status: {:?}", status),
                    Err(e) => self.fail(event_loop, e),
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing while the window has area. A minimized window stays
    /// idle until the next resize event wakes the loop.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            if has_area(window_extent(window)) {
                window.request_redraw();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(renderer) = self.renderer.take() {
            if let Err(e) = renderer.shutdown() {
                log::error!("Renderer shutdown failed: {:#}", e);
            }
        }
    }
}
