// =============================================================================
// MSAA TRIANGLE - Vulkan swapchain and frame pacing
// =============================================================================
//
// Draws one multisampled triangle, resolved into the presentable image.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, resize / close notifications)        │
// │    └── EventQueue (coalesced SurfaceEvents)                     │
// │          └── Renderer                                           │
// │                ├── FrameScheduler (wait, acquire, submit, show) │
// │                └── ResizeCoordinator (drain, teardown, rebuild) │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Poll queued window events once per loop iteration
// 2. Close -> exit, resize -> rebuild size-dependent resources
// 3. Wait for the slot's fence
// 4. Acquire swapchain image
// 5. Submit pre-recorded commands to GPU
// 6. Present rendered image to screen
//
// =============================================================================

mod backend;
mod config;
mod error;
mod events;
mod frame;
mod renderer;
mod resize;

use anyhow::{Context, Result};
use ash::vk;
use config::Config;
use error::EngineError;
use events::{EventQueue, SurfaceEvent};
use frame::FrameOutcome;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use renderer::Renderer;
use resize::{ResizeCoordinator, ResizeOutcome};
use std::fs::File;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml; reported once logging is up
    let (config, source) = Config::load();

    init_logging(&config);
    source.report(&config);
    log::info!("Starting MSAA triangle");
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        if config.window.resizable {
            "resizable"
        } else {
            "fixed size"
        }
    );
    log::info!("Present mode: {}", config.graphics.present_mode);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    // Renderer and window are gone by the time a setup error is reported
    match app.take_failure() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Initialize logging. `RUST_LOG` overrides the configured level.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.log_filter());
    builder.parse_default_env();

    if let Some(path) = &config.debug.log_file {
        match File::create(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {:?}: {}", path, e),
        }
    }

    builder.init();
}

/// Top-level message for a fatal frame error
fn frame_failure_context(err: &EngineError) -> &'static str {
    match err.code() {
        Some(vk::Result::ERROR_DEVICE_LOST) => "GPU device lost during frame submission",
        Some(_) => "Frame submission failed",
        None => "Frame failed",
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer owns the surface,
/// which must be destroyed while the window still exists.
struct App {
    renderer: Option<Renderer>,
    window: Option<Arc<Window>>,

    config: Config,
    events: EventQueue,
    resize: ResizeCoordinator,

    /// First fatal error; ends the event loop
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let resize = ResizeCoordinator::new(config.graphics.rebuild_on_stale);
        Self {
            renderer: None,
            window: None,
            config,
            events: EventQueue::new(),
            resize,
            failure: None,
        }
    }

    fn take_failure(&mut self) -> Option<anyhow::Error> {
        // Release GPU resources before the error is printed
        self.renderer = None;
        self.window = None;
        self.failure.take()
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{:#}", err);
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        event_loop.exit();
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        let size = window.inner_size();
        let renderer = Renderer::new(
            &self.config,
            window.raw_display_handle(),
            window.raw_window_handle(),
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
        )
        .context("Failed to initialize Vulkan")?;

        log::info!(
            "Rendering {}x{} on {}",
            renderer.profile().extent.width,
            renderer.profile().extent.height,
            renderer.profile().name
        );
        Ok(renderer)
    }

    // =========================================================================
    // MAIN LOOP
    // =========================================================================

    /// Apply what happened to the window since the last iteration.
    /// Returns false once the loop should stop.
    fn process_events(&mut self, event_loop: &ActiveEventLoop) -> bool {
        match self.events.poll() {
            Some(SurfaceEvent::CloseRequested) => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
                false
            }
            Some(SurfaceEvent::Resized { width, height }) => {
                let Some(renderer) = self.renderer.as_mut() else {
                    return true;
                };
                match self.resize.on_resize(renderer, width, height) {
                    Ok(ResizeOutcome::Rebuilt(extent)) => {
                        log::debug!("Swapchain extent is now {}x{}", extent.width, extent.height);
                        true
                    }
                    Ok(ResizeOutcome::Ignored) => true,
                    Err(e) => {
                        self.fail(event_loop, anyhow::Error::new(e).context("Resize failed"));
                        false
                    }
                }
            }
            None => true,
        }
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return;
        };

        let outcome = match renderer.render_frame() {
            Ok(outcome) => outcome,
            Err(e) => {
                let context = frame_failure_context(&e);
                self.fail(event_loop, anyhow::Error::new(e).context(context));
                return;
            }
        };

        if let FrameOutcome::Presented {
            image_index,
            suboptimal: true,
        } = outcome
        {
            log::trace!("Presented image {} to a suboptimal swapchain", image_index);
        }

        if outcome.surface_lost() {
            let size = window.inner_size();
            if let Err(e) = self.resize.recover(renderer, size.width, size.height) {
                self.fail(event_loop, anyhow::Error::new(e).context("Swapchain rebuild failed"));
            }
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(self.config.window.resizable);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                self.fail(event_loop, e);
                return;
            }
        }
        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                self.events.push(SurfaceEvent::CloseRequested);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.events.push(SurfaceEvent::Resized {
                    width: size.width,
                    height: size.height,
                });
            }

            WindowEvent::RedrawRequested => {
                self.render(event_loop);
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.events.push(SurfaceEvent::CloseRequested);
                }
            }

            _ => {}
        }
    }

    /// Called when the event loop is about to block waiting for events.
    /// Queued notifications are handled here, then the next frame is
    /// requested.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if !self.process_events(event_loop) {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_loss_gets_its_own_message() {
        let lost = EngineError::Vulkan {
            op: "vkQueueSubmit",
            code: vk::Result::ERROR_DEVICE_LOST,
        };
        let oom = EngineError::Vulkan {
            op: "vkQueueSubmit",
            code: vk::Result::ERROR_OUT_OF_HOST_MEMORY,
        };

        assert_eq!(frame_failure_context(&lost), "GPU device lost during frame submission");
        assert_eq!(frame_failure_context(&oom), "Frame submission failed");
        assert_eq!(
            frame_failure_context(&EngineError::NoSuitableDevice("gone".to_string())),
            "Frame failed"
        );
    }
}
