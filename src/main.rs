// =============================================================================
// TRIANGLE RENDERER - winit front end
// =============================================================================
//
// FRAME FLOW:
// 1. winit delivers window events (resize, keys, close)
// 2. about_to_wait requests a redraw
// 3. RedrawRequested renders one frame; present blocks on vsync
//
// Fatal errors are recorded, the loop exits, and the process returns 1.
//
// =============================================================================

use std::fs::File;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use tri_renderer::backend::VulkanBackend;
use tri_renderer::graphics::GraphicsDevice;
use tri_renderer::window::{NativeWindow, WinitWindow};
use tri_renderer::{Config, GraphicsError, Renderer};
use winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<ExitCode> {
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting triangle renderer");
    log::info!(
        "Window: {}x{} ({}), vsync {}",
        config.window.initial_width,
        config.window.initial_height,
        if config.window.fullscreen { "fullscreen" } else { "windowed" },
        if config.graphics.vsync { "on" } else { "off" }
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    Ok(match app.fatal.take() {
        Some(e) => {
            log::error!("Exiting after fatal error: {}", e);
            ExitCode::FAILURE
        }
        None => ExitCode::SUCCESS,
    })
}

/// `RUST_LOG` overrides the configured level. Optionally logs to a file instead
/// of stderr.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.filter_level(config.debug.level_filter());
    builder.parse_default_env();

    if config.debug.log_to_file {
        match File::create(&config.debug.log_file) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", config.debug.log_file, e),
        }
    }

    builder.init();
}

/// Map a key name from the config file to a physical key.
fn parse_key(name: &str) -> Option<KeyCode> {
    let key = match name.to_ascii_lowercase().as_str() {
        "escape" | "esc" => KeyCode::Escape,
        "enter" | "return" => KeyCode::Enter,
        "space" => KeyCode::Space,
        "tab" => KeyCode::Tab,
        "f1" => KeyCode::F1,
        "f2" => KeyCode::F2,
        "f3" => KeyCode::F3,
        "f4" => KeyCode::F4,
        "f5" => KeyCode::F5,
        "f6" => KeyCode::F6,
        "f7" => KeyCode::F7,
        "f8" => KeyCode::F8,
        "f9" => KeyCode::F9,
        "f10" => KeyCode::F10,
        "f11" => KeyCode::F11,
        "f12" => KeyCode::F12,
        "q" => KeyCode::KeyQ,
        "f" => KeyCode::KeyF,
        _ => return None,
    };
    Some(key)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// Field order matters for Drop: the renderer goes before the window it
/// presents to.
struct App {
    config: Config,
    fullscreen_key: Option<KeyCode>,
    quit_key: Option<KeyCode>,
    renderer: Option<Renderer<VulkanBackend>>,
    window: Option<Arc<Window>>,
    /// Set when the loop has to stop with a non-zero exit status
    fatal: Option<GraphicsError>,
}

impl App {
    fn new(config: Config) -> Self {
        let fullscreen_key = parse_key(&config.controls.fullscreen_key);
        if fullscreen_key.is_none() {
            log::warn!("Unknown fullscreen key '{}', toggle disabled", config.controls.fullscreen_key);
        }
        let quit_key = parse_key(&config.controls.quit_key);
        if quit_key.is_none() {
            log::warn!("Unknown quit key '{}'", config.controls.quit_key);
        }

        Self {
            config,
            fullscreen_key,
            quit_key,
            renderer: None,
            window: None,
            fatal: None,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: GraphicsError) {
        log::error!("Fatal: {}", error);
        self.fatal = Some(error);
        event_loop.exit();
    }

    /// Configured size, with 0 replaced by the primary monitor's dimension.
    fn initial_size(&self, event_loop: &ActiveEventLoop) -> Option<PhysicalSize<u32>> {
        let (width, height) = (self.config.window.initial_width, self.config.window.initial_height);
        if width != 0 && height != 0 {
            return Some(PhysicalSize::new(width, height));
        }
        let monitor = event_loop.primary_monitor()?.size();
        Some(PhysicalSize::new(
            if width == 0 { monitor.width } else { width },
            if height == 0 { monitor.height } else { height },
        ))
    }

    // =========================================================================
    // INITIALIZATION
    // =========================================================================

    /// Device, swapchain and pipeline, in that order.
    fn init_renderer(&self, window: Arc<Window>) -> Result<Renderer<VulkanBackend>, GraphicsError> {
        let native: Arc<dyn NativeWindow> = Arc::new(WinitWindow::new(window));
        let device = GraphicsDevice::create(&self.config.device_options(), native.raw_display_handle()?)?;
        let mut renderer = Renderer::new(device, native, &self.config)?;

        if self.config.window.fullscreen {
            if let Err(e) = renderer.toggle_fullscreen() {
                if !renderer.can_continue() {
                    return Err(e);
                }
                log::warn!("Starting windowed: {}", e);
            }
        }
        Ok(renderer)
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

        let mut window_attributes = WindowAttributes::default().with_title(&self.config.window.title);
        if let Some(size) = self.initial_size(event_loop) {
            window_attributes = window_attributes.with_inner_size(size);
        }

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, GraphicsError::SwapChainCreate(format!("window creation failed: {e}")));
                return;
            }
        };

        match self.init_renderer(Arc::clone(&window)) {
            Ok(renderer) => {
                log::info!("Renderer initialized on {}", renderer.device().adapter().name);
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        let fatal = match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
                None
            }

            WindowEvent::Resized(size) => match renderer.handle_resize(size.width, size.height) {
                Ok(_) => None,
                Err(e) if renderer.can_continue() => {
                    log::error!("Resize failed: {}", e);
                    None
                }
                Err(e) => Some(e),
            },

            WindowEvent::RedrawRequested => match renderer.render_frame() {
                Ok(()) => None,
                Err(e) if e.is_device_lost() => Some(e),
                Err(e) => {
                    log::warn!("Frame {} failed: {}", renderer.frame().frames_rendered(), e);
                    None
                }
            },

            WindowEvent::KeyboardInput { event, .. } if event.state.is_pressed() && !event.repeat => {
                match event.physical_key {
                    PhysicalKey::Code(key) if Some(key) == self.quit_key => {
                        log::info!("{:?} pressed, exiting...", key);
                        event_loop.exit();
                        None
                    }
                    PhysicalKey::Code(key) if Some(key) == self.fullscreen_key => {
                        match renderer.toggle_fullscreen() {
                            Ok(_) => None,
                            Err(e) if renderer.can_continue() => {
                                log::warn!("Fullscreen toggle failed, mode unchanged: {}", e);
                                None
                            }
                            Err(e) => Some(e),
                        }
                    }
                    _ => None,
                }
            }

            _ => None,
        };

        if let Some(e) = fatal {
            self.fail(event_loop, e);
        }
    }

    /// Continuous redraw; present is the throttle.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_configured_keys() {
        assert_eq!(parse_key("F11"), Some(KeyCode::F11));
        assert_eq!(parse_key("escape"), Some(KeyCode::Escape));
        assert_eq!(parse_key("Esc"), Some(KeyCode::Escape));
        assert_eq!(parse_key("Hyper"), None);
    }
}
