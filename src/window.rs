// Window-system collaborator
//
// The rendering core only needs native handles (for the surface), the current
// client size, and a way to request a fullscreen transition. winit provides
// the real window; `HeadlessWindow` stands in for it off-screen.

use std::sync::Arc;

use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use winit::window::{Fullscreen, Window};

use crate::backend::Extent;
use crate::error::GraphicsError;

pub trait NativeWindow {
    fn raw_display_handle(&self) -> Result<RawDisplayHandle, GraphicsError>;
    fn raw_window_handle(&self) -> Result<RawWindowHandle, GraphicsError>;

    /// Current drawable area in physical pixels.
    fn client_size(&self) -> Extent;

    fn set_fullscreen(&self, enabled: bool) -> Result<(), GraphicsError>;
}

/// A winit window. Fullscreen is exclusive, in the current monitor's
/// largest video mode.
pub struct WinitWindow {
    window: Arc<Window>,
}

impl WinitWindow {
    pub fn new(window: Arc<Window>) -> Self {
        Self { window }
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl NativeWindow for WinitWindow {
    fn raw_display_handle(&self) -> Result<RawDisplayHandle, GraphicsError> {
        self.window
            .display_handle()
            .map(|h| h.as_raw())
            .map_err(|e| GraphicsError::SwapChainCreate(format!("no display handle: {e}")))
    }

    fn raw_window_handle(&self) -> Result<RawWindowHandle, GraphicsError> {
        self.window
            .window_handle()
            .map(|h| h.as_raw())
            .map_err(|e| GraphicsError::SwapChainCreate(format!("no window handle: {e}")))
    }

    fn client_size(&self) -> Extent {
        let size = self.window.inner_size();
        Extent::new(size.width, size.height)
    }

    fn set_fullscreen(&self, enabled: bool) -> Result<(), GraphicsError> {
        if enabled {
            let monitor = self.window.current_monitor().ok_or_else(|| {
                GraphicsError::FullscreenTransition("window is not on any monitor".to_string())
            })?;
            let mode = largest_mode(monitor.video_modes(), |m| {
                let size = m.size();
                (size.width, size.height, m.refresh_rate_millihertz())
            })
            .ok_or_else(|| {
                GraphicsError::FullscreenTransition("monitor reports no video modes".to_string())
            })?;
            log::debug!(
                "Exclusive fullscreen at {}x{} {}mHz",
                mode.size().width,
                mode.size().height,
                mode.refresh_rate_millihertz()
            );
            self.window.set_fullscreen(Some(Fullscreen::Exclusive(mode)));
        } else {
            self.window.set_fullscreen(None);
        }
        Ok(())
    }
}

/// Largest mode by pixel area, then by refresh rate. `describe` gives
/// (width, height, refresh).
fn largest_mode<M>(modes: impl IntoIterator<Item = M>, describe: impl Fn(&M) -> (u32, u32, u32)) -> Option<M> {
    modes.into_iter().max_by_key(|m| {
        let (width, height, refresh) = describe(m);
        (u64::from(width) * u64::from(height), refresh)
    })
}

#[derive(Debug)]
struct HeadlessState {
    windowed: Extent,
    fullscreen: bool,
    refuse_fullscreen: bool,
}

/// Off-screen window: reports `monitor` as its size while fullscreen and
/// `windowed` otherwise, the way a real window manager would.
#[derive(Debug)]
pub struct HeadlessWindow {
    monitor: Extent,
    state: Mutex<HeadlessState>,
}

impl HeadlessWindow {
    pub fn new(windowed: Extent, monitor: Extent) -> Self {
        Self {
            monitor,
            state: Mutex::new(HeadlessState {
                windowed,
                fullscreen: false,
                refuse_fullscreen: false,
            }),
        }
    }

    /// Simulate the user dragging the window edge.
    pub fn resize(&self, extent: Extent) {
        self.state.lock().windowed = extent;
    }

    /// Make every further fullscreen request fail.
    pub fn refuse_fullscreen(&self, refuse: bool) {
        self.state.lock().refuse_fullscreen = refuse;
    }

    pub fn is_fullscreen(&self) -> bool {
        self.state.lock().fullscreen
    }
}

impl NativeWindow for HeadlessWindow {
    fn raw_display_handle(&self) -> Result<RawDisplayHandle, GraphicsError> {
        Err(GraphicsError::SwapChainCreate("headless window has no display".to_string()))
    }

    fn raw_window_handle(&self) -> Result<RawWindowHandle, GraphicsError> {
        Err(GraphicsError::SwapChainCreate("headless window has no native handle".to_string()))
    }

    fn client_size(&self) -> Extent {
        let state = self.state.lock();
        if state.fullscreen {
            self.monitor
        } else {
            state.windowed
        }
    }

    fn set_fullscreen(&self, enabled: bool) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        if state.refuse_fullscreen {
            return Err(GraphicsError::FullscreenTransition(
                "window manager refused the request".to_string(),
            ));
        }
        state.fullscreen = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_window_reports_monitor_size_in_fullscreen() {
        let window = HeadlessWindow::new(Extent::new(800, 600), Extent::new(1920, 1080));
        assert_eq!(window.client_size(), Extent::new(800, 600));

        window.set_fullscreen(true).unwrap();
        assert_eq!(window.client_size(), Extent::new(1920, 1080));

        window.set_fullscreen(false).unwrap();
        assert_eq!(window.client_size(), Extent::new(800, 600));
    }

    #[test]
    fn picks_largest_then_fastest_mode() {
        let modes = [(1280, 720, 60_000), (1920, 1080, 60_000), (1920, 1080, 144_000), (1600, 900, 240_000)];
        let picked = largest_mode(modes, |&m| m);
        assert_eq!(picked, Some((1920, 1080, 144_000)));

        let none: [(u32, u32, u32); 0] = [];
        assert_eq!(largest_mode(none, |&m| m), None);
    }

    #[test]
    fn refused_request_keeps_mode() {
        let window = HeadlessWindow::new(Extent::new(800, 600), Extent::new(1920, 1080));
        window.refuse_fullscreen(true);
        assert!(window.set_fullscreen(true).is_err());
        assert!(!window.is_fullscreen());
    }
}
