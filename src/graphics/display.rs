// DisplayController - windowed/fullscreen state machine
//
// The toggle is the only transition. A failed transition rolls back to the
// previous mode; whether the error is fatal is decided by the caller, based
// on whether the swapchain still has a render target.

use super::{GraphicsDevice, SwapChain};
use crate::backend::{Extent, GpuBackend};
use crate::error::GraphicsError;
use crate::window::NativeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    Windowed,
    Fullscreen,
}

impl DisplayMode {
    pub fn toggled(self) -> Self {
        match self {
            DisplayMode::Windowed => DisplayMode::Fullscreen,
            DisplayMode::Fullscreen => DisplayMode::Windowed,
        }
    }

    pub fn is_fullscreen(self) -> bool {
        self == DisplayMode::Fullscreen
    }
}

#[derive(Debug)]
pub struct DisplayController {
    mode: DisplayMode,
    /// Client size a transition is waiting to apply. Stays set when the
    /// resize failed.
    pending_dimensions: Option<Extent>,
}

impl Default for DisplayController {
    fn default() -> Self {
        Self::new(DisplayMode::Windowed)
    }
}

impl DisplayController {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            pending_dimensions: None,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    pub fn pending_dimensions(&self) -> Option<Extent> {
        self.pending_dimensions
    }

    /// Switch between windowed and fullscreen and resize the swapchain to the
    /// window's new client area. Returns the mode now in effect.
    pub fn toggle_fullscreen<B: GpuBackend>(
        &mut self,
        device: &mut GraphicsDevice<B>,
        swapchain: &mut SwapChain<B>,
        window: &dyn NativeWindow,
    ) -> Result<DisplayMode, GraphicsError> {
        let previous = self.mode;
        self.mode = previous.toggled();

        if let Err(e) = swapchain.set_fullscreen(device, self.mode.is_fullscreen()) {
            log::warn!("Could not switch to {:?}, staying {:?}: {}", self.mode, previous, e);
            self.mode = previous;
            return Err(e);
        }

        let size = window.client_size();
        self.pending_dimensions = Some(size);
        match swapchain.resize(device, size.width, size.height) {
            Ok(()) => {
                self.pending_dimensions = None;
                log::info!("Display mode {:?} at {}x{}", self.mode, size.width, size.height);
                Ok(self.mode)
            }
            Err(e) => {
                log::error!("Resize after switching to {:?} failed: {}", self.mode, e);
                self.roll_back(device, swapchain, window, previous);
                Err(e)
            }
        }
    }

    fn roll_back<B: GpuBackend>(
        &mut self,
        device: &mut GraphicsDevice<B>,
        swapchain: &mut SwapChain<B>,
        window: &dyn NativeWindow,
        previous: DisplayMode,
    ) {
        match swapchain.set_fullscreen(device, previous.is_fullscreen()) {
            Ok(()) => self.mode = previous,
            Err(e) => log::error!("Could not return to {:?}: {}", previous, e),
        }

        let size = window.client_size();
        self.pending_dimensions = Some(size);
        match swapchain.resize(device, size.width, size.height) {
            Ok(()) => {
                self.pending_dimensions = None;
                log::warn!("Rolled back to {:?} at {}x{}", self.mode, size.width, size.height);
            }
            Err(e) => log::error!("Rollback resize to {}x{} failed: {}", size.width, size.height, e),
        }
    }

    /// Apply a window resize. Returns whether the swapchain was resized;
    /// minimized (0x0) windows and unchanged sizes are skipped.
    pub fn handle_resize<B: GpuBackend>(
        &mut self,
        device: &mut GraphicsDevice<B>,
        swapchain: &mut SwapChain<B>,
        width: u32,
        height: u32,
    ) -> Result<bool, GraphicsError> {
        let size = Extent::new(width, height);
        if size.is_empty() {
            log::debug!("Ignoring resize to {}x{}", width, height);
            return Ok(false);
        }
        if size == swapchain.extent() && swapchain.render_target().is_some() {
            return Ok(false);
        }

        self.pending_dimensions = Some(size);
        swapchain.resize(device, width, height)?;
        self.pending_dimensions = None;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::HeadlessBackend;
    use crate::graphics::PresentOptions;
    use crate::window::HeadlessWindow;

    struct Fixture {
        device: GraphicsDevice<HeadlessBackend>,
        window: Arc<HeadlessWindow>,
        swapchain: SwapChain<HeadlessBackend>,
        display: DisplayController,
    }

    fn fixture() -> Fixture {
        let mut device = GraphicsDevice::from_backend(HeadlessBackend::new());
        let window = Arc::new(HeadlessWindow::new(Extent::new(800, 600), Extent::new(1920, 1080)));
        let swapchain =
            SwapChain::create(&mut device, window.clone(), 800, 600, &PresentOptions::default()).unwrap();
        Fixture {
            device,
            window,
            swapchain,
            display: DisplayController::default(),
        }
    }

    #[test]
    fn toggle_resizes_to_monitor() {
        let mut f = fixture();
        let mode = f
            .display
            .toggle_fullscreen(&mut f.device, &mut f.swapchain, f.window.as_ref())
            .unwrap();

        assert_eq!(mode, DisplayMode::Fullscreen);
        assert!(f.swapchain.is_fullscreen());
        assert_eq!(f.swapchain.extent(), Extent::new(1920, 1080));
        assert_eq!(f.display.pending_dimensions(), None);
    }

    #[test]
    fn refused_transition_keeps_mode() {
        let mut f = fixture();
        f.window.refuse_fullscreen(true);

        let err = f
            .display
            .toggle_fullscreen(&mut f.device, &mut f.swapchain, f.window.as_ref())
            .unwrap_err();

        assert!(matches!(err, GraphicsError::FullscreenTransition(_)));
        assert_eq!(f.display.mode(), DisplayMode::Windowed);
        assert!(f.swapchain.render_target().is_some());
    }

    #[test]
    fn failed_resize_rolls_back() {
        let mut f = fixture();
        f.device.backend().ledger().lock().faults.resize = Some(GraphicsError::ResizeFailed {
            width: 1920,
            height: 1080,
            reason: "out of memory".to_string(),
        });

        let err = f
            .display
            .toggle_fullscreen(&mut f.device, &mut f.swapchain, f.window.as_ref())
            .unwrap_err();

        assert!(matches!(err, GraphicsError::ResizeFailed { .. }));
        assert_eq!(f.display.mode(), DisplayMode::Windowed);
        assert!(!f.window.is_fullscreen());
        assert_eq!(f.swapchain.extent(), Extent::new(800, 600));
        assert!(f.swapchain.render_target().is_some());
    }

    #[test]
    fn failed_rollback_leaves_no_target() {
        let mut f = fixture();
        // Minimized while windowed: going back has nothing to resize to
        f.window.resize(Extent::new(0, 0));
        f.device.backend().ledger().lock().faults.resize = Some(GraphicsError::ResizeFailed {
            width: 1920,
            height: 1080,
            reason: "out of memory".to_string(),
        });

        let err = f
            .display
            .toggle_fullscreen(&mut f.device, &mut f.swapchain, f.window.as_ref())
            .unwrap_err();

        assert!(matches!(err, GraphicsError::ResizeFailed { width: 1920, .. }));
        assert_eq!(f.display.mode(), DisplayMode::Windowed);
        assert!(!f.window.is_fullscreen());
        assert!(f.swapchain.render_target().is_none());
        assert_eq!(f.display.pending_dimensions(), Some(Extent::new(0, 0)));
        assert!(f.device.backend().ledger().lock().live_views.is_empty());
    }

    #[test]
    fn minimize_and_same_size_are_skipped() {
        let mut f = fixture();
        let ledger = f.device.backend().ledger();
        let before = ledger.lock().views_created;

        assert!(!f.display.handle_resize(&mut f.device, &mut f.swapchain, 0, 0).unwrap());
        assert!(!f.display.handle_resize(&mut f.device, &mut f.swapchain, 800, 600).unwrap());
        assert_eq!(ledger.lock().views_created, before);

        assert!(f.display.handle_resize(&mut f.device, &mut f.swapchain, 1024, 768).unwrap());
        assert_eq!(f.swapchain.extent(), Extent::new(1024, 768));
    }
}
