// SwapChain - the presentable back buffers and their single render-target view
//
// The view is the only thing that references the back buffers, so it is
// dropped before every resize and recreated afterwards. At most one view is
// alive at any time.

use std::sync::Arc;

use super::GraphicsDevice;
use crate::backend::{Extent, GpuBackend, PixelFormat, SwapChainDesc, Viewport};
use crate::error::GraphicsError;
use crate::window::NativeWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentOptions {
    pub buffer_count: u32,
    pub vsync: bool,
}

impl Default for PresentOptions {
    fn default() -> Self {
        Self {
            buffer_count: 2,
            vsync: true,
        }
    }
}

pub struct SwapChain<B: GpuBackend> {
    // Declared first so it is released before the swapchain itself
    render_target: Option<B::RenderTargetView>,
    raw: B::SwapChain,
    extent: Extent,
    buffer_count: u32,
    format: PixelFormat,
    fullscreen: bool,
    viewport: Viewport,
}

impl<B: GpuBackend> SwapChain<B> {
    /// Build the chain for `window`, create its render-target view and bind
    /// it together with a full-window viewport.
    pub fn create(
        device: &mut GraphicsDevice<B>,
        window: Arc<dyn NativeWindow>,
        width: u32,
        height: u32,
        options: &PresentOptions,
    ) -> Result<Self, GraphicsError> {
        let requested = Extent::new(width, height);
        if requested.is_empty() {
            return Err(GraphicsError::SwapChainCreate(format!(
                "window has no drawable area ({width}x{height})"
            )));
        }

        let desc = SwapChainDesc {
            extent: requested,
            buffer_count: options.buffer_count,
            format: PixelFormat::Rgba8Unorm,
            vsync: options.vsync,
        };
        let raw = device.backend_mut().create_swapchain(window, &desc)?;
        let extent = device.backend().swapchain_extent(&raw);

        let mut swapchain = Self {
            render_target: None,
            raw,
            extent,
            buffer_count: desc.buffer_count,
            format: desc.format,
            fullscreen: false,
            viewport: Viewport::full(extent),
        };
        swapchain.bind_render_target(device)?;

        log::info!(
            "Swapchain created: {}x{}, {} buffers, vsync {}",
            extent.width,
            extent.height,
            desc.buffer_count,
            if options.vsync { "on" } else { "off" }
        );
        Ok(swapchain)
    }

    /// Resize the back buffers to the new client area.
    ///
    /// On failure no render target is bound; the caller has to retry with
    /// valid dimensions or give up.
    pub fn resize(&mut self, device: &mut GraphicsDevice<B>, width: u32, height: u32) -> Result<(), GraphicsError> {
        // Outstanding views block the resize
        self.render_target = None;

        let applied = device
            .backend_mut()
            .resize_buffers(&mut self.raw, Extent::new(width, height))
            .map_err(|e| match e {
                GraphicsError::ResizeFailed { .. } | GraphicsError::DeviceLost(_) => e,
                other => GraphicsError::ResizeFailed {
                    width,
                    height,
                    reason: other.to_string(),
                },
            })?;
        self.extent = applied;

        self.bind_render_target(device)?;
        log::debug!("Swapchain resized to {}x{}", applied.width, applied.height);
        Ok(())
    }

    /// Request the fullscreen state. Does not resize; follow up with `resize`.
    pub fn set_fullscreen(&mut self, device: &mut GraphicsDevice<B>, enabled: bool) -> Result<(), GraphicsError> {
        device
            .backend_mut()
            .set_fullscreen_state(&mut self.raw, enabled)
            .map_err(|e| match e {
                GraphicsError::FullscreenTransition(_) | GraphicsError::DeviceLost(_) => e,
                other => GraphicsError::FullscreenTransition(other.to_string()),
            })?;
        self.fullscreen = enabled;
        Ok(())
    }

    fn bind_render_target(&mut self, device: &mut GraphicsDevice<B>) -> Result<(), GraphicsError> {
        let backend = device.backend_mut();
        let view = backend.create_render_target_view(&self.raw)?;
        self.viewport = Viewport::full(self.extent);
        backend.set_render_target(&view);
        backend.set_viewport(self.viewport);
        self.render_target = Some(view);
        Ok(())
    }

    /// The current view, or `None` after a failed resize.
    pub fn render_target(&self) -> Option<&B::RenderTargetView> {
        self.render_target.as_ref()
    }

    pub fn extent(&self) -> Extent {
        self.extent
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn raw(&self) -> &B::SwapChain {
        &self.raw
    }

    pub(crate) fn raw_mut(&mut self) -> &mut B::SwapChain {
        &mut self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuResource, HeadlessBackend};
    use crate::window::HeadlessWindow;

    fn setup() -> (GraphicsDevice<HeadlessBackend>, Arc<dyn NativeWindow>) {
        let device = GraphicsDevice::from_backend(HeadlessBackend::new());
        let window = Arc::new(HeadlessWindow::new(Extent::new(800, 600), Extent::new(1920, 1080)));
        (device, window)
    }

    #[test]
    fn create_binds_view_and_viewport() {
        let (mut device, window) = setup();
        let ledger = device.backend().ledger();
        let swapchain = SwapChain::create(&mut device, window, 800, 600, &PresentOptions::default()).unwrap();

        let view = swapchain.render_target().unwrap().handle();
        let ledger = ledger.lock();
        assert_eq!(ledger.bound_target, Some(view));
        assert_eq!(ledger.viewport, Some(Viewport::full(Extent::new(800, 600))));
        assert_eq!(swapchain.format(), PixelFormat::Rgba8Unorm);
        assert_eq!(swapchain.buffer_count(), 2);
    }

    #[test]
    fn zero_sized_window_is_rejected() {
        let (mut device, window) = setup();
        let err = SwapChain::create(&mut device, window, 0, 600, &PresentOptions::default())
            .err()
            .unwrap();
        assert!(matches!(err, GraphicsError::SwapChainCreate(_)));
    }

    #[test]
    fn resize_replaces_the_view() {
        let (mut device, window) = setup();
        let ledger = device.backend().ledger();
        let mut swapchain = SwapChain::create(&mut device, window, 800, 600, &PresentOptions::default()).unwrap();
        let old = swapchain.render_target().unwrap().handle();

        swapchain.resize(&mut device, 1024, 768).unwrap();

        let new = swapchain.render_target().unwrap().handle();
        assert_ne!(old, new);
        assert_eq!(swapchain.extent(), Extent::new(1024, 768));
        assert_eq!(swapchain.viewport().width, 1024.0);
        assert_eq!(ledger.lock().live_views.len(), 1);
    }

    #[test]
    fn backend_resize_errors_become_resize_failed() {
        let (mut device, window) = setup();
        let ledger = device.backend().ledger();
        let mut swapchain = SwapChain::create(&mut device, window, 800, 600, &PresentOptions::default()).unwrap();

        ledger.lock().faults.resize = Some(GraphicsError::Api {
            call: "ResizeBuffers",
            message: "driver said no".to_string(),
        });
        let err = swapchain.resize(&mut device, 640, 480).unwrap_err();

        assert!(matches!(err, GraphicsError::ResizeFailed { width: 640, height: 480, .. }));
        assert!(swapchain.render_target().is_none());
        assert!(ledger.lock().live_views.is_empty());
    }
}
