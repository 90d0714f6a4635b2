// Renderer - the components wired together for one window
//
// Field order is drop order: everything that references the device goes
// before it.

use std::sync::Arc;

use crate::backend::GpuBackend;
use crate::config::Config;
use crate::error::GraphicsError;
use crate::graphics::{
    DisplayController, DisplayMode, FrameRenderer, GraphicsDevice, Pipeline, SwapChain,
};
use crate::window::NativeWindow;

pub struct Renderer<B: GpuBackend> {
    frame: FrameRenderer,
    display: DisplayController,
    pipeline: Pipeline<B>,
    swapchain: SwapChain<B>,
    window: Arc<dyn NativeWindow>,
    device: GraphicsDevice<B>,
}

impl<B: GpuBackend> Renderer<B> {
    /// Build the swapchain for the window's current client area, then the
    /// pipeline. Starts windowed.
    pub fn new(
        mut device: GraphicsDevice<B>,
        window: Arc<dyn NativeWindow>,
        config: &Config,
    ) -> Result<Self, GraphicsError> {
        let size = window.client_size();
        let swapchain = SwapChain::create(
            &mut device,
            Arc::clone(&window),
            size.width,
            size.height,
            &config.graphics.present_options(),
        )?;
        let pipeline = Pipeline::create(&mut device)?;

        Ok(Self {
            frame: FrameRenderer::new(
                config.graphics.animation_step,
                config.graphics.clear_color,
                config.graphics.sync_interval(),
            ),
            display: DisplayController::new(DisplayMode::Windowed),
            pipeline,
            swapchain,
            window,
            device,
        })
    }

    pub fn render_frame(&mut self) -> Result<(), GraphicsError> {
        self.frame
            .render_frame(&mut self.device, &mut self.swapchain, &self.pipeline)
    }

    pub fn toggle_fullscreen(&mut self) -> Result<DisplayMode, GraphicsError> {
        self.display
            .toggle_fullscreen(&mut self.device, &mut self.swapchain, self.window.as_ref())
    }

    pub fn handle_resize(&mut self, width: u32, height: u32) -> Result<bool, GraphicsError> {
        self.display
            .handle_resize(&mut self.device, &mut self.swapchain, width, height)
    }

    /// False once the swapchain is left without a render target.
    pub fn can_continue(&self) -> bool {
        self.swapchain.render_target().is_some()
    }

    pub fn device(&self) -> &GraphicsDevice<B> {
        &self.device
    }

    pub fn swapchain(&self) -> &SwapChain<B> {
        &self.swapchain
    }

    pub fn pipeline(&self) -> &Pipeline<B> {
        &self.pipeline
    }

    pub fn frame(&self) -> &FrameRenderer {
        &self.frame
    }

    pub fn display(&self) -> &DisplayController {
        &self.display
    }

    pub fn window(&self) -> &Arc<dyn NativeWindow> {
        &self.window
    }
}
