#![allow(dead_code)]

use std::sync::Arc;

use tri_renderer::backend::headless::{HeadlessBackend, SharedLedger};
use tri_renderer::backend::Extent;
use tri_renderer::graphics::GraphicsDevice;
use tri_renderer::window::HeadlessWindow;
use tri_renderer::{Config, Renderer};

pub const WINDOWED: Extent = Extent::new(800, 600);
pub const MONITOR: Extent = Extent::new(1920, 1080);

pub struct Harness {
    pub renderer: Renderer<HeadlessBackend>,
    pub window: Arc<HeadlessWindow>,
    pub ledger: SharedLedger,
}

pub fn harness() -> Harness {
    let backend = HeadlessBackend::new();
    let ledger = backend.ledger();
    let window = Arc::new(HeadlessWindow::new(WINDOWED, MONITOR));
    let renderer = Renderer::new(
        GraphicsDevice::from_backend(backend),
        window.clone(),
        &Config::default(),
    )
    .unwrap();
    Harness {
        renderer,
        window,
        ledger,
    }
}
