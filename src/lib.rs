// Single-window triangle renderer
//
// Device, swapchain and pipeline lifecycle on top of a small immediate-context
// backend seam, with a Vulkan backend for real windows and a recording
// backend for running without a GPU.

pub mod backend;
pub mod config;
pub mod error;
pub mod graphics;
pub mod renderer;
pub mod window;

pub use config::Config;
pub use error::GraphicsError;
pub use renderer::Renderer;
