// Rendering components
//
// Built in order: GraphicsDevice, then SwapChain, then Pipeline. FrameRenderer
// drives one frame across all three; DisplayController is the only thing that
// resizes the swapchain outside of window resize events.

pub mod device;
pub mod display;
pub mod frame;
pub mod pipeline;
pub mod swapchain;

pub use device::{AdapterInfo, AdapterKind, DeviceOptions, GraphicsDevice};
pub use display::{DisplayController, DisplayMode};
pub use frame::{FrameConstants, FrameRenderer};
pub use pipeline::{Pipeline, Vertex};
pub use swapchain::{PresentOptions, SwapChain};
