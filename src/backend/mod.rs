// Backend module - GPU API abstraction layer
//
// Design: an immediate-context style interface (create, bind, draw, present)
// that the rendering components drive. `VulkanBackend` is the real thing,
// `HeadlessBackend` records calls so the frame protocol can be checked
// without a GPU.
//
// Every resource type is an RAII value: dropping it releases the GPU object.

pub mod buffer;
pub mod device;
pub mod headless;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod vulkan;

use std::sync::Arc;

use crate::error::GraphicsError;
use crate::graphics::device::AdapterInfo;
use crate::window::NativeWindow;

pub use device::VulkanDevice;
pub use headless::HeadlessBackend;
pub use shader::CompiledShader;
pub use swapchain::VulkanSwapchain;
pub use vulkan::VulkanBackend;

/// Stable identity of a backend object, used for equality checks across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(pub u64);

pub trait GpuResource {
    fn handle(&self) -> ResourceHandle;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering the whole drawable area.
    pub fn full(extent: Extent) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8Unorm,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwapChainDesc {
    pub extent: Extent,
    pub buffer_count: u32,
    pub format: PixelFormat,
    pub vsync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    /// Uploaded once at creation, never written again.
    Vertex,
    /// Rewritten in full every frame.
    Constant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexFormat {
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    pub fn components(self) -> u32 {
        match self {
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 => 4,
        }
    }

    pub fn size(self) -> u32 {
        self.components() * std::mem::size_of::<f32>() as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: VertexFormat,
    pub offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topology {
    TriangleList,
}

/// The GPU API surface the rendering components are written against.
///
/// Binding calls only record state; `draw` and `present` are where work is
/// actually issued, so those are the fallible ones.
pub trait GpuBackend {
    type SwapChain;
    type RenderTargetView: GpuResource;
    type Shader: GpuResource;
    type InputLayout: GpuResource;
    type Buffer: GpuResource;

    fn adapter(&self) -> &AdapterInfo;
    fn device_handle(&self) -> ResourceHandle;

    // ── swapchain ───────────────────────────────────────────────────────
    fn create_swapchain(
        &mut self,
        window: Arc<dyn NativeWindow>,
        desc: &SwapChainDesc,
    ) -> Result<Self::SwapChain, GraphicsError>;

    /// Back-buffer size the implementation actually chose.
    fn swapchain_extent(&self, swapchain: &Self::SwapChain) -> Extent;

    /// Resize the back buffers. Must fail while a render-target view of this
    /// swapchain is still alive. Returns the extent actually applied.
    fn resize_buffers(
        &mut self,
        swapchain: &mut Self::SwapChain,
        extent: Extent,
    ) -> Result<Extent, GraphicsError>;

    fn set_fullscreen_state(
        &mut self,
        swapchain: &mut Self::SwapChain,
        enabled: bool,
    ) -> Result<(), GraphicsError>;

    fn create_render_target_view(
        &mut self,
        swapchain: &Self::SwapChain,
    ) -> Result<Self::RenderTargetView, GraphicsError>;

    // ── pipeline objects ───────────────────────────────────────────────
    fn create_shader(&mut self, program: &CompiledShader) -> Result<Self::Shader, GraphicsError>;

    fn create_input_layout(
        &mut self,
        layout: &VertexLayout,
        topology: Topology,
    ) -> Result<Self::InputLayout, GraphicsError>;

    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Result<Self::Buffer, GraphicsError>;

    /// Full overwrite; `bytes` must match the buffer size.
    fn write_buffer(&mut self, buffer: &Self::Buffer, bytes: &[u8]) -> Result<(), GraphicsError>;

    // ── immediate context ──────────────────────────────────────────────
    fn set_render_target(&mut self, view: &Self::RenderTargetView);
    fn set_viewport(&mut self, viewport: Viewport);
    fn clear_render_target(&mut self, view: &Self::RenderTargetView, color: [f32; 4]);
    fn set_shaders(&mut self, vertex: &Self::Shader, fragment: &Self::Shader);
    fn set_input_layout(&mut self, layout: &Self::InputLayout);
    fn set_vertex_buffer(&mut self, buffer: &Self::Buffer, stride: u32);
    fn set_constant_buffer(&mut self, slot: u32, buffer: &Self::Buffer);
    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<(), GraphicsError>;

    /// Blocks until the frame is queued for display (vsync when `sync_interval` > 0).
    fn present(
        &mut self,
        swapchain: &mut Self::SwapChain,
        sync_interval: u32,
    ) -> Result<(), GraphicsError>;
}
