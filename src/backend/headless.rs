// Headless backend - records every call instead of talking to a GPU
//
// Resources share a ledger with the backend so their Drop impls can report
// releases. Tests read the ledger to check resource lifetimes, buffer
// contents and the order of context calls.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use super::{
    BufferUsage, CompiledShader, Extent, GpuBackend, GpuResource, ResourceHandle, ShaderStage,
    SwapChainDesc, Topology, VertexLayout, Viewport,
};
use crate::error::GraphicsError;
use crate::graphics::device::{select_adapter, AdapterCandidate, AdapterInfo, AdapterKind};
use crate::window::NativeWindow;

/// A context call as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    WriteBuffer(ResourceHandle),
    SetRenderTarget(ResourceHandle),
    SetViewport(Viewport),
    Clear(ResourceHandle, [f32; 4]),
    SetShaders(ResourceHandle, ResourceHandle),
    SetInputLayout(ResourceHandle),
    SetVertexBuffer(ResourceHandle, u32),
    SetConstantBuffer(u32, ResourceHandle),
    Draw { vertex_count: u32, first_vertex: u32 },
    Present { sync_interval: u32 },
}

#[derive(Debug, Clone, Copy)]
pub struct LiveView {
    pub swapchain: ResourceHandle,
    pub extent: Extent,
}

/// Failures the next matching call should report.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    pub present: Option<GraphicsError>,
    pub draw: Option<GraphicsError>,
    pub resize: Option<GraphicsError>,
}

#[derive(Debug, Default)]
pub struct Ledger {
    next_handle: u64,
    pub live_views: HashMap<ResourceHandle, LiveView>,
    pub buffers: HashMap<ResourceHandle, Vec<u8>>,
    pub views_created: usize,
    pub buffers_created: usize,
    pub shaders_created: usize,
    pub layouts_created: usize,
    pub presents: u64,
    pub bound_target: Option<ResourceHandle>,
    pub viewport: Option<Viewport>,
    pub calls: Vec<Call>,
    pub faults: Faults,
}

impl Ledger {
    fn allocate(&mut self) -> ResourceHandle {
        self.next_handle += 1;
        ResourceHandle(self.next_handle)
    }

    pub fn live_views_of(&self, swapchain: ResourceHandle) -> Vec<LiveView> {
        self.live_views
            .values()
            .filter(|v| v.swapchain == swapchain)
            .copied()
            .collect()
    }

    pub fn buffer(&self, handle: ResourceHandle) -> Option<&[u8]> {
        self.buffers.get(&handle).map(Vec::as_slice)
    }

    /// Drain the call log.
    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }
}

pub type SharedLedger = Arc<Mutex<Ledger>>;

pub struct HeadlessSwapChain {
    handle: ResourceHandle,
    window: Arc<dyn NativeWindow>,
    pub extent: Extent,
    pub buffer_count: u32,
    pub fullscreen: bool,
}

impl GpuResource for HeadlessSwapChain {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

pub struct HeadlessView {
    handle: ResourceHandle,
    pub extent: Extent,
    ledger: SharedLedger,
}

impl GpuResource for HeadlessView {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

impl Drop for HeadlessView {
    fn drop(&mut self) {
        let mut ledger = self.ledger.lock();
        ledger.live_views.remove(&self.handle);
        if ledger.bound_target == Some(self.handle) {
            ledger.bound_target = None;
        }
    }
}

pub struct HeadlessShader {
    handle: ResourceHandle,
    pub stage: ShaderStage,
}

impl GpuResource for HeadlessShader {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

pub struct HeadlessInputLayout {
    handle: ResourceHandle,
    pub layout: VertexLayout,
}

impl GpuResource for HeadlessInputLayout {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

pub struct HeadlessBuffer {
    handle: ResourceHandle,
    pub usage: BufferUsage,
    pub size: u64,
    ledger: SharedLedger,
}

impl GpuResource for HeadlessBuffer {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

impl Drop for HeadlessBuffer {
    fn drop(&mut self) {
        self.ledger.lock().buffers.remove(&self.handle);
    }
}

pub struct HeadlessBackend {
    adapter: AdapterInfo,
    device: ResourceHandle,
    ledger: SharedLedger,
}

impl HeadlessBackend {
    /// A backend on a single simulated discrete adapter.
    pub fn new() -> Self {
        Self::on_adapter(AdapterInfo {
            name: "Headless Adapter".to_string(),
            kind: AdapterKind::Discrete,
            vendor_id: 0,
            device_id: 0,
        })
    }

    /// Run adapter selection over `adapters`, failing like a real device would.
    pub fn with_adapters(adapters: &[AdapterCandidate]) -> Result<Self, GraphicsError> {
        let index = select_adapter(adapters)?;
        Ok(Self::on_adapter(adapters[index].info.clone()))
    }

    fn on_adapter(adapter: AdapterInfo) -> Self {
        let ledger = SharedLedger::default();
        let device = ledger.lock().allocate();
        Self {
            adapter,
            device,
            ledger,
        }
    }

    pub fn ledger(&self) -> SharedLedger {
        Arc::clone(&self.ledger)
    }

    fn lock(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock()
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for HeadlessBackend {
    type SwapChain = HeadlessSwapChain;
    type RenderTargetView = HeadlessView;
    type Shader = HeadlessShader;
    type InputLayout = HeadlessInputLayout;
    type Buffer = HeadlessBuffer;

    fn adapter(&self) -> &AdapterInfo {
        &self.adapter
    }

    fn device_handle(&self) -> ResourceHandle {
        self.device
    }

    fn create_swapchain(
        &mut self,
        window: Arc<dyn NativeWindow>,
        desc: &SwapChainDesc,
    ) -> Result<HeadlessSwapChain, GraphicsError> {
        if desc.extent.is_empty() {
            return Err(GraphicsError::SwapChainCreate(format!(
                "invalid extent {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }
        if desc.buffer_count < 2 {
            return Err(GraphicsError::SwapChainCreate(format!(
                "flip-model presentation needs at least 2 buffers, got {}",
                desc.buffer_count
            )));
        }
        Ok(HeadlessSwapChain {
            handle: self.lock().allocate(),
            window,
            extent: desc.extent,
            buffer_count: desc.buffer_count,
            fullscreen: false,
        })
    }

    fn swapchain_extent(&self, swapchain: &HeadlessSwapChain) -> Extent {
        swapchain.extent
    }

    fn resize_buffers(
        &mut self,
        swapchain: &mut HeadlessSwapChain,
        extent: Extent,
    ) -> Result<Extent, GraphicsError> {
        let mut ledger = self.lock();
        let rejected = |reason: String| GraphicsError::ResizeFailed {
            width: extent.width,
            height: extent.height,
            reason,
        };

        if let Some(err) = ledger.faults.resize.take() {
            return Err(err);
        }
        if extent.is_empty() {
            return Err(rejected("zero-sized back buffer".to_string()));
        }
        let outstanding = ledger.live_views_of(swapchain.handle).len();
        if outstanding > 0 {
            return Err(rejected(format!("{outstanding} render target view(s) still referenced")));
        }

        swapchain.extent = extent;
        Ok(extent)
    }

    fn set_fullscreen_state(
        &mut self,
        swapchain: &mut HeadlessSwapChain,
        enabled: bool,
    ) -> Result<(), GraphicsError> {
        swapchain.window.set_fullscreen(enabled)?;
        swapchain.fullscreen = enabled;
        Ok(())
    }

    fn create_render_target_view(
        &mut self,
        swapchain: &HeadlessSwapChain,
    ) -> Result<HeadlessView, GraphicsError> {
        let mut ledger = self.lock();
        let handle = ledger.allocate();
        ledger.views_created += 1;
        ledger.live_views.insert(
            handle,
            LiveView {
                swapchain: swapchain.handle,
                extent: swapchain.extent,
            },
        );
        Ok(HeadlessView {
            handle,
            extent: swapchain.extent,
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn create_shader(&mut self, program: &CompiledShader) -> Result<HeadlessShader, GraphicsError> {
        if program.spirv.is_empty() {
            return Err(GraphicsError::ResourceCreation(format!(
                "empty {:?} program",
                program.stage
            )));
        }
        let mut ledger = self.lock();
        ledger.shaders_created += 1;
        Ok(HeadlessShader {
            handle: ledger.allocate(),
            stage: program.stage,
        })
    }

    fn create_input_layout(
        &mut self,
        layout: &VertexLayout,
        _topology: Topology,
    ) -> Result<HeadlessInputLayout, GraphicsError> {
        let mut ledger = self.lock();
        ledger.layouts_created += 1;
        Ok(HeadlessInputLayout {
            handle: ledger.allocate(),
            layout: layout.clone(),
        })
    }

    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Result<HeadlessBuffer, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::ResourceCreation("zero-sized buffer".to_string()));
        }
        let mut data = vec![0u8; size as usize];
        if let Some(contents) = contents {
            if contents.len() as u64 > size {
                return Err(GraphicsError::ResourceCreation(format!(
                    "{} bytes of initial data for a {size}-byte buffer",
                    contents.len()
                )));
            }
            data[..contents.len()].copy_from_slice(contents);
        }

        let mut ledger = self.lock();
        let handle = ledger.allocate();
        ledger.buffers_created += 1;
        ledger.buffers.insert(handle, data);
        Ok(HeadlessBuffer {
            handle,
            usage,
            size,
            ledger: Arc::clone(&self.ledger),
        })
    }

    fn write_buffer(&mut self, buffer: &HeadlessBuffer, bytes: &[u8]) -> Result<(), GraphicsError> {
        if bytes.len() as u64 != buffer.size {
            return Err(GraphicsError::Api {
                call: "write_buffer",
                message: format!("{} bytes written to a {}-byte buffer", bytes.len(), buffer.size),
            });
        }
        let mut ledger = self.lock();
        ledger.calls.push(Call::WriteBuffer(buffer.handle));
        match ledger.buffers.get_mut(&buffer.handle) {
            Some(data) => {
                data.copy_from_slice(bytes);
                Ok(())
            }
            None => Err(GraphicsError::Api {
                call: "write_buffer",
                message: "buffer was released".to_string(),
            }),
        }
    }

    fn set_render_target(&mut self, view: &HeadlessView) {
        let mut ledger = self.lock();
        ledger.bound_target = Some(view.handle);
        ledger.calls.push(Call::SetRenderTarget(view.handle));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        let mut ledger = self.lock();
        ledger.viewport = Some(viewport);
        ledger.calls.push(Call::SetViewport(viewport));
    }

    fn clear_render_target(&mut self, view: &HeadlessView, color: [f32; 4]) {
        self.lock().calls.push(Call::Clear(view.handle, color));
    }

    fn set_shaders(&mut self, vertex: &HeadlessShader, fragment: &HeadlessShader) {
        self.lock()
            .calls
            .push(Call::SetShaders(vertex.handle, fragment.handle));
    }

    fn set_input_layout(&mut self, layout: &HeadlessInputLayout) {
        self.lock().calls.push(Call::SetInputLayout(layout.handle));
    }

    fn set_vertex_buffer(&mut self, buffer: &HeadlessBuffer, stride: u32) {
        self.lock()
            .calls
            .push(Call::SetVertexBuffer(buffer.handle, stride));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: &HeadlessBuffer) {
        self.lock()
            .calls
            .push(Call::SetConstantBuffer(slot, buffer.handle));
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<(), GraphicsError> {
        let mut ledger = self.lock();
        if let Some(err) = ledger.faults.draw.take() {
            return Err(err);
        }
        if ledger.bound_target.is_none() {
            return Err(GraphicsError::NoRenderTarget);
        }
        ledger.calls.push(Call::Draw {
            vertex_count,
            first_vertex,
        });
        Ok(())
    }

    fn present(
        &mut self,
        _swapchain: &mut HeadlessSwapChain,
        sync_interval: u32,
    ) -> Result<(), GraphicsError> {
        let mut ledger = self.lock();
        if let Some(err) = ledger.faults.present.take() {
            return Err(err);
        }
        ledger.presents += 1;
        ledger.calls.push(Call::Present { sync_interval });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PixelFormat;
    use crate::window::HeadlessWindow;

    fn desc(width: u32, height: u32) -> SwapChainDesc {
        SwapChainDesc {
            extent: Extent::new(width, height),
            buffer_count: 2,
            format: PixelFormat::Rgba8Unorm,
            vsync: true,
        }
    }

    fn window() -> Arc<dyn NativeWindow> {
        Arc::new(HeadlessWindow::new(Extent::new(640, 480), Extent::new(1920, 1080)))
    }

    #[test]
    fn outstanding_view_blocks_resize() {
        let mut backend = HeadlessBackend::new();
        let mut swapchain = backend.create_swapchain(window(), &desc(640, 480)).unwrap();
        let view = backend.create_render_target_view(&swapchain).unwrap();

        let err = backend
            .resize_buffers(&mut swapchain, Extent::new(800, 600))
            .unwrap_err();
        assert!(matches!(err, GraphicsError::ResizeFailed { .. }));

        drop(view);
        assert_eq!(
            backend.resize_buffers(&mut swapchain, Extent::new(800, 600)).unwrap(),
            Extent::new(800, 600)
        );
    }

    #[test]
    fn dropping_buffer_releases_it() {
        let mut backend = HeadlessBackend::new();
        let ledger = backend.ledger();
        let buffer = backend
            .create_buffer(BufferUsage::Constant, 64, None)
            .unwrap();
        assert_eq!(ledger.lock().buffers.len(), 1);
        drop(buffer);
        assert!(ledger.lock().buffers.is_empty());
    }

    #[test]
    fn write_must_cover_whole_buffer() {
        let mut backend = HeadlessBackend::new();
        let buffer = backend
            .create_buffer(BufferUsage::Constant, 64, None)
            .unwrap();
        assert!(backend.write_buffer(&buffer, &[0u8; 16]).is_err());
        backend.write_buffer(&buffer, &[7u8; 64]).unwrap();
        assert_eq!(backend.ledger().lock().buffer(buffer.handle()).unwrap(), &[7u8; 64][..]);
    }

    #[test]
    fn single_buffer_swapchain_is_rejected() {
        let mut backend = HeadlessBackend::new();
        let mut d = desc(640, 480);
        d.buffer_count = 1;
        assert!(matches!(
            backend.create_swapchain(window(), &d),
            Err(GraphicsError::SwapChainCreate(_))
        ));
    }
}
