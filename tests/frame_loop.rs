mod common;

use tri_renderer::backend::headless::Call;
use tri_renderer::backend::{Extent, GpuResource, Viewport};
use tri_renderer::graphics::device::{AdapterCandidate, AdapterInfo, AdapterKind};
use tri_renderer::graphics::frame::DEFAULT_CLEAR_COLOR;
use tri_renderer::graphics::{FrameConstants, GraphicsDevice, PresentOptions, SwapChain};
use tri_renderer::backend::HeadlessBackend;
use tri_renderer::window::HeadlessWindow;
use tri_renderer::GraphicsError;

use common::{harness, WINDOWED};

#[test]
fn frame_issues_calls_in_order() {
    let mut h = harness();
    h.ledger.lock().take_calls();

    h.renderer.render_frame().unwrap();

    let pipeline = h.renderer.pipeline();
    let view = h.renderer.swapchain().render_target().unwrap().handle();
    let constants = pipeline.constant_buffer().handle();
    let expected = vec![
        Call::WriteBuffer(constants),
        Call::SetRenderTarget(view),
        Call::SetViewport(Viewport::full(WINDOWED)),
        Call::Clear(view, DEFAULT_CLEAR_COLOR),
        Call::SetShaders(pipeline.vertex_shader().handle(), pipeline.fragment_shader().handle()),
        Call::SetInputLayout(pipeline.input_layout().handle()),
        Call::SetVertexBuffer(pipeline.vertex_buffer().handle(), 28),
        Call::SetConstantBuffer(0, constants),
        Call::Draw {
            vertex_count: 3,
            first_vertex: 0,
        },
        Call::Present { sync_interval: 1 },
    ];
    assert_eq!(h.ledger.lock().take_calls(), expected);
}

#[test]
fn thousand_frames_reuse_every_object() {
    let mut h = harness();
    let device = h.renderer.device().handle();
    let pipeline = h.renderer.pipeline();
    let handles = [
        pipeline.vertex_shader().handle(),
        pipeline.fragment_shader().handle(),
        pipeline.input_layout().handle(),
        pipeline.vertex_buffer().handle(),
        pipeline.constant_buffer().handle(),
    ];
    let (buffers, shaders, layouts, views) = {
        let ledger = h.ledger.lock();
        (ledger.buffers_created, ledger.shaders_created, ledger.layouts_created, ledger.views_created)
    };

    for _ in 0..1000 {
        h.renderer.render_frame().unwrap();
    }

    let pipeline = h.renderer.pipeline();
    assert_eq!(h.renderer.device().handle(), device);
    assert_eq!(
        [
            pipeline.vertex_shader().handle(),
            pipeline.fragment_shader().handle(),
            pipeline.input_layout().handle(),
            pipeline.vertex_buffer().handle(),
            pipeline.constant_buffer().handle(),
        ],
        handles
    );
    let ledger = h.ledger.lock();
    assert_eq!(ledger.buffers_created, buffers);
    assert_eq!(ledger.shaders_created, shaders);
    assert_eq!(ledger.layouts_created, layouts);
    assert_eq!(ledger.views_created, views);
    assert_eq!(ledger.presents, 1000);
}

#[test]
fn constant_buffer_holds_transform_for_frame_time() {
    let mut h = harness();
    let constants = h.renderer.pipeline().constant_buffer().handle();

    let mut rendered = 0u64;
    for target in [1u64, 2, 50, 314] {
        while rendered < target {
            h.renderer.render_frame().unwrap();
            rendered += 1;
        }
        let expected = FrameConstants::at(target as f32 * 0.01);
        let ledger = h.ledger.lock();
        assert_eq!(ledger.buffer(constants).unwrap(), bytemuck::bytes_of(&expected));
    }
    assert_eq!(h.renderer.frame().frames_rendered(), 314);
}

#[test]
fn present_failure_is_not_fatal() {
    let mut h = harness();
    h.ledger.lock().faults.present = Some(GraphicsError::Present("occluded".to_string()));

    let err = h.renderer.render_frame().unwrap_err();
    assert!(!err.is_device_lost());
    assert!(h.renderer.can_continue());
    h.renderer.render_frame().unwrap();
}

#[test]
fn device_loss_is_distinguishable() {
    let mut h = harness();
    h.ledger.lock().faults.present = Some(GraphicsError::DeviceLost("present".to_string()));

    let err = h.renderer.render_frame().unwrap_err();
    assert!(err.is_device_lost());
}

#[test]
fn zero_resize_fails_and_releases_view() {
    let backend = HeadlessBackend::new();
    let ledger = backend.ledger();
    let mut device = GraphicsDevice::from_backend(backend);
    let window = std::sync::Arc::new(HeadlessWindow::new(WINDOWED, WINDOWED));
    let mut swapchain = SwapChain::create(&mut device, window, 800, 600, &PresentOptions::default()).unwrap();

    let err = swapchain.resize(&mut device, 0, 0).unwrap_err();

    assert!(matches!(err, GraphicsError::ResizeFailed { width: 0, height: 0, .. }));
    assert!(swapchain.render_target().is_none());
    {
        let ledger = ledger.lock();
        assert!(ledger.live_views.is_empty());
        assert_eq!(ledger.bound_target, None);
    }

    swapchain.resize(&mut device, 640, 480).unwrap();
    assert_eq!(swapchain.extent(), Extent::new(640, 480));
    assert_eq!(ledger.lock().live_views.len(), 1);
}

#[test]
fn software_only_machine_has_no_device() {
    let llvmpipe = AdapterCandidate {
        info: AdapterInfo {
            name: "llvmpipe".to_string(),
            kind: AdapterKind::Cpu,
            vendor_id: 0x10005,
            device_id: 0,
        },
        has_graphics_queue: true,
        supports_swapchain: true,
    };

    let err = HeadlessBackend::with_adapters(&[llvmpipe]).err().unwrap();
    assert!(matches!(err, GraphicsError::DeviceCreation(_)));
}
