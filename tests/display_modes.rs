mod common;

use proptest::prelude::*;
use tri_renderer::backend::{Extent, GpuResource};
use tri_renderer::graphics::DisplayMode;

use common::{harness, MONITOR, WINDOWED};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn resize_leaves_one_bound_view(width in 1u32..4096, height in 1u32..4096) {
        let mut h = harness();
        h.renderer.handle_resize(width, height).unwrap();
        h.renderer.render_frame().unwrap();

        let view = h.renderer.swapchain().render_target().unwrap().handle();
        let ledger = h.ledger.lock();
        prop_assert_eq!(ledger.live_views.len(), 1);
        prop_assert_eq!(ledger.live_views[&view].extent, Extent::new(width, height));
        prop_assert_eq!(ledger.bound_target, Some(view));
    }
}

#[test]
fn double_toggle_restores_windowed_state() {
    let mut h = harness();

    assert_eq!(h.renderer.toggle_fullscreen().unwrap(), DisplayMode::Fullscreen);
    assert!(h.window.is_fullscreen());
    assert_eq!(h.renderer.swapchain().extent(), MONITOR);

    assert_eq!(h.renderer.toggle_fullscreen().unwrap(), DisplayMode::Windowed);
    assert!(!h.window.is_fullscreen());
    assert!(!h.renderer.swapchain().is_fullscreen());
    assert_eq!(h.renderer.swapchain().extent(), WINDOWED);
    assert_eq!(h.renderer.display().mode(), DisplayMode::Windowed);
}

#[test]
fn render_toggle_render_toggle_render() {
    let mut h = harness();

    for _ in 0..3 {
        h.renderer.render_frame().unwrap();
    }
    h.renderer.toggle_fullscreen().unwrap();
    for _ in 0..3 {
        h.renderer.render_frame().unwrap();
    }
    h.renderer.toggle_fullscreen().unwrap();
    for _ in 0..3 {
        h.renderer.render_frame().unwrap();
    }

    assert_eq!(h.renderer.display().mode(), DisplayMode::Windowed);
    assert_eq!(h.ledger.lock().presents, 9);
    assert_eq!(h.ledger.lock().live_views.len(), 1);
}

#[test]
fn refused_fullscreen_keeps_rendering() {
    let mut h = harness();
    h.window.refuse_fullscreen(true);

    assert!(h.renderer.toggle_fullscreen().is_err());
    assert!(h.renderer.can_continue());
    assert_eq!(h.renderer.display().mode(), DisplayMode::Windowed);
    h.renderer.render_frame().unwrap();
}

#[test]
fn window_resize_while_fullscreen_tracks_client_area() {
    let mut h = harness();
    h.renderer.toggle_fullscreen().unwrap();
    h.window.resize(Extent::new(1024, 768));

    // Leaving fullscreen picks up the windowed size set meanwhile
    h.renderer.toggle_fullscreen().unwrap();
    assert_eq!(h.renderer.swapchain().extent(), Extent::new(1024, 768));
}

#[test]
fn failed_rollback_stops_the_renderer() {
    let mut h = harness();
    h.window.resize(Extent::new(0, 0));
    h.ledger.lock().faults.resize = Some(tri_renderer::GraphicsError::ResizeFailed {
        width: MONITOR.width,
        height: MONITOR.height,
        reason: "out of memory".to_string(),
    });

    assert!(h.renderer.toggle_fullscreen().is_err());
    assert!(!h.renderer.can_continue());
    assert_eq!(h.renderer.display().mode(), DisplayMode::Windowed);
    assert_eq!(h.renderer.display().pending_dimensions(), Some(Extent::new(0, 0)));
    assert!(h.renderer.render_frame().is_err());
}
