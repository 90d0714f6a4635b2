// FrameRenderer - one frame, in a fixed order
//
// time step -> constant upload -> target bind + clear -> pipeline bind ->
// draw -> present. Animation time is frame-count based, not wall clock.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

use super::pipeline::VERTEX_COUNT;
use super::{GraphicsDevice, Pipeline, SwapChain};
use crate::backend::GpuBackend;
use crate::error::GraphicsError;

pub const DEFAULT_STEP: f32 = 0.01;
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.2, 0.4, 1.0];

/// Contents of the constant buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct FrameConstants {
    pub transform: Mat4,
}

impl FrameConstants {
    /// Rotation about the view axis at `time`, transposed for the shader's
    /// row-vector multiply.
    pub fn at(time: f32) -> Self {
        Self {
            transform: Mat4::from_rotation_z(time).transpose(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FrameRenderer {
    frame: u64,
    step: f32,
    clear_color: [f32; 4],
    sync_interval: u32,
}

impl Default for FrameRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_STEP, DEFAULT_CLEAR_COLOR, 1)
    }
}

impl FrameRenderer {
    pub fn new(step: f32, clear_color: [f32; 4], sync_interval: u32) -> Self {
        Self {
            frame: 0,
            step,
            clear_color,
            sync_interval,
        }
    }

    /// Animation time of the most recent frame.
    pub fn time(&self) -> f32 {
        self.frame as f32 * self.step
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frame
    }

    pub fn reset(&mut self) {
        self.frame = 0;
    }

    pub fn render_frame<B: GpuBackend>(
        &mut self,
        device: &mut GraphicsDevice<B>,
        swapchain: &mut SwapChain<B>,
        pipeline: &Pipeline<B>,
    ) -> Result<(), GraphicsError> {
        self.frame += 1;
        let constants = FrameConstants::at(self.time());

        let backend = device.backend_mut();
        backend.write_buffer(pipeline.constant_buffer(), bytemuck::bytes_of(&constants))?;

        // Re-read every frame; a resize replaces the view
        let target = swapchain.render_target().ok_or(GraphicsError::NoRenderTarget)?;
        backend.set_render_target(target);
        backend.set_viewport(swapchain.viewport());
        backend.clear_render_target(target, self.clear_color);

        pipeline.bind(backend);
        backend.draw(VERTEX_COUNT, 0)?;

        backend.present(swapchain.raw_mut(), self.sync_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_one_matrix() {
        assert_eq!(std::mem::size_of::<FrameConstants>(), 64);
    }

    #[test]
    fn zero_time_is_identity() {
        assert_eq!(FrameConstants::at(0.0).transform, Mat4::IDENTITY);
    }

    #[test]
    fn upload_is_transposed_rotation() {
        let t = 0.5_f32;
        let uploaded = FrameConstants::at(t).transform;
        // Column-major storage of the transpose puts sin(t) in row 0, column 1
        let cols = uploaded.to_cols_array_2d();
        assert!((cols[0][1] + t.sin()).abs() < 1e-6);
        assert!((cols[1][0] - t.sin()).abs() < 1e-6);
    }

    #[test]
    fn time_follows_frame_count() {
        let mut renderer = FrameRenderer::new(0.25, DEFAULT_CLEAR_COLOR, 1);
        renderer.frame = 4;
        assert_eq!(renderer.time(), 1.0);
        renderer.reset();
        assert_eq!(renderer.frames_rendered(), 0);
    }
}
