// Pipeline - shaders, input layout and the two buffers of the triangle draw
//
// Created once after the swapchain and never rebuilt. Nothing here depends on
// the back-buffer size.

use bytemuck::{Pod, Zeroable};

use super::frame::FrameConstants;
use super::GraphicsDevice;
use crate::backend::shader::{compile, validate_input_layout};
use crate::backend::{
    BufferUsage, GpuBackend, ShaderStage, Topology, VertexAttribute, VertexFormat, VertexLayout,
};
use crate::error::GraphicsError;

pub const TRIANGLE_WGSL: &str = include_str!("../../shaders/triangle.wgsl");
pub const VERTEX_ENTRY: &str = "vs_main";
pub const FRAGMENT_ENTRY: &str = "fs_main";

/// Vertex data - must match shader input layout
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub color: [f32; 4],
}

impl Vertex {
    pub const STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: Self::STRIDE,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: std::mem::offset_of!(Vertex, position) as u32,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32x4,
                    offset: std::mem::offset_of!(Vertex, color) as u32,
                },
            ],
        }
    }
}

pub const TRIANGLE: [Vertex; 3] = [
    Vertex {
        position: [0.0, 0.5, 0.0],
        color: [1.0, 0.0, 0.0, 1.0],
    },
    Vertex {
        position: [0.5, -0.5, 0.0],
        color: [0.0, 1.0, 0.0, 1.0],
    },
    Vertex {
        position: [-0.5, -0.5, 0.0],
        color: [0.0, 0.0, 1.0, 1.0],
    },
];

pub const VERTEX_COUNT: u32 = TRIANGLE.len() as u32;

/// Exactly one 4x4 matrix.
pub const CONSTANT_BUFFER_SIZE: u64 = std::mem::size_of::<FrameConstants>() as u64;

pub struct Pipeline<B: GpuBackend> {
    vertex_shader: B::Shader,
    fragment_shader: B::Shader,
    input_layout: B::InputLayout,
    vertex_buffer: B::Buffer,
    constant_buffer: B::Buffer,
}

impl<B: GpuBackend> Pipeline<B> {
    /// Build the triangle pipeline from the bundled shader.
    pub fn create(device: &mut GraphicsDevice<B>) -> Result<Self, GraphicsError> {
        Self::from_source(device, TRIANGLE_WGSL)
    }

    /// Build from WGSL source exposing `vs_main` and `fs_main`.
    pub fn from_source(device: &mut GraphicsDevice<B>, source: &str) -> Result<Self, GraphicsError> {
        let vertex_program = compile(source, ShaderStage::Vertex, VERTEX_ENTRY)?;
        let fragment_program = compile(source, ShaderStage::Fragment, FRAGMENT_ENTRY)?;

        let layout = Vertex::layout();
        validate_input_layout(&layout, &vertex_program)?;

        let backend = device.backend_mut();
        let vertex_shader = backend.create_shader(&vertex_program)?;
        let fragment_shader = backend.create_shader(&fragment_program)?;
        let input_layout = backend.create_input_layout(&layout, Topology::TriangleList)?;

        let vertices: &[u8] = bytemuck::cast_slice(&TRIANGLE);
        let vertex_buffer = backend.create_buffer(BufferUsage::Vertex, vertices.len() as u64, Some(vertices))?;
        let constant_buffer = backend.create_buffer(BufferUsage::Constant, CONSTANT_BUFFER_SIZE, None)?;

        log::info!(
            "Pipeline ready: {} vertices, {}-byte stride, {}-byte constant buffer",
            VERTEX_COUNT,
            Vertex::STRIDE,
            CONSTANT_BUFFER_SIZE
        );

        Ok(Self {
            vertex_shader,
            fragment_shader,
            input_layout,
            vertex_buffer,
            constant_buffer,
        })
    }

    /// Bind programs, layout and buffers on the immediate context.
    pub fn bind(&self, backend: &mut B) {
        backend.set_shaders(&self.vertex_shader, &self.fragment_shader);
        backend.set_input_layout(&self.input_layout);
        backend.set_vertex_buffer(&self.vertex_buffer, Vertex::STRIDE);
        backend.set_constant_buffer(0, &self.constant_buffer);
    }

    pub fn vertex_shader(&self) -> &B::Shader {
        &self.vertex_shader
    }

    pub fn fragment_shader(&self) -> &B::Shader {
        &self.fragment_shader
    }

    pub fn input_layout(&self) -> &B::InputLayout {
        &self.input_layout
    }

    pub fn vertex_buffer(&self) -> &B::Buffer {
        &self.vertex_buffer
    }

    pub fn constant_buffer(&self) -> &B::Buffer {
        &self.constant_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{GpuResource, HeadlessBackend};

    #[test]
    fn vertex_record_is_seven_floats() {
        assert_eq!(Vertex::STRIDE, 28);
        let layout = Vertex::layout();
        assert_eq!(layout.attributes[1].offset, 12);
    }

    #[test]
    fn uploads_triangle_once() {
        let mut device = GraphicsDevice::from_backend(HeadlessBackend::new());
        let ledger = device.backend().ledger();
        let pipeline = Pipeline::create(&mut device).unwrap();

        let ledger = ledger.lock();
        assert_eq!(ledger.shaders_created, 2);
        assert_eq!(ledger.layouts_created, 1);
        assert_eq!(ledger.buffers_created, 2);

        let uploaded = ledger.buffer(pipeline.vertex_buffer().handle()).unwrap();
        assert_eq!(uploaded, bytemuck::cast_slice::<Vertex, u8>(&TRIANGLE));
        let constants = ledger.buffer(pipeline.constant_buffer().handle()).unwrap();
        assert_eq!(constants.len(), 64);
    }

    #[test]
    fn shader_errors_are_reported_with_diagnostics() {
        let mut device = GraphicsDevice::from_backend(HeadlessBackend::new());
        let err = Pipeline::from_source(&mut device, "fn vs_main( {").err().unwrap();
        match err {
            GraphicsError::ShaderCompile { stage, diagnostics } => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(!diagnostics.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(device.backend().ledger().lock().shaders_created, 0);
    }

    #[test]
    fn signature_mismatch_is_rejected() {
        let source = r#"
            @vertex
            fn vs_main(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
                return vec4<f32>(position, 0.0, 1.0);
            }

            @fragment
            fn fs_main() -> @location(0) vec4<f32> {
                return vec4<f32>(1.0);
            }
        "#;
        let mut device = GraphicsDevice::from_backend(HeadlessBackend::new());
        let err = Pipeline::from_source(&mut device, source).err().unwrap();
        assert!(matches!(err, GraphicsError::InputLayoutMismatch(_)));
    }
}
