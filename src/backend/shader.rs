// Shader compilation and shader module management
//
// Shaders are written in WGSL and compiled at startup with naga:
// parse -> validate -> reflect vertex inputs -> emit SPIR-V for one entry point.
// The SPIR-V words are what the backends turn into shader objects.

use std::ffi::CString;
use std::sync::Arc;

use ash::vk;
use naga::back::spv;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::{GpuResource, ResourceHandle, ShaderStage, VertexLayout, VulkanDevice};
use crate::error::{GraphicsError, VkResultExt};

/// One input variable of a vertex entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShaderInput {
    pub location: u32,
    pub components: u32,
    /// 32-bit float scalar type.
    pub is_f32: bool,
}

/// Output of the shader compiler for a single entry point.
#[derive(Debug, Clone)]
pub struct CompiledShader {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub spirv: Vec<u32>,
    pub inputs: Vec<ShaderInput>,
}

impl From<ShaderStage> for naga::ShaderStage {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Fragment => naga::ShaderStage::Fragment,
        }
    }
}

/// Compile `entry_point` of a WGSL source for the given stage.
pub fn compile(
    source: &str,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<CompiledShader, GraphicsError> {
    let fail = |diagnostics: String| GraphicsError::ShaderCompile { stage, diagnostics };

    let module = naga::front::wgsl::parse_str(source).map_err(|e| fail(e.emit_to_string(source)))?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|e| fail(e.to_string()))?;

    let naga_stage = naga::ShaderStage::from(stage);
    let entry = module
        .entry_points
        .iter()
        .find(|ep| ep.name == entry_point && ep.stage == naga_stage)
        .ok_or_else(|| fail(format!("no {stage:?} entry point named `{entry_point}`")))?;

    let mut inputs = Vec::new();
    for argument in &entry.function.arguments {
        match argument.binding {
            Some(naga::Binding::Location { location, .. }) => {
                inputs.push(reflect_input(&module, location, argument.ty));
            }
            Some(naga::Binding::BuiltIn(_)) => {}
            None => {
                if let naga::TypeInner::Struct { ref members, .. } = module.types[argument.ty].inner {
                    for member in members {
                        if let Some(naga::Binding::Location { location, .. }) = member.binding {
                            inputs.push(reflect_input(&module, location, member.ty));
                        }
                    }
                }
            }
        }
    }
    inputs.sort_by_key(|input| input.location);

    let pipeline_options = spv::PipelineOptions {
        shader_stage: naga_stage,
        entry_point: entry_point.to_string(),
    };
    let spirv = spv::write_vec(&module, &info, &spv::Options::default(), Some(&pipeline_options))
        .map_err(|e| fail(e.to_string()))?;

    log::debug!(
        "Compiled {:?} shader `{}` ({} SPIR-V words, {} inputs)",
        stage,
        entry_point,
        spirv.len(),
        inputs.len()
    );

    Ok(CompiledShader {
        stage,
        entry_point: entry_point.to_string(),
        spirv,
        inputs,
    })
}

fn reflect_input(module: &naga::Module, location: u32, ty: naga::Handle<naga::Type>) -> ShaderInput {
    let (components, is_f32) = match module.types[ty].inner {
        naga::TypeInner::Vector { size, scalar } => (size as u32, scalar == naga::Scalar::F32),
        naga::TypeInner::Scalar(scalar) => (1, scalar == naga::Scalar::F32),
        _ => (0, false),
    };
    ShaderInput {
        location,
        components,
        is_f32,
    }
}

/// Check a vertex layout against the inputs the vertex program declares.
/// Every shader input needs an attribute of matching width at its location.
pub fn validate_input_layout(
    layout: &VertexLayout,
    vertex_shader: &CompiledShader,
) -> Result<(), GraphicsError> {
    if vertex_shader.stage != ShaderStage::Vertex {
        return Err(GraphicsError::InputLayoutMismatch(format!(
            "`{}` is a {:?} program",
            vertex_shader.entry_point, vertex_shader.stage
        )));
    }

    for input in &vertex_shader.inputs {
        let attribute = layout
            .attributes
            .iter()
            .find(|a| a.location == input.location)
            .ok_or_else(|| {
                GraphicsError::InputLayoutMismatch(format!(
                    "shader reads location {} but the layout does not provide it",
                    input.location
                ))
            })?;

        if !input.is_f32 || attribute.format.components() != input.components {
            return Err(GraphicsError::InputLayoutMismatch(format!(
                "location {}: layout supplies {:?}, shader expects {} x {}",
                input.location,
                attribute.format,
                input.components,
                if input.is_f32 { "f32" } else { "non-f32" }
            )));
        }
    }

    for attribute in &layout.attributes {
        if attribute.offset + attribute.format.size() > layout.stride {
            return Err(GraphicsError::InputLayoutMismatch(format!(
                "location {} overruns the {}-byte stride",
                attribute.location, layout.stride
            )));
        }
    }

    Ok(())
}

/// A SPIR-V shader module plus the entry point name the pipeline needs.
pub struct VulkanShader {
    pub module: vk::ShaderModule,
    pub stage: ShaderStage,
    pub entry_point: CString,
    device: Arc<VulkanDevice>,
}

impl VulkanShader {
    pub fn new(device: Arc<VulkanDevice>, program: &CompiledShader) -> Result<Self, GraphicsError> {
        let entry_point = CString::new(program.entry_point.as_str()).map_err(|_| {
            GraphicsError::ResourceCreation(format!("bad entry point name `{}`", program.entry_point))
        })?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&program.spirv);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .api("vkCreateShaderModule")?;

        Ok(Self {
            module,
            stage: program.stage,
            entry_point,
            device,
        })
    }
}

impl GpuResource for VulkanShader {
    fn handle(&self) -> ResourceHandle {
        ResourceHandle(vk::Handle::as_raw(self.module))
    }
}

impl Drop for VulkanShader {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{VertexAttribute, VertexFormat};

    const SOURCE: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
};

@vertex
fn vs_main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(input.position, 1.0);
    out.color = input.color;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    return input.color;
}
"#;

    fn layout(color: VertexFormat) -> VertexLayout {
        VertexLayout {
            stride: 28,
            attributes: vec![
                VertexAttribute { location: 0, format: VertexFormat::Float32x3, offset: 0 },
                VertexAttribute { location: 1, format: color, offset: 12 },
            ],
        }
    }

    #[test]
    fn reflects_vertex_inputs() {
        let vs = compile(SOURCE, ShaderStage::Vertex, "vs_main").unwrap();
        assert!(!vs.spirv.is_empty());
        assert_eq!(
            vs.inputs,
            vec![
                ShaderInput { location: 0, components: 3, is_f32: true },
                ShaderInput { location: 1, components: 4, is_f32: true },
            ]
        );
    }

    #[test]
    fn syntax_error_carries_diagnostics() {
        let err = compile("fn broken(", ShaderStage::Vertex, "vs_main").unwrap_err();
        match err {
            GraphicsError::ShaderCompile { stage, diagnostics } => {
                assert_eq!(stage, ShaderStage::Vertex);
                assert!(!diagnostics.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn missing_entry_point_is_a_compile_error() {
        let err = compile(SOURCE, ShaderStage::Fragment, "vs_main").unwrap_err();
        assert!(matches!(err, GraphicsError::ShaderCompile { .. }));
    }

    #[test]
    fn layout_must_match_signature() {
        let vs = compile(SOURCE, ShaderStage::Vertex, "vs_main").unwrap();
        validate_input_layout(&layout(VertexFormat::Float32x4), &vs).unwrap();

        let err = validate_input_layout(&layout(VertexFormat::Float32x3), &vs).unwrap_err();
        assert!(matches!(err, GraphicsError::InputLayoutMismatch(_)));

        let mut short = layout(VertexFormat::Float32x4);
        short.attributes.pop();
        assert!(validate_input_layout(&short, &vs).is_err());
    }

    #[test]
    fn fragment_program_is_not_a_vertex_signature() {
        let fs = compile(SOURCE, ShaderStage::Fragment, "fs_main").unwrap();
        assert!(validate_input_layout(&layout(VertexFormat::Float32x4), &fs).is_err());
    }
}
