// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// Viewport and scissor are dynamic so a resize never invalidates a pipeline.

use std::ffi::CString;

use ash::vk;

use super::shader::VulkanShader;
use super::{GpuResource, ResourceHandle, Topology, VertexFormat, VertexLayout, VulkanDevice};
use crate::error::{GraphicsError, VkResultExt};

/// Single color attachment, cleared on load and handed to the presentation engine.
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass, GraphicsError> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // Wait for the acquired image before writing to it
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }.api("vkCreateRenderPass")
}

/// Create framebuffers for each swapchain image
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> Result<Vec<vk::Framebuffer>, GraphicsError> {
    let mut framebuffers = Vec::with_capacity(image_views.len());
    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(GraphicsError::from_vk("vkCreateFramebuffer", e));
            }
        }
    }
    Ok(framebuffers)
}

fn vk_format(format: VertexFormat) -> vk::Format {
    match format {
        VertexFormat::Float32x3 => vk::Format::R32G32B32_SFLOAT,
        VertexFormat::Float32x4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// An input layout has no Vulkan object of its own; it is baked into each
/// pipeline created with it.
#[derive(Clone)]
pub struct VulkanInputLayout {
    handle: ResourceHandle,
    pub bindings: Vec<vk::VertexInputBindingDescription>,
    pub attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
}

impl VulkanInputLayout {
    pub fn new(handle: ResourceHandle, layout: &VertexLayout, topology: Topology) -> Self {
        let binding = vk::VertexInputBindingDescription::builder()
            .binding(0)
            .stride(layout.stride)
            .input_rate(vk::VertexInputRate::VERTEX)
            .build();

        let attributes = layout
            .attributes
            .iter()
            .map(|a| {
                vk::VertexInputAttributeDescription::builder()
                    .binding(0)
                    .location(a.location)
                    .format(vk_format(a.format))
                    .offset(a.offset)
                    .build()
            })
            .collect();

        Self {
            handle,
            bindings: vec![binding],
            attributes,
            topology: match topology {
                Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            },
        }
    }
}

impl GpuResource for VulkanInputLayout {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

/// A shader module and the entry point to run in it.
#[derive(Clone)]
pub struct ShaderBinding {
    pub module: vk::ShaderModule,
    pub entry_point: CString,
}

impl From<&VulkanShader> for ShaderBinding {
    fn from(shader: &VulkanShader) -> Self {
        Self {
            module: shader.module,
            entry_point: shader.entry_point.clone(),
        }
    }
}

/// Everything a graphics pipeline is built from.
pub struct PipelineDesc<'a> {
    pub vertex: &'a ShaderBinding,
    pub fragment: &'a ShaderBinding,
    pub input_layout: &'a VulkanInputLayout,
    pub vertex_stride: u32,
    pub render_pass: vk::RenderPass,
    pub layout: vk::PipelineLayout,
}

/// Create a graphics pipeline for a single colored draw
pub fn create_graphics_pipeline(device: &VulkanDevice, desc: &PipelineDesc) -> Result<vk::Pipeline, GraphicsError> {
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(desc.vertex.module)
        .name(&desc.vertex.entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(desc.fragment.module)
        .name(&desc.fragment.entry_point)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // The stride comes from the vertex buffer binding, not the layout
    let bindings: Vec<_> = desc
        .input_layout
        .bindings
        .iter()
        .map(|b| vk::VertexInputBindingDescription { stride: desc.vertex_stride, ..*b })
        .collect();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&desc.input_layout.attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.input_layout.topology)
        .primitive_restart_enable(false);

    // Counts only; the rectangles are set per frame
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    // The triangle rotates, so both faces must be drawn
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::CLOCKWISE)
        .depth_bias_enable(false);

    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
    }
    .map_err(|(_, e)| GraphicsError::from_vk("vkCreateGraphicsPipelines", e))?;

    Ok(pipelines[0])
}

/// One uniform buffer at set 0, binding 0, read by the vertex stage.
pub fn create_constant_layouts(
    device: &VulkanDevice,
) -> Result<(vk::DescriptorSetLayout, vk::PipelineLayout), GraphicsError> {
    let binding = vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::VERTEX)
        .build();

    let bindings = [binding];
    let set_layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    let set_layout = unsafe { device.device.create_descriptor_set_layout(&set_layout_info, None) }
        .api("vkCreateDescriptorSetLayout")?;

    let set_layouts = [set_layout];
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
    match unsafe { device.device.create_pipeline_layout(&layout_info, None) } {
        Ok(pipeline_layout) => Ok((set_layout, pipeline_layout)),
        Err(e) => {
            unsafe { device.device.destroy_descriptor_set_layout(set_layout, None) };
            Err(GraphicsError::from_vk("vkCreatePipelineLayout", e))
        }
    }
}
