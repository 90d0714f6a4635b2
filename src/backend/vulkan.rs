// Vulkan implementation of the immediate-context backend
//
// Binding calls update `BoundState`. `draw` resolves that state into a
// pipeline and descriptor set and queues a `DrawCall`; `present` records the
// queued draws into one render pass, submits, presents and waits on the
// frame fence.

use std::collections::HashMap;
use std::sync::Arc;

use ash::vk;
use raw_window_handle::RawDisplayHandle;

use super::buffer::VulkanBuffer;
use super::pipeline::{
    create_constant_layouts, create_graphics_pipeline, PipelineDesc, ShaderBinding, VulkanInputLayout,
};
use super::shader::VulkanShader;
use super::swapchain::VulkanRenderTarget;
use super::sync::FrameSync;
use super::{
    BufferUsage, CompiledShader, Extent, GpuBackend, GpuResource, ResourceHandle, SwapChainDesc, Topology,
    VertexLayout, Viewport, VulkanDevice, VulkanSwapchain,
};
use crate::error::{GraphicsError, VkResultExt};
use crate::graphics::device::{AdapterInfo, DeviceOptions};
use crate::window::NativeWindow;

const MAX_CONSTANT_BUFFERS: u32 = 4;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: vk::ShaderModule,
    fragment: vk::ShaderModule,
    input_layout: ResourceHandle,
    stride: u32,
    render_pass: vk::RenderPass,
}

#[derive(Clone)]
struct TargetBinding {
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
}

#[derive(Default)]
struct BoundState {
    target: Option<TargetBinding>,
    viewport: Option<Viewport>,
    shaders: Option<(ShaderBinding, ShaderBinding)>,
    input_layout: Option<VulkanInputLayout>,
    vertex_buffer: Option<(vk::Buffer, u32)>,
    constant_buffer: Option<vk::Buffer>,
}

struct DrawCall {
    pipeline: vk::Pipeline,
    viewport: vk::Viewport,
    scissor: vk::Rect2D,
    vertex_buffer: vk::Buffer,
    descriptor_set: Option<vk::DescriptorSet>,
    vertex_count: u32,
    first_vertex: u32,
}

#[derive(Default)]
struct PendingFrame {
    clear_color: Option<[f32; 4]>,
    draws: Vec<DrawCall>,
}

pub struct VulkanBackend {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    descriptor_sets: HashMap<vk::Buffer, vk::DescriptorSet>,
    pipelines: HashMap<PipelineKey, vk::Pipeline>,
    bound: BoundState,
    frame: PendingFrame,
    next_view: u64,
    sync: FrameSync,
    device: Arc<VulkanDevice>,
}

impl VulkanBackend {
    pub fn new(options: &DeviceOptions, display: RawDisplayHandle) -> Result<Self, GraphicsError> {
        let device = VulkanDevice::new(options, display)?;
        let sync = FrameSync::new(Arc::clone(&device))?;

        // Null handles are skipped by Drop if a later create fails
        let mut backend = Self {
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            descriptor_sets: HashMap::new(),
            pipelines: HashMap::new(),
            bound: BoundState::default(),
            frame: PendingFrame::default(),
            next_view: 0,
            sync,
            device,
        };

        let (set_layout, pipeline_layout) = create_constant_layouts(&backend.device)?;
        backend.descriptor_set_layout = set_layout;
        backend.pipeline_layout = pipeline_layout;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: MAX_CONSTANT_BUFFERS,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(MAX_CONSTANT_BUFFERS);
        backend.descriptor_pool = unsafe { backend.device.device.create_descriptor_pool(&pool_info, None) }
            .api("vkCreateDescriptorPool")?;

        let command_pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(backend.device.graphics_queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        backend.command_pool = unsafe { backend.device.device.create_command_pool(&command_pool_info, None) }
            .api("vkCreateCommandPool")?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(backend.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { backend.device.device.allocate_command_buffers(&alloc_info) }
            .api("vkAllocateCommandBuffers")?;
        backend.command_buffer = buffers
            .first()
            .copied()
            .ok_or_else(|| GraphicsError::DeviceCreation("no command buffer allocated".to_string()))?;

        log::info!("Vulkan backend ready on {}", backend.device.adapter.name);
        Ok(backend)
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    fn descriptor_set_for(&mut self, buffer: vk::Buffer) -> Result<vk::DescriptorSet, GraphicsError> {
        if let Some(&set) = self.descriptor_sets.get(&buffer) {
            return Ok(set);
        }

        let set_layouts = [self.descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&set_layouts);
        let set = unsafe { self.device.device.allocate_descriptor_sets(&alloc_info) }
            .api("vkAllocateDescriptorSets")?
            .first()
            .copied()
            .ok_or_else(|| GraphicsError::Api {
                call: "vkAllocateDescriptorSets",
                message: "no descriptor set returned".to_string(),
            })?;

        let buffer_info = [vk::DescriptorBufferInfo {
            buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }];
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(&buffer_info)
            .build();
        unsafe { self.device.device.update_descriptor_sets(&[write], &[]) };

        self.descriptor_sets.insert(buffer, set);
        Ok(set)
    }

    fn pipeline_for(&mut self, key: PipelineKey) -> Result<vk::Pipeline, GraphicsError> {
        if let Some(&pipeline) = self.pipelines.get(&key) {
            return Ok(pipeline);
        }

        let (vertex, fragment) = self.bound.shaders.as_ref().ok_or_else(|| not_bound("shaders"))?;
        let input_layout = self.bound.input_layout.as_ref().ok_or_else(|| not_bound("input layout"))?;
        let pipeline = create_graphics_pipeline(
            &self.device,
            &PipelineDesc {
                vertex,
                fragment,
                input_layout,
                vertex_stride: key.stride,
                render_pass: key.render_pass,
                layout: self.pipeline_layout,
            },
        )?;
        log::debug!("Created graphics pipeline ({} cached)", self.pipelines.len() + 1);
        self.pipelines.insert(key, pipeline);
        Ok(pipeline)
    }

    fn record(&self, target: &TargetBinding, framebuffer: vk::Framebuffer) -> Result<(), GraphicsError> {
        let device = &self.device.device;
        let cmd = self.command_buffer;
        let clear = self.frame.clear_color.unwrap_or([0.0, 0.0, 0.0, 1.0]);

        unsafe {
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .api("vkResetCommandBuffer")?;

            let begin_info =
                vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(cmd, &begin_info)
                .api("vkBeginCommandBuffer")?;

            let clear_values = [vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            }];
            let render_pass_info = vk::RenderPassBeginInfo::builder()
                .render_pass(target.render_pass)
                .framebuffer(framebuffer)
                .render_area(vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: target.extent,
                })
                .clear_values(&clear_values);
            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);

            for draw in &self.frame.draws {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
                device.cmd_set_viewport(cmd, 0, &[draw.viewport]);
                device.cmd_set_scissor(cmd, 0, &[draw.scissor]);
                device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
                if let Some(set) = draw.descriptor_set {
                    device.cmd_bind_descriptor_sets(
                        cmd,
                        vk::PipelineBindPoint::GRAPHICS,
                        self.pipeline_layout,
                        0,
                        &[set],
                        &[],
                    );
                }
                device.cmd_draw(cmd, draw.vertex_count, 1, draw.first_vertex, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).api("vkEndCommandBuffer")?;
        }
        Ok(())
    }

    /// Everything between acquire and present. On error nothing waited on
    /// `image_available`.
    fn record_and_submit(&self, target: &TargetBinding, image_index: u32) -> Result<(), GraphicsError> {
        let framebuffer = target
            .framebuffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| GraphicsError::Present(format!("no framebuffer for swapchain image {image_index}")))?;

        self.record(target, framebuffer)?;
        self.sync.reset()?;
        self.submit()
    }

    fn submit(&self) -> Result<(), GraphicsError> {
        let wait_semaphores = [self.sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.sync.render_finished];
        let command_buffers = [self.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(self.device.graphics_queue, &[submit_info], self.sync.in_flight_fence)
        }
        .api("vkQueueSubmit")
    }
}

/// Run `cleanup` when `result` is an error, then pass it through.
fn on_error<T, E>(result: Result<T, E>, cleanup: impl FnOnce()) -> Result<T, E> {
    if result.is_err() {
        cleanup();
    }
    result
}

fn not_bound(what: &str) -> GraphicsError {
    GraphicsError::Api {
        call: "draw",
        message: format!("no {what} bound"),
    }
}

fn vk_viewport(viewport: Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

impl GpuBackend for VulkanBackend {
    type SwapChain = VulkanSwapchain;
    type RenderTargetView = VulkanRenderTarget;
    type Shader = VulkanShader;
    type InputLayout = VulkanInputLayout;
    type Buffer = VulkanBuffer;

    fn adapter(&self) -> &AdapterInfo {
        &self.device.adapter
    }

    fn device_handle(&self) -> ResourceHandle {
        ResourceHandle(vk::Handle::as_raw(self.device.device.handle()))
    }

    fn create_swapchain(
        &mut self,
        window: Arc<dyn NativeWindow>,
        desc: &SwapChainDesc,
    ) -> Result<VulkanSwapchain, GraphicsError> {
        VulkanSwapchain::new(Arc::clone(&self.device), window, desc)
    }

    fn swapchain_extent(&self, swapchain: &VulkanSwapchain) -> Extent {
        Extent::new(swapchain.extent.width, swapchain.extent.height)
    }

    fn resize_buffers(&mut self, swapchain: &mut VulkanSwapchain, extent: Extent) -> Result<Extent, GraphicsError> {
        // Queued draws and the bound target refer to the old framebuffers
        self.bound.target = None;
        self.frame = PendingFrame::default();
        swapchain.resize(extent)
    }

    fn set_fullscreen_state(&mut self, swapchain: &mut VulkanSwapchain, enabled: bool) -> Result<(), GraphicsError> {
        swapchain.window.set_fullscreen(enabled)?;
        swapchain.fullscreen = enabled;
        Ok(())
    }

    fn create_render_target_view(&mut self, swapchain: &VulkanSwapchain) -> Result<VulkanRenderTarget, GraphicsError> {
        self.next_view += 1;
        swapchain.create_render_target(ResourceHandle(self.next_view))
    }

    fn create_shader(&mut self, program: &CompiledShader) -> Result<VulkanShader, GraphicsError> {
        VulkanShader::new(Arc::clone(&self.device), program)
    }

    fn create_input_layout(&mut self, layout: &VertexLayout, topology: Topology) -> Result<VulkanInputLayout, GraphicsError> {
        self.next_view += 1;
        Ok(VulkanInputLayout::new(ResourceHandle(self.next_view), layout, topology))
    }

    fn create_buffer(
        &mut self,
        usage: BufferUsage,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Result<VulkanBuffer, GraphicsError> {
        VulkanBuffer::new(Arc::clone(&self.device), usage, size, contents)
    }

    fn write_buffer(&mut self, buffer: &VulkanBuffer, bytes: &[u8]) -> Result<(), GraphicsError> {
        if bytes.len() as u64 != buffer.size {
            return Err(GraphicsError::Api {
                call: "write_buffer",
                message: format!("{} bytes written to a {}-byte buffer", bytes.len(), buffer.size),
            });
        }
        buffer.write(bytes)
    }

    fn set_render_target(&mut self, view: &VulkanRenderTarget) {
        self.bound.target = Some(TargetBinding {
            framebuffers: view.framebuffers.clone(),
            render_pass: view.render_pass,
            extent: view.extent,
        });
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bound.viewport = Some(viewport);
    }

    fn clear_render_target(&mut self, _view: &VulkanRenderTarget, color: [f32; 4]) {
        // Applied as the render pass load op
        self.frame.clear_color = Some(color);
    }

    fn set_shaders(&mut self, vertex: &VulkanShader, fragment: &VulkanShader) {
        self.bound.shaders = Some((vertex.into(), fragment.into()));
    }

    fn set_input_layout(&mut self, layout: &VulkanInputLayout) {
        self.bound.input_layout = Some(layout.clone());
    }

    fn set_vertex_buffer(&mut self, buffer: &VulkanBuffer, stride: u32) {
        self.bound.vertex_buffer = Some((buffer.buffer, stride));
    }

    fn set_constant_buffer(&mut self, slot: u32, buffer: &VulkanBuffer) {
        if slot != 0 {
            log::warn!("Constant buffer slot {} is not supported, binding to slot 0", slot);
        }
        self.bound.constant_buffer = Some(buffer.buffer);
    }

    fn draw(&mut self, vertex_count: u32, first_vertex: u32) -> Result<(), GraphicsError> {
        let (render_pass, extent) = match &self.bound.target {
            Some(target) => (target.render_pass, target.extent),
            None => return Err(GraphicsError::NoRenderTarget),
        };
        let (vertex_buffer, stride) = self.bound.vertex_buffer.ok_or_else(|| not_bound("vertex buffer"))?;
        let (vertex, fragment) = match &self.bound.shaders {
            Some((vs, fs)) => (vs.module, fs.module),
            None => return Err(not_bound("shaders")),
        };
        let input_layout = self
            .bound
            .input_layout
            .as_ref()
            .map(|l| l.handle())
            .ok_or_else(|| not_bound("input layout"))?;

        let pipeline = self.pipeline_for(PipelineKey {
            vertex,
            fragment,
            input_layout,
            stride,
            render_pass,
        })?;
        let descriptor_set = match self.bound.constant_buffer {
            Some(buffer) => Some(self.descriptor_set_for(buffer)?),
            None => None,
        };

        let viewport = self
            .bound
            .viewport
            .unwrap_or_else(|| Viewport::full(Extent::new(extent.width, extent.height)));

        self.frame.draws.push(DrawCall {
            pipeline,
            viewport: vk_viewport(viewport),
            scissor: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            vertex_buffer,
            descriptor_set,
            vertex_count,
            first_vertex,
        });
        Ok(())
    }

    fn present(&mut self, swapchain: &mut VulkanSwapchain, sync_interval: u32) -> Result<(), GraphicsError> {
        if (sync_interval > 0) != swapchain.vsync() {
            log::debug!(
                "Sync interval {} differs from the swapchain present mode {:?}",
                sync_interval,
                swapchain.present_mode
            );
        }

        let target = self.bound.target.clone().ok_or(GraphicsError::NoRenderTarget)?;
        let image_index = swapchain.acquire_next_image(self.sync.image_available)?;

        let submitted = self.record_and_submit(&target, image_index);
        self.frame = PendingFrame::default();
        on_error(submitted, || {
            if let Err(e) = self.sync.drain_image_available(self.device.graphics_queue) {
                log::error!("Could not release acquired image {}: {}", image_index, e);
            }
        })?;

        let presented = swapchain.present(self.device.graphics_queue, image_index, &[self.sync.render_finished]);
        // The only blocking point: buffers may be rewritten once this returns
        self.sync.wait()?;
        presented
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            for (_, pipeline) in self.pipelines.drain() {
                self.device.device.destroy_pipeline(pipeline, None);
            }
            self.device.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.device.destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .device
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
            self.device.device.destroy_command_pool(self.command_pool, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn cleanup_runs_only_on_failure() {
        let released = Cell::new(0);

        let ok: Result<u32, GraphicsError> = on_error(Ok(3), || released.set(released.get() + 1));
        assert_eq!(ok.unwrap(), 3);
        assert_eq!(released.get(), 0);

        let failed: Result<(), GraphicsError> = on_error(Err(GraphicsError::Present("no framebuffer".to_string())), || {
            released.set(released.get() + 1)
        });
        assert!(matches!(failed, Err(GraphicsError::Present(_))));
        assert_eq!(released.get(), 1);
    }
}
