// GPU buffers for vertex and constant (uniform) data
//
// Memory comes from gpu-allocator in host-visible, persistently mapped form.
// Both buffers here are tiny, so there is no staging copy.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;

use super::{BufferUsage, GpuResource, ResourceHandle, VulkanDevice};
use crate::error::{GraphicsError, VkResultExt};

pub struct VulkanBuffer {
    pub buffer: vk::Buffer,
    pub size: u64,
    pub usage: BufferUsage,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl VulkanBuffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        usage: BufferUsage,
        size: u64,
        contents: Option<&[u8]>,
    ) -> Result<Self, GraphicsError> {
        if size == 0 {
            return Err(GraphicsError::ResourceCreation("zero-sized buffer".to_string()));
        }

        let (vk_usage, name) = match usage {
            BufferUsage::Vertex => (vk::BufferUsageFlags::VERTEX_BUFFER, "vertex buffer"),
            BufferUsage::Constant => (vk::BufferUsageFlags::UNIFORM_BUFFER, "constant buffer"),
        };

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }.api("vkCreateBuffer")?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = match device.allocator.lock().as_mut() {
            Some(allocator) => allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GraphicsError::ResourceCreation(format!("{name}: {e}"))),
            None => Err(GraphicsError::ResourceCreation("allocator already released".to_string())),
        };

        // Wrapped before binding so Drop frees both on any later error
        let mut created = Self {
            buffer,
            size,
            usage,
            allocation: None,
            device,
        };
        created.allocation = Some(allocation?);

        if let Some(allocation) = &created.allocation {
            unsafe {
                created
                    .device
                    .device
                    .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
            }
            .api("vkBindBufferMemory")?;
        }

        if let Some(contents) = contents {
            created.write(contents)?;
        }

        Ok(created)
    }

    /// Copy `bytes` to the start of the mapped memory.
    pub fn write(&self, bytes: &[u8]) -> Result<(), GraphicsError> {
        if bytes.len() as u64 > self.size {
            return Err(GraphicsError::Api {
                call: "write_buffer",
                message: format!("{} bytes written to a {}-byte buffer", bytes.len(), self.size),
            });
        }

        let mapped = self
            .allocation
            .as_ref()
            .and_then(|a| a.mapped_ptr())
            .ok_or_else(|| GraphicsError::Api {
                call: "write_buffer",
                message: "buffer memory is not host visible".to_string(),
            })?;

        // Host-coherent memory that stays mapped for the allocation's lifetime;
        // the backend waits on the frame fence before the CPU writes again.
        unsafe {
            bytes
                .as_ptr()
                .copy_to_nonoverlapping(mapped.as_ptr().cast::<u8>(), bytes.len());
        }
        Ok(())
    }
}

impl GpuResource for VulkanBuffer {
    fn handle(&self) -> ResourceHandle {
        ResourceHandle(vk::Handle::as_raw(self.buffer))
    }
}

impl Drop for VulkanBuffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            if let Some(allocator) = self.device.allocator.lock().as_mut() {
                if let Err(e) = allocator.free(allocation) {
                    log::warn!("Failed to free buffer memory: {}", e);
                }
            }
        }
    }
}
