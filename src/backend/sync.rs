// Synchronization primitives
//
// One frame in flight: acquire signals `image_available`, the submit waits on
// it and signals `render_finished` for present, and the fence tells the CPU
// the GPU is done with the frame's buffers.

use std::sync::Arc;

use ash::vk;

use super::VulkanDevice;
use crate::error::{GraphicsError, VkResultExt};

pub struct FrameSync {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self, GraphicsError> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED); // Start signaled

        // Null handles are ignored by Drop if a later create fails
        let mut sync = Self {
            image_available: vk::Semaphore::null(),
            render_finished: vk::Semaphore::null(),
            in_flight_fence: vk::Fence::null(),
            device,
        };
        unsafe {
            sync.image_available = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .api("vkCreateSemaphore")?;
            sync.render_finished = sync
                .device
                .device
                .create_semaphore(&semaphore_info, None)
                .api("vkCreateSemaphore")?;
            sync.in_flight_fence = sync
                .device
                .device
                .create_fence(&fence_info, None)
                .api("vkCreateFence")?;
        }
        Ok(sync)
    }

    /// Block until the last submission finished.
    pub fn wait(&self) -> Result<(), GraphicsError> {
        unsafe {
            self.device
                .device
                .wait_for_fences(&[self.in_flight_fence], true, u64::MAX)
        }
        .api("vkWaitForFences")
    }

    pub fn reset(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.device.reset_fences(&[self.in_flight_fence]) }.api("vkResetFences")
    }

    /// Unsignal `image_available` after an acquire whose frame never got
    /// submitted. An empty batch waits on it so the next acquire can signal
    /// it again.
    pub fn drain_image_available(&self, queue: vk::Queue) -> Result<(), GraphicsError> {
        let wait_semaphores = [self.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .build();

        unsafe {
            self.device
                .device
                .queue_submit(queue, &[submit_info], vk::Fence::null())
                .api("vkQueueSubmit")?;
            self.device.device.queue_wait_idle(queue).api("vkQueueWaitIdle")
        }
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            self.device.device.destroy_semaphore(self.image_available, None);
            self.device.device.destroy_semaphore(self.render_finished, None);
            self.device.device.destroy_fence(self.in_flight_fence, None);
        }
    }
}
