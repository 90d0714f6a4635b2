// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// The VkSwapchainKHR is rebuilt on resize (passing the old one as
// `old_swapchain`), but this wrapper and its surface persist.

use std::sync::Arc;

use ash::extensions::khr;
use ash::vk;

use super::pipeline::{create_framebuffers, create_render_pass};
use super::{surface, Extent, GpuResource, ResourceHandle, SwapChainDesc, VulkanDevice};
use crate::error::{GraphicsError, VkResultExt};
use crate::window::NativeWindow;

pub struct VulkanSwapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    pub present_mode: vk::PresentModeKHR,
    pub fullscreen: bool,
    loader: khr::Swapchain,
    surface: vk::SurfaceKHR,
    surface_loader: khr::Surface,
    color_space: vk::ColorSpaceKHR,
    image_count: u32,
    // one strong ref per live render target; resize needs this to be unique
    view_token: Arc<()>,
    pub(crate) window: Arc<dyn NativeWindow>,
    device: Arc<VulkanDevice>,
}

impl VulkanSwapchain {
    pub fn new(
        device: Arc<VulkanDevice>,
        window: Arc<dyn NativeWindow>,
        desc: &SwapChainDesc,
    ) -> Result<Self, GraphicsError> {
        log::info!("Creating swapchain: {}x{}", desc.extent.width, desc.extent.height);
        let fail = |what: &str, e: vk::Result| GraphicsError::SwapChainCreate(format!("{what}: {e:?}"));

        if desc.extent.is_empty() {
            return Err(GraphicsError::SwapChainCreate(format!(
                "invalid extent {}x{}",
                desc.extent.width, desc.extent.height
            )));
        }

        let surface = surface::create_surface(&device, window.raw_display_handle()?, window.raw_window_handle()?)?;
        let surface_loader = khr::Surface::new(&device.entry, &device.instance);

        // From here on the surface must be released on every error path
        let destroy_surface = |e: GraphicsError| {
            unsafe { surface_loader.destroy_surface(surface, None) };
            e
        };

        let supported = unsafe {
            surface_loader.get_physical_device_surface_support(
                device.physical_device,
                device.graphics_queue_family,
                surface,
            )
        }
        .map_err(|e| destroy_surface(fail("vkGetPhysicalDeviceSurfaceSupportKHR", e)))?;
        if !supported {
            return Err(destroy_surface(GraphicsError::SwapChainCreate(
                "GPU cannot present to this window".to_string(),
            )));
        }

        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, surface)
        }
        .map_err(|e| destroy_surface(fail("vkGetPhysicalDeviceSurfaceFormatsKHR", e)))?;

        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(device.physical_device, surface)
        }
        .map_err(|e| destroy_surface(fail("vkGetPhysicalDeviceSurfacePresentModesKHR", e)))?;

        // RGBA8 UNORM, with BGRA8 UNORM as the fallback most Windows drivers expose
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::R8G8B8A8_UNORM)
            .or_else(|| formats.iter().find(|f| f.format == vk::Format::B8G8R8A8_UNORM))
            .copied()
            .ok_or_else(|| {
                destroy_surface(GraphicsError::SwapChainCreate(
                    "surface supports no 8-bit UNORM format".to_string(),
                ))
            })?;

        let present_mode = choose_present_mode(&present_modes, desc.vsync);
        log::info!("Format: {:?}, present mode: {:?}", surface_format.format, present_mode);

        let render_pass = create_render_pass(&device, surface_format.format).map_err(destroy_surface)?;

        let loader = khr::Swapchain::new(&device.instance, &device.device);

        let mut swapchain = Self {
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            format: surface_format.format,
            extent: vk::Extent2D::default(),
            render_pass,
            present_mode,
            fullscreen: false,
            loader,
            surface,
            surface_loader,
            color_space: surface_format.color_space,
            image_count: desc.buffer_count.max(2),
            view_token: Arc::new(()),
            window,
            device,
        };

        // Drop cleans up the render pass and surface if this fails
        swapchain
            .rebuild(desc.extent)
            .map_err(|e| GraphicsError::SwapChainCreate(e.to_string()))?;

        log::info!("Created swapchain with {} images", swapchain.images.len());
        Ok(swapchain)
    }

    /// Recreate the image chain at a new size. Refused while any render target
    /// view still references the current images.
    pub fn resize(&mut self, extent: Extent) -> Result<Extent, GraphicsError> {
        let rejected = |reason: String| GraphicsError::ResizeFailed {
            width: extent.width,
            height: extent.height,
            reason,
        };

        if extent.is_empty() {
            return Err(rejected("zero-sized back buffer".to_string()));
        }
        let outstanding = Arc::strong_count(&self.view_token) - 1;
        if outstanding > 0 {
            return Err(rejected(format!("{outstanding} render target view(s) still referenced")));
        }

        self.rebuild(extent)
    }

    fn rebuild(&mut self, requested: Extent) -> Result<Extent, GraphicsError> {
        let rejected = |reason: String| GraphicsError::ResizeFailed {
            width: requested.width,
            height: requested.height,
            reason,
        };

        let caps = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.surface)
        }
        .api("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")?;

        let min = caps.min_image_extent;
        let max = caps.max_image_extent;
        if requested.width < min.width
            || requested.height < min.height
            || requested.width > max.width
            || requested.height > max.height
        {
            return Err(rejected(format!(
                "surface accepts {}x{} to {}x{}",
                min.width, min.height, max.width, max.height
            )));
        }
        let extent = vk::Extent2D {
            width: requested.width,
            height: requested.height,
        };

        let mut image_count = self.image_count.max(caps.min_image_count);
        if caps.max_image_count > 0 && image_count > caps.max_image_count {
            image_count = caps.max_image_count;
        }

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(self.format)
            .image_color_space(self.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None) }
            .map_err(|e| match e {
                vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost("vkCreateSwapchainKHR".to_string()),
                other => rejected(format!("vkCreateSwapchainKHR: {other:?}")),
            })?;

        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;
        self.images = unsafe { self.loader.get_swapchain_images(swapchain) }.api("vkGetSwapchainImagesKHR")?;
        self.extent = extent;

        Ok(Extent::new(extent.width, extent.height))
    }

    pub fn create_render_target(&self, handle: ResourceHandle) -> Result<VulkanRenderTarget, GraphicsError> {
        let mut target = VulkanRenderTarget {
            handle,
            image_views: Vec::with_capacity(self.images.len()),
            framebuffers: Vec::new(),
            render_pass: self.render_pass,
            extent: self.extent,
            _token: Arc::clone(&self.view_token),
            device: Arc::clone(&self.device),
        };

        // pushed one by one so Drop releases whatever was created before a failure
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .api("vkCreateImageView")?;
            target.image_views.push(view);
        }

        target.framebuffers = create_framebuffers(&self.device, &target.image_views, self.render_pass, self.extent)?;
        Ok(target)
    }

    /// Acquire next image for rendering
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<u32, GraphicsError> {
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };

        match result {
            Ok((index, suboptimal)) => {
                if suboptimal {
                    log::debug!("Swapchain suboptimal for the current window size");
                }
                Ok(index)
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(GraphicsError::Present("swapchain out of date".to_string()))
            }
            Err(e) => Err(GraphicsError::from_vk("vkAcquireNextImageKHR", e)),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), GraphicsError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        match unsafe { self.loader.queue_present(queue, &present_info) } {
            Ok(_) => Ok(()),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                Err(GraphicsError::Present("swapchain out of date".to_string()))
            }
            Err(vk::Result::ERROR_DEVICE_LOST) => {
                Err(GraphicsError::DeviceLost("vkQueuePresentKHR".to_string()))
            }
            Err(e) => Err(GraphicsError::Present(format!("vkQueuePresentKHR: {e:?}"))),
        }
    }

    pub fn vsync(&self) -> bool {
        matches!(self.present_mode, vk::PresentModeKHR::FIFO | vk::PresentModeKHR::FIFO_RELAXED)
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        unsafe {
            if self.swapchain != vk::SwapchainKHR::null() {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
            self.surface_loader.destroy_surface(self.surface, None);
        }
    }
}

/// FIFO blocks on vblank and is always available. Without vsync prefer
/// MAILBOX (no tearing), then IMMEDIATE.
fn choose_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The render-target view of a swapchain: one image view and framebuffer per
/// back buffer. Holding one blocks `VulkanSwapchain::resize`.
pub struct VulkanRenderTarget {
    handle: ResourceHandle,
    pub image_views: Vec<vk::ImageView>,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
    _token: Arc<()>,
    device: Arc<VulkanDevice>,
}

impl GpuResource for VulkanRenderTarget {
    fn handle(&self) -> ResourceHandle {
        self.handle
    }
}

impl Drop for VulkanRenderTarget {
    fn drop(&mut self) {
        // The GPU may still be drawing into these
        let _ = self.device.wait_idle();
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsync_always_gets_fifo() {
        let modes = [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn no_vsync_prefers_mailbox_then_immediate() {
        let modes = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO];
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::IMMEDIATE);

        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }
}
