// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with the surface extensions the display needs
// - Physical device selection (hardware only, prefer discrete GPU)
// - Logical device + graphics queue creation
// - Memory allocator setup

use std::ffi::{c_char, CStr, CString};
use std::sync::Arc;

use ash::extensions::{ext, khr};
use ash::{vk, Entry};
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use parking_lot::Mutex;
use raw_window_handle::RawDisplayHandle;

use crate::error::GraphicsError;
use crate::graphics::device::{select_adapter, AdapterCandidate, AdapterInfo, AdapterKind, DeviceOptions};

/// Vulkan device wrapper with automatic cleanup
pub struct VulkanDevice {
    // Taken out in Drop so the allocator goes before the device does
    pub allocator: Mutex<Option<Allocator>>,
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub instance: ash::Instance,
    pub entry: Entry,

    pub graphics_queue: vk::Queue,
    pub graphics_queue_family: u32,

    debug_utils: Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub adapter: AdapterInfo,
    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Create the Vulkan device. Any failure here is a `DeviceCreation` error.
    pub fn new(options: &DeviceOptions, display: RawDisplayHandle) -> Result<Arc<Self>, GraphicsError> {
        log::info!("Creating Vulkan device: {}", options.app_name);
        let fail = |what: &str, e: vk::Result| GraphicsError::DeviceCreation(format!("{what}: {e:?}"));

        let entry = unsafe { Entry::load() }
            .map_err(|e| GraphicsError::DeviceCreation(format!("Vulkan loader unavailable: {e}")))?;

        let instance = Self::create_instance(&entry, options, display)?;

        let debug_utils = if options.validation {
            match Self::setup_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(e) => {
                    log::warn!("Validation messenger unavailable: {:?}", e);
                    None
                }
            }
        } else {
            None
        };

        let (physical_device, graphics_queue_family, adapter) = match Self::pick_physical_device(&instance) {
            Ok(picked) => picked,
            Err(e) => {
                unsafe { Self::destroy_instance(&instance, &debug_utils) };
                return Err(e);
            }
        };

        let (device, graphics_queue) =
            match Self::create_logical_device(&instance, physical_device, graphics_queue_family) {
                Ok(created) => created,
                Err(e) => {
                    unsafe { Self::destroy_instance(&instance, &debug_utils) };
                    return Err(fail("vkCreateDevice", e));
                }
            };

        let properties = unsafe { instance.get_physical_device_properties(physical_device) };

        log::info!("Selected GPU: {} ({:?})", adapter.name, adapter.kind);
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe {
                    device.destroy_device(None);
                    Self::destroy_instance(&instance, &debug_utils);
                }
                return Err(GraphicsError::DeviceCreation(format!("memory allocator: {e}")));
            }
        };

        Ok(Arc::new(Self {
            allocator: Mutex::new(Some(allocator)),
            device,
            physical_device,
            instance,
            entry,
            graphics_queue,
            graphics_queue_family,
            debug_utils,
            adapter,
            properties,
        }))
    }

    fn create_instance(
        entry: &Entry,
        options: &DeviceOptions,
        display: RawDisplayHandle,
    ) -> Result<ash::Instance, GraphicsError> {
        let app_name = CString::new(options.app_name.as_str())
            .map_err(|_| GraphicsError::DeviceCreation("application name contains NUL".to_string()))?;
        let engine_name = c"tri-renderer";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_1);

        let mut extensions = surface_extensions(display)?;
        if options.validation {
            extensions.push(ext::DebugUtils::name().as_ptr());
        }

        let layer_names = if options.validation {
            vec![c"VK_LAYER_KHRONOS_validation".as_ptr()]
        } else {
            vec![]
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_names);

        unsafe { entry.create_instance(&create_info, None) }
            .map_err(|e| GraphicsError::DeviceCreation(format!("vkCreateInstance: {e:?}")))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Result<(ext::DebugUtils, vk::DebugUtilsMessengerEXT), vk::Result> {
        let debug_utils = ext::DebugUtils::new(entry, instance);

        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                    | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }?;

        Ok((debug_utils, messenger))
    }

    fn pick_physical_device(
        instance: &ash::Instance,
    ) -> Result<(vk::PhysicalDevice, u32, AdapterInfo), GraphicsError> {
        let devices = unsafe { instance.enumerate_physical_devices() }
            .map_err(|e| GraphicsError::DeviceCreation(format!("vkEnumeratePhysicalDevices: {e:?}")))?;

        let mut candidates = Vec::with_capacity(devices.len());
        let mut queue_families = Vec::with_capacity(devices.len());

        for &device in &devices {
            let props = unsafe { instance.get_physical_device_properties(device) };

            let graphics_family = unsafe { instance.get_physical_device_queue_family_properties(device) }
                .iter()
                .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
                .map(|i| i as u32);

            let supports_swapchain = unsafe { instance.enumerate_device_extension_properties(device) }
                .map(|exts| {
                    exts.iter().any(|e| {
                        let name = unsafe { CStr::from_ptr(e.extension_name.as_ptr()) };
                        name == khr::Swapchain::name()
                    })
                })
                .unwrap_or(false);

            let info = AdapterInfo {
                name: unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
                    .to_string_lossy()
                    .into_owned(),
                kind: match props.device_type {
                    vk::PhysicalDeviceType::DISCRETE_GPU => AdapterKind::Discrete,
                    vk::PhysicalDeviceType::INTEGRATED_GPU => AdapterKind::Integrated,
                    vk::PhysicalDeviceType::VIRTUAL_GPU => AdapterKind::Virtual,
                    vk::PhysicalDeviceType::CPU => AdapterKind::Cpu,
                    _ => AdapterKind::Other,
                },
                vendor_id: props.vendor_id,
                device_id: props.device_id,
            };
            log::debug!("Found adapter {} ({:?})", info.name, info.kind);

            candidates.push(AdapterCandidate {
                info,
                has_graphics_queue: graphics_family.is_some(),
                supports_swapchain,
            });
            queue_families.push(graphics_family.unwrap_or(0));
        }

        let index = select_adapter(&candidates)?;
        Ok((devices[index], queue_families[index], candidates.swap_remove(index).info))
    }

    fn create_logical_device(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        graphics_queue_family: u32,
    ) -> Result<(ash::Device, vk::Queue), vk::Result> {
        let queue_priorities = [1.0];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(graphics_queue_family)
            .queue_priorities(&queue_priorities)
            .build();

        let extensions = [khr::Swapchain::name().as_ptr()];

        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(std::slice::from_ref(&queue_create_info))
            .enabled_extension_names(&extensions);

        let device = unsafe { instance.create_device(physical_device, &create_info, None) }?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };

        Ok((device, graphics_queue))
    }

    unsafe fn destroy_instance(
        instance: &ash::Instance,
        debug_utils: &Option<(ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) {
        if let Some((debug_utils, messenger)) = debug_utils {
            debug_utils.destroy_debug_utils_messenger(*messenger, None);
        }
        instance.destroy_instance(None);
    }

    /// Wait for device to be idle (e.g., before releasing resources it may still read)
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        unsafe { self.device.device_wait_idle() }
            .map_err(|e| GraphicsError::from_vk("vkDeviceWaitIdle", e))
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();
        drop(self.allocator.lock().take());

        unsafe {
            self.device.destroy_device(None);
            Self::destroy_instance(&self.instance, &self.debug_utils);
        }
    }
}

/// Instance extensions needed to create surfaces on `display`.
fn surface_extensions(display: RawDisplayHandle) -> Result<Vec<*const c_char>, GraphicsError> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => {
            return Err(GraphicsError::DeviceCreation(format!(
                "unsupported display server: {other:?}"
            )))
        }
    };
    Ok(vec![khr::Surface::name().as_ptr(), platform.as_ptr()])
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
