// GraphicsDevice - the single GPU device + submission context of the process
//
// Created once at startup and never recreated. Owns the backend; every other
// component borrows it for the duration of a call.

use raw_window_handle::RawDisplayHandle;

use crate::backend::{GpuBackend, ResourceHandle, VulkanBackend};
use crate::error::GraphicsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Discrete,
    Integrated,
    Virtual,
    /// Software rasterizer. Never selected.
    Cpu,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdapterInfo {
    pub name: String,
    pub kind: AdapterKind,
    pub vendor_id: u32,
    pub device_id: u32,
}

/// What the backend learned about one physical adapter while enumerating.
#[derive(Debug, Clone)]
pub struct AdapterCandidate {
    pub info: AdapterInfo,
    pub has_graphics_queue: bool,
    pub supports_swapchain: bool,
}

/// Pick the best hardware adapter. Discrete beats integrated beats virtual.
/// There is no software fallback.
pub fn select_adapter(candidates: &[AdapterCandidate]) -> Result<usize, GraphicsError> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, c)| c.has_graphics_queue && c.supports_swapchain)
        .filter_map(|(i, c)| {
            let score = match c.info.kind {
                AdapterKind::Discrete => 1000,
                AdapterKind::Integrated => 100,
                AdapterKind::Virtual => 10,
                AdapterKind::Other => 1,
                AdapterKind::Cpu => return None,
            };
            Some((i, score))
        })
        // first adapter wins ties
        .fold(None, |best: Option<(usize, u32)>, (i, score)| match best {
            Some((_, best_score)) if best_score >= score => best,
            _ => Some((i, score)),
        })
        .map(|(i, _)| i)
        .ok_or_else(|| {
            GraphicsError::DeviceCreation(format!(
                "no hardware adapter with graphics and presentation support among {} candidate(s)",
                candidates.len()
            ))
        })
}

/// Options for the real (Vulkan) device.
#[derive(Debug, Clone)]
pub struct DeviceOptions {
    pub app_name: String,
    pub validation: bool,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            app_name: "tri-renderer".to_string(),
            validation: cfg!(debug_assertions),
        }
    }
}

pub struct GraphicsDevice<B: GpuBackend> {
    backend: B,
}

impl GraphicsDevice<VulkanBackend> {
    /// Create the Vulkan device for windows living on `display`.
    pub fn create(options: &DeviceOptions, display: RawDisplayHandle) -> Result<Self, GraphicsError> {
        VulkanBackend::new(options, display).map(Self::from_backend)
    }
}

impl<B: GpuBackend> GraphicsDevice<B> {
    pub fn from_backend(backend: B) -> Self {
        let adapter = backend.adapter();
        log::info!("Graphics device on {} ({:?})", adapter.name, adapter.kind);
        Self { backend }
    }

    pub fn handle(&self) -> ResourceHandle {
        self.backend.device_handle()
    }

    pub fn adapter(&self) -> &AdapterInfo {
        self.backend.adapter()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, kind: AdapterKind) -> AdapterCandidate {
        AdapterCandidate {
            info: AdapterInfo {
                name: name.to_string(),
                kind,
                vendor_id: 0,
                device_id: 0,
            },
            has_graphics_queue: true,
            supports_swapchain: true,
        }
    }

    #[test]
    fn prefers_discrete_gpu() {
        let adapters = [
            candidate("igpu", AdapterKind::Integrated),
            candidate("dgpu", AdapterKind::Discrete),
        ];
        assert_eq!(select_adapter(&adapters).unwrap(), 1);
    }

    #[test]
    fn never_falls_back_to_software() {
        let adapters = [candidate("llvmpipe", AdapterKind::Cpu)];
        let err = select_adapter(&adapters).unwrap_err();
        assert!(matches!(err, GraphicsError::DeviceCreation(_)));
    }

    #[test]
    fn skips_adapters_without_presentation() {
        let mut headless = candidate("compute-only", AdapterKind::Discrete);
        headless.supports_swapchain = false;
        let adapters = [headless, candidate("igpu", AdapterKind::Integrated)];
        assert_eq!(select_adapter(&adapters).unwrap(), 1);
    }

    #[test]
    fn empty_list_fails() {
        assert!(select_adapter(&[]).is_err());
    }
}
