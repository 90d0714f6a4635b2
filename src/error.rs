// Error taxonomy for the rendering core
//
// Every fallible GPU-facing operation returns `Result<_, GraphicsError>`.
// Components never decide whether an error is fatal; the display controller
// and the event loop in main.rs do.

use ash::vk;
use thiserror::Error;

use crate::backend::ShaderStage;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GraphicsError {
    /// No hardware adapter or driver could back the device.
    #[error("device creation failed: {0}")]
    DeviceCreation(String),

    #[error("swapchain creation failed: {0}")]
    SwapChainCreate(String),

    /// The buffer resize was rejected. The swapchain has no render target bound.
    #[error("swapchain resize to {width}x{height} failed: {reason}")]
    ResizeFailed {
        width: u32,
        height: u32,
        reason: String,
    },

    #[error("fullscreen transition failed: {0}")]
    FullscreenTransition(String),

    /// Carries the compiler diagnostics verbatim.
    #[error("{stage:?} shader failed to compile:\n{diagnostics}")]
    ShaderCompile {
        stage: ShaderStage,
        diagnostics: String,
    },

    #[error("input layout does not match vertex shader inputs: {0}")]
    InputLayoutMismatch(String),

    #[error("resource creation failed: {0}")]
    ResourceCreation(String),

    #[error("no render target is bound")]
    NoRenderTarget,

    #[error("present failed: {0}")]
    Present(String),

    /// The device is gone (driver reset, GPU removed). Needs full recreation.
    #[error("device lost during {0}")]
    DeviceLost(String),

    #[error("{call} failed: {message}")]
    Api {
        call: &'static str,
        message: String,
    },
}

impl GraphicsError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, GraphicsError::DeviceLost(_))
    }

    /// Map a raw Vulkan result, keeping device loss distinguishable.
    pub(crate) fn from_vk(call: &'static str, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost(call.to_string()),
            other => GraphicsError::Api {
                call,
                message: format!("{other:?}"),
            },
        }
    }
}

pub(crate) trait VkResultExt<T> {
    fn api(self, call: &'static str) -> Result<T, GraphicsError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn api(self, call: &'static str) -> Result<T, GraphicsError> {
        self.map_err(|e| GraphicsError::from_vk(call, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_lost_is_distinguishable() {
        let err = GraphicsError::from_vk("vkQueuePresentKHR", vk::Result::ERROR_DEVICE_LOST);
        assert!(err.is_device_lost());

        let err = GraphicsError::from_vk("vkQueuePresentKHR", vk::Result::ERROR_OUT_OF_HOST_MEMORY);
        assert!(!err.is_device_lost());
        assert!(err.to_string().contains("vkQueuePresentKHR"));
    }

    #[test]
    fn shader_diagnostics_are_kept() {
        let err = GraphicsError::ShaderCompile {
            stage: ShaderStage::Vertex,
            diagnostics: "expected `;`".to_string(),
        };
        assert!(err.to_string().contains("expected `;`"));
    }
}
