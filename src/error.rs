// Engine error taxonomy
//
// Setup failures carry the failing driver call and its result code.
// Transient presentation conditions are not errors: they are reported
// through `FrameOutcome` and logged by the scheduler.

use ash::{prelude::VkResult, vk};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// A driver call failed during setup or rebuild
    #[error("{op} failed with {code:?}")]
    Vulkan { op: &'static str, code: vk::Result },

    /// No enumerated device satisfies the requirements
    #[error("no suitable device: {0}")]
    NoSuitableDevice(String),

    #[error("failed to read shader {}: {source}", .path.display())]
    ShaderRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to load Vulkan library: {0}")]
    Loader(#[from] ash::LoadingError),
}

impl EngineError {
    /// Driver result code, if the failure came from a driver call
    pub fn code(&self) -> Option<vk::Result> {
        match self {
            EngineError::Vulkan { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Tag a raw `VkResult` with the name of the call that produced it
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> EngineResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn op(self, op: &'static str) -> EngineResult<T> {
        self.map_err(|code| EngineError::Vulkan { op, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_error_names_operation_and_code() {
        let result: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = result.op("vkCreateImage").unwrap_err();

        assert_eq!(err.code(), Some(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY));
        let message = err.to_string();
        assert!(message.contains("vkCreateImage"));
        assert!(message.contains("ERROR_OUT_OF_DEVICE_MEMORY"));
    }

    #[test]
    fn no_suitable_device_has_no_driver_code() {
        let err = EngineError::NoSuitableDevice("no discrete GPU".into());
        assert_eq!(err.code(), None);
        assert!(err.to_string().starts_with("no suitable device"));
    }
}
