// Error taxonomy
//
// Three families: validation errors (bad arguments, caught before any
// native call), native-call failures (a vk::Result plus the operation
// that produced it), and allocation failures (host or device memory).

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Bad arguments, out-of-range offsets/sizes or wrong resource kind.
    /// No native resources are touched before this is reported.
    #[error("{0}")]
    Validation(String),

    /// Zero-size buffers and heaps are rejected up front.
    #[error("zero-size resources are not allowed")]
    ZeroSize,

    /// A raw format code with no entry in the format table.
    #[error("unknown format code {0}")]
    UnknownFormat(u32),

    /// A raw heap code with no matching heap kind.
    #[error("unknown heap kind {0}")]
    UnknownHeap(u32),

    /// Adapter enumeration found no usable physical device.
    #[error("no suitable GPU found")]
    NoSuitableDevice,

    /// The Vulkan loader itself could not be loaded.
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    /// Logical device creation failed. The `Device` stays usable for a
    /// later retry.
    #[error("device creation failed: {context}: {source}")]
    DeviceCreation {
        context: &'static str,
        source: vk::Result,
    },

    /// Any other native call that returned an error status.
    #[error("{context}: {source}")]
    Native {
        context: &'static str,
        source: vk::Result,
    },

    /// Host or device memory allocation failure.
    #[error(transparent)]
    Allocation(#[from] gpu_allocator::AllocationError),
}

impl Error {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Attaches an operation context to a raw `vk::Result`, mirroring the
/// `"<operation>: <native message>"` error surface.
pub(crate) trait VkResultExt<T> {
    fn ctx(self, context: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn ctx(self, context: &'static str) -> Result<T> {
        self.map_err(|source| Error::Native { context, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_errors_carry_context_and_status() {
        let err: Error = Err::<(), _>(vk::Result::ERROR_DEVICE_LOST)
            .ctx("submitting copy")
            .unwrap_err();
        let text = err.to_string();
        assert!(text.starts_with("submitting copy: "));
        // ash renders vk::Result as its long-form description, not the
        // enum variant name.
        assert!(text.contains("device has been lost"));
    }

    #[test]
    fn validation_errors_have_no_native_status() {
        let err = Error::validation("expected a texture resource");
        assert_eq!(err.to_string(), "expected a texture resource");
    }
}
