//! Render core error taxonomy
//!
//! Every error carries a [`ErrorSeverity`] so the host loop can decide between
//! aborting, retrying once, or handing the problem back to the asset loader.

use thiserror::Error;

/// How the host application is expected to react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Stop the render loop
    Fatal,
    /// Rebuild the presentation targets and retry the operation once
    Recoverable,
    /// Reported to the asset loader, which decides whether to skip the asset
    CallerResponsibility,
}

/// Errors produced by the render core and its backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// No adapter exposes a graphics queue that can present to the surface
    #[error("No suitable GPU: no adapter offers a graphics queue with presentation support")]
    NoSuitableDevice,

    /// The device-memory allocator could not be created
    #[error("Allocator initialization failed: {0}")]
    AllocatorInit(String),

    /// The device stopped responding or reported loss
    #[error("Device lost while {context}")]
    DeviceLost {
        /// What the core was doing when the loss was detected
        context: String,
    },

    /// The fixed descriptor pool ran out of sets or descriptors
    #[error("Descriptor pool exhausted (capacity {max_sets} sets)")]
    DescriptorPoolExhausted {
        /// Configured set capacity of the pool
        max_sets: u32,
    },

    /// The swapchain no longer matches the surface
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,

    /// A rebuild-and-retry did not cure a stale swapchain
    #[error("Swapchain still stale after rebuild during {operation}")]
    SwapchainRebuildFailed {
        /// Operation that was retried
        operation: &'static str,
    },

    /// Requested image count does not fit the surface capabilities
    #[error("Swapchain image count {requested} outside supported range [{min}, {max}]")]
    ImageCountOutOfRange {
        /// Requested number of images
        requested: u32,
        /// Surface minimum
        min: u32,
        /// Surface maximum (0 = unbounded)
        max: u32,
    },

    /// The surface offers nothing the swapchain can use
    #[error("Surface unsupported: {0}")]
    SurfaceUnsupported(String),

    /// Uploading host data to the device failed
    #[error("Transfer failed: {0}")]
    TransferFailed(String),

    /// API call failed with a backend result code
    #[error("Graphics API error in {call}: {code}")]
    Api {
        /// Name of the failing call
        call: &'static str,
        /// Backend-specific result description
        code: String,
    },

    /// Handle does not refer to a live resource
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// Raw handle value
        id: u64,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },
}

impl RenderError {
    /// Classify the error for the host loop
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::SwapchainOutOfDate => ErrorSeverity::Recoverable,
            Self::TransferFailed(_) => ErrorSeverity::CallerResponsibility,
            Self::NoSuitableDevice
            | Self::AllocatorInit(_)
            | Self::DeviceLost { .. }
            | Self::DescriptorPoolExhausted { .. }
            | Self::SwapchainRebuildFailed { .. }
            | Self::ImageCountOutOfRange { .. }
            | Self::SurfaceUnsupported(_)
            | Self::Api { .. }
            | Self::ResourceNotFound { .. }
            | Self::InvalidOperation { .. } => ErrorSeverity::Fatal,
        }
    }

    /// Whether the host must stop rendering
    pub fn is_fatal(&self) -> bool {
        self.severity() == ErrorSeverity::Fatal
    }

    /// Shorthand for [`RenderError::InvalidOperation`]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation { reason: reason.into() }
    }

    /// Shorthand for [`RenderError::DeviceLost`]
    pub fn device_lost(context: impl Into<String>) -> Self {
        Self::DeviceLost { context: context.into() }
    }

    /// Re-label a failure inside an upload as a transfer failure
    ///
    /// Device loss keeps its identity so the host still stops the loop.
    pub fn into_transfer(self, stage: &str) -> Self {
        match self {
            Self::DeviceLost { .. } | Self::TransferFailed(_) => self,
            other => Self::TransferFailed(format!("{stage}: {other}")),
        }
    }
}

/// Result type for render core operations
pub type RenderResult<T> = Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_taxonomy() {
        assert_eq!(RenderError::device_lost("waiting").severity(), ErrorSeverity::Fatal);
        assert_eq!(
            RenderError::DescriptorPoolExhausted { max_sets: 4 }.severity(),
            ErrorSeverity::Fatal
        );
        assert_eq!(RenderError::SwapchainOutOfDate.severity(), ErrorSeverity::Recoverable);
        assert_eq!(
            RenderError::TransferFailed("bad pixels".into()).severity(),
            ErrorSeverity::CallerResponsibility
        );
        assert!(RenderError::SwapchainRebuildFailed { operation: "acquire" }.is_fatal());
    }

    #[test]
    fn test_into_transfer_preserves_device_loss() {
        let lost = RenderError::device_lost("upload").into_transfer("copy");
        assert!(matches!(lost, RenderError::DeviceLost { .. }));

        let api = RenderError::Api { call: "create_buffer", code: "OOM".into() }.into_transfer("staging");
        match api {
            RenderError::TransferFailed(message) => assert!(message.starts_with("staging")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
