use std::io;

use thiserror::Error;

/// Error surfaced by the builder, the client and the platforms.
///
/// Messages are part of the contract: callers that only see the rendered
/// status text match on stable substrings such as `invalid number of
/// arguments` or `not compatible with result shape`.
#[derive(Debug, Error)]
pub enum XlaError {
    #[error("invalid number of arguments for computation: expected {expected}, got {actual}")]
    InvalidArgumentCount { expected: usize, actual: usize },
    #[error("invalid argument shape for parameter {index}: expected {expected}, got {actual}")]
    InvalidArgumentShape {
        index: usize,
        expected: String,
        actual: String,
    },
    #[error("result layout {layout} is not compatible with result shape {shape}")]
    IncompatibleResultLayout { layout: String, shape: String },
    #[error("device {ordinal} ({platform}) not supported by the service")]
    DeviceNotSupported { ordinal: usize, platform: String },
    #[error("Invalid device ordinal value ({ordinal}); valid range is [0, {count})")]
    InvalidDeviceOrdinal { ordinal: usize, count: usize },
    #[error("device ordinal mismatch: {0}")]
    DeviceMismatch(String),
    #[error("stream is uninitialized or in an error state")]
    StreamNotReady,
    #[error("stream is for platform {stream}, but service targets {service}")]
    StreamPlatformMismatch { stream: String, service: String },
    #[error("allocator platform {allocator} does not match service platform {service}")]
    AllocatorPlatformMismatch { allocator: String, service: String },
    #[error("invalid layout: {0}")]
    InvalidLayout(String),
    #[error("shape inference failed for {op}: {detail}")]
    ShapeInference { op: &'static str, detail: String },
    #[error("computation build failed: {0}")]
    Build(String),
    #[error("invalid literal: {0}")]
    InvalidLiteral(String),
    #[error("allocation of {size} bytes on device {ordinal} failed: {reason}")]
    Allocation {
        ordinal: usize,
        size: usize,
        reason: String,
    },
    #[error("transfer failed: {0}")]
    Transfer(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("{op} is not implemented: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("platform '{0}' is not registered")]
    PlatformNotFound(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("bincode error: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl XlaError {
    pub fn shape_inference(op: &'static str, detail: impl Into<String>) -> Self {
        XlaError::ShapeInference {
            op,
            detail: detail.into(),
        }
    }

    pub fn build(message: impl Into<String>) -> Self {
        XlaError::Build(message.into())
    }

    pub fn invalid_literal(message: impl Into<String>) -> Self {
        XlaError::InvalidLiteral(message.into())
    }

    pub fn transfer(message: impl Into<String>) -> Self {
        XlaError::Transfer(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        XlaError::Execution(message.into())
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        XlaError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    /// Returns `true` for failures caused by caller-supplied run or build
    /// options rather than by the computation or the device.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            XlaError::InvalidArgumentCount { .. }
                | XlaError::InvalidArgumentShape { .. }
                | XlaError::IncompatibleResultLayout { .. }
                | XlaError::DeviceNotSupported { .. }
                | XlaError::InvalidDeviceOrdinal { .. }
                | XlaError::DeviceMismatch(_)
                | XlaError::StreamNotReady
                | XlaError::StreamPlatformMismatch { .. }
                | XlaError::AllocatorPlatformMismatch { .. }
                | XlaError::InvalidLayout(_)
        )
    }
}

/// Convenience alias for results returned throughout the crate.
pub type XlaResult<T> = Result<T, XlaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_carry_documented_substrings() {
        let err = XlaError::InvalidArgumentCount {
            expected: 2,
            actual: 1,
        };
        assert!(err.to_string().contains("invalid number of arguments"));

        let err = XlaError::DeviceNotSupported {
            ordinal: 3,
            platform: "host".into(),
        };
        assert_eq!(err.to_string(), "device 3 (host) not supported by the service");

        let err = XlaError::StreamPlatformMismatch {
            stream: "interpreter".into(),
            service: "host".into(),
        };
        assert_eq!(
            err.to_string(),
            "stream is for platform interpreter, but service targets host"
        );
        assert!(err.is_precondition());
        assert!(!XlaError::execution("boom").is_precondition());
    }
}
