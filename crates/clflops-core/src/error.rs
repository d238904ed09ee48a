//! Error types for device discovery, program builds and dispatch.

use thiserror::Error;

/// Errors produced by the benchmark core.
///
/// A failed verification is not an error: it is reported as
/// [`StrategyOutcome::InvalidComputation`](crate::dispatch::StrategyOutcome).
#[derive(Debug, Clone, Error)]
pub enum BenchError {
    /// The compute API reported zero platforms, so no device can exist.
    #[error("No platforms found. Verify runtime installation.")]
    NoPlatform,

    /// The requested device index is past the end of the enumeration.
    #[error("No device {index} found.")]
    NoSuchDevice { index: usize, available: usize },

    /// The kernel program failed to compile for one device.
    #[error("Error building program for '{device}'. Verify OpenCL installation.\n{log}")]
    Build { device: String, log: String },

    /// An argument cannot be expressed to the device (size, launch shape).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A compute API call failed after the program was built.
    #[error("{op} failed: {reason}")]
    Runtime { op: &'static str, reason: String },
}

impl BenchError {
    pub(crate) fn runtime(op: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Runtime { op, reason: reason.to_string() }
    }

    /// Whether the error aborts the whole run rather than one device.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoPlatform | Self::NoSuchDevice { .. })
    }
}

/// Result alias for the benchmark core.
pub type Result<T> = std::result::Result<T, BenchError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_platform_message_matches_cli_contract() {
        assert_eq!(
            BenchError::NoPlatform.to_string(),
            "No platforms found. Verify runtime installation."
        );
    }

    #[test]
    fn no_such_device_names_index() {
        let e = BenchError::NoSuchDevice { index: 99, available: 2 };
        assert_eq!(e.to_string(), "No device 99 found.");
        assert!(e.is_fatal());
    }

    #[test]
    fn build_error_carries_log() {
        let e = BenchError::Build {
            device: "gfx1030".into(),
            log: "<source>:3:5: error: use of undeclared identifier 'x'".into(),
        };
        let s = e.to_string();
        assert!(s.contains("gfx1030"));
        assert!(s.contains("undeclared identifier"));
        assert!(!e.is_fatal());
    }

    #[test]
    fn runtime_error_display() {
        let e = BenchError::runtime("enqueue_write_buffer", "CL_OUT_OF_RESOURCES");
        assert_eq!(e.to_string(), "enqueue_write_buffer failed: CL_OUT_OF_RESOURCES");
    }
}
