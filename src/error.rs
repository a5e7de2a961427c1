//! Error types for tracer setup and driver calls
//!
//! Only recoverable failures live here. Steady-state contract violations
//! (missing command list, non-monotonic clocks, unexpected event status) are
//! panics, because continuing past them would corrupt timing data.

use thiserror::Error;

/// A driver entrypoint returned a non-success status
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("{call} failed with status {code:#x}")]
pub struct DriverError {
    /// Name of the failing driver call
    pub call: &'static str,
    /// Raw driver status code
    pub code: i32,
}

impl DriverError {
    pub fn new(call: &'static str, code: i32) -> Self {
        Self { call, code }
    }
}

/// Errors that can occur while setting up a collector or aggregator
#[derive(Error, Debug)]
pub enum TracerError {
    #[error("Driver API version {major}.{minor} does not support the tracing layer")]
    UnsupportedApiVersion { major: u32, minor: u32 },

    #[error("Unable to create driver tracer: {0}")]
    TracerCreate(DriverError),

    #[error("Unable to toggle driver tracer: {0}")]
    TracerToggle(DriverError),

    #[error("Unable to create profiling event: {0}")]
    EventCreate(DriverError),

    #[error("Metric {metric} not found for sub-device {sub_device_id}")]
    MissingMetric { sub_device_id: u32, metric: String },

    #[error("Invalid report layout for sub-device {sub_device_id}: {reason}")]
    InvalidReportLayout { sub_device_id: u32, reason: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for tracer setup operations
pub type Result<T> = std::result::Result<T, TracerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_display() {
        let err = DriverError::new("zeEventPoolCreate", 0x7800_0001);
        assert_eq!(
            err.to_string(),
            "zeEventPoolCreate failed with status 0x78000001"
        );
    }

    #[test]
    fn test_tracer_error_wraps_driver_error() {
        let err = TracerError::TracerCreate(DriverError::new("zelTracerCreate", 1));
        assert!(err.to_string().contains("Unable to create driver tracer"));
        assert!(err.to_string().contains("zelTracerCreate"));
    }

    #[test]
    fn test_missing_metric_message() {
        let err = TracerError::MissingMetric {
            sub_device_id: 1,
            metric: "GpuCoreClocks".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Metric GpuCoreClocks not found for sub-device 1"
        );
    }
}
