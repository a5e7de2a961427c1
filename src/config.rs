// Tracer configuration
//
// Loaded from TOML (all keys optional) and then overridden by KERNTRACE_*
// environment variables, so a traced application can be reconfigured without
// rebuilding its launcher.

use crate::clock::ClockDomain;
use crate::error::{Result, TracerError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Enables verbose operation names (`true`/`false`/`1`/`0`)
pub const ENV_VERBOSE: &str = "KERNTRACE_VERBOSE";
/// Enables interval recording (`true`/`false`/`1`/`0`)
pub const ENV_INTERVALS: &str = "KERNTRACE_INTERVALS";
/// Clock domain of recorded intervals (`host`/`device`)
pub const ENV_INTERVAL_DOMAIN: &str = "KERNTRACE_INTERVAL_DOMAIN";

/// Configuration of a kernel collector and its metrics aggregator
///
/// # Example
/// ```
/// use kerntrace::config::TracerConfig;
///
/// let config = TracerConfig::from_toml_str("verbose = true").unwrap();
/// assert!(config.verbose);
/// assert!(config.kernel_intervals);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Suffix kernel names with SIMD width and launch dimensions, transfer
    /// names with their byte count
    pub verbose: bool,

    /// Record a `KernelInterval` per completed call
    pub kernel_intervals: bool,

    /// Clock domain of recorded intervals
    ///
    /// Default: host
    pub interval_domain: ClockDomain,

    /// Report column holding the report begin time
    pub time_column: String,

    /// Report column holding elapsed GPU core clocks
    pub clocks_column: String,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            kernel_intervals: true,
            interval_domain: ClockDomain::Host,
            time_column: "QueryBeginTime".to_string(),
            clocks_column: "GpuCoreClocks".to_string(),
        }
    }
}

impl TracerConfig {
    /// Default configuration with verbose naming
    pub fn verbose() -> Self {
        Self {
            verbose: true,
            ..Default::default()
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Default configuration with environment overrides applied
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Override fields from `KERNTRACE_*` environment variables
    ///
    /// Looks for:
    /// - KERNTRACE_VERBOSE
    /// - KERNTRACE_INTERVALS
    /// - KERNTRACE_INTERVAL_DOMAIN
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(value) = std::env::var(ENV_VERBOSE) {
            self.verbose = parse_flag(ENV_VERBOSE, &value)?;
        }

        if let Ok(value) = std::env::var(ENV_INTERVALS) {
            self.kernel_intervals = parse_flag(ENV_INTERVALS, &value)?;
        }

        if let Ok(value) = std::env::var(ENV_INTERVAL_DOMAIN) {
            self.interval_domain = value
                .parse()
                .map_err(|e| TracerError::Config(format!("{}: {}", ENV_INTERVAL_DOMAIN, e)))?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.time_column.is_empty() {
            return Err(TracerError::Config("time_column must not be empty".into()));
        }
        if self.clocks_column.is_empty() {
            return Err(TracerError::Config(
                "clocks_column must not be empty".into(),
            ));
        }
        if self.time_column == self.clocks_column {
            return Err(TracerError::Config(format!(
                "time_column and clocks_column both name {}",
                self.time_column
            )));
        }
        Ok(())
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(TracerError::Config(format!(
            "{}: expected a boolean, got {:?}",
            name, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    fn clear_env() {
        std::env::remove_var(ENV_VERBOSE);
        std::env::remove_var(ENV_INTERVALS);
        std::env::remove_var(ENV_INTERVAL_DOMAIN);
    }

    #[test]
    fn test_default_config() {
        let config = TracerConfig::default();
        assert!(!config.verbose);
        assert!(config.kernel_intervals);
        assert_eq!(config.interval_domain, ClockDomain::Host);
        assert_eq!(config.time_column, "QueryBeginTime");
        assert_eq!(config.clocks_column, "GpuCoreClocks");
    }

    #[test]
    fn test_verbose_preset() {
        assert!(TracerConfig::verbose().verbose);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = TracerConfig::from_toml_str(
            r#"
            interval_domain = "device"
            kernel_intervals = false
            "#,
        )
        .unwrap();
        assert_eq!(config.interval_domain, ClockDomain::Device);
        assert!(!config.kernel_intervals);
        assert_eq!(config.clocks_column, "GpuCoreClocks");
    }

    #[test]
    fn test_from_toml_rejects_unknown_domain() {
        let result = TracerConfig::from_toml_str(r#"interval_domain = "gpu""#);
        assert!(matches!(result, Err(TracerError::ConfigParse(_))));
    }

    #[test]
    fn test_validate_rejects_same_columns() {
        let result = TracerConfig::from_toml_str(
            r#"
            time_column = "X"
            clocks_column = "X"
            "#,
        );
        assert!(matches!(result, Err(TracerError::Config(_))));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "verbose = true").unwrap();
        writeln!(file, "clocks_column = \"Clocks\"").unwrap();

        let config = TracerConfig::from_file(file.path()).unwrap();
        assert!(config.verbose);
        assert_eq!(config.clocks_column, "Clocks");
    }

    #[test]
    fn test_from_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = TracerConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(TracerError::Io(_))));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var(ENV_VERBOSE, "1");
        std::env::set_var(ENV_INTERVALS, "false");
        std::env::set_var(ENV_INTERVAL_DOMAIN, "Device");

        let config = TracerConfig::from_env().unwrap();
        clear_env();

        assert!(config.verbose);
        assert!(!config.kernel_intervals);
        assert_eq!(config.interval_domain, ClockDomain::Device);
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_flag() {
        clear_env();
        std::env::set_var(ENV_VERBOSE, "maybe");
        let result = TracerConfig::from_env();
        clear_env();
        assert!(matches!(result, Err(TracerError::Config(_))));
    }

    #[test]
    #[serial]
    fn test_env_absent_keeps_file_values() {
        clear_env();
        let mut config = TracerConfig::verbose();
        config.apply_env_overrides().unwrap();
        assert!(config.verbose);
    }
}
