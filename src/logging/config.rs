//! Logging configuration
//!
//! Per-component log levels and output destinations for the diagnostic
//! `tracing` output. The user-facing run log is configured separately.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

const VALID_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global log level (trace, debug, info, warn, error)
    pub global_level: String,

    /// Enable console output on stderr
    pub console_output: bool,

    /// Directory for the JSON diagnostic file (None = no file logging)
    pub log_directory: Option<PathBuf>,

    /// Include file location in logs
    pub include_file_location: bool,

    /// Level for feature detection, matching and estimation
    pub algorithm_level: String,

    /// Level for the threshold search and compositing
    pub pipeline_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            global_level: "warn".to_string(),
            console_output: true,
            log_directory: None,
            include_file_location: false,
            algorithm_level: "warn".to_string(),
            pipeline_level: "warn".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Level chosen from the number of `-v` flags on the command line.
    pub fn from_verbosity(verbose: u8) -> Self {
        let level = match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        Self {
            global_level: level.to_string(),
            algorithm_level: level.to_string(),
            pipeline_level: level.to_string(),
            include_file_location: verbose >= 3,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, level) in [
            ("global_level", &self.global_level),
            ("algorithm_level", &self.algorithm_level),
            ("pipeline_level", &self.pipeline_level),
        ] {
            if !VALID_LEVELS.contains(&level.as_str()) {
                return Err(format!(
                    "Invalid {}: {}. Must be one of: {:?}",
                    name, level, VALID_LEVELS
                ));
            }
        }

        if let Some(ref log_dir) = self.log_directory {
            if let Some(parent) = log_dir.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    return Err(format!("Log directory parent does not exist: {:?}", parent));
                }
            }
        }

        Ok(())
    }

    /// `EnvFilter` directives: global level for the crate and binary, with
    /// per-module overrides.
    pub fn filter_directives(&self) -> String {
        let krate = env!("CARGO_PKG_NAME").replace('-', "_");
        format!(
            "{krate}={global},align={global},{krate}::algorithms={algo},{krate}::utils={algo},{krate}::pipeline={pipe}",
            krate = krate,
            global = self.global_level,
            algo = self.algorithm_level,
            pipe = self.pipeline_level,
        )
    }
}
