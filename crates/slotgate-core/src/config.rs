//! Configuration management for slotgate
//!
//! Handles loading of page configuration files (`slotgate.toml`). One
//! [`Config`] value is built per page and handed to each component
//! constructor; nothing here is global.
//!
//! ```toml
//! [log]
//! level = "debug"
//!
//! [breakpoints]
//! tiers = [{ name = "s", min_width = 0 }, { name = "l", min_width = 1024 }]
//!
//! [throttle]
//! affiliate_referrers = ["partner.example"]
//!
//! [[slots]]
//! id = "top.billboard"
//! kind = "standard"
//! priority = "high"
//! responsive = true
//! size_mapping = { s = [[0, 0]], l = [[970, 250]] }
//! ```

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::breakpoint::BreakpointConfig;
use crate::error::ConfigError;
use crate::gate::GateConfig;
use crate::logging::LogConfig;
use crate::scheduler::SchedulerConfig;
use crate::slot::SlotConfig;
use crate::throttle::ThrottleConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings
    pub log: LogConfig,

    /// Viewport tiers
    pub breakpoints: BreakpointConfig,

    /// Frequency-cap policy
    pub throttle: ThrottleConfig,

    /// Admission gate settings
    pub gate: GateConfig,

    /// Initial-pass ordering
    pub scheduler: SchedulerConfig,

    /// Slot declarations, in page order
    pub slots: Vec<SlotConfig>,
}

impl Config {
    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseFailed(e.to_string()))
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.display().to_string(), e.to_string()))?;
        Self::from_toml_str(&content)
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON lines
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}
