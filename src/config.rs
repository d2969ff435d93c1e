//! Configuration management for noc-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`NOC_EMU_CHANNEL_POLICY`, `NOC_EMU_MAX_CYCLES`, `NOC_EMU_AXI_PRESET`)
//! 2. Project-local config file (`./noc-emu.toml`)
//! 3. User config file (`~/.config/noc-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # noc-emu.toml
//! channel_policy = "buffered"
//! max_cycles = 5000
//! axi_preset = "lite"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

use crate::axi::{AxiConfig, AxiConfigError};
use crate::sim::{ChannelPolicy, ResetKind};

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

const DEFAULT_MAX_CYCLES: u64 = 1000;
const DEFAULT_ROB_DEPTH: usize = 8;
const DEFAULT_MAX_IN_FLIGHT: usize = 8;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// noc-emu configuration. Unset fields fall back to built-in defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Visibility policy for every channel a scenario allocates.
    pub channel_policy: Option<ChannelPolicy>,

    /// Whether `Simulator::reset` applies now or at the next edge.
    pub reset: Option<ResetKind>,

    /// Cycle budget for a scenario before it is declared hung.
    pub max_cycles: Option<u64>,

    /// Named `AxiConfig` preset used by the AXI scenarios.
    pub axi_preset: Option<String>,

    /// Reorder buffer entries in the manager gate.
    pub rob_depth: Option<usize>,

    /// Outstanding reads the manager gate may issue.
    pub max_in_flight: Option<usize>,
}

impl Config {
    /// Load configuration from all sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    pub fn channel_policy(&self) -> ChannelPolicy {
        self.channel_policy.unwrap_or_default()
    }

    pub fn reset_kind(&self) -> ResetKind {
        self.reset.unwrap_or_default()
    }

    pub fn max_cycles(&self) -> u64 {
        self.max_cycles.unwrap_or(DEFAULT_MAX_CYCLES)
    }

    pub fn axi_preset(&self) -> &str {
        self.axi_preset.as_deref().unwrap_or("standard")
    }

    /// The AXI configuration named by `axi_preset`.
    pub fn axi_config(&self) -> Result<AxiConfig, AxiConfigError> {
        AxiConfig::preset(self.axi_preset())
    }

    pub fn rob_depth(&self) -> usize {
        self.rob_depth.unwrap_or(DEFAULT_ROB_DEPTH)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.unwrap_or(DEFAULT_MAX_IN_FLIGHT)
    }

    /// Load user configuration from ~/.config/noc-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./noc-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("noc-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("noc-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load a config file, reporting I/O and parse failures.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load configuration from a file that may be absent.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match Self::from_path(path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                Some(config)
            }
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.channel_policy.is_some() {
            self.channel_policy = other.channel_policy;
        }
        if other.reset.is_some() {
            self.reset = other.reset;
        }
        if other.max_cycles.is_some() {
            self.max_cycles = other.max_cycles;
        }
        if other.axi_preset.is_some() {
            self.axi_preset = other.axi_preset;
        }
        if other.rob_depth.is_some() {
            self.rob_depth = other.rob_depth;
        }
        if other.max_in_flight.is_some() {
            self.max_in_flight = other.max_in_flight;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup("NOC_EMU_CHANNEL_POLICY") {
            match raw.parse::<ChannelPolicy>() {
                Ok(policy) => {
                    log::info!("Using NOC_EMU_CHANNEL_POLICY from environment: {:?}", policy);
                    self.channel_policy = Some(policy);
                }
                Err(e) => log::warn!("Ignoring NOC_EMU_CHANNEL_POLICY: {}", e),
            }
        }
        if let Some(raw) = lookup("NOC_EMU_MAX_CYCLES") {
            match raw.parse::<u64>() {
                Ok(n) => {
                    log::info!("Using NOC_EMU_MAX_CYCLES from environment: {}", n);
                    self.max_cycles = Some(n);
                }
                Err(e) => log::warn!("Ignoring NOC_EMU_MAX_CYCLES '{}': {}", raw, e),
            }
        }
        if let Some(preset) = lookup("NOC_EMU_AXI_PRESET") {
            log::info!("Using NOC_EMU_AXI_PRESET from environment: {}", preset);
            self.axi_preset = Some(preset);
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("noc-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# noc-emu configuration
# Place this file at ~/.config/noc-emu/config.toml or ./noc-emu.toml

# When a pushed value becomes visible: "combinational" or "buffered"
channel_policy = "combinational"

# Reset style: "async" (immediate) or "sync" (at the next edge)
# reset = "async"

# Cycle budget per scenario
max_cycles = 1000

# AXI preset: standard, no_wresp, no_wstrb, lite, lite_nowstrb
axi_preset = "standard"

# Manager gate sizing
# rob_depth = 8
# max_in_flight = 8
"#
        .to_string()
    }
}
