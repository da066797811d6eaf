//! Layered configuration for the watch service.
//!
//! Sources, lowest to highest precedence:
//! - Default values
//! - `tripwire.toml` in the current directory or the nearest ancestor
//! - Environment variables
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `TRIPWIRE_` and use double
//! underscores to separate nested levels:
//! - `TRIPWIRE_WATCH__INTERVAL_MS=250` sets `watch.interval_ms`
//! - `TRIPWIRE_WATCH__DRAIN_TIMEOUT_MS=2000` sets `watch.drain_timeout_ms`
//! - `TRIPWIRE_LOGGING__DEFAULT=info` sets `logging.default`

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file searched for by [`Settings::load`].
pub const CONFIG_FILE: &str = "tripwire.toml";

/// Prefix for environment variable overrides.
pub const ENV_PREFIX: &str = "TRIPWIRE_";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Watch service settings
    #[serde(default)]
    pub watch: WatchConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// Reconciliation interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// How long to wait for in-flight handler jobs on shutdown.
    /// Unset means do not wait.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drain_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default level for all targets
    #[serde(default = "default_log_level")]
    pub default: String,

    /// Per-target overrides, e.g. `tripwire::watcher = "debug"`
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
}

fn default_version() -> u32 {
    1
}
fn default_interval_ms() -> u64 {
    500
}
fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            drain_timeout_ms: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default: default_log_level(),
            modules: BTreeMap::new(),
        }
    }
}

impl WatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn drain_timeout(&self) -> Option<Duration> {
        self.drain_timeout_ms.map(Duration::from_millis)
    }
}

impl Settings {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, Box<figment::Error>> {
        let config_path = Self::find_config_file().unwrap_or_else(|| PathBuf::from(CONFIG_FILE));
        Self::figment(config_path).extract().map_err(Box::new)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref().to_path_buf())
            .extract()
            .map_err(Box::new)
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nesting levels; single underscores
            // stay inside field names.
            .merge(
                Env::prefixed(ENV_PREFIX)
                    .map(|key| key.as_str().to_lowercase().replace("__", ".").into()),
            )
    }

    /// Search the current directory and its ancestors for `tripwire.toml`.
    fn find_config_file() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .map(|dir| dir.join(CONFIG_FILE))
            .find(|path| path.is_file())
    }

    /// Install the global tracing subscriber from the `[logging]` section.
    ///
    /// Only the first call in a process takes effect.
    pub fn init_logging(&self) {
        crate::logging::init_with_config(&self.logging);
    }

    /// Save current configuration to file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }
}
