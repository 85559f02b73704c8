use std::{
    collections::HashMap,
    fs::File,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use iotap_core::{ConfigError, ModuleConfig};

use crate::log_file::LogFile;

const DEFAULT_CONFIG_FILE: &str = "/var/lib/iotap/iotap.ini";

/// Section with the settings of the daemon itself.
pub const GENERAL_CONFIG: &str = "iotap";

/// Configuration of the daemon and of its components, one [`ModuleConfig`]
/// for each section.
///
/// It is backed by an `INI` file which is parsed on creation.
#[derive(Debug, Clone)]
pub struct IotapConfig {
    config_file: PathBuf,
    configs: HashMap<String, ModuleConfig>,
}

impl IotapConfig {
    /// Construct a new [`IotapConfig`] using the default file, which is
    /// created empty if missing.
    pub fn new() -> Result<Self> {
        let config_file = PathBuf::from(DEFAULT_CONFIG_FILE);
        if !config_file.exists() {
            if let Some(prefix) = config_file.parent() {
                std::fs::create_dir_all(prefix)
                    .with_context(|| format!("Error creating {}", prefix.display()))?;
            }
            File::create(&config_file)
                .with_context(|| format!("Error creating {}", config_file.display()))?;
        }
        Self::from_config_file(config_file)
    }

    /// Construct a new [`IotapConfig`] using a custom file.
    pub fn with_custom_file(config_file: &str) -> Result<Self> {
        let config_file = PathBuf::from(config_file);
        if !config_file.exists() {
            bail!("Configuration file {} not found", config_file.display());
        }
        Self::from_config_file(config_file)
    }

    fn from_config_file(config_file: PathBuf) -> Result<Self> {
        let conf = ini::Ini::load_from_file(&config_file)
            .with_context(|| format!("Error loading configuration from {config_file:?}"))?;

        let mut configs: HashMap<String, ModuleConfig> = HashMap::new();
        for (section, prop) in &conf {
            if let Some(section) = section {
                let mod_config = configs.entry(section.to_string()).or_default();
                for (key, value) in prop.iter() {
                    log::debug!("{}.{}={}", section, key, value);
                    mod_config.insert(key.to_string(), value.to_string());
                }
            }
        }

        Ok(Self {
            config_file,
            configs,
        })
    }

    pub fn config_file(&self) -> &Path {
        &self.config_file
    }

    /// Get the configuration of a section. Missing sections are empty.
    pub fn get_module_config(&self, module: &str) -> ModuleConfig {
        self.configs.get(module).cloned().unwrap_or_default()
    }
}

/// Settings of the `[iotap]` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonConfig {
    pub api_socket_path: Option<String>,
    /// Pages of each per-CPU perf ring. Must be a power of two.
    pub perf_pages: usize,
    /// Records buffered between the perf readers and the consumer.
    pub channel_capacity: usize,
    pub drop_poll_interval: Duration,
    pub log_file: Option<LogFile>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            api_socket_path: None,
            perf_pages: 64,
            channel_capacity: 1024,
            drop_poll_interval: Duration::from_millis(1000),
            log_file: None,
        }
    }
}

impl TryFrom<&ModuleConfig> for DaemonConfig {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        let defaults = DaemonConfig::default();

        let channel_capacity = config.with_default("channel_capacity", defaults.channel_capacity)?;
        if channel_capacity == 0 {
            return Err(invalid("channel_capacity", "0", "must be positive"));
        }
        let drop_poll_interval_ms: u64 = config.with_default(
            "drop_poll_interval_ms",
            defaults.drop_poll_interval.as_millis() as u64,
        )?;
        if drop_poll_interval_ms == 0 {
            return Err(invalid("drop_poll_interval_ms", "0", "must be positive"));
        }

        Ok(DaemonConfig {
            api_socket_path: config.optional("api_socket_path")?,
            // validated by BpfContext, which falls back to the default
            perf_pages: config.with_default("perf_pages", defaults.perf_pages)?,
            channel_capacity,
            drop_poll_interval: Duration::from_millis(drop_poll_interval_ms),
            log_file: LogFile::from_config(config)?,
        })
    }
}

fn invalid(field: &str, value: &str, err: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    }
}
