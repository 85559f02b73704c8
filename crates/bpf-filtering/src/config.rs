use iotap_core::{ConfigError, ModuleConfig};

/// Section of the configuration file read by the filter.
pub const FILTERING_CONFIG: &str = "filtering";

/// Initial content of the filtering maps.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Exclude the daemon itself, which otherwise would be reported for
    /// every read of the perf buffers.
    pub ignore_self: bool,
    pub exclude_pids: Vec<u32>,
    pub target_pids: Vec<u32>,
    pub broadcast: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ignore_self: true,
            exclude_pids: Vec::new(),
            target_pids: Vec::new(),
            broadcast: false,
        }
    }
}

/// Extract Config from configuration file
impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        Ok(Config {
            ignore_self: config.with_default("ignore_self", true)?,
            exclude_pids: config.get_list("exclude_pids")?,
            target_pids: config.get_list("target_pids")?,
            broadcast: config.with_default("broadcast", false)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_section() {
        let config = Config::try_from(&ModuleConfig::default()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn full_section() {
        let section: ModuleConfig = [
            ("ignore_self", "false"),
            ("exclude_pids", "1,2"),
            ("target_pids", "300"),
            ("broadcast", "true"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            Config::try_from(&section).unwrap(),
            Config {
                ignore_self: false,
                exclude_pids: vec![1, 2],
                target_pids: vec![300],
                broadcast: true,
            }
        );
    }

    #[test]
    fn invalid_pid_list() {
        let section: ModuleConfig = [("target_pids", "12,abc")].into_iter().collect();
        assert!(matches!(
            Config::try_from(&section),
            Err(ConfigError::InvalidValue { field, .. }) if field == "target_pids"
        ));
    }
}
