use anyhow::{Context, Result};

use crate::{FilterTables, config::Config};

/// Write the initial state of the filtering maps.
///
/// Leftovers are cleared first, then exclusions (the daemon itself when
/// `ignore_self`) and targets are installed and the broadcast flag is written,
/// so it's never missing once the daemon runs.
pub fn setup_filter<T: FilterTables + ?Sized>(tables: &mut T, config: &Config) -> Result<()> {
    tables.clear_exclusions().context("clearing exclusions")?;
    tables.clear_targets().context("clearing targets")?;

    if config.ignore_self {
        let pid = std::process::id();
        tables
            .add_exclusion(pid)
            .context("excluding the current process")?;
        log::info!("Skipping self PID: {pid}");
    }
    for pid in &config.exclude_pids {
        tables
            .add_exclusion(*pid)
            .with_context(|| format!("excluding pid {pid}"))?;
    }
    for pid in &config.target_pids {
        tables
            .add_target(*pid)
            .with_context(|| format!("targeting pid {pid}"))?;
    }
    tables
        .set_broadcast(config.broadcast)
        .context("writing the broadcast flag")?;

    log::info!(
        "Initial state: targets {:?}, exclusions {:?}, broadcast {}",
        tables.targets()?,
        tables.exclusions()?,
        if config.broadcast { "enabled" } else { "disabled" }
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use iotap_common::{ControlTables, maps::PRINT_ALL_DISABLED};

    use super::*;
    use crate::MemoryTables;

    #[test]
    fn default_config_excludes_self_only() {
        let mut tables = MemoryTables::default();
        setup_filter(&mut tables, &Config::default()).unwrap();

        assert_eq!(tables.exclusions().unwrap(), vec![std::process::id()]);
        assert!(tables.targets().unwrap().is_empty());
        // written, not just absent
        assert_eq!(tables.broadcast_flag(), Some(PRINT_ALL_DISABLED));
    }

    #[test]
    fn leftovers_are_cleared() {
        let mut tables = MemoryTables::default();
        tables.add_target(1234).unwrap();
        tables.add_exclusion(4321).unwrap();
        tables.set_broadcast(true).unwrap();

        let config = Config {
            ignore_self: false,
            exclude_pids: vec![7],
            target_pids: vec![8, 9],
            broadcast: false,
        };
        setup_filter(&mut tables, &config).unwrap();

        assert_eq!(tables.exclusions().unwrap(), vec![7]);
        assert_eq!(tables.targets().unwrap(), vec![8, 9]);
        assert!(!tables.broadcast().unwrap());
    }

    #[test]
    fn invalid_configured_pid() {
        let mut tables = MemoryTables::default();
        let config = Config {
            target_pids: vec![0],
            ..Default::default()
        };
        let err = setup_filter(&mut tables, &config).unwrap_err();
        assert_eq!(err.to_string(), "targeting pid 0");
    }
}
