use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex, MutexGuard},
};

use bpf_common::{
    Program, ProgramError,
    aya::maps::{HashMap, MapData, MapError},
};
use iotap_common::{
    ControlTables,
    maps::{PRINT_ALL, PRINT_ALL_DISABLED, PRINT_ALL_ENABLED, PRINT_ALL_KEY, SKIP_PIDS, TARGET_PIDS},
};
use iotap_core::ProbeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("invalid pid {0}")]
    InvalidPid(u32),
    #[error("error updating {table}")]
    Map {
        table: &'static str,
        #[source]
        source: MapError,
    },
}

impl From<FilterError> for ProbeError {
    fn from(err: FilterError) -> Self {
        match err {
            FilterError::InvalidPid(pid) => ProbeError::InvalidPid(pid),
            FilterError::Map { table, source } => ProbeError::Table {
                table: table.to_string(),
                reason: source.to_string(),
            },
        }
    }
}

/// Write access to the filtering maps.
///
/// Pid 0 is never a valid entry. Removing a pid which isn't there is not an error.
pub trait FilterTables: Send + 'static {
    fn add_target(&mut self, pid: u32) -> Result<(), FilterError>;
    fn remove_target(&mut self, pid: u32) -> Result<(), FilterError>;
    fn clear_targets(&mut self) -> Result<(), FilterError>;
    /// Sorted content of the allow set.
    fn targets(&self) -> Result<Vec<u32>, FilterError>;

    fn add_exclusion(&mut self, pid: u32) -> Result<(), FilterError>;
    fn remove_exclusion(&mut self, pid: u32) -> Result<(), FilterError>;
    fn clear_exclusions(&mut self) -> Result<(), FilterError>;
    /// Sorted content of the exclusion set.
    fn exclusions(&self) -> Result<Vec<u32>, FilterError>;

    fn set_broadcast(&mut self, enabled: bool) -> Result<(), FilterError>;
    /// A missing flag reads as `false`.
    fn broadcast(&self) -> Result<bool, FilterError>;
}

fn check_pid(pid: u32) -> Result<u32, FilterError> {
    if pid == 0 {
        Err(FilterError::InvalidPid(pid))
    } else {
        Ok(pid)
    }
}

/// The maps of a loaded probe.
pub struct BpfTables {
    skip: PidSet,
    targets: PidSet,
    print_all: HashMap<MapData, u32, u32>,
}

impl BpfTables {
    /// Take ownership of the filtering maps of `program`.
    pub fn load(program: &mut Program) -> Result<Self, ProgramError> {
        let mut load = |name: &'static str| -> Result<HashMap<MapData, u32, u32>, ProgramError> {
            Ok(HashMap::try_from(program.take_map(name)?)?)
        };
        Ok(Self {
            skip: PidSet {
                name: SKIP_PIDS,
                map: load(SKIP_PIDS)?,
            },
            targets: PidSet {
                name: TARGET_PIDS,
                map: load(TARGET_PIDS)?,
            },
            print_all: load(PRINT_ALL)?,
        })
    }
}

/// Key operations of a BPF hash map of pids.
trait PidMap {
    fn insert(&mut self, pid: u32) -> Result<(), MapError>;
    /// Fails with [`MapError::KeyNotFound`] when `pid` isn't there.
    fn remove(&mut self, pid: u32) -> Result<(), MapError>;
    fn contains(&self, pid: u32) -> Result<bool, MapError>;
    fn keys(&self) -> Result<Vec<u32>, MapError>;
}

impl PidMap for HashMap<MapData, u32, u32> {
    fn insert(&mut self, pid: u32) -> Result<(), MapError> {
        HashMap::insert(self, pid, pid, 0)
    }

    fn remove(&mut self, pid: u32) -> Result<(), MapError> {
        HashMap::remove(self, &pid)
    }

    fn contains(&self, pid: u32) -> Result<bool, MapError> {
        match self.get(&pid, 0) {
            Ok(_) => Ok(true),
            Err(MapError::KeyNotFound) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn keys(&self) -> Result<Vec<u32>, MapError> {
        HashMap::keys(self).collect()
    }
}

/// A BPF hash map used as a set of pids.
struct PidSet<M = HashMap<MapData, u32, u32>> {
    name: &'static str,
    map: M,
}

impl<M: PidMap> PidSet<M> {
    fn insert(&mut self, pid: u32) -> Result<(), FilterError> {
        let pid = check_pid(pid)?;
        self.map.insert(pid).map_err(map_err(self.name))
    }

    fn remove(&mut self, pid: u32) -> Result<(), FilterError> {
        let pid = check_pid(pid)?;
        self.delete(pid)
    }

    /// Delete a key, whatever its value. Keys written by other tools may be
    /// pids we'd refuse to insert.
    fn delete(&mut self, pid: u32) -> Result<(), FilterError> {
        // deleting a missing key fails with ENOENT
        if !self.map.contains(pid).map_err(map_err(self.name))? {
            return Ok(());
        }
        self.map.remove(pid).map_err(map_err(self.name))
    }

    fn pids(&self) -> Result<Vec<u32>, FilterError> {
        let mut pids = self.map.keys().map_err(map_err(self.name))?;
        pids.sort_unstable();
        Ok(pids)
    }

    fn clear(&mut self) -> Result<(), FilterError> {
        for pid in self.pids()? {
            self.delete(pid)?;
        }
        Ok(())
    }
}

fn map_err(table: &'static str) -> impl Fn(MapError) -> FilterError {
    move |source| FilterError::Map { table, source }
}

impl FilterTables for BpfTables {
    fn add_target(&mut self, pid: u32) -> Result<(), FilterError> {
        self.targets.insert(pid)
    }

    fn remove_target(&mut self, pid: u32) -> Result<(), FilterError> {
        self.targets.remove(pid)
    }

    fn clear_targets(&mut self) -> Result<(), FilterError> {
        self.targets.clear()
    }

    fn targets(&self) -> Result<Vec<u32>, FilterError> {
        self.targets.pids()
    }

    fn add_exclusion(&mut self, pid: u32) -> Result<(), FilterError> {
        self.skip.insert(pid)
    }

    fn remove_exclusion(&mut self, pid: u32) -> Result<(), FilterError> {
        self.skip.remove(pid)
    }

    fn clear_exclusions(&mut self) -> Result<(), FilterError> {
        self.skip.clear()
    }

    fn exclusions(&self) -> Result<Vec<u32>, FilterError> {
        self.skip.pids()
    }

    fn set_broadcast(&mut self, enabled: bool) -> Result<(), FilterError> {
        let value = if enabled {
            PRINT_ALL_ENABLED
        } else {
            PRINT_ALL_DISABLED
        };
        self.print_all
            .insert(PRINT_ALL_KEY, value, 0)
            .map_err(map_err(PRINT_ALL))
    }

    fn broadcast(&self) -> Result<bool, FilterError> {
        match self.print_all.get(&PRINT_ALL_KEY, 0) {
            Ok(value) => Ok(value == PRINT_ALL_ENABLED),
            Err(MapError::KeyNotFound) => Ok(false),
            Err(source) => Err(map_err(PRINT_ALL)(source)),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    skip: BTreeSet<u32>,
    targets: BTreeSet<u32>,
    print_all: Option<u32>,
}

/// In-memory tables, for running the control plane without a kernel.
///
/// Clones share the same state: one clone can be handed to the controller
/// while another one evaluates [`iotap_common::decide`].
#[derive(Debug, Clone, Default)]
pub struct MemoryTables {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTables {
    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FilterTables for MemoryTables {
    fn add_target(&mut self, pid: u32) -> Result<(), FilterError> {
        self.state().targets.insert(check_pid(pid)?);
        Ok(())
    }

    fn remove_target(&mut self, pid: u32) -> Result<(), FilterError> {
        self.state().targets.remove(&check_pid(pid)?);
        Ok(())
    }

    fn clear_targets(&mut self) -> Result<(), FilterError> {
        self.state().targets.clear();
        Ok(())
    }

    fn targets(&self) -> Result<Vec<u32>, FilterError> {
        Ok(self.state().targets.iter().copied().collect())
    }

    fn add_exclusion(&mut self, pid: u32) -> Result<(), FilterError> {
        self.state().skip.insert(check_pid(pid)?);
        Ok(())
    }

    fn remove_exclusion(&mut self, pid: u32) -> Result<(), FilterError> {
        self.state().skip.remove(&check_pid(pid)?);
        Ok(())
    }

    fn clear_exclusions(&mut self) -> Result<(), FilterError> {
        self.state().skip.clear();
        Ok(())
    }

    fn exclusions(&self) -> Result<Vec<u32>, FilterError> {
        Ok(self.state().skip.iter().copied().collect())
    }

    fn set_broadcast(&mut self, enabled: bool) -> Result<(), FilterError> {
        self.state().print_all = Some(if enabled {
            PRINT_ALL_ENABLED
        } else {
            PRINT_ALL_DISABLED
        });
        Ok(())
    }

    fn broadcast(&self) -> Result<bool, FilterError> {
        Ok(self.state().print_all == Some(PRINT_ALL_ENABLED))
    }
}

impl ControlTables for MemoryTables {
    fn excluded(&self, pid: u32) -> bool {
        self.state().skip.contains(&pid)
    }

    fn broadcast_flag(&self) -> Option<u32> {
        self.state().print_all
    }

    fn targeted(&self, pid: u32) -> bool {
        self.state().targets.contains(&pid)
    }
}

#[cfg(test)]
mod tests {
    use bpf_common::aya::sys::SyscallError;
    use iotap_common::{Decision, decide};

    use super::*;

    #[test]
    fn fresh_tables() {
        let tables = MemoryTables::default();
        assert_eq!(tables.targets().unwrap(), Vec::<u32>::new());
        assert_eq!(tables.exclusions().unwrap(), Vec::<u32>::new());
        assert!(!tables.broadcast().unwrap());
        assert_eq!(tables.broadcast_flag(), None);
    }

    #[test]
    fn targets_are_sorted_and_unique() {
        let mut tables = MemoryTables::default();
        for pid in [30, 10, 20, 10] {
            tables.add_target(pid).unwrap();
        }
        assert_eq!(tables.targets().unwrap(), vec![10, 20, 30]);
        tables.remove_target(20).unwrap();
        tables.remove_target(999).unwrap();
        assert_eq!(tables.targets().unwrap(), vec![10, 30]);
        tables.clear_targets().unwrap();
        assert!(tables.targets().unwrap().is_empty());
    }

    #[test]
    fn pid_zero_is_rejected() {
        let mut tables = MemoryTables::default();
        assert!(matches!(tables.add_target(0), Err(FilterError::InvalidPid(0))));
        assert!(matches!(tables.add_exclusion(0), Err(FilterError::InvalidPid(0))));
        assert!(matches!(tables.remove_exclusion(0), Err(FilterError::InvalidPid(0))));
        assert!(tables.targets().unwrap().is_empty());
    }

    #[test]
    fn broadcast_flag_values() {
        let mut tables = MemoryTables::default();
        tables.set_broadcast(true).unwrap();
        assert_eq!(tables.broadcast_flag(), Some(PRINT_ALL_ENABLED));
        assert!(tables.broadcast().unwrap());
        tables.set_broadcast(false).unwrap();
        assert_eq!(tables.broadcast_flag(), Some(PRINT_ALL_DISABLED));
        assert!(!tables.broadcast().unwrap());
    }

    #[test]
    fn clones_share_state_with_the_pipeline() {
        let mut control = MemoryTables::default();
        let pipeline = control.clone();

        control.set_broadcast(true).unwrap();
        control.add_exclusion(100).unwrap();
        assert_eq!(decide(&pipeline, 100), Decision::Suppress);
        assert_eq!(decide(&pipeline, 200), Decision::Emit);

        control.remove_exclusion(100).unwrap();
        assert_eq!(decide(&pipeline, 100), Decision::Emit);
    }

    /// Behaves like a BPF hash map of at most `capacity` keys.
    struct BoundedMap {
        keys: BTreeSet<u32>,
        capacity: usize,
    }

    impl BoundedMap {
        fn new(capacity: usize) -> PidSet<Self> {
            PidSet {
                name: TARGET_PIDS,
                map: BoundedMap {
                    keys: BTreeSet::new(),
                    capacity,
                },
            }
        }
    }

    impl PidMap for BoundedMap {
        fn insert(&mut self, pid: u32) -> Result<(), MapError> {
            if self.keys.len() >= self.capacity && !self.keys.contains(&pid) {
                return Err(MapError::SyscallError(SyscallError {
                    call: "bpf_map_update_elem",
                    io_error: std::io::Error::other("no space left in map"),
                }));
            }
            self.keys.insert(pid);
            Ok(())
        }

        fn remove(&mut self, pid: u32) -> Result<(), MapError> {
            if self.keys.remove(&pid) {
                Ok(())
            } else {
                Err(MapError::KeyNotFound)
            }
        }

        fn contains(&self, pid: u32) -> Result<bool, MapError> {
            Ok(self.keys.contains(&pid))
        }

        fn keys(&self) -> Result<Vec<u32>, MapError> {
            Ok(self.keys.iter().copied().collect())
        }
    }

    #[test]
    fn pid_set_remove_missing_is_ok() {
        let mut set = BoundedMap::new(4);
        set.insert(7).unwrap();
        set.remove(8).unwrap();
        set.remove(7).unwrap();
        set.remove(7).unwrap();
        assert!(set.pids().unwrap().is_empty());
    }

    #[test]
    fn pid_set_clear_drops_foreign_keys() {
        let mut set = BoundedMap::new(4);
        set.insert(5).unwrap();
        // written by some other tool, we'd never insert it
        set.map.keys.insert(0);
        assert!(matches!(set.remove(0), Err(FilterError::InvalidPid(0))));

        set.clear().unwrap();
        assert!(set.pids().unwrap().is_empty());
    }

    #[test]
    fn pid_set_full() {
        let mut set = BoundedMap::new(1);
        set.insert(1).unwrap();
        set.insert(1).unwrap();
        assert!(matches!(
            set.insert(2),
            Err(FilterError::Map { table: TARGET_PIDS, .. })
        ));
        assert_eq!(set.pids().unwrap(), vec![1]);
    }

    #[test]
    fn map_errors_become_probe_errors() {
        let err = ProbeError::from(FilterError::Map {
            table: TARGET_PIDS,
            source: MapError::KeyNotFound,
        });
        assert!(matches!(err, ProbeError::Table { ref table, .. } if table == TARGET_PIDS));
        assert_eq!(
            ProbeError::from(FilterError::InvalidPid(0)),
            ProbeError::InvalidPid(0)
        );
    }
}
