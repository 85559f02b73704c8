//! Actor owning the filtering maps after startup.
//!
//! Control requests can come concurrently from any number of API clients:
//! the actor applies them one at a time, so the multi-step ones (add targets
//! then switch broadcast off) are never interleaved.
use std::sync::Arc;

use iotap_core::{EventCounters, ProbeCommand, ProbeError, ProbeHandle, ProbeStatus};
use tokio::sync::mpsc;

use crate::{FilterError, FilterTables};

/// Start the controller actor. It stops when every [`ProbeHandle`] is dropped.
pub fn start_controller<T: FilterTables>(tables: T, counters: Arc<EventCounters>) -> ProbeHandle {
    let (tx_cmd, rx_cmd) = mpsc::channel(8);
    let controller = ProbeController {
        tables,
        counters,
        rx_cmd,
    };
    tokio::spawn(run_controller_actor(controller));
    ProbeHandle::new(tx_cmd)
}

struct ProbeController<T> {
    tables: T,
    counters: Arc<EventCounters>,
    rx_cmd: mpsc::Receiver<ProbeCommand>,
}

impl<T: FilterTables> ProbeController<T> {
    /// Handle commands coming from [`ProbeHandle`].
    fn handle_cmd(&mut self, cmd: ProbeCommand) {
        match cmd {
            ProbeCommand::Status { tx_reply } => {
                let _ = tx_reply.send(self.status());
            }
            ProbeCommand::Targets { tx_reply } => {
                let _ = tx_reply.send(self.tables.targets().map_err(ProbeError::from));
            }
            ProbeCommand::AddTargets { pids, tx_reply } => {
                let _ = tx_reply.send(self.add_targets(&pids));
            }
            ProbeCommand::RemoveTarget { pid, tx_reply } => {
                let result = self.tables.remove_target(pid).map_err(ProbeError::from);
                if result.is_ok() {
                    log::info!("Removed target PID {pid}");
                }
                let _ = tx_reply.send(result);
            }
            ProbeCommand::ClearTargets { tx_reply } => {
                let _ = tx_reply.send(self.clear_targets());
            }
            ProbeCommand::Broadcast { tx_reply } => {
                let _ = tx_reply.send(self.tables.broadcast().map_err(ProbeError::from));
            }
            ProbeCommand::SetBroadcast { enabled, tx_reply } => {
                let result = self.tables.set_broadcast(enabled).map_err(ProbeError::from);
                if result.is_ok() {
                    log::info!(
                        "Broadcast {}",
                        if enabled { "enabled" } else { "disabled" }
                    );
                }
                let _ = tx_reply.send(result);
            }
            ProbeCommand::Exclusions { tx_reply } => {
                let _ = tx_reply.send(self.tables.exclusions().map_err(ProbeError::from));
            }
            ProbeCommand::AddExclusions { pids, tx_reply } => {
                let _ = tx_reply.send(self.add_exclusions(&pids));
            }
            ProbeCommand::RemoveExclusion { pid, tx_reply } => {
                let _ = tx_reply.send(
                    self.tables
                        .remove_exclusion(pid)
                        .map_err(ProbeError::from),
                );
            }
        }
    }

    fn status(&self) -> Result<ProbeStatus, ProbeError> {
        let (received, lost, kernel_dropped) = self.counters.snapshot();
        Ok(ProbeStatus {
            broadcast: self.tables.broadcast()?,
            targets: self.tables.targets()?,
            exclusions: self.tables.exclusions()?,
            received,
            lost,
            kernel_dropped,
        })
    }

    /// Adding targets means the user wants to watch them only: broadcast is
    /// switched off, even when the batch fails halfway (full map) and only
    /// part of it was installed.
    fn add_targets(&mut self, pids: &[u32]) -> Result<(), ProbeError> {
        reject_zero(pids)?;
        let added = pids.iter().try_for_each(|pid| {
            self.tables.add_target(*pid)?;
            log::info!("Added target PID {pid}");
            Ok::<_, FilterError>(())
        });
        let broadcast_off = self.tables.set_broadcast(false);
        added?;
        broadcast_off?;
        Ok(())
    }

    fn clear_targets(&mut self) -> Result<(), ProbeError> {
        self.tables.clear_targets()?;
        self.tables.set_broadcast(false)?;
        log::info!("Cleared all target PIDs");
        Ok(())
    }

    fn add_exclusions(&mut self, pids: &[u32]) -> Result<(), ProbeError> {
        reject_zero(pids)?;
        for pid in pids {
            self.tables.add_exclusion(*pid)?;
            log::info!("Excluded PID {pid}");
        }
        Ok(())
    }
}

/// Validate a batch before touching any map.
fn reject_zero(pids: &[u32]) -> Result<(), ProbeError> {
    match pids.iter().find(|pid| **pid == 0) {
        Some(pid) => Err(ProbeError::InvalidPid(*pid)),
        None => Ok(()),
    }
}

/// Run a [`ProbeController`] actor.
async fn run_controller_actor<T: FilterTables>(mut actor: ProbeController<T>) {
    while let Some(cmd) = actor.rx_cmd.recv().await {
        actor.handle_cmd(cmd);
    }
    log::debug!("probe controller stopped");
}

#[cfg(test)]
mod tests {
    use bpf_common::aya::{maps::MapError, sys::SyscallError};
    use iotap_common::{ControlTables, Decision, decide, maps::TARGET_PIDS};

    use super::*;
    use crate::MemoryTables;

    fn start() -> (MemoryTables, ProbeHandle) {
        let tables = MemoryTables::default();
        let handle = start_controller(tables.clone(), Arc::default());
        (tables, handle)
    }

    #[tokio::test]
    async fn adding_targets_switches_broadcast_off() {
        let (tables, handle) = start();
        handle.set_broadcast(true).await.unwrap();
        assert!(handle.broadcast().await.unwrap());

        handle.add_targets(vec![42, 7]).await.unwrap();
        assert!(!handle.broadcast().await.unwrap());
        assert_eq!(handle.targets().await.unwrap(), vec![7, 42]);
        assert_eq!(decide(&tables, 42), Decision::Emit);
        assert_eq!(decide(&tables, 43), Decision::Suppress);
    }

    #[tokio::test]
    async fn clearing_targets_switches_broadcast_off() {
        let (tables, handle) = start();
        handle.add_targets(vec![1]).await.unwrap();
        handle.set_broadcast(true).await.unwrap();

        handle.clear_targets().await.unwrap();
        assert!(handle.targets().await.unwrap().is_empty());
        assert!(!handle.broadcast().await.unwrap());
        assert_eq!(decide(&tables, 1), Decision::Suppress);
    }

    #[tokio::test]
    async fn toggling_broadcast_keeps_targets() {
        let (_, handle) = start();
        handle.add_targets(vec![5]).await.unwrap();
        handle.set_broadcast(true).await.unwrap();
        handle.set_broadcast(false).await.unwrap();
        assert_eq!(handle.targets().await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn remove_target() {
        let (_, handle) = start();
        handle.add_targets(vec![5, 6]).await.unwrap();
        handle.remove_target(5).await.unwrap();
        handle.remove_target(1000).await.unwrap();
        assert_eq!(handle.targets().await.unwrap(), vec![6]);
    }

    #[tokio::test]
    async fn invalid_batch_changes_nothing() {
        let (tables, handle) = start();
        handle.set_broadcast(true).await.unwrap();
        assert_eq!(
            handle.add_targets(vec![3, 0]).await,
            Err(ProbeError::InvalidPid(0))
        );
        assert!(handle.targets().await.unwrap().is_empty());
        assert_eq!(tables.broadcast_flag(), Some(1));
    }

    /// Allow set holding at most `capacity` pids, like a full BPF map.
    struct CappedTargets {
        inner: MemoryTables,
        capacity: usize,
    }

    impl FilterTables for CappedTargets {
        fn add_target(&mut self, pid: u32) -> Result<(), FilterError> {
            if self.inner.targets()?.len() >= self.capacity {
                return Err(FilterError::Map {
                    table: TARGET_PIDS,
                    source: MapError::SyscallError(SyscallError {
                        call: "bpf_map_update_elem",
                        io_error: std::io::Error::other("no space left in map"),
                    }),
                });
            }
            self.inner.add_target(pid)
        }
        fn remove_target(&mut self, pid: u32) -> Result<(), FilterError> {
            self.inner.remove_target(pid)
        }
        fn clear_targets(&mut self) -> Result<(), FilterError> {
            self.inner.clear_targets()
        }
        fn targets(&self) -> Result<Vec<u32>, FilterError> {
            self.inner.targets()
        }
        fn add_exclusion(&mut self, pid: u32) -> Result<(), FilterError> {
            self.inner.add_exclusion(pid)
        }
        fn remove_exclusion(&mut self, pid: u32) -> Result<(), FilterError> {
            self.inner.remove_exclusion(pid)
        }
        fn clear_exclusions(&mut self) -> Result<(), FilterError> {
            self.inner.clear_exclusions()
        }
        fn exclusions(&self) -> Result<Vec<u32>, FilterError> {
            self.inner.exclusions()
        }
        fn set_broadcast(&mut self, enabled: bool) -> Result<(), FilterError> {
            self.inner.set_broadcast(enabled)
        }
        fn broadcast(&self) -> Result<bool, FilterError> {
            self.inner.broadcast()
        }
    }

    #[tokio::test]
    async fn full_allow_set_still_switches_broadcast_off() {
        let tables = MemoryTables::default();
        let capped = CappedTargets {
            inner: tables.clone(),
            capacity: 2,
        };
        let handle = start_controller(capped, Arc::default());
        handle.set_broadcast(true).await.unwrap();

        let result = handle.add_targets(vec![1, 2, 3]).await;
        assert!(
            matches!(result, Err(ProbeError::Table { ref table, .. }) if table == TARGET_PIDS),
            "{result:?}"
        );
        assert_eq!(handle.targets().await.unwrap(), vec![1, 2]);
        assert!(!handle.broadcast().await.unwrap());
        assert_eq!(decide(&tables, 1), Decision::Emit);
        assert_eq!(decide(&tables, 3), Decision::Suppress);
    }

    #[tokio::test]
    async fn exclusion_wins_in_broadcast_mode() {
        let (tables, handle) = start();
        handle.set_broadcast(true).await.unwrap();
        handle.add_exclusions(vec![100]).await.unwrap();
        assert_eq!(decide(&tables, 100), Decision::Suppress);
        assert_eq!(decide(&tables, 200), Decision::Emit);

        handle.remove_exclusion(100).await.unwrap();
        assert!(handle.exclusions().await.unwrap().is_empty());
        assert_eq!(decide(&tables, 100), Decision::Emit);
    }

    #[tokio::test]
    async fn status_snapshot() {
        let tables = MemoryTables::default();
        let counters = Arc::new(EventCounters::default());
        let handle = start_controller(tables, counters.clone());
        handle.add_targets(vec![9]).await.unwrap();
        handle.add_exclusions(vec![1]).await.unwrap();
        counters.add_received(4);
        counters.set_kernel_dropped(2);

        assert_eq!(
            handle.status().await.unwrap(),
            ProbeStatus {
                broadcast: false,
                targets: vec![9],
                exclusions: vec![1],
                received: 4,
                lost: 0,
                kernel_dropped: 2,
            }
        );
    }
}
