use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Error happening while administering the probe.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("invalid pid {0}")]
    InvalidPid(u32),
    #[error("updating {table}: {reason}")]
    Table { table: String, reason: String },
    #[error("probe controller is not running")]
    Stopped,
}

/// Snapshot of the control tables and of the delivery counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeStatus {
    pub broadcast: bool,
    pub targets: Vec<u32>,
    pub exclusions: Vec<u32>,
    /// Records received by the consumer.
    pub received: u64,
    /// Records lost in the perf rings.
    pub lost: u64,
    /// Records the kernel couldn't publish.
    pub kernel_dropped: u64,
}

/// Delivery counters, shared between the consumer tasks and the controller.
#[derive(Debug, Default)]
pub struct EventCounters {
    received: AtomicU64,
    lost: AtomicU64,
    kernel_dropped: AtomicU64,
}

impl EventCounters {
    pub fn add_received(&self, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_lost(&self, lost: u64) {
        self.lost.store(lost, Ordering::Relaxed);
    }

    /// Store the latest kernel drop count, returning the previous one.
    pub fn set_kernel_dropped(&self, dropped: u64) -> u64 {
        self.kernel_dropped.swap(dropped, Ordering::Relaxed)
    }

    /// `(received, lost, kernel_dropped)`
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.received.load(Ordering::Relaxed),
            self.lost.load(Ordering::Relaxed),
            self.kernel_dropped.load(Ordering::Relaxed),
        )
    }
}

type Reply<T> = oneshot::Sender<Result<T, ProbeError>>;

/// Messages used for internal communication between [`ProbeHandle`] and the
/// controller actor owning the maps.
pub enum ProbeCommand {
    Status { tx_reply: Reply<ProbeStatus> },
    Targets { tx_reply: Reply<Vec<u32>> },
    AddTargets { pids: Vec<u32>, tx_reply: Reply<()> },
    RemoveTarget { pid: u32, tx_reply: Reply<()> },
    ClearTargets { tx_reply: Reply<()> },
    Broadcast { tx_reply: Reply<bool> },
    SetBroadcast { enabled: bool, tx_reply: Reply<()> },
    Exclusions { tx_reply: Reply<Vec<u32>> },
    AddExclusions { pids: Vec<u32>, tx_reply: Reply<()> },
    RemoveExclusion { pid: u32, tx_reply: Reply<()> },
}

/// Handle to the running controller.
///
/// Every mutation goes through the controller, which applies them one at a time.
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    tx_cmd: mpsc::Sender<ProbeCommand>,
}

impl ProbeHandle {
    pub fn new(sender: mpsc::Sender<ProbeCommand>) -> Self {
        Self { tx_cmd: sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> ProbeCommand,
    ) -> Result<T, ProbeError> {
        let (send, recv) = oneshot::channel();

        // Ignore send errors. If this send fails, so does the
        // recv.await below. There's no reason to check the
        // failure twice.
        let _ = self.tx_cmd.send(build(send)).await;
        recv.await.map_err(|_| ProbeError::Stopped)?
    }

    pub async fn status(&self) -> Result<ProbeStatus, ProbeError> {
        self.request(|tx_reply| ProbeCommand::Status { tx_reply }).await
    }

    pub async fn targets(&self) -> Result<Vec<u32>, ProbeError> {
        self.request(|tx_reply| ProbeCommand::Targets { tx_reply }).await
    }

    /// Add pids to the allow set. Broadcast mode is switched off.
    pub async fn add_targets(&self, pids: Vec<u32>) -> Result<(), ProbeError> {
        self.request(|tx_reply| ProbeCommand::AddTargets { pids, tx_reply })
            .await
    }

    pub async fn remove_target(&self, pid: u32) -> Result<(), ProbeError> {
        self.request(|tx_reply| ProbeCommand::RemoveTarget { pid, tx_reply })
            .await
    }

    /// Empty the allow set. Broadcast mode is switched off.
    pub async fn clear_targets(&self) -> Result<(), ProbeError> {
        self.request(|tx_reply| ProbeCommand::ClearTargets { tx_reply })
            .await
    }

    pub async fn broadcast(&self) -> Result<bool, ProbeError> {
        self.request(|tx_reply| ProbeCommand::Broadcast { tx_reply })
            .await
    }

    pub async fn set_broadcast(&self, enabled: bool) -> Result<(), ProbeError> {
        self.request(|tx_reply| ProbeCommand::SetBroadcast { enabled, tx_reply })
            .await
    }

    pub async fn exclusions(&self) -> Result<Vec<u32>, ProbeError> {
        self.request(|tx_reply| ProbeCommand::Exclusions { tx_reply })
            .await
    }

    pub async fn add_exclusions(&self, pids: Vec<u32>) -> Result<(), ProbeError> {
        self.request(|tx_reply| ProbeCommand::AddExclusions { pids, tx_reply })
            .await
    }

    pub async fn remove_exclusion(&self, pid: u32) -> Result<(), ProbeError> {
        self.request(|tx_reply| ProbeCommand::RemoveExclusion { pid, tx_reply })
            .await
    }
}
