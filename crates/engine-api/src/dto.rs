use serde::{Deserialize, Serialize};

/// Body of the requests adding pids to a table.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PidList {
    pub pids: Vec<u32>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastState {
    pub enabled: bool,
}
