use std::{fmt, time::SystemTime};

use chrono::{DateTime, Utc};
use iotap_common::{OperationKind, RawEvent};
use serde::{Deserialize, Serialize};

/// An invocation of a monitored syscall, as delivered to userspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub pid: u32,
    pub operation: Operation,
    /// Time of receipt by the consumer.
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Read,
    Write,
    /// Kind tag not known by this build. Kept so producers can add kinds
    /// without breaking consumers.
    Unknown(u32),
}

impl From<u32> for Operation {
    fn from(tag: u32) -> Self {
        match OperationKind::from_tag(tag) {
            Some(OperationKind::Read) => Operation::Read,
            Some(OperationKind::Write) => Operation::Write,
            None => Operation::Unknown(tag),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Read => write!(f, "{}", OperationKind::Read),
            Operation::Write => write!(f, "{}", OperationKind::Write),
            Operation::Unknown(tag) => write!(f, "unknown({tag})"),
        }
    }
}

impl Event {
    pub fn from_raw(raw: RawEvent, timestamp: SystemTime) -> Self {
        Self {
            pid: raw.pid,
            operation: Operation::from(raw.kind),
            timestamp,
        }
    }

    /// Line logged by the consumer for this event.
    pub fn log_line(&self) -> String {
        match self.operation {
            Operation::Unknown(tag) => format!("{} - unknown event {tag}", self.pid),
            known => format!("{} - hello {known} was called", self.pid),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let time = DateTime::<Utc>::from(self.timestamp).format("%Y-%m-%dT%H:%M:%S%.3fZ");
        if f.alternate() {
            write!(f, "[{time} \x1b[1;30;46mEVENT\x1b[0m] {} {}", self.pid, self.operation)
        } else {
            write!(f, "[{time} EVENT] {} {}", self.pid, self.operation)
        }
    }
}
