//! In-memory implementations of the pipeline seams.

extern crate std;

use core::cell::{Cell, RefCell};
use std::{collections::BTreeSet, vec::Vec};

use crate::{ControlTables, EventOutput, RawEvent};

#[derive(Default)]
pub(crate) struct MemTables {
    skip: BTreeSet<u32>,
    targets: BTreeSet<u32>,
    print_all: Option<u32>,
    lookups: Cell<usize>,
}

impl MemTables {
    pub(crate) fn exclude(mut self, pids: &[u32]) -> Self {
        self.skip.extend(pids);
        self
    }

    pub(crate) fn target(mut self, pids: &[u32]) -> Self {
        self.targets.extend(pids);
        self
    }

    pub(crate) fn broadcast(mut self, value: Option<u32>) -> Self {
        self.print_all = value;
        self
    }

    /// Number of table reads performed so far.
    pub(crate) fn lookups(&self) -> usize {
        self.lookups.get()
    }

    fn lookup(&self) {
        self.lookups.set(self.lookups.get() + 1);
    }
}

impl ControlTables for MemTables {
    fn excluded(&self, pid: u32) -> bool {
        self.lookup();
        self.skip.contains(&pid)
    }

    fn broadcast_flag(&self) -> Option<u32> {
        self.lookup();
        self.print_all
    }

    fn targeted(&self, pid: u32) -> bool {
        self.lookup();
        self.targets.contains(&pid)
    }
}

/// Fixed capacity transport, like a perf ring nobody is reading.
pub(crate) struct BoundedOutput {
    capacity: usize,
    records: RefCell<Vec<RawEvent>>,
    attempts: Cell<usize>,
    dropped: Cell<u64>,
}

impl BoundedOutput {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            records: RefCell::new(Vec::new()),
            attempts: Cell::new(0),
            dropped: Cell::new(0),
        }
    }

    pub(crate) fn records(&self) -> Vec<RawEvent> {
        self.records.borrow().clone()
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.get()
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.get()
    }

    pub(crate) fn drain(&self) {
        self.records.borrow_mut().clear();
    }
}

impl EventOutput for BoundedOutput {
    fn output(&self, event: &RawEvent) -> Result<(), i64> {
        self.attempts.set(self.attempts.get() + 1);
        let mut records = self.records.borrow_mut();
        if records.len() >= self.capacity {
            // -ENOSPC, what bpf_perf_event_output returns on a full ring
            return Err(-28);
        }
        records.push(*event);
        Ok(())
    }

    fn record_drop(&self) {
        self.dropped.set(self.dropped.get() + 1);
    }
}
