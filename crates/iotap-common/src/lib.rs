//! # Read/write event pipeline
//!
//! Code shared by the eBPF program and by userspace. It contains the whole
//! per-invocation pipeline executed by the kprobes:
//!
//! 1. [`decide`] consults the control tables and returns a [`Decision`]
//! 2. [`RawEvent::new`] encodes the invoking pid and the operation kind
//! 3. [`publish`] hands the record to the transport without ever blocking
//!
//! [`on_invocation`] chains the three steps. Kernel and userspace only differ
//! in the implementation of the two seams: [`ControlTables`] (BPF hash maps in
//! the kernel, in-memory sets in tests) and [`EventOutput`] (a per-CPU perf
//! event array in the kernel).
//!
//! The crate must compile for `bpfel-unknown-none`, so it's `no_std` and has
//! no dependencies.
#![no_std]

mod event;
mod filter;
pub mod maps;
mod publish;
#[cfg(test)]
mod testing;

pub use event::{DecodeError, OperationKind, RawEvent, RAW_EVENT_SIZE};
pub use filter::{decide, ControlTables, Decision};
pub use publish::{on_invocation, publish, Delivery, EventOutput};
