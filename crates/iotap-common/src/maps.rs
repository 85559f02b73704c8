//! Names and sizes of the maps exported by the eBPF program.
//!
//! Userspace looks maps up by name, so these constants are the contract
//! between `iotap-ebpf` and `bpf-filtering`/`rw-monitor`.

/// Exclusion set: pids which never generate events.
pub const SKIP_PIDS: &str = "SKIP_PIDS";
/// Allow set: pids which generate events when broadcast is disabled.
pub const TARGET_PIDS: &str = "TARGET_PIDS";
/// Broadcast flag, a single cell stored at [`PRINT_ALL_KEY`].
pub const PRINT_ALL: &str = "PRINT_ALL";
/// Per-CPU perf event array carrying [`crate::RawEvent`] records.
pub const EVENTS: &str = "EVENTS";
/// Per-CPU counter of records which couldn't be written to [`EVENTS`].
pub const DROPPED: &str = "DROPPED";

pub const PID_TABLE_CAPACITY: u32 = 1024;

pub const PRINT_ALL_KEY: u32 = 0;
/// The only value of the broadcast cell meaning "enabled".
pub const PRINT_ALL_ENABLED: u32 = 1;
pub const PRINT_ALL_DISABLED: u32 = 0;

pub const DROPPED_KEY: u32 = 0;

/// kprobe handling the read syscall entry.
pub const READ_PROGRAM: &str = "sys_read_call";
/// kprobe handling the write syscall entry.
pub const WRITE_PROGRAM: &str = "sys_write_call";
