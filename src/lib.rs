//! iotap traces `read` and `write` syscalls with eBPF and reports which
//! processes issue them. It provides two components:
//!
//! - a [daemon](crate::iotapd) which loads the probe, fills the
//!   [filtering](bpf_filtering) maps and consumes the events
//! - a [cli](crate::iotap) to inspect and change the filters of a running
//!   daemon and to stream its events
//!
//! The two components are provided as separate binaries: `iotapd` (daemon)
//! and `iotap` (CLI). Example:
//!
//! ```sh
//! # Execute the daemon
//! iotapd
//!
//! # Report every process except pid 1234
//! iotap broadcast on
//! iotap exclude 1234
//! iotap monitor
//! ```
//!
//! ## Filtering
//!
//! The probe decides on every syscall entry: excluded pids are never
//! reported, broadcast mode reports everything else, otherwise only target
//! pids are reported. A fresh daemon starts with broadcast disabled and no
//! targets, so it reports nothing until told otherwise.

pub mod cli;
pub mod iotap;
pub mod iotapd;
pub mod log_file;
pub mod utils;

use log_file::LogFile;

/// Init logger. We log from info level and above.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
///
/// With a `log_file`, records go to stderr and to the rotating file. If the
/// file can't be opened we keep logging to stderr only.
pub fn init_logger(override_log_level: Option<log::LevelFilter>, log_file: Option<&LogFile>) {
    let mut builder = env_logger::builder();
    if std::env::var_os("RUST_LOG").is_none() {
        builder.filter_level(override_log_level.unwrap_or(log::LevelFilter::Info));
    }

    let mut open_error = None;
    if let Some(log_file) = log_file {
        match log_file.open() {
            Ok(writer) => {
                builder.target(env_logger::Target::Pipe(Box::new(writer)));
            }
            Err(err) => open_error = Some((log_file.path.clone(), err)),
        }
    }
    builder.init();

    if let Some((path, err)) = open_error {
        log::warn!("Not logging to {}: {err:#}", path.display());
    }
}
