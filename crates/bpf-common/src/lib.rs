mod bpf_sender;
pub mod bpf_fs;
mod bump_memlock_rlimit;
pub mod kallsyms;
pub mod program;

pub use bpf_sender::BpfSender;
pub use bump_memlock_rlimit::bump_memlock_rlimit;
pub use program::{BpfContext, BpfEvent, PerfStats, Program, ProgramBuilder, ProgramError};

pub use aya;
pub use iotap_common;

/// Utility function to pretty print an error with its sources.
///
/// We use this because by default Rust won't print the source of an error message,
/// making it much less useful. Instead of re-implementing that, we'll just use
/// anyhow as an error pretty-printer.
pub fn log_error<E: std::error::Error + Send + Sync + 'static>(msg: &str, err: E) {
    log::error!("{}: {:?}", msg, anyhow::Error::from(err));
}
