//! Monitor of the `read` and `write` syscalls.
//!
//! [`program`] loads the probe and attaches it, [`monitor`] consumes the
//! records it produces.
use bpf_common::{
    BpfContext, BpfEvent, BpfSender, Program, ProgramBuilder, ProgramError, ebpf_program,
    kallsyms::syscall_symbol,
};
use iotap_common::{
    OperationKind,
    maps::{EVENTS, READ_PROGRAM, WRITE_PROGRAM},
};

pub mod monitor;

pub use monitor::Config;

pub const MODULE_NAME: &str = "rw-monitor";

pub async fn program(
    ctx: BpfContext,
    config: &Config,
    sender: impl BpfSender<BpfEvent>,
) -> Result<Program, ProgramError> {
    let read_symbol = resolve(OperationKind::Read, config.read_symbol.as_deref())?;
    let write_symbol = resolve(OperationKind::Write, config.write_symbol.as_deref())?;

    let binary = ebpf_program!("iotap");
    let mut program = ProgramBuilder::new(ctx, MODULE_NAME, binary)
        .kprobe(READ_PROGRAM, &read_symbol)
        .kprobe(WRITE_PROGRAM, &write_symbol)
        .start()
        .await?;
    log::info!("Monitoring sys_read ({read_symbol}) and sys_write ({write_symbol}) calls");

    program.read_events(EVENTS, sender).await?;
    Ok(program)
}

/// Kernel symbol to attach `operation` to: the configured one, or the one
/// found in kallsyms.
fn resolve(operation: OperationKind, configured: Option<&str>) -> Result<String, ProgramError> {
    match configured {
        Some(symbol) => Ok(symbol.to_string()),
        None => syscall_symbol(operation.syscall()),
    }
}
