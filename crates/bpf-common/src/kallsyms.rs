//! Resolve the kernel symbol implementing a syscall entry point.
//!
//! Syscall wrappers are named after the architecture (`__x64_sys_read` on
//! x86_64, `__arm64_sys_read` on aarch64...), older kernels export the bare
//! `sys_read`.
use crate::ProgramError;

const KALLSYMS_PATH: &str = "/proc/kallsyms";

/// Prefixes tried in order.
pub const SYSCALL_PREFIXES: &[&str] = &[
    "__x64_sys_",
    "__arm64_sys_",
    "__riscv_sys_",
    "__arm_sys_",
    "sys_",
];

/// Find the kernel symbol of `syscall` (eg. `"read"`) in `/proc/kallsyms`.
pub fn syscall_symbol(syscall: &str) -> Result<String, ProgramError> {
    let kallsyms = std::fs::read_to_string(KALLSYMS_PATH).map_err(ProgramError::Kallsyms)?;
    let symbol = find_syscall_symbol(&kallsyms, syscall).ok_or_else(|| {
        ProgramError::SymbolNotFound {
            syscall: syscall.to_string(),
        }
    })?;
    log::info!("Found syscall symbol: {symbol}");
    Ok(symbol)
}

/// Search a kallsyms listing (`<address> <type> <name> [module]` per line)
/// for the first prefix with an exact symbol match.
pub fn find_syscall_symbol(kallsyms: &str, syscall: &str) -> Option<String> {
    let symbols: Vec<&str> = kallsyms
        .lines()
        .filter_map(|line| line.split_whitespace().nth(2))
        .collect();
    SYSCALL_PREFIXES
        .iter()
        .map(|prefix| format!("{prefix}{syscall}"))
        .find(|candidate| symbols.contains(&candidate.as_str()))
}
