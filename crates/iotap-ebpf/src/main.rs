//! Kernel side of iotap: two kprobes on the read/write syscall entry points
//! running the [`iotap_common::on_invocation`] pipeline.
#![no_std]
#![no_main]

use core::{ffi::c_void, mem::size_of};

use aya_ebpf::{
    EbpfContext,
    bindings::BPF_F_CURRENT_CPU,
    helpers::{bpf_get_current_pid_tgid, bpf_perf_event_output},
    macros::{kprobe, map},
    maps::{HashMap, PerCpuArray, PerfEventArray},
    programs::ProbeContext,
};
use iotap_common::{
    ControlTables, EventOutput, OperationKind, RawEvent,
    maps::{DROPPED_KEY, PID_TABLE_CAPACITY, PRINT_ALL_KEY},
    on_invocation,
};

#[map]
static SKIP_PIDS: HashMap<u32, u32> = HashMap::with_max_entries(PID_TABLE_CAPACITY, 0);

#[map]
static TARGET_PIDS: HashMap<u32, u32> = HashMap::with_max_entries(PID_TABLE_CAPACITY, 0);

#[map]
static PRINT_ALL: HashMap<u32, u32> = HashMap::with_max_entries(1, 0);

#[map]
static EVENTS: PerfEventArray<RawEvent> = PerfEventArray::new(0);

#[map]
static DROPPED: PerCpuArray<u64> = PerCpuArray::with_max_entries(1, 0);

#[kprobe]
pub fn sys_read_call(ctx: ProbeContext) -> u32 {
    handle_sys_call(&ctx, OperationKind::Read)
}

#[kprobe]
pub fn sys_write_call(ctx: ProbeContext) -> u32 {
    handle_sys_call(&ctx, OperationKind::Write)
}

/// The monitored syscall must never observe a failure from us: whatever
/// happens, return 0.
#[inline(always)]
fn handle_sys_call(ctx: &ProbeContext, kind: OperationKind) -> u32 {
    let pid = (bpf_get_current_pid_tgid() >> 32) as u32;
    let _ = on_invocation(&Tables, &PerfOutput { ctx }, pid, kind);
    0
}

/// The control maps, written by userspace only.
struct Tables;

impl ControlTables for Tables {
    #[inline(always)]
    fn excluded(&self, pid: u32) -> bool {
        unsafe { SKIP_PIDS.get(&pid) }.is_some()
    }

    #[inline(always)]
    fn broadcast_flag(&self) -> Option<u32> {
        unsafe { PRINT_ALL.get(&PRINT_ALL_KEY) }.copied()
    }

    #[inline(always)]
    fn targeted(&self, pid: u32) -> bool {
        unsafe { TARGET_PIDS.get(&pid) }.is_some()
    }
}

/// Writes to the perf ring of the current CPU.
struct PerfOutput<'a> {
    ctx: &'a ProbeContext,
}

impl EventOutput for PerfOutput<'_> {
    #[inline(always)]
    fn output(&self, event: &RawEvent) -> Result<(), i64> {
        // `PerfEventArray::output` discards the helper result, which we
        // need to account drops.
        let ret = unsafe {
            bpf_perf_event_output(
                self.ctx.as_ptr(),
                &EVENTS as *const PerfEventArray<RawEvent> as *mut c_void,
                BPF_F_CURRENT_CPU as u64,
                event as *const RawEvent as *mut c_void,
                size_of::<RawEvent>() as u64,
            )
        };
        if ret < 0 { Err(ret as i64) } else { Ok(()) }
    }

    #[inline(always)]
    fn record_drop(&self) {
        if let Some(counter) = DROPPED.get_ptr_mut(DROPPED_KEY) {
            // per-CPU slot, no concurrent writers
            unsafe { *counter += 1 };
        }
    }
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

// bpf_perf_event_output is GPL-only
#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 4] = *b"GPL\0";
