//! [`Program`] is a wrapper around [`aya::Ebpf`] which:
//! - loads the probe and attaches its kprobes
//! - reads events from the perf event array, one task per CPU
//! - polls per-CPU counters
//!
//! Background tasks stop when the [`Program`] is dropped.
use core::fmt;
use std::{
    collections::HashSet,
    convert::TryFrom,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, SystemTime},
};

use aya::{
    Ebpf, EbpfLoader,
    maps::{
        Map, MapData, PerCpuArray,
        perf::{AsyncPerfEventArray, PerfBufferError},
    },
    programs::KProbe,
    util::online_cpus,
};
use bytes::BytesMut;
use iotap_common::{RAW_EVENT_SIZE, RawEvent};
use thiserror::Error;
use tokio::sync::watch;

use crate::BpfSender;

const PERF_HEADER_SIZE: usize = 4;

pub const PERF_PAGES_DEFAULT: usize = 64;

/// Buffers handed to every `read_events` call.
const READ_BATCH: usize = 16;

/// BpfContext contains extra settings which could be provided on program load
#[derive(Clone, Debug)]
pub struct BpfContext {
    /// How many pages of memory (4Kb) to use for perf arrays.
    /// NOTE: this will result in a memory usage of:
    /// (number of cores) * (perf_pages) * 4Kb
    perf_pages: usize,
}

impl BpfContext {
    pub fn new(mut perf_pages: usize) -> Self {
        if !perf_pages.is_power_of_two() {
            log::warn!("Invalid value ({perf_pages}) for perf_pages, which must be a power of 2.");
            log::warn!("The default value {PERF_PAGES_DEFAULT} will be used.");
            perf_pages = PERF_PAGES_DEFAULT;
        }
        Self { perf_pages }
    }

    pub fn perf_pages(&self) -> usize {
        self.perf_pages
    }
}

impl Default for BpfContext {
    fn default() -> Self {
        Self::new(PERF_PAGES_DEFAULT)
    }
}

/// Embed the eBPF object built by `bpf_builder::build` for `$probe`.
#[macro_export]
macro_rules! ebpf_program {
    ( $probe: expr ) => {{
        use bpf_common::aya::include_bytes_aligned;

        include_bytes_aligned!(concat!(env!("OUT_DIR"), "/", $probe, ".bpf.o")).to_vec()
    }};
}

#[derive(Error, Debug)]
pub enum ProgramError {
    #[error("probe {0} was not built, rebuild with bpf-linker installed or set IOTAP_EBPF_OBJECT")]
    ProbeNotBuilt(String),
    #[error("loading probe")]
    LoadingProbe(#[from] aya::EbpfError),
    #[error("program not found {0}")]
    ProgramNotFound(String),
    #[error("incorrect program type {0}")]
    ProgramTypeError(String),
    #[error("failed program load {program}")]
    ProgramLoadError {
        program: String,
        #[source]
        program_error: Box<aya::programs::ProgramError>,
    },
    #[error("failed program attach {program}")]
    ProgramAttachError {
        program: String,
        #[source]
        program_error: Box<aya::programs::ProgramError>,
    },
    #[error("reading kernel symbols")]
    Kallsyms(#[source] std::io::Error),
    #[error("no kernel symbol found for syscall {syscall}")]
    SymbolNotFound { syscall: String },
    #[error(transparent)]
    MapError(#[from] aya::maps::MapError),
    #[error("map not found {0}")]
    MapNotFound(String),
    #[error("map already used {0}")]
    MapAlreadyUsed(String),
    #[error("perf buffer error {0}")]
    PerfBuffer(#[from] PerfBufferError),
    #[error("listing online cpus")]
    OnlineCpus(#[source] std::io::Error),
    #[error("malformed record")]
    Decode(String),
}

pub struct ProgramBuilder {
    /// probe name, used for logging purposes
    name: &'static str,
    /// Probe configuration
    ctx: BpfContext,
    probe: Vec<u8>,
    kprobes: Vec<KProbeAttachment>,
}

impl ProgramBuilder {
    pub fn new(ctx: BpfContext, name: &'static str, probe: Vec<u8>) -> Self {
        Self {
            ctx,
            name,
            probe,
            kprobes: Vec::new(),
        }
    }

    /// Attach the kprobe `program` to the kernel function `symbol`.
    pub fn kprobe(mut self, program: &str, symbol: &str) -> Self {
        self.kprobes.push(KProbeAttachment {
            program: program.to_string(),
            symbol: symbol.to_string(),
        });
        self
    }

    pub async fn start(self) -> Result<Program, ProgramError> {
        // Dropping the sender notifies the background tasks reading from
        // maps that we're shutting down: map file descriptors stay open as
        // long as a task holds them, dropping aya::Ebpf alone isn't enough.
        let (tx_exit, _) = watch::channel(());
        let name = self.name.to_string();
        let ctx = self.ctx.clone();

        if self.probe.is_empty() {
            return Err(ProgramError::ProbeNotBuilt(name));
        }

        let bpf = tokio::task::spawn_blocking(move || {
            let mut bpf = EbpfLoader::new().load(&self.probe)?;
            for kprobe in &self.kprobes {
                kprobe.attach(&mut bpf)?;
                log::debug!("{}: attached {kprobe}", self.name);
            }
            Result::<Ebpf, ProgramError>::Ok(bpf)
        })
        .await
        .expect("join error")?;

        Ok(Program {
            tx_exit,
            name,
            ctx,
            bpf,
            used_maps: Default::default(),
            stats: Default::default(),
        })
    }
}

struct KProbeAttachment {
    program: String,
    symbol: String,
}

impl fmt::Display for KProbeAttachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kprobe {} on {}", self.program, self.symbol)
    }
}

impl KProbeAttachment {
    fn attach(&self, bpf: &mut Ebpf) -> Result<(), ProgramError> {
        let load_err = |program_error| ProgramError::ProgramLoadError {
            program: self.to_string(),
            program_error: Box::new(program_error),
        };
        let attach_err = |program_error| ProgramError::ProgramAttachError {
            program: self.to_string(),
            program_error: Box::new(program_error),
        };
        let program: &mut KProbe = bpf
            .program_mut(&self.program)
            .ok_or_else(|| ProgramError::ProgramNotFound(self.program.clone()))?
            .try_into()
            .map_err(|_err| ProgramError::ProgramTypeError(self.program.clone()))?;
        program.load().map_err(load_err)?;
        program.attach(&self.symbol, 0).map_err(attach_err)?;
        Ok(())
    }
}

/// Record received from the perf event array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BpfEvent {
    /// Time of receipt in userspace. The record itself carries no timestamp.
    pub timestamp: SystemTime,
    pub raw: RawEvent,
}

impl fmt::Display for BpfEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}

/// Counters updated by the perf reader tasks.
#[derive(Debug, Default)]
pub struct PerfStats {
    received: AtomicU64,
    lost: AtomicU64,
    malformed: AtomicU64,
}

impl PerfStats {
    /// Records decoded and forwarded.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Records overwritten in the perf ring before we could read them.
    pub fn lost(&self) -> u64 {
        self.lost.load(Ordering::Relaxed)
    }

    /// Records too short to decode.
    pub fn malformed(&self) -> u64 {
        self.malformed.load(Ordering::Relaxed)
    }
}

pub struct Program {
    /// Signal to the background async tasks that we're exiting.
    tx_exit: watch::Sender<()>,
    ctx: BpfContext,
    name: String,
    bpf: Ebpf,
    used_maps: HashSet<String>,
    stats: Arc<PerfStats>,
}

impl Program {
    pub fn bpf(&mut self) -> &mut Ebpf {
        &mut self.bpf
    }

    pub fn stats(&self) -> Arc<PerfStats> {
        self.stats.clone()
    }

    /// Poll a one-slot BPF_MAP_TYPE_PERCPU_ARRAY of counters with a certain
    /// interval, passing the sum over all CPUs to `poll_fn`.
    pub async fn poll_per_cpu_counter<F>(
        &mut self,
        map_name: &str,
        interval: Duration,
        mut poll_fn: F,
    ) -> Result<(), ProgramError>
    where
        F: FnMut(u64),
        F: Send + 'static,
    {
        let map_resource = self.take_map(map_name)?;

        let mut rx_exit = self.tx_exit.subscribe();
        let map: PerCpuArray<MapData, u64> = PerCpuArray::try_from(map_resource)?;
        let name = self.name.clone();
        let map_name = map_name.to_string();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    Err(_) = rx_exit.changed() => break,
                    _ = interval.tick() => match map.get(&0, 0) {
                        Ok(values) => poll_fn(values.iter().sum()),
                        Err(err) => log::warn!("{name}: error reading {map_name}: {err}"),
                    },
                };
            }
        });
        Ok(())
    }

    /// Watch a BPF_MAP_TYPE_PERF_EVENT_ARRAY and forward all its events to `sender`.
    /// A different task is run for each CPU.
    pub async fn read_events(
        &mut self,
        map_name: &str,
        sender: impl BpfSender<BpfEvent>,
    ) -> Result<(), ProgramError> {
        let map_resource = self.take_map(map_name)?;

        let mut perf_array: AsyncPerfEventArray<_> = AsyncPerfEventArray::try_from(map_resource)?;

        let cpus = online_cpus().map_err(|(_, err)| ProgramError::OnlineCpus(err))?;
        let buffers = cpus
            .into_iter()
            .map(|cpu_id| perf_array.open(cpu_id, Some(self.ctx.perf_pages)))
            .collect::<Result<Vec<_>, PerfBufferError>>()?;
        for mut buf in buffers {
            let name = self.name.clone();
            let mut sender = sender.clone();
            let mut rx_exit = self.tx_exit.subscribe();
            let stats = self.stats.clone();
            let buffer_size: usize = RAW_EVENT_SIZE + PERF_HEADER_SIZE;
            tokio::spawn(async move {
                let mut buffers = (0..READ_BATCH)
                    .map(|_| BytesMut::with_capacity(buffer_size))
                    .collect::<Vec<_>>();
                loop {
                    let events = tokio::select! {
                        Err(_) = rx_exit.changed() => return,
                        events = buf.read_events(&mut buffers) => events,
                    };
                    match events {
                        Ok(events) => {
                            if events.lost > 0 {
                                stats.lost.fetch_add(events.lost as u64, Ordering::Relaxed);
                                log::warn!(
                                    "{}: Lost {} samples (read {})",
                                    name,
                                    events.lost,
                                    events.read
                                );
                            }
                            let timestamp = SystemTime::now();
                            for buffer in buffers.iter_mut().take(events.read) {
                                let decoded = RawEvent::decode(buffer);
                                buffer.clear();
                                match decoded {
                                    Ok(raw) => {
                                        stats.received.fetch_add(1, Ordering::Relaxed);
                                        sender.send(Ok(BpfEvent { timestamp, raw }))
                                    }
                                    Err(err) => {
                                        stats.malformed.fetch_add(1, Ordering::Relaxed);
                                        sender.send(Err(ProgramError::Decode(err.to_string())))
                                    }
                                }
                            }
                        }
                        Err(e) => return sender.send(Err(e.into())),
                    };
                }
            });
        }

        Ok(())
    }

    /// Take ownership of a map. Every map can be taken only once.
    pub fn take_map(&mut self, map_name: &str) -> Result<Map, ProgramError> {
        if self.used_maps.contains(map_name) {
            return Err(ProgramError::MapAlreadyUsed(map_name.to_string()));
        };

        let map_resource = self
            .bpf
            .take_map(map_name)
            .ok_or_else(|| ProgramError::MapNotFound(map_name.to_string()))?;

        self.used_maps.insert(map_name.to_string());
        Ok(map_resource)
    }
}
