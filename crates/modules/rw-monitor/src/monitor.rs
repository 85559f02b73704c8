use std::{sync::Arc, time::Duration};

use bpf_common::{BpfEvent, Program, ProgramError, log_error};
use iotap_common::maps::DROPPED;
use iotap_core::{Bus, ConfigError, Event, EventCounters, ModuleConfig};
use tokio::sync::{mpsc, watch};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Log every received event at info level.
    pub log_events: bool,
    /// Override the kernel symbol of the read syscall.
    pub read_symbol: Option<String>,
    /// Override the kernel symbol of the write syscall.
    pub write_symbol: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_events: true,
            read_symbol: None,
            write_symbol: None,
        }
    }
}

impl TryFrom<&ModuleConfig> for Config {
    type Error = ConfigError;

    fn try_from(config: &ModuleConfig) -> Result<Self, Self::Error> {
        Ok(Config {
            log_events: config.with_default("log_events", true)?,
            read_symbol: config.optional("read_symbol")?,
            write_symbol: config.optional("write_symbol")?,
        })
    }
}

/// Consume the records forwarded by the perf readers until `shutdown` fires
/// or every sender is gone.
///
/// Each record becomes an [`Event`] which is counted, optionally logged and
/// published on the `bus`.
pub async fn monitor_task(
    mut rx: mpsc::Receiver<Result<BpfEvent, ProgramError>>,
    bus: Bus,
    counters: Arc<EventCounters>,
    config: Config,
    mut shutdown: watch::Receiver<()>,
) {
    loop {
        let record = tokio::select! {
            record = rx.recv() => match record {
                Some(record) => record,
                None => break,
            },
            _ = shutdown.changed() => break,
        };
        if let Some(event) = handle_record(record, &counters, config.log_events) {
            bus.send(event);
        }
    }
    log::debug!("{} stopped", crate::MODULE_NAME);
}

/// Malformed records are logged and skipped.
fn handle_record(
    record: Result<BpfEvent, ProgramError>,
    counters: &EventCounters,
    log_events: bool,
) -> Option<Event> {
    match record {
        Ok(BpfEvent { timestamp, raw }) => {
            let event = Event::from_raw(raw, timestamp);
            counters.add_received(1);
            if log_events {
                log::info!("{}", event.log_line());
            }
            Some(event)
        }
        Err(err) => {
            log_error("Error reading record", err);
            None
        }
    }
}

/// Periodically sum the kernel drop counter and copy the perf ring losses
/// into `counters`, warning when new drops happened.
pub async fn watch_drops(
    program: &mut Program,
    interval: Duration,
    counters: Arc<EventCounters>,
) -> Result<(), ProgramError> {
    let stats = program.stats();
    program
        .poll_per_cpu_counter(DROPPED, interval, move |dropped| {
            counters.set_lost(stats.lost());
            let previous = counters.set_kernel_dropped(dropped);
            if let Some(new) = new_drops(previous, dropped) {
                log::warn!("Dropped {new} events: perf buffer full");
            }
        })
        .await
}

fn new_drops(previous: u64, current: u64) -> Option<u64> {
    current.checked_sub(previous).filter(|new| *new > 0)
}
