//! Types shared by the iotap daemon, its modules and the engine API.
//!
//! - [`ModuleConfig`]: typed access to one section of the configuration file
//! - [`Event`]: a read/write invocation as seen by userspace
//! - [`Bus`]: fan-out of events to any number of consumers
//! - [`ProbeHandle`]: client side of the control actor owning the probe maps

mod bus;
mod config;
mod event;
mod probe;

use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};

pub use bus::{Bus, BusError};
pub use config::{ConfigError, ModuleConfig};
pub use event::{Event, Operation};
pub use probe::{EventCounters, ProbeCommand, ProbeError, ProbeHandle, ProbeStatus};

/// Receive an event from a [`broadcast::Receiver`]. Log a warning if we have lost messages.
pub async fn receive_from_broadcast(
    rx: &mut broadcast::Receiver<Arc<Event>>,
    consumer: &str,
) -> Result<Arc<Event>, BusError> {
    let mut lost: u64 = 0;
    loop {
        match rx.recv().await {
            Ok(value) => {
                if lost > 0 {
                    log::warn!(target: consumer, "broadcast channel lagged {lost} messages");
                }
                return Ok(value);
            }
            Err(RecvError::Lagged(lagged)) => lost += lagged,
            Err(RecvError::Closed) => return Err(BusError::Stopped),
        }
    }
}
