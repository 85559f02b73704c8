use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::Event;

#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Arc<Event>>,
}

/// Describes a bus error.
#[derive(Error, Debug)]
pub enum BusError {
    #[error("bus is stopped")]
    Stopped,
}

/// Events retained for slow receivers. tokio rounds the capacity up to a
/// power of two.
const BUFFER_SIZE: usize = 1024;

impl Bus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(BUFFER_SIZE);
        Self { tx }
    }

    /// Publish an event. Having no subscriber isn't an error.
    pub fn send(&self, event: Event) {
        log::trace!(target: "event", "{event:?}");
        let _ = self.tx.send(Arc::new(event));
    }

    pub fn get_receiver(&self) -> broadcast::Receiver<Arc<Event>> {
        self.tx.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}
