//! The [`BpfSender`] trait is used by [`crate::Program`] to send events and errors.
//!
//! [`BpfSender::send`] must not block since it's called from the perf reader tasks.

use tokio::sync::mpsc;

use crate::ProgramError;

pub trait BpfSender<T>: Clone + Send + 'static {
    /// Must not block since it can be used in async contexts
    fn send(&mut self, data: Result<T, ProgramError>);
}

/// Simple implementation for tokio::mpsc bounded channels.
/// Sending with full channel will drop messages.
impl<T: 'static + Send> BpfSender<T> for mpsc::Sender<Result<T, ProgramError>> {
    fn send(&mut self, data: Result<T, ProgramError>) {
        if self.try_send(data).is_err() {
            log::warn!("channel full, dropping event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::SystemTime;

    use iotap_common::{OperationKind, RawEvent};

    use super::*;
    use crate::BpfEvent;

    fn event(pid: u32) -> BpfEvent {
        BpfEvent {
            timestamp: SystemTime::UNIX_EPOCH,
            raw: RawEvent::new(pid, OperationKind::Read),
        }
    }

    #[tokio::test]
    async fn full_channel_drops_without_blocking() {
        let (mut tx, mut rx) = mpsc::channel::<Result<BpfEvent, ProgramError>>(1);
        BpfSender::send(&mut tx, Ok(event(1)));
        BpfSender::send(&mut tx, Ok(event(2)));
        drop(tx);

        assert_eq!(rx.recv().await.unwrap().unwrap().raw.pid, 1);
        assert!(rx.recv().await.is_none());
    }
}
