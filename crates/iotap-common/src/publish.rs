use crate::{decide, ControlTables, Decision, OperationKind, RawEvent};

/// Transport towards the consumer.
pub trait EventOutput {
    /// Write the whole record or nothing. Must never block: when there's no
    /// room the call fails immediately with an error code.
    fn output(&self, event: &RawEvent) -> Result<(), i64>;

    /// Account a record lost by [`EventOutput::output`].
    fn record_drop(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Dropped,
}

/// Best effort, at-most-once delivery of `event`.
///
/// A failed write is accounted with [`EventOutput::record_drop`] and the
/// record is lost. Nothing is retried or buffered.
#[inline(always)]
pub fn publish<O: EventOutput + ?Sized>(output: &O, event: &RawEvent) -> Delivery {
    match output.output(event) {
        Ok(()) => Delivery::Delivered,
        Err(_) => {
            output.record_drop();
            Delivery::Dropped
        }
    }
}

/// Run the pipeline for one invocation of `kind` by `pid`.
///
/// Returns `None` when the invocation was filtered out: in that case no
/// record was built and the transport wasn't touched.
#[inline(always)]
pub fn on_invocation<T, O>(tables: &T, output: &O, pid: u32, kind: OperationKind) -> Option<Delivery>
where
    T: ControlTables + ?Sized,
    O: EventOutput + ?Sized,
{
    match decide(tables, pid) {
        Decision::Suppress => None,
        Decision::Emit => Some(publish(output, &RawEvent::new(pid, kind))),
    }
}
