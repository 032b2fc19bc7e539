//! Event channel between engine operations and whoever renders them.

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::{Event, OperationEvent, OperationSummary, Phase};

/// Cloneable sending half held by every operation.
///
/// Sends never block and never fail: with the receiver gone, events are
/// dropped and the operation carries on.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }

    /// `operation` ("scan", "dedupe", ...) has begun
    pub fn started(&self, operation: &str, dry_run: bool) {
        self.send(Event::Operation(OperationEvent::Started {
            operation: operation.to_string(),
            dry_run,
        }));
    }

    pub fn phase(&self, phase: Phase) {
        self.send(Event::Operation(OperationEvent::PhaseChanged { phase }));
    }

    /// Close an operation. A cancelled run announces the cancellation
    /// before its (partial) summary.
    pub fn finished(&self, summary: OperationSummary, cancelled: bool) {
        if cancelled {
            self.send(Event::Operation(OperationEvent::Cancelled));
        }
        self.send(Event::Operation(OperationEvent::Completed { summary }));
    }
}

/// Receiving half, drained by a front end on its own thread
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Events until every sender is dropped
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }
}

/// Factory for connected sender/receiver pairs.
pub struct EventChannel;

impl EventChannel {
    /// Unbounded: a slow renderer must never stall a move or delete.
    pub fn new() -> (EventSender, EventReceiver) {
        let (sender, receiver) = unbounded();
        (
            EventSender { inner: sender },
            EventReceiver { inner: receiver },
        )
    }
}

/// Sender whose events go nowhere; the default for library callers
pub fn null_sender() -> EventSender {
    let (sender, _receiver) = EventChannel::new();
    sender
}
