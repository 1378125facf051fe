//! Typed, per-record-kind publish/subscribe bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Lanes
//!
//! Each [`RecordKind`] has its own broadcast lane, so a subscriber to
//! `PhysiologyWaveform` never wakes up for `Status` traffic.  A separate
//! *tap* lane carries every event regardless of kind; the WebSocket gateway
//! listens there.
//!
//! # Participants
//!
//! Modules do not publish on the raw [`EventBus`].  They hold a
//! [`BusParticipant`], which stamps every outgoing record with the
//! participant's source tag and hides the participant's own publications from
//! its subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use ammbridge_types::{BridgeError, Event, Record, RecordKind};
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Write side of the message bus as seen by the translation engine.
///
/// One call per record; the record kind selects the lane.  Implementations
/// must be callable from any thread.
pub trait MessageBus: Send + Sync {
    /// Publish `record` on the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bus`] when the transport rejects the record.
    fn write(&self, record: Record) -> Result<(), BridgeError>;
}

/// In-process event bus. Clone it cheaply – all clones share the same
/// underlying broadcast channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    tap: broadcast::Sender<Event>,
    lanes: HashMap<RecordKind, broadcast::Sender<Event>>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every lane independently.
    pub fn new(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity);
        let lanes = RecordKind::ALL
            .iter()
            .map(|kind| (*kind, broadcast::channel(capacity).0))
            .collect();
        Self { tap, lanes }
    }

    /// Publish `event` on the lane matching its payload kind and on the tap.
    ///
    /// Returns the number of lane receivers that were handed the event.
    /// Publishing with nobody listening is a normal condition and yields
    /// `Ok(0)`.
    pub fn publish(&self, event: Event) -> Result<usize, BridgeError> {
        let kind = event.payload.kind();
        let lane = self.lane(kind)?;
        // A send error only means the channel has no receivers right now.
        let _ = self.tap.send(event.clone());
        let delivered = lane.send(event).unwrap_or(0);
        trace!(?kind, delivered, "event published");
        Ok(delivered)
    }

    /// Subscribe to one [`RecordKind`] lane.
    pub fn subscribe_to(&self, kind: RecordKind) -> Result<KindReceiver, BridgeError> {
        Ok(KindReceiver {
            kind,
            receiver: self.lane(kind)?.subscribe(),
        })
    }

    /// Subscribe to every event on the bus, whatever its kind.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tap.subscribe()
    }

    fn lane(&self, kind: RecordKind) -> Result<&broadcast::Sender<Event>, BridgeError> {
        self.lanes
            .get(&kind)
            .ok_or_else(|| BridgeError::Bus(format!("no lane for record kind {kind:?}")))
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Per-kind receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`RecordKind`] lane.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct KindReceiver {
    kind: RecordKind,
    receiver: broadcast::Receiver<Event>,
}

impl KindReceiver {
    /// Wait for the next event on this lane.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

/// A named publisher/subscriber attached to an [`EventBus`].
#[derive(Clone, Debug)]
pub struct BusParticipant {
    bus: Arc<EventBus>,
    source: String,
}

impl BusParticipant {
    pub fn new(bus: Arc<EventBus>, source: impl Into<String>) -> Self {
        Self {
            bus,
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Subscribe to `kind`, skipping events this participant published itself.
    pub fn subscribe(&self, kind: RecordKind) -> Result<Subscription, BridgeError> {
        Ok(Subscription {
            source: self.source.clone(),
            receiver: self.bus.subscribe_to(kind)?,
        })
    }
}

impl MessageBus for BusParticipant {
    fn write(&self, record: Record) -> Result<(), BridgeError> {
        self.bus
            .publish(Event::new(self.source.clone(), record))
            .map(|_| ())
    }
}

/// A lane subscription that filters out the owning participant's own events.
pub struct Subscription {
    source: String,
    receiver: KindReceiver,
}

impl Subscription {
    /// Wait for the next foreign event on this lane.
    ///
    /// Returns `None` when the bus is closed and no further events will arrive.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.source == self.source => continue,
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(kind = ?self.receiver.kind(), lagged_by = n, "subscription lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.receiver.kind()
    }
}
