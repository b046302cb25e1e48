//! Broadcast channel for stock-level changes.
//!
//! The bus is in-memory and ephemeral: late subscribers see only future
//! events, lagged subscribers lose the oldest buffered events, and
//! nothing is persisted or replayed. One event is published per
//! committed booking.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use common::{ConcertId, TierId};

/// Default buffer size before slow receivers start lagging.
const DEFAULT_CAPACITY: usize = 256;

/// A stock-level change for one ticket tier.
///
/// `available_quantity` is the post-decrement value returned by the
/// reservation update, so consumers never have to re-read the counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChangeEvent {
    pub concert_id: ConcertId,
    pub tier_id: TierId,
    pub available_quantity: i32,
}

/// Broadcast bus for [`StockChangeEvent`]s.
///
/// Constructed once at startup and injected wherever stock changes are
/// published or observed. Cloning shares the underlying channel.
#[derive(Debug, Clone)]
pub struct StockChangeBus {
    sender: broadcast::Sender<StockChangeEvent>,
}

impl StockChangeBus {
    /// Creates a bus with the default buffer capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a bus buffering up to `capacity` events per receiver.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    ///
    /// Never blocks. Returns the number of receivers that got the
    /// event; zero when nobody is subscribed, which is not an error.
    pub fn publish(&self, event: StockChangeEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribes to future events.
    pub fn subscribe(&self) -> broadcast::Receiver<StockChangeEvent> {
        self.sender.subscribe()
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for StockChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
