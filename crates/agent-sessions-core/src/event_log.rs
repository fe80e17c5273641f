//! Ordered event history with live broadcast.

use std::sync::{OnceLock, RwLock};

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{Event, StoreError};

/// Capacity of the live channel. Slow subscribers skip ahead past lagged events.
const BROADCAST_CAPACITY: usize = 256;

/// Append-only event log for a single session.
///
/// New subscribers receive the stored history and then switch
/// seamlessly to live appends, without gaps or duplicates.
///
/// The live channel is allocated on first subscription, so logs nobody
/// watches cost only their history.
pub struct EventLog {
    history: RwLock<Vec<Event>>,
    sender: OnceLock<broadcast::Sender<Event>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::from_events(Vec::new())
    }

    /// Create a log seeded with existing history.
    #[must_use]
    pub fn from_events(events: Vec<Event>) -> Self {
        Self {
            history: RwLock::new(events),
            sender: OnceLock::new(),
        }
    }

    /// Append an event and notify live listeners. Returns the new length.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the history lock is poisoned.
    pub fn push(&self, event: Event) -> Result<usize, StoreError> {
        let mut history = self.history.write().map_err(StoreError::unavailable)?;
        history.push(event.clone());
        // Sent under the write lock so a concurrent subscriber sees it exactly once.
        if let Some(sender) = self.sender.get() {
            let _ = sender.send(event);
        }
        Ok(history.len())
    }

    /// Snapshot of the full history, in append order.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the history lock is poisoned.
    pub fn snapshot(&self) -> Result<Vec<Event>, StoreError> {
        Ok(self
            .history
            .read()
            .map_err(StoreError::unavailable)?
            .clone())
    }

    /// Number of stored events.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the history lock is poisoned.
    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.history.read().map_err(StoreError::unavailable)?.len())
    }

    /// Whether the log holds no events.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the history lock is poisoned.
    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Receiver for live appends only.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.live().subscribe()
    }

    /// Whether anyone has ever subscribed.
    #[must_use]
    pub fn is_watched(&self) -> bool {
        self.sender.get().is_some()
    }

    fn live(&self) -> &broadcast::Sender<Event> {
        self.sender
            .get_or_init(|| broadcast::channel(BROADCAST_CAPACITY).0)
    }

    /// Stream that yields history first, then live appends.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` if the history lock is poisoned.
    pub fn subscribe_with_history(
        &self,
    ) -> Result<futures::stream::BoxStream<'static, Event>, StoreError> {
        let (history, rx) = {
            let guard = self.history.read().map_err(StoreError::unavailable)?;
            (guard.clone(), self.live().subscribe())
        };

        let hist = futures::stream::iter(history);
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(event) => Some(event),
                Err(e) => {
                    tracing::warn!("event subscriber lagged: {e}");
                    None
                }
            }
        });

        Ok(Box::pin(hist.chain(live)))
    }
}
