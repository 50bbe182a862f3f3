//! Sync lifecycle events
//!
//! The [`EventBus`] is a process-wide publish/subscribe channel for
//! per-source notifications. Publishing never blocks the coordinator; a
//! publish with no subscribers is a no-op. Events for one source are
//! delivered to each subscriber in publish order.
//!
//! ## Event Order
//!
//! ```text
//! SourceLoading ──► SourceLoaded(changed) ──► [SourceUpdated] ──► [SourceNeedsProcessed]
//!                   (once per load stage)     changed > 0          changed > 0 and the
//!                                                                  source's policy applies
//! ```

use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::{Stream, StreamExt};
use tracing::{trace, warn};

use crate::source::SourceKey;

/// Default buffer size for each subscriber
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events published by source coordinators
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A coordinator invocation began
    SourceLoading { source: SourceKey },

    /// A load stage finished (including `changed == 0`)
    SourceLoaded { source: SourceKey, changed: usize },

    /// A load stage merged at least one new or changed record
    SourceUpdated { source: SourceKey, changed: usize },

    /// Derived data for the source should be recomputed
    SourceNeedsProcessed { source: SourceKey },
}

impl SyncEvent {
    /// Source the event refers to
    pub fn source(&self) -> &SourceKey {
        match self {
            SyncEvent::SourceLoading { source }
            | SyncEvent::SourceLoaded { source, .. }
            | SyncEvent::SourceUpdated { source, .. }
            | SyncEvent::SourceNeedsProcessed { source } => source,
        }
    }

    /// Short event name (for logging)
    pub fn kind(&self) -> &'static str {
        match self {
            SyncEvent::SourceLoading { .. } => "loading",
            SyncEvent::SourceLoaded { .. } => "loaded",
            SyncEvent::SourceUpdated { .. } => "updated",
            SyncEvent::SourceNeedsProcessed { .. } => "needs_processed",
        }
    }
}

/// Broadcast bus for [`SyncEvent`]s
///
/// Cheap to clone; all clones publish to the same subscribers. Slow
/// subscribers that fall more than `capacity` events behind lose the oldest
/// events and are told how many were skipped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event without blocking
    pub fn publish(&self, event: SyncEvent) {
        trace!(source = %event.source(), kind = event.kind(), "publishing event");
        if self.tx.send(event).is_err() {
            trace!("no event subscribers");
        }
    }

    /// Subscribe to events for every source
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filter: None,
        }
    }

    /// Subscribe to events for one source
    pub fn subscribe_source(&self, source: SourceKey) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
            filter: Some(source),
        }
    }

    /// Number of live subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Receiving half of an [`EventBus`] subscription
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<SyncEvent>,
    filter: Option<SourceKey>,
}

impl EventSubscription {
    /// Wait for the next matching event
    ///
    /// # Returns
    ///
    /// - `Some(event)`: Next event (lagged events are skipped with a warning)
    /// - `None`: Every [`EventBus`] clone was dropped
    pub async fn recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next matching event if one is already buffered
    pub fn try_recv(&mut self) -> Option<SyncEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "event subscriber lagged, events dropped");
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every buffered matching event
    pub fn drain(&mut self) -> Vec<SyncEvent> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }

    /// Convert into a stream of matching events
    pub fn into_stream(self) -> Pin<Box<dyn Stream<Item = SyncEvent> + Send + 'static>> {
        let filter = self.filter;
        let stream = BroadcastStream::new(self.rx).filter_map(move |item| match item {
            Ok(event) if filter.as_ref().is_none_or(|key| event.source() == key) => Some(event),
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event stream lagged, events dropped");
                None
            }
        });
        Box::pin(stream)
    }

    fn matches(&self, event: &SyncEvent) -> bool {
        self.filter.as_ref().is_none_or(|key| event.source() == key)
    }
}
