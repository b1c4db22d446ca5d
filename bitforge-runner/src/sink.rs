//! Event sink
//!
//! The sink is the only way events leave a pipeline run. Producers (the
//! executor and the per-stream reader tasks) push into it; exactly one
//! consumer drains it in arrival order.
//!
//! The trait keeps "how events leave the pipeline" apart from "how the
//! pipeline produces them". Production uses a bounded Tokio channel.

use async_trait::async_trait;
use bitforge_core::domain::event::Event;
use thiserror::Error;
use tokio::sync::mpsc;

/// Returned when the consumer side of a sink no longer exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event consumer has gone away")]
pub struct SinkClosed;

/// Destination for the events of one run
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Appends an event, waiting for room if the sink is bounded
    ///
    /// # Errors
    /// [`SinkClosed`] if nobody will ever read the event
    async fn emit(&self, event: Event) -> Result<(), SinkClosed>;
}

/// Channel-backed sink handed to the pipeline
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Event>,
}

/// Consumer half of a [`ChannelSink`]
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<Event>,
}

/// Creates a connected sink/receiver pair
pub fn channel(capacity: usize) -> (ChannelSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelSink { tx }, EventReceiver { rx })
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, event: Event) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }
}

impl EventReceiver {
    /// Next event in arrival order, or `None` once every producer is gone
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Drains the remaining events until every producer is dropped
    pub async fn collect(mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }
}
