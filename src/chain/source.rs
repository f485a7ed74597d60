//! Event Source Adapter interface.
//!
//! Everything the notification core needs from the chain goes through
//! [`EventSource`], so the provider connection, contract address and
//! transport are owned by the implementation.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;

use crate::chain::types::{BlockContext, ChainEvent, DisputeSnapshot, EventKind, Period};
use crate::notify::NotifyError;

/// Range and topic filter for a historical query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventFilter {
    pub from_block: u64,
    /// Only events about this dispute.
    pub dispute_id: Option<u64>,
}

impl EventFilter {
    pub fn from_block(from_block: u64) -> Self {
        Self {
            from_block,
            dispute_id: None,
        }
    }

    pub fn dispute(mut self, dispute_id: u64) -> Self {
        self.dispute_id = Some(dispute_id);
        self
    }

    pub fn matches(&self, event: &ChainEvent) -> bool {
        event.position.block_number >= self.from_block
            && self
                .dispute_id
                .map_or(true, |id| event.dispute_id() == Some(id))
    }
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Historical events of one kind, in chain order.
    async fn past_events(
        &self,
        kind: EventKind,
        filter: EventFilter,
    ) -> Result<Vec<ChainEvent>, NotifyError>;

    /// All contract events from `from_block` onwards, historical first, then live.
    async fn subscribe_all_events(&self, from_block: u64)
        -> Result<EventSubscription, NotifyError>;

    async fn block(&self, block_number: u64) -> Result<BlockContext, NotifyError>;

    /// Period and round count of a dispute.
    async fn dispute_state(&self, dispute_id: u64) -> Result<DisputeSnapshot, NotifyError>;

    /// Period only. Cheaper than [`dispute_state`](Self::dispute_state) where
    /// the rounds are not needed.
    async fn dispute_period(&self, dispute_id: u64) -> Result<Period, NotifyError>;

    async fn current_block_number(&self) -> Result<u64, NotifyError>;
}

/// A live event feed. Dropping it (or calling [`unsubscribe`](Self::unsubscribe))
/// stops the background task feeding it.
pub struct EventSubscription {
    events: BoxStream<'static, Result<ChainEvent, NotifyError>>,
    feeder: Option<JoinHandle<()>>,
}

impl EventSubscription {
    pub fn new(events: BoxStream<'static, Result<ChainEvent, NotifyError>>) -> Self {
        Self {
            events,
            feeder: None,
        }
    }

    /// Attach the task that feeds `events`; it is aborted on unsubscribe.
    pub fn with_feeder(mut self, feeder: JoinHandle<()>) -> Self {
        self.feeder = Some(feeder);
        self
    }

    pub fn unsubscribe(mut self) {
        self.stop_feeder();
    }

    fn stop_feeder(&mut self) {
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

impl Stream for EventSubscription {
    type Item = Result<ChainEvent, NotifyError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.stop_feeder();
    }
}
