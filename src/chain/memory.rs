//! In-memory event source for tests and dry runs.
//!
//! Holds a fixed event log plus block and dispute tables, and counts how
//! often each lookup is made so callers can check memoisation.

use alloy::primitives::Address;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::chain::source::{EventFilter, EventSource, EventSubscription};
use crate::chain::types::{
    BlockContext, ChainEvent, DisputeSnapshot, EventKind, EventPayload, EventPosition, Period,
};
use crate::notify::NotifyError;

type LiveSender = mpsc::UnboundedSender<Result<ChainEvent, NotifyError>>;

#[derive(Debug, Default)]
pub struct CallCounts {
    pub past_events: AtomicUsize,
    pub blocks: AtomicUsize,
    pub disputes: AtomicUsize,
    pub periods: AtomicUsize,
    pub subscriptions: AtomicUsize,
}

#[derive(Default)]
pub struct MemoryEventSource {
    events: Mutex<Vec<ChainEvent>>,
    blocks: DashMap<u64, DateTime<Utc>>,
    disputes: DashMap<u64, DisputeSnapshot>,
    head: AtomicU64,
    unavailable: AtomicBool,
    live: Mutex<Vec<LiveSender>>,
    pub calls: CallCounts,
}

impl MemoryEventSource {
    pub fn new(head: u64) -> Arc<Self> {
        let source = Self::default();
        source.head.store(head, Ordering::SeqCst);
        Arc::new(source)
    }

    /// Add a historical event. Its block gets `timestamp` unless already known.
    pub fn push_event(&self, event: ChainEvent, timestamp: DateTime<Utc>) {
        self.blocks
            .entry(event.position.block_number)
            .or_insert(timestamp);
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
            events.sort_by_key(|e| e.position);
        }
    }

    pub fn set_block(&self, number: u64, timestamp: DateTime<Utc>) {
        self.blocks.insert(number, timestamp);
    }

    pub fn set_dispute(&self, dispute_id: u64, period: Period, vote_round_count: u64) {
        self.disputes.insert(
            dispute_id,
            DisputeSnapshot {
                period,
                vote_round_count,
            },
        );
    }

    /// Make every call fail with `SourceUnavailable` until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Deliver an event to every open live subscription (and the history).
    pub fn push_live(&self, event: ChainEvent, timestamp: DateTime<Utc>) {
        self.push_event(event.clone(), timestamp);
        self.broadcast(Ok(event));
    }

    /// Fail every open live subscription.
    pub fn fail_live(&self, reason: &str) {
        self.broadcast(Err(NotifyError::unavailable(reason)));
    }

    fn broadcast(&self, item: Result<ChainEvent, NotifyError>) {
        if let Ok(mut live) = self.live.lock() {
            live.retain(|tx| tx.send(item.clone()).is_ok());
        }
    }

    fn check_available(&self) -> Result<(), NotifyError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(NotifyError::unavailable("memory source switched off"));
        }
        Ok(())
    }

    fn snapshot_events(&self) -> Vec<ChainEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl EventSource for MemoryEventSource {
    async fn past_events(
        &self,
        kind: EventKind,
        filter: EventFilter,
    ) -> Result<Vec<ChainEvent>, NotifyError> {
        self.calls.past_events.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .snapshot_events()
            .into_iter()
            .filter(|e| e.kind() == Some(kind) && filter.matches(e))
            .collect())
    }

    async fn subscribe_all_events(
        &self,
        from_block: u64,
    ) -> Result<EventSubscription, NotifyError> {
        self.calls.subscriptions.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        for event in self.snapshot_events() {
            if event.position.block_number >= from_block {
                let _ = tx.send(Ok(event));
            }
        }
        if let Ok(mut live) = self.live.lock() {
            live.push(tx);
        }
        Ok(EventSubscription::new(UnboundedReceiverStream::new(rx).boxed()))
    }

    async fn block(&self, block_number: u64) -> Result<BlockContext, NotifyError> {
        self.calls.blocks.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let timestamp = self
            .blocks
            .get(&block_number)
            .map(|t| *t)
            .ok_or_else(|| NotifyError::unavailable(format!("unknown block {block_number}")))?;
        Ok(BlockContext {
            number: block_number,
            timestamp,
        })
    }

    async fn dispute_state(&self, dispute_id: u64) -> Result<DisputeSnapshot, NotifyError> {
        self.calls.disputes.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.disputes
            .get(&dispute_id)
            .map(|d| *d)
            .ok_or_else(|| NotifyError::unavailable(format!("unknown dispute {dispute_id}")))
    }

    async fn dispute_period(&self, dispute_id: u64) -> Result<Period, NotifyError> {
        self.calls.periods.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        self.disputes
            .get(&dispute_id)
            .map(|d| d.period)
            .ok_or_else(|| NotifyError::unavailable(format!("unknown dispute {dispute_id}")))
    }

    async fn current_block_number(&self) -> Result<u64, NotifyError> {
        self.check_available()?;
        Ok(self.head.load(Ordering::SeqCst))
    }
}

/// Shorthand constructors for test fixtures.
pub fn appeal_event(block: u64, tx: u64, log: u64, dispute_id: u64) -> ChainEvent {
    ChainEvent::new(
        EventPosition::new(block, tx, log),
        EventPayload::AppealDecision { dispute_id },
    )
}

pub fn draw_event(
    block: u64,
    tx: u64,
    log: u64,
    dispute_id: u64,
    appeal: u64,
    address: Address,
) -> ChainEvent {
    ChainEvent::new(
        EventPosition::new(block, tx, log),
        EventPayload::Draw {
            dispute_id,
            appeal,
            address,
        },
    )
}

pub fn shift_event(
    block: u64,
    tx: u64,
    log: u64,
    dispute_id: u64,
    address: Address,
    eth_amount: i128,
    token_amount: i128,
) -> ChainEvent {
    ChainEvent::new(
        EventPosition::new(block, tx, log),
        EventPayload::TokenAndEthShift {
            dispute_id,
            address,
            eth_amount,
            token_amount,
        },
    )
}
