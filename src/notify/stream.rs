//! Notification Stream Assembler.
//!
//! Owns the visible notification list and its lifecycle:
//!
//! ```text
//! Uninitialized ──start()──▶ BackfillInFlight ──backfill ok + live attached──▶ Live
//!        │                          │                                           │
//!        └──────────────────────────┴────────────── shutdown() ─────────────────┴──▶ Terminated
//! ```
//!
//! Backfill derives every event in the lookback window in chain order,
//! drops acknowledged keys and publishes the result most-recent-first.
//! Live events are then processed one at a time and prepended. The visible
//! list lives in a `watch` channel; every mutation happens under the
//! channel's write lock after checking the liveness guard, so consumers
//! never see a partial update and nothing lands after `shutdown()`.

use alloy::primitives::Address;
use futures::StreamExt;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::chain::source::{EventFilter, EventSource, EventSubscription};
use crate::chain::types::{ChainEvent, EventKind};
use crate::notify::ack::{partition_acknowledged, AcknowledgmentStore};
use crate::notify::derive::{Deriver, Notification};
use crate::notify::resolver::ContextResolver;
use crate::notify::NotifyError;

/// Blocks covered by the startup backfill unless configured otherwise.
pub const DEFAULT_LOOKBACK_BLOCKS: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Phase {
    #[default]
    Uninitialized,
    BackfillInFlight,
    Live,
    Terminated,
}

/// What the presentation layer observes.
#[derive(Debug, Clone, Default)]
pub struct NotificationView {
    pub phase: Phase,
    /// `None` until a backfill has completed: "not determined" is distinct
    /// from "no notifications".
    pub notifications: Option<Vec<Notification>>,
    /// Last backfill or live-mode failure.
    pub last_error: Option<NotifyError>,
}

impl NotificationView {
    /// Visible notifications addressed to `account`.
    pub fn notifications_for(&self, account: &Address) -> Vec<&Notification> {
        self.notifications
            .iter()
            .flatten()
            .filter(|n| n.account == *account)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.notifications.as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Invoked with each batch of newly visible notifications (in derivation
/// order) and a handle for acknowledging them.
pub type OnNewNotifications = Arc<dyn Fn(&[Notification], &Acknowledger) + Send + Sync>;

#[derive(Clone)]
pub struct StreamOptions {
    pub lookback_blocks: u64,
    /// First block of the live subscription.
    pub live_from_block: u64,
    pub on_new: Option<OnNewNotifications>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            lookback_blocks: DEFAULT_LOOKBACK_BLOCKS,
            live_from_block: 0,
            on_new: None,
        }
    }
}

impl StreamOptions {
    pub fn lookback_blocks(mut self, blocks: u64) -> Self {
        self.lookback_blocks = blocks;
        self
    }

    pub fn live_from_block(mut self, block: u64) -> Self {
        self.live_from_block = block;
        self
    }

    pub fn on_new(mut self, callback: OnNewNotifications) -> Self {
        self.on_new = Some(callback);
        self
    }
}

/// Cleared exactly once, on teardown. Work resuming after that is discarded.
#[derive(Debug, Clone)]
struct LivenessGuard(Arc<AtomicBool>);

impl LivenessGuard {
    fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    fn is_live(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn invalidate(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Shared {
    store: Arc<dyn AcknowledgmentStore>,
    view: watch::Sender<NotificationView>,
    guard: LivenessGuard,
    /// Keys handed out this session (including acknowledged ones); the live
    /// path never delivers them again.
    delivered: Mutex<HashSet<String>>,
    on_new: Option<OnNewNotifications>,
}

impl Shared {
    /// Mutate the view if still mounted. `f` reports whether it changed anything.
    fn apply(&self, f: impl FnOnce(&mut NotificationView) -> bool) -> bool {
        let mut applied = false;
        self.view.send_if_modified(|view| {
            if !self.guard.is_live() {
                return false;
            }
            applied = f(view);
            applied
        });
        applied
    }

    fn record_error(&self, err: &NotifyError) {
        self.apply(|view| {
            view.last_error = Some(err.clone());
            true
        });
    }

    fn publish_backfill(self: &Arc<Self>, backfill: Backfill) -> bool {
        let Backfill {
            notifications: collected,
            acknowledged,
        } = backfill;
        let mut visible = collected.clone();
        visible.reverse();
        let published = self.apply(|view| {
            if let Ok(mut delivered) = self.delivered.lock() {
                delivered.extend(visible.iter().map(|n| n.key.clone()));
                delivered.extend(acknowledged);
            }
            view.notifications = Some(visible);
            view.last_error = None;
            true
        });
        if published {
            info!(notifications = collected.len(), "backfill published");
            self.notify_new(&collected);
        }
        published
    }

    fn prepend_live(self: &Arc<Self>, derived: Vec<Notification>) {
        let mut fresh = Vec::new();
        self.apply(|view| {
            if let Ok(mut delivered) = self.delivered.lock() {
                fresh = derived
                    .into_iter()
                    .filter(|n| delivered.insert(n.key.clone()))
                    .collect();
            }
            if fresh.is_empty() {
                return false;
            }
            let list = view.notifications.get_or_insert_with(Vec::new);
            list.splice(0..0, fresh.iter().rev().cloned());
            true
        });
        if !fresh.is_empty() {
            debug!(notifications = fresh.len(), "live notifications prepended");
            self.notify_new(&fresh);
        }
    }

    fn notify_new(self: &Arc<Self>, notifications: &[Notification]) {
        if notifications.is_empty() {
            return;
        }
        if let Some(callback) = &self.on_new {
            callback(
                notifications,
                &Acknowledger {
                    shared: Arc::clone(self),
                },
            );
        }
    }

    async fn acknowledge(&self, key: &str) -> Result<(), NotifyError> {
        // Durable first: the entry stays visible if the store write fails.
        self.store.acknowledge(key).await?;
        if let Ok(mut delivered) = self.delivered.lock() {
            delivered.insert(key.to_string());
        }
        let removed = self.apply(|view| {
            let Some(list) = view.notifications.as_mut() else {
                return false;
            };
            match list.iter().position(|n| n.key == key) {
                Some(index) => {
                    list.remove(index);
                    true
                }
                None => false,
            }
        });
        info!(key = %key, removed = removed, "notification acknowledged");
        Ok(())
    }
}

/// Result of a backfill pass.
struct Backfill {
    notifications: Vec<Notification>,
    /// Keys derived but hidden because they were already acknowledged. The
    /// live replay must not bring them back.
    acknowledged: Vec<String>,
}

/// Cloneable handle for acknowledging notifications.
#[derive(Clone)]
pub struct Acknowledger {
    shared: Arc<Shared>,
}

impl Acknowledger {
    /// Persist `key` as acknowledged and remove it from the visible list.
    /// Idempotent.
    pub async fn acknowledge(&self, key: &str) -> Result<(), NotifyError> {
        self.shared.acknowledge(key).await
    }
}

pub struct NotificationStream {
    shared: Arc<Shared>,
    source: Arc<dyn EventSource>,
    deriver: Arc<Deriver>,
    lookback_blocks: u64,
    live_from_block: u64,
    live_task: Mutex<Option<JoinHandle<Result<(), NotifyError>>>>,
    live_abort: Mutex<Option<AbortHandle>>,
}

impl NotificationStream {
    pub fn new(
        source: Arc<dyn EventSource>,
        store: Arc<dyn AcknowledgmentStore>,
        deriver: Deriver,
        options: StreamOptions,
    ) -> Self {
        let (view, _) = watch::channel(NotificationView::default());
        Self {
            shared: Arc::new(Shared {
                store,
                view,
                guard: LivenessGuard::new(),
                delivered: Mutex::new(HashSet::new()),
                on_new: options.on_new,
            }),
            source,
            deriver: Arc::new(deriver),
            lookback_blocks: options.lookback_blocks,
            live_from_block: options.live_from_block,
            live_task: Mutex::new(None),
            live_abort: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationView> {
        self.shared.view.subscribe()
    }

    /// Current view.
    pub fn snapshot(&self) -> NotificationView {
        self.shared.view.borrow().clone()
    }

    pub fn phase(&self) -> Phase {
        self.shared.view.borrow().phase
    }

    pub fn acknowledger(&self) -> Acknowledger {
        Acknowledger {
            shared: Arc::clone(&self.shared),
        }
    }

    pub async fn acknowledge(&self, key: &str) -> Result<(), NotifyError> {
        self.shared.acknowledge(key).await
    }

    /// Run the backfill, publish it and attach live mode.
    ///
    /// On failure the error is returned and recorded in the view, and the
    /// stream stays in `BackfillInFlight`.
    pub async fn start(&self) -> Result<(), NotifyError> {
        self.transition(Phase::Uninitialized, Phase::BackfillInFlight)?;

        let collected = match self.backfill().await {
            Ok(backfill) => backfill,
            Err(e) => {
                error!(error = %e, "backfill failed");
                self.shared.record_error(&e);
                return Err(e);
            }
        };
        if !self.shared.publish_backfill(collected) {
            debug!("backfill finished after teardown, discarded");
            return Err(NotifyError::Terminated);
        }

        let subscription = match self.source.subscribe_all_events(self.live_from_block).await {
            Ok(subscription) => subscription,
            Err(e) => {
                error!(error = %e, "failed to attach live subscription");
                self.shared.record_error(&e);
                return Err(e);
            }
        };

        {
            let mut abort = self
                .live_abort
                .lock()
                .map_err(|_| NotifyError::Terminated)?;
            if !self.shared.guard.is_live() {
                subscription.unsubscribe();
                return Err(NotifyError::Terminated);
            }
            let task = tokio::spawn(run_live(
                Arc::clone(&self.shared),
                Arc::clone(&self.source),
                Arc::clone(&self.deriver),
                subscription,
            ));
            *abort = Some(task.abort_handle());
            if let Ok(mut slot) = self.live_task.lock() {
                *slot = Some(task);
            }
        }

        self.transition(Phase::BackfillInFlight, Phase::Live)?;
        info!(from_block = self.live_from_block, "live mode attached");
        Ok(())
    }

    /// Wait for live mode to end. Returns the failure that ended it.
    pub async fn wait(&self) -> Result<(), NotifyError> {
        let task = self
            .live_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match task {
            Some(task) => match task.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(NotifyError::unavailable(e)),
            },
            None => Ok(()),
        }
    }

    /// Tear down: stop the live listener and discard any in-flight work.
    pub fn shutdown(&self) {
        self.shared.view.send_modify(|view| {
            self.shared.guard.invalidate();
            view.phase = Phase::Terminated;
        });
        if let Ok(mut abort) = self.live_abort.lock() {
            if let Some(task) = abort.take() {
                task.abort();
            }
        }
        info!("notification stream terminated");
    }

    fn transition(&self, from: Phase, to: Phase) -> Result<(), NotifyError> {
        let mut actual = from;
        let moved = self.shared.apply(|view| {
            actual = view.phase;
            if view.phase != from {
                return false;
            }
            view.phase = to;
            true
        });
        if moved {
            return Ok(());
        }
        if !self.shared.guard.is_live() {
            return Err(NotifyError::Terminated);
        }
        Err(NotifyError::InvalidState {
            expected: from,
            actual,
        })
    }

    async fn backfill(&self) -> Result<Backfill, NotifyError> {
        let head = self.source.current_block_number().await?;
        let filter = EventFilter::from_block(head.saturating_sub(self.lookback_blocks));

        let (appeals, draws, shifts) = futures::try_join!(
            self.source.past_events(EventKind::AppealDecision, filter),
            self.source.past_events(EventKind::Draw, filter),
            self.source.past_events(EventKind::TokenAndEthShift, filter),
        )?;
        let mut events: Vec<ChainEvent> = appeals.into_iter().chain(draws).chain(shifts).collect();
        events.sort_by_key(|e| e.position);
        info!(
            from_block = filter.from_block,
            head = head,
            events = events.len(),
            "backfilling notifications"
        );

        let resolver = ContextResolver::new(Arc::clone(&self.source));
        let mut collected = Vec::new();
        let mut acknowledged = Vec::new();
        for event in &events {
            let derived = match self.deriver.derive(event, &resolver).await {
                Ok(derived) => derived,
                Err(e) if e.is_skippable() => {
                    warn!(error = %e, event = %event, "skipping event");
                    continue;
                }
                Err(e) => return Err(e),
            };
            let (fresh, suppressed) =
                partition_acknowledged(derived, self.shared.store.as_ref()).await?;
            collected.extend(fresh);
            acknowledged.extend(suppressed);
        }
        Ok(Backfill {
            notifications: collected,
            acknowledged,
        })
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        if self.shared.guard.is_live() {
            self.shutdown();
        }
    }
}

/// Live listener: one event at a time, each fully processed before the next.
/// Live notifications are not checked against the acknowledgment store.
async fn run_live(
    shared: Arc<Shared>,
    source: Arc<dyn EventSource>,
    deriver: Arc<Deriver>,
    mut subscription: EventSubscription,
) -> Result<(), NotifyError> {
    while let Some(item) = subscription.next().await {
        if !shared.guard.is_live() {
            return Ok(());
        }
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "live subscription failed");
                shared.record_error(&e);
                return Err(e);
            }
        };
        if event.kind().is_none() {
            debug!(event = %event, "ignoring unhandled event kind");
            continue;
        }

        debug!(event = %event, "live event");
        let resolver = ContextResolver::new(Arc::clone(&source));
        match deriver.derive(&event, &resolver).await {
            Ok(derived) => shared.prepend_live(derived),
            Err(e) => {
                warn!(error = %e, event = %event, "skipping live event");
                if !e.is_skippable() {
                    shared.record_error(&e);
                }
            }
        }
    }

    let err = NotifyError::unavailable("live event stream ended");
    warn!("live event stream ended");
    shared.record_error(&err);
    Err(err)
}
