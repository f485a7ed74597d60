//! Context Resolver: block timestamps, dispute state and past draws for
//! the events of one processing batch.
//!
//! Every lookup is memoised for the lifetime of the resolver, and
//! concurrent lookups of the same key share one external call. Create a
//! fresh resolver per batch so dispute state is re-read each pass.

use alloy::primitives::Address;
use dashmap::DashMap;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::chain::source::{EventFilter, EventSource};
use crate::chain::types::{BlockContext, DisputeSnapshot, EventKind, EventPayload, Period};
use crate::notify::NotifyError;

type Memo<K, V> = DashMap<K, Arc<OnceCell<V>>>;

pub struct ContextResolver {
    source: Arc<dyn EventSource>,
    blocks: Memo<u64, BlockContext>,
    disputes: Memo<u64, DisputeSnapshot>,
    periods: Memo<u64, Period>,
    draws: Memo<(u64, u64), Vec<Address>>,
}

impl ContextResolver {
    pub fn new(source: Arc<dyn EventSource>) -> Self {
        Self {
            source,
            blocks: DashMap::new(),
            disputes: DashMap::new(),
            periods: DashMap::new(),
            draws: DashMap::new(),
        }
    }

    pub async fn block(&self, block_number: u64) -> Result<BlockContext, NotifyError> {
        let cell = slot(&self.blocks, block_number);
        let block = cell
            .get_or_try_init(|| async {
                debug!(block = block_number, "resolving block");
                self.source.block(block_number).await
            })
            .await?;
        Ok(*block)
    }

    pub async fn dispute(&self, dispute_id: u64) -> Result<DisputeSnapshot, NotifyError> {
        let cell = slot(&self.disputes, dispute_id);
        let snapshot = cell
            .get_or_try_init(|| async {
                debug!(dispute_id = dispute_id, "resolving dispute state");
                self.source.dispute_state(dispute_id).await
            })
            .await?;
        Ok(*snapshot)
    }

    /// Dispute period alone. Reuses a full snapshot if one was already resolved.
    pub async fn period(&self, dispute_id: u64) -> Result<Period, NotifyError> {
        if let Some(snapshot) = self.disputes.get(&dispute_id).and_then(|c| c.get().copied()) {
            return Ok(snapshot.period);
        }
        let cell = slot(&self.periods, dispute_id);
        let period = cell
            .get_or_try_init(|| async {
                debug!(dispute_id = dispute_id, "resolving dispute period");
                self.source.dispute_period(dispute_id).await
            })
            .await?;
        Ok(*period)
    }

    /// Every address drawn in any round of `dispute_id` since `from_block`,
    /// each once, in the order of their first draw.
    pub async fn drawn_addresses(
        &self,
        dispute_id: u64,
        from_block: u64,
    ) -> Result<Vec<Address>, NotifyError> {
        let cell = slot(&self.draws, (dispute_id, from_block));
        let addresses = cell
            .get_or_try_init(|| async {
                let draws = self
                    .source
                    .past_events(
                        EventKind::Draw,
                        EventFilter::from_block(from_block).dispute(dispute_id),
                    )
                    .await?;
                let mut seen = HashSet::new();
                let addresses: Vec<Address> = draws
                    .iter()
                    .filter_map(|event| match event.payload {
                        EventPayload::Draw { address, .. } => Some(address),
                        _ => None,
                    })
                    .filter(|address| seen.insert(*address))
                    .collect();
                debug!(
                    dispute_id = dispute_id,
                    draws = draws.len(),
                    jurors = addresses.len(),
                    "resolved drawn jurors"
                );
                Ok::<_, NotifyError>(addresses)
            })
            .await?;
        Ok(addresses.clone())
    }
}

fn slot<K: Eq + Hash, V>(memo: &Memo<K, V>, key: K) -> Arc<OnceCell<V>> {
    memo.entry(key).or_default().clone()
}
