//! JSON-RPC event source backed by an alloy provider.
//!
//! Connects over WebSocket (`eth_subscribe` for live logs) or HTTP
//! (`eth_newFilter` polling) depending on the endpoint scheme, queries the
//! court contract for historical logs and dispute state, and decodes logs
//! into [`ChainEvent`]s.
//!
//! Live logs are pumped from the provider into an unbounded queue by a
//! background task, so a slow consumer never makes the provider drop logs.

use alloy::primitives::{Address, B256, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{BlockNumberOrTag, Filter, Log};
use alloy::sol_types::SolEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use crate::chain::abi::{self, KlerosLiquid};
use crate::chain::source::{EventFilter, EventSource, EventSubscription};
use crate::chain::types::{
    BlockContext, ChainEvent, DisputeSnapshot, EventKind, EventPayload, EventPosition, Period,
};
use crate::config::NetworkConfig;
use crate::notify::NotifyError;

type CourtContract = KlerosLiquid::KlerosLiquidInstance<DynProvider>;

pub struct RpcEventSource {
    provider: DynProvider,
    contract: CourtContract,
    address: Address,
    /// True when the transport supports `eth_subscribe`.
    pubsub: bool,
}

impl RpcEventSource {
    /// Connect to the network's provider endpoint.
    pub async fn connect(network: &NetworkConfig) -> Result<Self, NotifyError> {
        let url = network.provider_url.as_str();
        let pubsub = url.starts_with("ws://") || url.starts_with("wss://");
        info!(url = %url, chain_id = network.chain_id, pubsub = pubsub, "connecting to chain provider");

        let provider = if pubsub {
            ProviderBuilder::new()
                .connect_ws(WsConnect::new(url))
                .await
                .map_err(NotifyError::unavailable)?
                .erased()
        } else {
            let http_url = url.parse().map_err(NotifyError::unavailable)?;
            ProviderBuilder::new().connect_http(http_url).erased()
        };

        let contract = KlerosLiquid::new(network.contract_address, provider.clone());
        info!(contract = %network.contract_address, "chain provider connected");

        Ok(Self {
            provider,
            contract,
            address: network.contract_address,
            pubsub,
        })
    }

    /// Longest time the court allows for drawing jurors, in seconds.
    pub async fn max_drawing_time(&self) -> Result<U256, NotifyError> {
        self.contract
            .maxDrawingTime()
            .call()
            .await
            .map_err(NotifyError::unavailable)
    }

    fn kind_filter(&self, kind: EventKind, filter: EventFilter) -> Filter {
        let mut query = Filter::new()
            .address(self.address)
            .event_signature(abi::topic_for(kind))
            .from_block(filter.from_block);
        if let Some(dispute_id) = filter.dispute_id {
            let topic = B256::from(U256::from(dispute_id));
            // _disputeID is the first indexed argument of AppealDecision and
            // the second of Draw / TokenAndETHShift.
            query = match kind {
                EventKind::AppealDecision => query.topic1(topic),
                EventKind::Draw | EventKind::TokenAndEthShift => query.topic2(topic),
            };
        }
        query
    }

    async fn live_logs(&self) -> Result<BoxStream<'static, Log>, NotifyError> {
        let filter = Filter::new().address(self.address);
        if self.pubsub {
            let sub = self
                .provider
                .subscribe_logs(&filter)
                .await
                .map_err(NotifyError::unavailable)?;
            Ok(sub.into_stream().boxed())
        } else {
            let poller = self
                .provider
                .watch_logs(&filter)
                .await
                .map_err(NotifyError::unavailable)?;
            Ok(poller.into_stream().flat_map(stream::iter).boxed())
        }
    }
}

#[async_trait]
impl EventSource for RpcEventSource {
    async fn past_events(
        &self,
        kind: EventKind,
        filter: EventFilter,
    ) -> Result<Vec<ChainEvent>, NotifyError> {
        let logs = self
            .provider
            .get_logs(&self.kind_filter(kind, filter))
            .await
            .map_err(NotifyError::unavailable)?;
        debug!(kind = %kind, from_block = filter.from_block, logs = logs.len(), "fetched past events");

        let mut events = decode_logs(&logs);
        events.sort_by_key(|e| e.position);
        Ok(events)
    }

    async fn subscribe_all_events(
        &self,
        from_block: u64,
    ) -> Result<EventSubscription, NotifyError> {
        // Attach the live feed before replaying history so nothing mined in
        // between is missed; the overlap is skipped by position below.
        let mut live = self.live_logs().await?;
        let history = self
            .provider
            .get_logs(&Filter::new().address(self.address).from_block(from_block))
            .await
            .map_err(NotifyError::unavailable)?;
        info!(from_block = from_block, replayed = history.len(), "subscribed to court events");

        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(async move {
            let mut last_replayed: Option<EventPosition> = None;
            for event in decode_logs(&history) {
                last_replayed = Some(event.position);
                if tx.send(Ok(event)).is_err() {
                    return;
                }
            }

            while let Some(log) = live.next().await {
                if log.removed {
                    debug!(block = ?log.block_number, "ignoring removed log");
                    continue;
                }
                let event = match decode_log(&log) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!(error = %e, "skipping malformed live log");
                        continue;
                    }
                };
                if last_replayed.is_some_and(|last| event.position <= last) {
                    continue;
                }
                if tx.send(Ok(event)).is_err() {
                    return;
                }
            }

            let _ = tx.send(Err(NotifyError::unavailable("provider log stream ended")));
        });

        Ok(EventSubscription::new(UnboundedReceiverStream::new(rx).boxed()).with_feeder(feeder))
    }

    async fn block(&self, block_number: u64) -> Result<BlockContext, NotifyError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(block_number))
            .await
            .map_err(NotifyError::unavailable)?
            .ok_or_else(|| NotifyError::unavailable(format!("block {block_number} not found")))?;

        let seconds = i64::try_from(block.header.timestamp).map_err(NotifyError::unavailable)?;
        let timestamp = DateTime::<Utc>::from_timestamp(seconds, 0).ok_or_else(|| {
            NotifyError::unavailable(format!("block {block_number} has invalid timestamp"))
        })?;
        Ok(BlockContext {
            number: block_number,
            timestamp,
        })
    }

    async fn dispute_state(&self, dispute_id: u64) -> Result<DisputeSnapshot, NotifyError> {
        let period = self.dispute_period(dispute_id).await?;
        let rounds = self
            .contract
            .getDispute(U256::from(dispute_id))
            .call()
            .await
            .map_err(NotifyError::unavailable)?;

        Ok(DisputeSnapshot {
            period,
            vote_round_count: rounds.votesLengths.len() as u64,
        })
    }

    async fn dispute_period(&self, dispute_id: u64) -> Result<Period, NotifyError> {
        let dispute = self
            .contract
            .disputes(U256::from(dispute_id))
            .call()
            .await
            .map_err(NotifyError::unavailable)?;
        Period::try_from(dispute.period).map_err(|raw| {
            NotifyError::unavailable(format!("dispute {dispute_id} has unknown period {raw}"))
        })
    }

    async fn current_block_number(&self) -> Result<u64, NotifyError> {
        self.provider
            .get_block_number()
            .await
            .map_err(NotifyError::unavailable)
    }
}

/// Decode a batch, skipping (and logging) malformed logs.
fn decode_logs(logs: &[Log]) -> Vec<ChainEvent> {
    logs.iter()
        .filter_map(|log| match decode_log(log) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(
                    error = %e,
                    block = ?log.block_number,
                    log_index = ?log.log_index,
                    "skipping malformed log"
                );
                None
            }
        })
        .collect()
}

/// Decode one court log. Logs with an unknown topic0 decode to
/// [`EventPayload::Other`].
pub fn decode_log(log: &Log) -> Result<ChainEvent, NotifyError> {
    let position = EventPosition::new(
        log.block_number
            .ok_or_else(|| NotifyError::malformed("log has no block number"))?,
        log.transaction_index
            .ok_or_else(|| NotifyError::malformed("log has no transaction index"))?,
        log.log_index
            .ok_or_else(|| NotifyError::malformed("log has no log index"))?,
    );
    let topic0 = *log
        .topic0()
        .ok_or_else(|| NotifyError::malformed("log has no topic0"))?;

    let payload = match abi::kind_for_topic(&topic0) {
        Some(EventKind::AppealDecision) => {
            let event = log
                .log_decode::<KlerosLiquid::AppealDecision>()
                .map_err(NotifyError::malformed)?
                .inner
                .data;
            EventPayload::AppealDecision {
                dispute_id: to_u64(event._disputeID, "_disputeID")?,
            }
        }
        Some(EventKind::Draw) => {
            let event = log
                .log_decode::<KlerosLiquid::Draw>()
                .map_err(NotifyError::malformed)?
                .inner
                .data;
            EventPayload::Draw {
                dispute_id: to_u64(event._disputeID, "_disputeID")?,
                appeal: to_u64(event._appeal, "_appeal")?,
                address: event._address,
            }
        }
        Some(EventKind::TokenAndEthShift) => {
            let event = log
                .log_decode::<KlerosLiquid::TokenAndETHShift>()
                .map_err(NotifyError::malformed)?
                .inner
                .data;
            EventPayload::TokenAndEthShift {
                dispute_id: to_u64(event._disputeID, "_disputeID")?,
                address: event._address,
                eth_amount: i128::try_from(event._ETHAmount)
                    .map_err(|_| NotifyError::malformed("_ETHAmount out of range"))?,
                token_amount: i128::try_from(event._tokenAmount)
                    .map_err(|_| NotifyError::malformed("_tokenAmount out of range"))?,
            }
        }
        None => EventPayload::Other { topic: topic0 },
    };

    Ok(ChainEvent::new(position, payload))
}

fn to_u64(value: U256, field: &str) -> Result<u64, NotifyError> {
    u64::try_from(value).map_err(|_| NotifyError::malformed(format!("{field} out of range")))
}
