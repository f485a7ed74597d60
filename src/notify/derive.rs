//! Notification Deriver: turns one court event into the notifications it
//! implies.
//!
//! Each event kind has a pure handler over already-resolved context;
//! [`Deriver::derive`] resolves that context and dispatches. An empty result
//! means "nothing to notify", never an error.

use alloy::primitives::Address;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use std::sync::Arc;

use crate::chain::types::{
    BlockContext, ChainEvent, DisputeSnapshot, EventPayload, EventPosition, Period,
};
use crate::notify::resolver::ContextResolver;
use crate::notify::NotifyError;

/// Rewards older than this are not worth notifying about.
pub const REWARD_RECENCY_SECS: i64 = 7 * 24 * 60 * 60;

/// Both court tokens use 18 decimals.
pub const TOKEN_DECIMALS: u32 = 18;

const NATIVE_DISPLAY_DECIMALS: u32 = 4;
const STAKE_DISPLAY_DECIMALS: u32 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Category {
    Appeal,
    Drawn,
    Reward,
}

impl Category {
    pub fn icon(&self) -> &'static str {
        match self {
            Category::Appeal | Category::Drawn => "alert",
            Category::Reward => "reward",
        }
    }
}

/// A user-facing notification derived from one event for one recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// `{block}-{txIndex}-{logIndex}-{account}`; identical for every
    /// derivation of the same event and recipient.
    pub key: String,
    pub account: Address,
    pub occurred_at: DateTime<Utc>,
    pub category: Category,
    pub message: String,
    /// Dispute the notification links to.
    pub dispute_id: u64,
    pub position: EventPosition,
}

impl Notification {
    pub fn link(&self) -> String {
        format!("/cases/{}", self.dispute_id)
    }
}

pub fn notification_key(position: &EventPosition, account: &Address) -> String {
    format!("{position}-{account}")
}

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Currency symbols used in reward messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSymbols {
    pub native: String,
    pub stake: String,
}

pub struct Deriver {
    symbols: TokenSymbols,
    /// Start of the window searched for a dispute's past draws.
    draws_from_block: u64,
    clock: Clock,
}

impl Deriver {
    pub fn new(symbols: TokenSymbols, draws_from_block: u64) -> Self {
        Self {
            symbols,
            draws_from_block,
            clock: Arc::new(Utc::now),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Derive the notifications for one event, resolving context as needed.
    /// Resolver failures propagate; the caller decides to skip or abort.
    pub async fn derive(
        &self,
        event: &ChainEvent,
        resolver: &ContextResolver,
    ) -> Result<Vec<Notification>, NotifyError> {
        match &event.payload {
            EventPayload::AppealDecision { dispute_id } => {
                let period = resolver.period(*dispute_id).await?;
                if period.is_executed() {
                    return Ok(Vec::new());
                }
                let block = resolver.block(event.position.block_number).await?;
                let jurors = resolver
                    .drawn_addresses(*dispute_id, self.draws_from_block)
                    .await?;
                Ok(appeal_notifications(
                    &event.position,
                    *dispute_id,
                    period,
                    &block,
                    &jurors,
                ))
            }
            EventPayload::Draw {
                dispute_id,
                appeal,
                address,
            } => {
                let snapshot = resolver.dispute(*dispute_id).await?;
                if snapshot.period.is_executed() {
                    return Ok(Vec::new());
                }
                let block = resolver.block(event.position.block_number).await?;
                Ok(draw_notifications(
                    &event.position,
                    *dispute_id,
                    *appeal,
                    *address,
                    &snapshot,
                    &block,
                ))
            }
            EventPayload::TokenAndEthShift {
                dispute_id,
                address,
                eth_amount,
                token_amount,
            } => {
                let block = resolver.block(event.position.block_number).await?;
                reward_notifications(
                    &event.position,
                    *dispute_id,
                    *address,
                    *eth_amount,
                    *token_amount,
                    &block,
                    (self.clock)(),
                    &self.symbols,
                )
            }
            EventPayload::Other { .. } => Ok(Vec::new()),
        }
    }
}

/// One notification per drawn juror, unless the dispute is already executed.
pub fn appeal_notifications(
    position: &EventPosition,
    dispute_id: u64,
    period: Period,
    block: &BlockContext,
    jurors: &[Address],
) -> Vec<Notification> {
    if period.is_executed() {
        return Vec::new();
    }
    let message = format!("Case #{dispute_id} has been appealed.");
    jurors
        .iter()
        .map(|juror| Notification {
            key: notification_key(position, juror),
            account: *juror,
            occurred_at: block.timestamp,
            category: Category::Appeal,
            message: message.clone(),
            dispute_id,
            position: *position,
        })
        .collect()
}

/// A draw is only notified while the dispute is live and the draw belongs
/// to the latest round.
pub fn draw_notifications(
    position: &EventPosition,
    dispute_id: u64,
    appeal: u64,
    juror: Address,
    snapshot: &DisputeSnapshot,
    block: &BlockContext,
) -> Vec<Notification> {
    if snapshot.period.is_executed() || snapshot.latest_round() != Some(appeal) {
        return Vec::new();
    }
    vec![Notification {
        key: notification_key(position, &juror),
        account: juror,
        occurred_at: block.timestamp,
        category: Category::Drawn,
        message: format!(
            "Congratulations! You have been drawn as a juror on case #{dispute_id}."
        ),
        dispute_id,
        position: *position,
    }]
}

/// Reward summary for executions mined within the recency window.
#[allow(clippy::too_many_arguments)]
pub fn reward_notifications(
    position: &EventPosition,
    dispute_id: u64,
    juror: Address,
    eth_amount: i128,
    token_amount: i128,
    block: &BlockContext,
    now: DateTime<Utc>,
    symbols: &TokenSymbols,
) -> Result<Vec<Notification>, NotifyError> {
    if now - block.timestamp >= Duration::seconds(REWARD_RECENCY_SECS) {
        return Ok(Vec::new());
    }
    let eth = format_amount(eth_amount, NATIVE_DISPLAY_DECIMALS)?;
    let tokens = format_amount(token_amount, STAKE_DISPLAY_DECIMALS)?;
    Ok(vec![Notification {
        key: notification_key(position, &juror),
        account: juror,
        occurred_at: block.timestamp,
        category: Category::Reward,
        message: format!(
            "Case #{dispute_id} was executed. {}: {eth}, {}: {tokens}.",
            symbols.native, symbols.stake
        ),
        dispute_id,
        position: *position,
    }])
}

/// Scale a base-unit amount down by 10^18 and render it with exactly
/// `decimals` fraction digits, rounding half away from zero.
pub fn format_amount(base_units: i128, decimals: u32) -> Result<String, NotifyError> {
    let value = Decimal::try_from_i128_with_scale(base_units, TOKEN_DECIMALS)
        .map_err(|_| NotifyError::malformed(format!("amount {base_units} too large to display")))?;
    let mut rounded = value.round_dp_with_strategy(decimals, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(decimals);
    Ok(rounded.to_string())
}
