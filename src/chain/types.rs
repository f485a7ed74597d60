//! Chain-side types handed to the notification core by an event source.

use alloy::primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Event kinds that can produce notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    AppealDecision,
    Draw,
    TokenAndEthShift,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [
        EventKind::AppealDecision,
        EventKind::Draw,
        EventKind::TokenAndEthShift,
    ];

    /// Solidity event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::AppealDecision => "AppealDecision",
            EventKind::Draw => "Draw",
            EventKind::TokenAndEthShift => "TokenAndETHShift",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Position of a log within the chain. The derived ordering is chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventPosition {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl EventPosition {
    pub fn new(block_number: u64, transaction_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
            log_index,
        }
    }
}

impl std::fmt::Display for EventPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}-{}",
            self.block_number, self.transaction_index, self.log_index
        )
    }
}

/// Kind-specific event fields.
///
/// Amounts are in base units (18 decimals). They are signed because the
/// contract emits negative shifts for penalised jurors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    AppealDecision {
        dispute_id: u64,
    },
    Draw {
        dispute_id: u64,
        appeal: u64,
        address: Address,
    },
    TokenAndEthShift {
        dispute_id: u64,
        address: Address,
        eth_amount: i128,
        token_amount: i128,
    },
    /// Any other contract event. Tolerated and ignored.
    Other { topic: B256 },
}

/// A decoded contract log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEvent {
    pub position: EventPosition,
    pub payload: EventPayload,
}

impl ChainEvent {
    pub fn new(position: EventPosition, payload: EventPayload) -> Self {
        Self { position, payload }
    }

    pub fn kind(&self) -> Option<EventKind> {
        match self.payload {
            EventPayload::AppealDecision { .. } => Some(EventKind::AppealDecision),
            EventPayload::Draw { .. } => Some(EventKind::Draw),
            EventPayload::TokenAndEthShift { .. } => Some(EventKind::TokenAndEthShift),
            EventPayload::Other { .. } => None,
        }
    }

    pub fn dispute_id(&self) -> Option<u64> {
        match self.payload {
            EventPayload::AppealDecision { dispute_id }
            | EventPayload::Draw { dispute_id, .. }
            | EventPayload::TokenAndEthShift { dispute_id, .. } => Some(dispute_id),
            EventPayload::Other { .. } => None,
        }
    }
}

impl std::fmt::Display for ChainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.payload {
            EventPayload::AppealDecision { dispute_id } => {
                write!(f, "AppealDecision(dispute={}, at={})", dispute_id, self.position)
            }
            EventPayload::Draw {
                dispute_id,
                appeal,
                address,
            } => write!(
                f,
                "Draw(dispute={}, appeal={}, juror={}, at={})",
                dispute_id, appeal, address, self.position
            ),
            EventPayload::TokenAndEthShift {
                dispute_id,
                address,
                ..
            } => write!(
                f,
                "TokenAndETHShift(dispute={}, juror={}, at={})",
                dispute_id, address, self.position
            ),
            EventPayload::Other { topic } => write!(f, "Other(topic={}, at={})", topic, self.position),
        }
    }
}

/// Block metadata resolved for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Dispute phases as stored by the court contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Evidence,
    Commit,
    Vote,
    Appeal,
    /// Terminal phase: rulings have been executed.
    Execution,
}

impl Period {
    pub fn is_executed(&self) -> bool {
        matches!(self, Period::Execution)
    }
}

impl TryFrom<u8> for Period {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Period::Evidence),
            1 => Ok(Period::Commit),
            2 => Ok(Period::Vote),
            3 => Ok(Period::Appeal),
            4 => Ok(Period::Execution),
            other => Err(other),
        }
    }
}

/// Dispute state as of the lookup, not as of the event's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisputeSnapshot {
    pub period: Period,
    /// Number of rounds so far; the latest round index is `vote_round_count - 1`.
    pub vote_round_count: u64,
}

impl DisputeSnapshot {
    pub fn latest_round(&self) -> Option<u64> {
        self.vote_round_count.checked_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_sort_in_chain_order() {
        let mut positions = vec![
            EventPosition::new(10, 2, 0),
            EventPosition::new(9, 5, 7),
            EventPosition::new(10, 1, 9),
            EventPosition::new(10, 2, 1),
        ];
        positions.sort();
        assert_eq!(
            positions,
            vec![
                EventPosition::new(9, 5, 7),
                EventPosition::new(10, 1, 9),
                EventPosition::new(10, 2, 0),
                EventPosition::new(10, 2, 1),
            ]
        );
    }

    #[test]
    fn period_decoding() {
        assert_eq!(Period::try_from(4), Ok(Period::Execution));
        assert!(Period::Execution.is_executed());
        assert!(!Period::Appeal.is_executed());
        assert_eq!(Period::try_from(5), Err(5));
    }

    #[test]
    fn latest_round_of_empty_dispute_is_none() {
        let snapshot = DisputeSnapshot {
            period: Period::Evidence,
            vote_round_count: 0,
        };
        assert_eq!(snapshot.latest_round(), None);
    }
}
