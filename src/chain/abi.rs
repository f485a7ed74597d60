//! Court contract ABI bindings.
//!
//! Only the three events we turn into notifications and the view functions
//! needed to interpret them are declared. Topic hashes come from the
//! generated `SolEvent::SIGNATURE_HASH` constants.

use alloy::primitives::B256;
use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::chain::types::EventKind;

sol! {
    #[sol(rpc)]
    contract KlerosLiquid {
        /// A dispute ruling was appealed and a new round started.
        event AppealDecision(uint256 indexed _disputeID, address indexed _arbitrable);

        /// A juror was drawn for a round of a dispute.
        event Draw(address indexed _address, uint256 indexed _disputeID, uint256 _appeal, uint256 _voteID);

        /// Tokens and ETH were redistributed to (or taken from) a juror on execution.
        event TokenAndETHShift(address indexed _address, uint256 indexed _disputeID, int256 _tokenAmount, int256 _ETHAmount);

        function disputes(uint256 _disputeID) external view returns (
            uint96 subcourtID,
            address arbitrated,
            uint256 numberOfChoices,
            uint8 period,
            uint256 lastPeriodChange,
            uint256 drawsInRound,
            uint256 commitsInRound,
            bool ruled
        );

        function getDispute(uint256 _disputeID) external view returns (
            uint256[] votesLengths,
            uint256[] tokensAtStakePerJuror,
            uint256[] totalFeesForJurors,
            uint256[] votesInEachRound,
            uint256[] repartitionsInEachRound,
            uint256[] penaltiesInEachRound
        );

        function maxDrawingTime() external view returns (uint256);
    }
}

/// keccak256("AppealDecision(uint256,address)")
pub const APPEAL_DECISION_TOPIC: B256 = KlerosLiquid::AppealDecision::SIGNATURE_HASH;

/// keccak256("Draw(address,uint256,uint256,uint256)")
pub const DRAW_TOPIC: B256 = KlerosLiquid::Draw::SIGNATURE_HASH;

/// keccak256("TokenAndETHShift(address,uint256,int256,int256)")
pub const TOKEN_AND_ETH_SHIFT_TOPIC: B256 = KlerosLiquid::TokenAndETHShift::SIGNATURE_HASH;

/// topic0 for a notification-bearing event kind.
pub fn topic_for(kind: EventKind) -> B256 {
    match kind {
        EventKind::AppealDecision => APPEAL_DECISION_TOPIC,
        EventKind::Draw => DRAW_TOPIC,
        EventKind::TokenAndEthShift => TOKEN_AND_ETH_SHIFT_TOPIC,
    }
}

/// Reverse of [`topic_for`]; `None` for any event we do not handle.
pub fn kind_for_topic(topic: &B256) -> Option<EventKind> {
    EventKind::ALL.into_iter().find(|kind| topic_for(*kind) == *topic)
}
