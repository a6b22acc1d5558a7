//! Interfaces to the parent chain and to the local history provider.

use crate::{
    error::OracleError,
    types::{
        Agreement, AssertionHash, BlockNumber, ChallengeLevel, Edge, EdgeId, HeightRange,
        HistoryCommitments, OriginId,
    },
};
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Challenge manager events the watcher consumes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// An edge was created
    EdgeAdded,
    /// A one step edge was confirmed by proof
    EdgeConfirmedByOneStepProof,
    /// An edge was confirmed because both children were
    EdgeConfirmedByChildren,
    /// An edge was confirmed through a confirmed claiming edge
    EdgeConfirmedByClaim,
    /// An edge was confirmed by its path timer
    EdgeConfirmedByTime,
}

impl EventKind {
    /// Order in which event kinds are filtered and applied within one block window.
    pub const SCAN_ORDER: [Self; 5] = [
        Self::EdgeAdded,
        Self::EdgeConfirmedByOneStepProof,
        Self::EdgeConfirmedByChildren,
        Self::EdgeConfirmedByClaim,
        Self::EdgeConfirmedByTime,
    ];

    /// Whether the event marks an edge as confirmed.
    pub const fn is_confirmation(&self) -> bool {
        !matches!(self, Self::EdgeAdded)
    }

    /// Returns the string representation of the event kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::EdgeAdded => "EdgeAdded",
            Self::EdgeConfirmedByOneStepProof => "EdgeConfirmedByOneStepProof",
            Self::EdgeConfirmedByChildren => "EdgeConfirmedByChildren",
            Self::EdgeConfirmedByClaim => "EdgeConfirmedByClaim",
            Self::EdgeConfirmedByTime => "EdgeConfirmedByTime",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of parent chain blocks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockRange {
    /// First block, inclusive
    pub from: BlockNumber,
    /// Last block, inclusive
    pub to: BlockNumber,
}

impl BlockRange {
    /// Create a new inclusive range
    pub const fn new(from: BlockNumber, to: BlockNumber) -> Self {
        Self { from, to }
    }

    /// Split into consecutive, non-overlapping ranges of at most `max_blocks` blocks.
    ///
    /// An inverted range yields nothing.
    pub fn chunks(self, max_blocks: u64) -> impl Iterator<Item = Self> {
        let step = max_blocks.max(1);
        let mut next = (self.from <= self.to).then_some(self.from);
        std::iter::from_fn(move || {
            let from = next?;
            let to = from.saturating_add(step - 1).min(self.to);
            next = (to < self.to).then(|| to + 1);
            Some(Self { from, to })
        })
    }
}

/// A decoded challenge manager log.
///
/// `origin_id` is only carried by `EdgeAdded` logs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLog {
    /// Event the log was decoded from
    pub kind: EventKind,
    /// Edge the event is about
    pub edge_id: EdgeId,
    /// Sub-challenge the edge belongs to
    pub origin_id: Option<OriginId>,
    /// Block the log was emitted in
    pub block_number: BlockNumber,
    /// Position of the log within its block
    pub log_index: u64,
}

/// Latest block header as returned by the node
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Block number as reported by the node
    pub number: U256,
}

/// The latest assertion confirmed by the rollup contract
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmedAssertion {
    /// Assertion hash
    pub hash: AssertionHash,
    /// Block the assertion was created in
    pub created_at_block: BlockNumber,
}

/// Read access to the parent chain and the challenge manager contract.
#[async_trait]
pub trait ChainLogOracle: Send + Sync + fmt::Debug {
    /// Latest block header.
    async fn header_by_number(&self) -> Result<Header, OracleError>;

    /// Latest confirmed assertion; its creation block bounds the initial scan.
    async fn latest_confirmed_assertion(&self) -> Result<ConfirmedAssertion, OracleError>;

    /// Address of the challenge manager contract.
    async fn challenge_manager(&self) -> Result<Address, OracleError>;

    /// Logs of one kind emitted by `manager` within `range`.
    async fn filter_logs(
        &self,
        manager: Address,
        kind: EventKind,
        range: BlockRange,
    ) -> Result<Vec<EdgeLog>, OracleError>;

    /// Full edge record, or `None` if the manager has no such edge.
    async fn get_edge(&self, edge_id: EdgeId) -> Result<Option<Edge>, OracleError>;
}

/// Compares edge commitments against the locally computed history.
#[async_trait]
pub trait AgreementOracle: Send + Sync + fmt::Debug {
    /// Whether the start and end commitments of an edge match the local history.
    async fn agrees(
        &self,
        level: ChallengeLevel,
        heights: HeightRange,
        commitments: HistoryCommitments,
    ) -> Result<Agreement, OracleError>;
}
