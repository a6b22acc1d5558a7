//! Error types

use crate::{
    oracle::EventKind,
    types::{AssertionHash, ChallengeLevel, ClaimId, EdgeId, OriginId},
};
use alloy_primitives::U256;

/// Failures reported by the chain and agreement oracles
#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    /// A chain request failed
    #[error("{method} request failed: {source}")]
    Request {
        /// Name of the failed request
        method: &'static str,
        /// Underlying failure
        source: anyhow::Error,
    },
    /// A log filter failed
    #[error("log filter for {kind} over blocks [{from}, {to}] failed: {source}")]
    LogFilter {
        /// Event kind being filtered
        kind: EventKind,
        /// First block of the filtered range
        from: u64,
        /// Last block of the filtered range
        to: u64,
        /// Underlying failure
        source: anyhow::Error,
    },
    /// The challenge manager has no edge with this id
    #[error("edge {0} not found in challenge manager")]
    EdgeNotFound(EdgeId),
    /// The local history could not be compared against an edge
    #[error("agreement check failed: {0}")]
    Agreement(anyhow::Error),
}

impl OracleError {
    /// Wrap a failed RPC-style request.
    pub fn request(method: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Request {
            method,
            source: source.into(),
        }
    }
}

/// Failures of honest challenge tree queries and insertions
#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    /// The edge is not a tracked honest edge
    #[error("edge {0} not found in honest challenge tree")]
    EdgeNotFound(EdgeId),
    /// No honest level-zero edge opens this sub-challenge
    #[error("no honest level-zero edge at {level} level with origin {origin_id}")]
    RootNotFound {
        /// Level of the missing root
        level: ChallengeLevel,
        /// Origin of the sub-challenge
        origin_id: OriginId,
    },
    /// No honest level-zero edge of the block challenge is tracked
    #[error("no honest block challenge root edge tracked")]
    BlockRootNotFound,
    /// A level-zero edge claims an edge that is not tracked as honest
    #[error("edge {edge_id} claims {claim_id}, which is not a tracked honest edge")]
    ClaimedEdgeNotFound {
        /// The level-zero edge
        edge_id: EdgeId,
        /// Its claim
        claim_id: ClaimId,
    },
    /// No chain of honest bisection children leads from the root to the edge
    #[error("edge {edge_id} is not reachable from honest edge {ancestor_id}")]
    NotDescendant {
        /// The edge queried
        edge_id: EdgeId,
        /// Level root the walk started from
        ancestor_id: EdgeId,
    },
    /// The edge belongs to another dispute
    #[error("edge {edge_id} belongs to assertion {got}, tree tracks {want}")]
    MismatchedAssertion {
        /// The rejected edge
        edge_id: EdgeId,
        /// Assertion the tree tracks
        want: AssertionHash,
        /// Assertion the edge carries
        got: AssertionHash,
    },
    /// The agreement oracle failed
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

impl TreeError {
    /// Whether the error means part of the honest path is not (yet) tracked.
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EdgeNotFound(_)
                | Self::RootNotFound { .. }
                | Self::BlockRootNotFound
                | Self::ClaimedEdgeNotFound { .. }
                | Self::NotDescendant { .. }
        )
    }
}

/// Retry loop stopped because its cancellation token fired
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("`{operation}` cancelled before it succeeded")]
pub struct Cancelled {
    /// Operation that was interrupted
    pub operation: &'static str,
}

/// Failures surfaced by the watcher
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    /// No challenge is tracked for the assertion
    #[error("no challenge tracked for assertion {0}")]
    NoTrackedChallenge(AssertionHash),
    /// The chain head number is wider than 64 bits
    #[error("latest header number {0} does not fit in u64")]
    HeaderNotRepresentable(U256),
    /// Honest tree query or insertion failed
    #[error(transparent)]
    Tree(#[from] TreeError),
    /// Chain or agreement oracle failed
    #[error(transparent)]
    Oracle(#[from] OracleError),
    /// Cancelled while waiting on the chain
    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}
