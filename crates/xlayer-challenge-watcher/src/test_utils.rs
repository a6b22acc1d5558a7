//! Edge fixtures shared by unit tests.

use crate::types::{
    AssertionHash, BlockNumber, ChallengeLevel, ClaimId, Edge, EdgeId, Height, MutualId, OriginId,
    keccak256,
};
use alloy_primitives::{B256, U256};

pub(crate) const ALICE: &str = "alice";
pub(crate) const BOB: &str = "bob";

pub(crate) fn assertion() -> AssertionHash {
    AssertionHash(keccak256(&[b"assertion"]))
}

pub(crate) fn origin() -> OriginId {
    OriginId(keccak256(&[b"block-origin"]))
}

/// History root of `branch` at `height`, unique per sub-challenge.
pub(crate) fn history_root(
    branch: &str,
    level: ChallengeLevel,
    origin_id: OriginId,
    height: Height,
) -> B256 {
    keccak256(&[
        branch.as_bytes(),
        &[level.as_u8()],
        origin_id.0.as_slice(),
        &U256::from(height).to_be_bytes::<32>(),
    ])
}

pub(crate) struct EdgeBuilder {
    level: ChallengeLevel,
    origin_id: OriginId,
    start: (Height, &'static str),
    end: (Height, &'static str),
    claim_id: Option<ClaimId>,
    created_at: BlockNumber,
}

impl EdgeBuilder {
    pub(crate) fn new(
        level: ChallengeLevel,
        start_height: Height,
        start_branch: &'static str,
        end_height: Height,
        end_branch: &'static str,
    ) -> Self {
        Self {
            level,
            origin_id: origin(),
            start: (start_height, start_branch),
            end: (end_height, end_branch),
            claim_id: None,
            created_at: 0,
        }
    }

    pub(crate) fn block(
        start_height: Height,
        start_branch: &'static str,
        end_height: Height,
        end_branch: &'static str,
    ) -> Self {
        Self::new(ChallengeLevel::Block, start_height, start_branch, end_height, end_branch)
    }

    pub(crate) fn origin(mut self, origin_id: OriginId) -> Self {
        self.origin_id = origin_id;
        self
    }

    pub(crate) fn claims_assertion(mut self) -> Self {
        self.claim_id = Some(ClaimId(assertion().0));
        self
    }

    /// Open a sub-challenge on `parent`: claim it and inherit its mutual id as origin.
    pub(crate) fn claims(mut self, parent: &Edge) -> Self {
        self.claim_id = Some(ClaimId(parent.id.0));
        self.origin_id = OriginId(parent.mutual_id.0);
        self
    }

    pub(crate) fn created_at(mut self, block: BlockNumber) -> Self {
        self.created_at = block;
        self
    }

    pub(crate) fn build(self) -> Edge {
        let start_root = history_root(self.start.1, self.level, self.origin_id, self.start.0);
        let end_root = history_root(self.end.1, self.level, self.origin_id, self.end.0);
        let mutual_id =
            MutualId::compute(self.level, self.origin_id, self.start.0, start_root, self.end.0);
        Edge {
            id: EdgeId::compute(mutual_id, end_root),
            origin_id: self.origin_id,
            mutual_id,
            level: self.level,
            start_height: self.start.0,
            start_root,
            end_height: self.end.0,
            end_root,
            claim_id: self.claim_id,
            assertion_hash: assertion(),
            created_at_block: self.created_at,
        }
    }
}
