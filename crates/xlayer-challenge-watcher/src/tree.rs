//! Honest challenge tree of a single assertion dispute.
//!
//! Only edges the local validator agrees with are stored. Rival bookkeeping
//! additionally covers every edge whose start commitment is agreed with, so
//! that an honest edge's local timer stops as soon as any rival appears.

use crate::{
    containers::ThreadSafeMap,
    error::TreeError,
    oracle::AgreementOracle,
    types::{
        Agreement, AssertionHash, BlockNumber, ChallengeLevel, Edge, EdgeId, Height, MutualId,
        OriginId,
    },
};
use std::{
    fmt,
    sync::{Arc, OnceLock},
};
use tracing::{debug, info};

/// Key of the span index. An honest edge is unique per level, origin and height range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SpanKey {
    pub(crate) level: ChallengeLevel,
    pub(crate) origin_id: OriginId,
    pub(crate) start: Height,
    pub(crate) end: Height,
}

impl SpanKey {
    fn of(edge: &Edge) -> Self {
        Self {
            level: edge.level,
            origin_id: edge.origin_id,
            start: edge.start_height,
            end: edge.end_height,
        }
    }
}

/// Outcome of [`HonestChallengeTree::add_edge`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeInsertion {
    /// The edge is honest and now tracked
    Honest,
    /// The edge was already tracked; nothing changed
    AlreadyTracked,
    /// The edge is not honest and was not stored
    Rejected(Agreement),
}

/// Honest edges of one challenged assertion, plus the indexes needed to
/// compute path timers over them.
pub struct HonestChallengeTree {
    assertion_hash: AssertionHash,
    validator_name: String,
    agreement: Arc<dyn AgreementOracle>,
    pub(crate) edges: ThreadSafeMap<EdgeId, Edge>,
    /// Creation block of every edge sharing a mutual id, for agreed-start edges only
    pub(crate) mutual_ids: ThreadSafeMap<MutualId, Arc<ThreadSafeMap<EdgeId, BlockNumber>>>,
    /// Honest level-zero edge per level and origin
    pub(crate) level_roots: ThreadSafeMap<(ChallengeLevel, OriginId), EdgeId>,
    pub(crate) spans: ThreadSafeMap<SpanKey, EdgeId>,
    /// First honest level-zero edge seen at block level
    block_root: OnceLock<EdgeId>,
}

impl fmt::Debug for HonestChallengeTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HonestChallengeTree")
            .field("assertion_hash", &self.assertion_hash)
            .field("validator_name", &self.validator_name)
            .field("honest_edges", &self.edges.len())
            .field("mutual_ids", &self.mutual_ids.len())
            .field("block_root", &self.block_root.get())
            .finish()
    }
}

impl HonestChallengeTree {
    /// Create an empty tree for challenges on `assertion_hash`.
    pub fn new(
        assertion_hash: AssertionHash,
        agreement: Arc<dyn AgreementOracle>,
        validator_name: impl Into<String>,
    ) -> Self {
        Self {
            assertion_hash,
            validator_name: validator_name.into(),
            agreement,
            edges: ThreadSafeMap::new(),
            mutual_ids: ThreadSafeMap::new(),
            level_roots: ThreadSafeMap::new(),
            spans: ThreadSafeMap::new(),
            block_root: OnceLock::new(),
        }
    }

    /// Assertion this tree tracks.
    pub const fn assertion_hash(&self) -> AssertionHash {
        self.assertion_hash
    }

    /// Classify `edge` with the agreement oracle and track it if honest.
    ///
    /// Adding an edge twice is a no-op. Edges whose start commitment is agreed
    /// with are recorded under their mutual id even when they are not honest.
    pub async fn add_edge(&self, edge: Edge) -> Result<EdgeInsertion, TreeError> {
        if edge.assertion_hash != self.assertion_hash {
            return Err(TreeError::MismatchedAssertion {
                edge_id: edge.id,
                want: self.assertion_hash,
                got: edge.assertion_hash,
            });
        }
        if self.edges.contains(&edge.id) {
            return Ok(EdgeInsertion::AlreadyTracked);
        }

        let agreement = self
            .agreement
            .agrees(edge.level, edge.heights(), edge.commitments())
            .await?;

        if agreement.agrees_with_start_commit || agreement.is_honest_edge {
            self.mutual_ids
                .get_or_insert_with(edge.mutual_id, || Arc::new(ThreadSafeMap::new()))
                .insert_if_absent(edge.id, edge.created_at_block);
        }

        if !agreement.is_honest_edge {
            debug!(
                target: "challenge_watcher",
                validator = %self.validator_name,
                edge = %edge.id.short(),
                level = %edge.level,
                agrees_with_start = agreement.agrees_with_start_commit,
                "Ignoring edge we disagree with"
            );
            return Ok(EdgeInsertion::Rejected(agreement));
        }

        // Indexes go in before the edge so that any reader finding the edge
        // also finds the paths through it.
        self.spans.insert_if_absent(SpanKey::of(&edge), edge.id);
        if edge.is_level_zero() {
            self.level_roots.insert_if_absent((edge.level, edge.origin_id), edge.id);
            if edge.level == ChallengeLevel::Block {
                self.block_root.set(edge.id).ok();
            }
        }

        info!(
            target: "challenge_watcher",
            validator = %self.validator_name,
            edge = %edge.id.short(),
            level = %edge.level,
            start = edge.start_height,
            end = edge.end_height,
            created_at = edge.created_at_block,
            "Tracking honest edge"
        );
        self.edges.insert(edge.id, edge);
        Ok(EdgeInsertion::Honest)
    }

    /// Whether `edge_id` is a tracked honest edge.
    pub fn has_edge(&self, edge_id: EdgeId) -> bool {
        self.edges.contains(&edge_id)
    }

    /// Tracked honest edge with id `edge_id`.
    pub fn get_edge(&self, edge_id: EdgeId) -> Option<Edge> {
        self.edges.get(&edge_id)
    }

    /// Snapshot of all honest edges.
    pub fn edges(&self) -> Vec<Edge> {
        self.edges.values()
    }

    /// Number of honest edges.
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Whether no honest edge is tracked yet.
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Honest level-zero edge opening the challenge at `level` for `origin_id`.
    pub fn level_root(&self, level: ChallengeLevel, origin_id: OriginId) -> Option<Edge> {
        self.level_roots
            .get(&(level, origin_id))
            .and_then(|id| self.edges.get(&id))
    }

    /// Honest level-zero edge of the block challenge.
    ///
    /// The first honest block level root wins, whatever the order in which
    /// edges of other levels arrived.
    pub fn block_challenge_root_edge(&self) -> Result<Edge, TreeError> {
        self.block_root
            .get()
            .and_then(|id| self.edges.get(id))
            .ok_or(TreeError::BlockRootNotFound)
    }

    /// Honest edge covering exactly `[start, end]` within a sub-challenge.
    pub(crate) fn edge_at_span(
        &self,
        level: ChallengeLevel,
        origin_id: OriginId,
        start: Height,
        end: Height,
    ) -> Option<Edge> {
        let key = SpanKey {
            level,
            origin_id,
            start,
            end,
        };
        self.spans.get(&key).and_then(|id| self.edges.get(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        memory::MemoryAgreement,
        test_utils::{ALICE, BOB, EdgeBuilder, assertion, origin},
    };

    fn tree_with(agreement: &Arc<MemoryAgreement>) -> HonestChallengeTree {
        HonestChallengeTree::new(assertion(), agreement.clone(), "alice")
    }

    #[tokio::test]
    async fn test_add_edge_is_idempotent() {
        let agreement = Arc::new(MemoryAgreement::new());
        let tree = tree_with(&agreement);
        let root = EdgeBuilder::block(0, ALICE, 16, ALICE)
            .claims_assertion()
            .created_at(1)
            .build();
        agreement.add_honest_edge(&root);

        let first = tree.add_edge(root.clone()).await.unwrap();
        let second = tree.add_edge(root.clone()).await.unwrap();
        assert_eq!(first, EdgeInsertion::Honest);
        assert_eq!(second, EdgeInsertion::AlreadyTracked);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree.block_challenge_root_edge().unwrap(), root);
        assert_eq!(agreement.calls(), 1);
    }

    #[tokio::test]
    async fn test_only_honest_edges_are_stored() {
        let agreement = Arc::new(MemoryAgreement::new());
        let tree = tree_with(&agreement);
        let honest = EdgeBuilder::block(0, ALICE, 16, ALICE)
            .claims_assertion()
            .created_at(1)
            .build();
        let rival = EdgeBuilder::block(0, ALICE, 16, BOB)
            .claims_assertion()
            .created_at(2)
            .build();
        let foreign = EdgeBuilder::block(8, BOB, 16, BOB).created_at(3).build();
        agreement.add_honest_edge(&honest);

        tree.add_edge(honest.clone()).await.unwrap();
        let rejected = tree.add_edge(rival.clone()).await.unwrap();
        let start_only = Agreement {
            is_honest_edge: false,
            agrees_with_start_commit: true,
        };
        assert_eq!(rejected, EdgeInsertion::Rejected(start_only));
        tree.add_edge(foreign.clone()).await.unwrap();

        assert!(tree.has_edge(honest.id));
        assert!(!tree.has_edge(rival.id));
        assert!(!tree.has_edge(foreign.id));

        let rivals = tree.mutual_ids.get(&honest.mutual_id).unwrap();
        assert_eq!(rivals.get(&honest.id), Some(1));
        assert_eq!(rivals.get(&rival.id), Some(2));
        assert!(tree.mutual_ids.get(&foreign.mutual_id).is_none());
    }

    #[tokio::test]
    async fn test_mismatched_assertion_is_rejected() {
        let agreement = Arc::new(MemoryAgreement::new());
        let tree = tree_with(&agreement);
        let mut edge = EdgeBuilder::block(0, ALICE, 16, ALICE).created_at(1).build();
        edge.assertion_hash = AssertionHash::default();

        let err = tree.add_edge(edge).await.unwrap_err();
        assert!(matches!(err, TreeError::MismatchedAssertion { .. }));
        assert_eq!(agreement.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_block_root() {
        let agreement = Arc::new(MemoryAgreement::new());
        let tree = tree_with(&agreement);
        let child = EdgeBuilder::block(0, ALICE, 8, ALICE).created_at(1).build();
        agreement.add_honest_edge(&child);
        tree.add_edge(child.clone()).await.unwrap();

        let err = tree.block_challenge_root_edge().unwrap_err();
        assert!(err.is_not_found());
        let span = tree.edge_at_span(ChallengeLevel::Block, origin(), 0, 8);
        assert_eq!(span, Some(child));
    }

    #[tokio::test]
    async fn test_block_root_found_after_sub_challenge_root() {
        let agreement = Arc::new(MemoryAgreement::new());
        let tree = tree_with(&agreement);
        let block_root = EdgeBuilder::block(0, ALICE, 16, ALICE)
            .claims_assertion()
            .created_at(1)
            .build();
        let big_step_root = EdgeBuilder::new(ChallengeLevel::BigStep, 0, ALICE, 16, ALICE)
            .claims(&block_root)
            .created_at(2)
            .build();
        agreement.add_honest_edge(&block_root);
        agreement.add_honest_edge(&big_step_root);

        // The sub-challenge root arrives first and carries a different origin id.
        tree.add_edge(big_step_root.clone()).await.unwrap();
        assert!(tree.block_challenge_root_edge().unwrap_err().is_not_found());

        tree.add_edge(block_root.clone()).await.unwrap();
        assert_ne!(big_step_root.origin_id, block_root.origin_id);
        assert_eq!(tree.block_challenge_root_edge().unwrap(), block_root);
    }
}
