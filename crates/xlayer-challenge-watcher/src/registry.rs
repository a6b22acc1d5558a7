//! Per-assertion challenge state.

use crate::{
    containers::ThreadSafeMap,
    tree::HonestChallengeTree,
    types::{AssertionHash, BlockNumber, ClaimId, Edge, EdgeId},
};
use std::{fmt, sync::Arc};
use tracing::info;

/// A challenge the watcher follows: its honest tree and the confirmed edges
/// indexed by the id they claim.
#[derive(Debug)]
pub struct TrackedChallenge {
    tree: HonestChallengeTree,
    confirmed_claims: ThreadSafeMap<ClaimId, EdgeId>,
}

impl TrackedChallenge {
    /// Track `tree` with no confirmed claims yet.
    pub fn new(tree: HonestChallengeTree) -> Self {
        Self {
            tree,
            confirmed_claims: ThreadSafeMap::new(),
        }
    }

    /// Honest challenge tree of the challenge.
    pub const fn tree(&self) -> &HonestChallengeTree {
        &self.tree
    }

    /// Record that `edge_id`, which claims `claim_id`, was confirmed.
    ///
    /// The first confirmed edge per claim wins. Returns whether it was recorded.
    pub fn record_confirmed_claim(&self, claim_id: ClaimId, edge_id: EdgeId) -> bool {
        self.confirmed_claims.insert_if_absent(claim_id, edge_id)
    }

    /// Confirmed edge claiming `claim_id`, if any.
    pub fn confirmed_edge_with_claim(&self, claim_id: ClaimId) -> Option<EdgeId> {
        self.confirmed_claims.get(&claim_id)
    }
}

/// Decides when a tracked challenge can be dropped.
pub trait EvictionPolicy: Send + Sync + fmt::Debug {
    /// Called after every applied poll tick with the new scanned head.
    fn should_evict(
        &self,
        assertion_hash: AssertionHash,
        challenge: &TrackedChallenge,
        head: BlockNumber,
    ) -> bool;
}

/// Never evicts.
#[derive(Clone, Copy, Debug, Default)]
pub struct RetainAll;

impl EvictionPolicy for RetainAll {
    fn should_evict(&self, _: AssertionHash, _: &TrackedChallenge, _: BlockNumber) -> bool {
        false
    }
}

/// Tracked challenges keyed by the challenged assertion
#[derive(Debug)]
pub struct ChallengeRegistry {
    challenges: ThreadSafeMap<AssertionHash, Arc<TrackedChallenge>>,
    eviction: Box<dyn EvictionPolicy>,
}

impl Default for ChallengeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChallengeRegistry {
    /// Registry that keeps every challenge forever.
    pub fn new() -> Self {
        Self::with_eviction_policy(RetainAll)
    }

    /// Registry that drops challenges released by `policy`.
    pub fn with_eviction_policy(policy: impl EvictionPolicy + 'static) -> Self {
        Self {
            challenges: ThreadSafeMap::new(),
            eviction: Box::new(policy),
        }
    }

    /// Challenge tracked for `assertion_hash`.
    pub fn get(&self, assertion_hash: &AssertionHash) -> Option<Arc<TrackedChallenge>> {
        self.challenges.get(assertion_hash)
    }

    /// Challenge for `assertion_hash`, created with `create` on first sight.
    pub fn get_or_create(
        &self,
        assertion_hash: AssertionHash,
        create: impl FnOnce() -> TrackedChallenge,
    ) -> Arc<TrackedChallenge> {
        self.challenges.get_or_insert_with(assertion_hash, || Arc::new(create()))
    }

    /// Snapshot of tracked challenges.
    pub fn challenges(&self) -> Vec<(AssertionHash, Arc<TrackedChallenge>)> {
        self.challenges.entries()
    }

    /// Honest edges of every tracked challenge.
    pub fn edges(&self) -> Vec<Edge> {
        self.challenges
            .values()
            .iter()
            .flat_map(|challenge| challenge.tree().edges())
            .collect()
    }

    /// Number of tracked challenges.
    pub fn len(&self) -> usize {
        self.challenges.len()
    }

    /// Whether no challenge is tracked.
    pub fn is_empty(&self) -> bool {
        self.challenges.is_empty()
    }

    /// Drop every challenge the eviction policy releases at `head`. Returns how many.
    pub fn sweep(&self, head: BlockNumber) -> usize {
        let mut evicted = 0;
        self.challenges.retain(|hash, challenge| {
            if !self.eviction.should_evict(*hash, challenge, head) {
                return true;
            }
            evicted += 1;
            info!(
                target: "challenge_watcher",
                assertion = %hash.short(),
                head,
                "Evicted tracked challenge"
            );
            false
        });
        evicted
    }
}
