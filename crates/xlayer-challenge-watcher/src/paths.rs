//! Path timers over the honest challenge tree.
//!
//! An edge's local timer counts the blocks it stayed unrivaled. Its path
//! timer adds the local timers of every honest ancestor, following bisection
//! children up to the level-zero edge of each level and from there to the
//! edge that level-zero edge claims, until the block challenge root.

use crate::{
    error::TreeError,
    tree::HonestChallengeTree,
    types::{BlockNumber, Edge, EdgeId, HonestAncestors, PathTimer, bisection_point},
};
use serde::{Deserialize, Serialize};

/// Honest ancestors of an edge with their local timers, in the same order
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorsWithTimers {
    /// Honest ancestors, child to root
    pub ancestors: HonestAncestors,
    /// Local timer of each ancestor
    pub local_timers: Vec<u64>,
}

impl HonestChallengeTree {
    /// Path timer of `edge_id` at `block_number` and its honest ancestors, child to root.
    pub fn honest_path_timer(
        &self,
        edge_id: EdgeId,
        block_number: BlockNumber,
    ) -> Result<(PathTimer, HonestAncestors), TreeError> {
        let (timer, with_timers) = self.honest_path_timer_with_timers(edge_id, block_number)?;
        Ok((timer, with_timers.ancestors))
    }

    /// Like [`Self::honest_path_timer`], also returning each ancestor's local timer.
    pub fn honest_path_timer_with_timers(
        &self,
        edge_id: EdgeId,
        block_number: BlockNumber,
    ) -> Result<(PathTimer, AncestorsWithTimers), TreeError> {
        let edge = self.edges.get(&edge_id).ok_or(TreeError::EdgeNotFound(edge_id))?;
        let with_timers = self.compute_ancestors_with_timers(edge_id, block_number)?;
        let own = PathTimer(self.local_timer(&edge, block_number));
        let timer = with_timers
            .local_timers
            .iter()
            .copied()
            .fold(own, PathTimer::saturating_add);
        Ok((timer, with_timers))
    }

    /// Whether some honest ancestor has a path timer of at least
    /// `challenge_period_blocks`.
    ///
    /// `local_timers` are ordered child to root, as returned by
    /// [`Self::compute_ancestors_with_timers`]. An ancestor's path timer is its
    /// local timer plus those of every ancestor closer to the root.
    pub fn has_confirmable_ancestor(local_timers: &[u64], challenge_period_blocks: u64) -> bool {
        local_timers
            .iter()
            .rev()
            .scan(0u64, |total, timer| {
                *total = total.saturating_add(*timer);
                Some(*total)
            })
            .any(|total| total >= challenge_period_blocks)
    }

    /// Honest ancestors of `edge_id` with each ancestor's local timer at `block_number`.
    pub fn compute_ancestors_with_timers(
        &self,
        edge_id: EdgeId,
        block_number: BlockNumber,
    ) -> Result<AncestorsWithTimers, TreeError> {
        let mut cursor = self.edges.get(&edge_id).ok_or(TreeError::EdgeNotFound(edge_id))?;
        let mut result = AncestorsWithTimers::default();

        loop {
            let missing_root = || TreeError::RootNotFound {
                level: cursor.level,
                origin_id: cursor.origin_id,
            };
            let root = self
                .level_root(cursor.level, cursor.origin_id)
                .ok_or_else(missing_root)?;
            for ancestor in self.ancestors_within_level(&root, &cursor)?.iter().rev() {
                result.ancestors.0.push(ancestor.id);
                result.local_timers.push(self.local_timer(ancestor, block_number));
            }

            // A block level root claims the assertion itself.
            let Some(parent_level) = root.level.parent() else {
                break;
            };
            let claim_id = root.claim_id.ok_or_else(missing_root)?;
            let claimed = self
                .edges
                .get(&claim_id.into())
                .filter(|claimed| claimed.level == parent_level)
                .ok_or(TreeError::ClaimedEdgeNotFound {
                    edge_id: root.id,
                    claim_id,
                })?;

            result.ancestors.0.push(claimed.id);
            result.local_timers.push(self.local_timer(&claimed, block_number));
            cursor = claimed;
        }

        Ok(result)
    }

    /// Honest edges between `root` and `target` within one level, root first,
    /// `target` excluded. Found by descending bisection children from the root
    /// towards the target's start height.
    fn ancestors_within_level(&self, root: &Edge, target: &Edge) -> Result<Vec<Edge>, TreeError> {
        let not_descendant = || TreeError::NotDescendant {
            edge_id: target.id,
            ancestor_id: root.id,
        };
        if !root.heights().contains(&target.heights()) {
            return Err(not_descendant());
        }

        let mut path = Vec::new();
        let mut cursor = root.clone();
        while cursor.id != target.id {
            let mid = bisection_point(cursor.start_height, cursor.end_height)
                .ok_or_else(not_descendant)?;
            let (start, end) = if target.start_height < mid {
                (cursor.start_height, mid)
            } else {
                (mid, cursor.end_height)
            };
            let child = self
                .edge_at_span(cursor.level, cursor.origin_id, start, end)
                .ok_or_else(not_descendant)?;
            path.push(cursor);
            cursor = child;
        }
        Ok(path)
    }

    /// Blocks `edge` stayed unrivaled as of `block_number`.
    ///
    /// Zero before the edge exists. Once a rival is created the timer freezes
    /// at the gap between the edge and its earliest rival; an edge created
    /// after its earliest rival never accrues time.
    pub(crate) fn local_timer(&self, edge: &Edge, block_number: BlockNumber) -> u64 {
        if block_number <= edge.created_at_block {
            return 0;
        }
        match self.earliest_rival_block(edge) {
            Some(rival_at) if rival_at <= block_number => {
                rival_at.saturating_sub(edge.created_at_block)
            }
            _ => block_number - edge.created_at_block,
        }
    }

    fn earliest_rival_block(&self, edge: &Edge) -> Option<BlockNumber> {
        self.mutual_ids.get(&edge.mutual_id)?.fold(None, |earliest, (id, created)| {
            if *id == edge.id {
                return earliest;
            }
            Some(earliest.map_or(*created, |at: BlockNumber| at.min(*created)))
        })
    }

    /// Local timer of a tracked honest edge.
    pub fn time_unrivaled(
        &self,
        edge_id: EdgeId,
        block_number: BlockNumber,
    ) -> Result<u64, TreeError> {
        let edge = self.edges.get(&edge_id).ok_or(TreeError::EdgeNotFound(edge_id))?;
        Ok(self.local_timer(&edge, block_number))
    }

    /// Whether no rival of a tracked honest edge exists at `block_number`.
    pub fn is_unrivaled_at(
        &self,
        edge_id: EdgeId,
        block_number: BlockNumber,
    ) -> Result<bool, TreeError> {
        let edge = self.edges.get(&edge_id).ok_or(TreeError::EdgeNotFound(edge_id))?;
        let rival_at = self.earliest_rival_block(&edge);
        Ok(rival_at.is_none_or(|rival_at| rival_at > block_number))
    }
}
