//! Common types

use alloy_primitives::{B256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use tiny_keccak::{Hasher, Keccak};

/// Parent chain block number
pub type BlockNumber = u64;

/// Height inside the history of a challenge level
pub type Height = u64;

/// Compute keccak256 over the concatenation of `parts`
pub(crate) fn keccak256(parts: &[&[u8]]) -> B256 {
    let mut hasher = Keccak::v256();
    for part in parts {
        hasher.update(part);
    }
    let mut output = [0u8; 32];
    hasher.finalize(&mut output);
    B256::from(output)
}

macro_rules! hash_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[derive(Serialize, Deserialize)]
        pub struct $name(pub B256);

        impl $name {
            /// Wraps a raw 32-byte hash.
            pub const fn new(hash: B256) -> Self {
                Self(hash)
            }

            /// Returns the underlying hash.
            pub const fn hash(&self) -> B256 {
                self.0
            }

            /// First four bytes as hex, used in log lines.
            pub fn short(&self) -> String {
                format!("0x{}", hex::encode(&self.0[..4]))
            }
        }

        impl From<B256> for $name {
            fn from(hash: B256) -> Self {
                Self(hash)
            }
        }

        impl From<$name> for B256 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }
    };
}

hash_id!(
    /// Unique id of an edge in the challenge manager
    EdgeId
);
hash_id!(
    /// Id shared by every edge of one sub-challenge (the root of its challenge level)
    OriginId
);
hash_id!(
    /// Id shared by rival edges: same level, origin, start point and end height
    MutualId
);
hash_id!(
    /// Id of the parent-level edge or assertion a level-zero edge claims
    ClaimId
);
hash_id!(
    /// Hash of a top-level assertion a dispute is rooted at
    AssertionHash
);

impl From<ClaimId> for EdgeId {
    fn from(claim: ClaimId) -> Self {
        Self(claim.0)
    }
}

impl From<ClaimId> for AssertionHash {
    fn from(claim: ClaimId) -> Self {
        Self(claim.0)
    }
}

impl MutualId {
    /// Derives the mutual id the challenge manager assigns to an edge:
    /// `keccak(level ‖ originId ‖ startHeight ‖ startRoot ‖ endHeight)`.
    pub fn compute(
        level: ChallengeLevel,
        origin_id: OriginId,
        start_height: Height,
        start_root: B256,
        end_height: Height,
    ) -> Self {
        let start = U256::from(start_height).to_be_bytes::<32>();
        let end = U256::from(end_height).to_be_bytes::<32>();
        Self(keccak256(&[
            &[level.as_u8()],
            origin_id.0.as_slice(),
            &start,
            start_root.as_slice(),
            &end,
        ]))
    }
}

impl EdgeId {
    /// Derives an edge id from its mutual id and end history root.
    pub fn compute(mutual_id: MutualId, end_root: B256) -> Self {
        Self(keccak256(&[mutual_id.0.as_slice(), end_root.as_slice()]))
    }
}

/// Granularity of a bisection game, from coarsest to finest
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChallengeLevel {
    /// Challenge over blocks of the disputed assertion
    Block,
    /// Challenge over big steps of a single block
    BigStep,
    /// Challenge over small steps of a single big step
    SmallStep,
    /// Terminal challenge settled by a one step proof
    OneStep,
}

impl ChallengeLevel {
    /// Returns the level whose edges are claimed by level-zero edges of this level.
    pub const fn parent(&self) -> Option<Self> {
        match self {
            Self::Block => None,
            Self::BigStep => Some(Self::Block),
            Self::SmallStep => Some(Self::BigStep),
            Self::OneStep => Some(Self::SmallStep),
        }
    }

    /// Returns the numeric level used on chain.
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Returns the string representation of the level.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::BigStep => "big_step",
            Self::SmallStep => "small_step",
            Self::OneStep => "one_step",
        }
    }
}

impl fmt::Display for ChallengeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Start and end height of an edge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeightRange {
    /// First height of the range
    pub start: Height,
    /// Last height of the range
    pub end: Height,
}

impl HeightRange {
    /// Create a new height range
    pub const fn new(start: Height, end: Height) -> Self {
        Self { start, end }
    }

    /// Number of steps covered by the range.
    pub const fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    /// Whether the range covers no steps.
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `other` lies fully inside this range.
    pub const fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Start and end history commitment roots of an edge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HistoryCommitments {
    /// History root at the start height
    pub start_root: B256,
    /// History root at the end height
    pub end_root: B256,
}

/// An edge as read from the challenge manager.
///
/// Edges are immutable once created; only confirmation metadata is appended
/// on chain later, and that is observed through events rather than stored here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    /// Id assigned by the challenge manager
    pub id: EdgeId,
    /// Sub-challenge the edge belongs to
    pub origin_id: OriginId,
    /// Id shared with the edge's rivals
    pub mutual_id: MutualId,
    /// Challenge level of the edge
    pub level: ChallengeLevel,
    /// Start height
    pub start_height: Height,
    /// History root at the start height
    pub start_root: B256,
    /// End height
    pub end_height: Height,
    /// History root at the end height
    pub end_root: B256,
    /// Set only on level-zero edges
    pub claim_id: Option<ClaimId>,
    /// Assertion the whole dispute is rooted at
    pub assertion_hash: AssertionHash,
    /// Parent chain block the edge was created in
    pub created_at_block: BlockNumber,
}

impl Edge {
    /// Height range of the edge.
    pub const fn heights(&self) -> HeightRange {
        HeightRange::new(self.start_height, self.end_height)
    }

    /// History commitments of the edge.
    pub const fn commitments(&self) -> HistoryCommitments {
        HistoryCommitments {
            start_root: self.start_root,
            end_root: self.end_root,
        }
    }

    /// Level-zero edges open a challenge level by claiming a parent edge or assertion.
    pub const fn is_level_zero(&self) -> bool {
        self.claim_id.is_some()
    }
}

/// Answer of the local agreement oracle for one edge
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agreement {
    /// Both start and end commitments match the local trace
    pub is_honest_edge: bool,
    /// The start commitment matches the local trace
    pub agrees_with_start_commit: bool,
}

/// Cumulative unrivaled blocks of an edge and all of its honest ancestors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[derive(Serialize, Deserialize)]
pub struct PathTimer(pub u64);

impl PathTimer {
    /// Adds a local timer, saturating at `u64::MAX`.
    pub const fn saturating_add(self, blocks: u64) -> Self {
        Self(self.0.saturating_add(blocks))
    }
}

impl fmt::Display for PathTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Honest ancestors of an edge ordered from its direct parent up to the
/// block challenge root. Claimed edges linking two levels are included.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HonestAncestors(pub Vec<EdgeId>);

impl HonestAncestors {
    /// Ancestor ids, child to root.
    pub fn ids(&self) -> &[EdgeId] {
        &self.0
    }

    /// Number of ancestors.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the edge is the root of the whole tree.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Height at which an edge spanning `[start, end]` is bisected.
///
/// Returns `None` for edges of length one or less, which cannot be bisected.
pub const fn bisection_point(start: Height, end: Height) -> Option<Height> {
    if end < start || end - start < 2 {
        return None;
    }
    if end - start == 2 {
        return Some(start + 1);
    }
    let diverging = (end - 1) ^ start;
    let most_significant = Height::BITS - 1 - diverging.leading_zeros();
    let mask = Height::MAX << most_significant;
    Some((end - 1) & mask)
}
