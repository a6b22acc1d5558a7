//! Honest challenge tree tracking for X Layer interactive fraud proofs
//!
//! The [`Watcher`] follows challenge manager events on the parent chain and
//! keeps, per challenged assertion, a tree of the edges the local validator
//! agrees with. Callers use it to compute honest path timers, which decide
//! when an honest edge can be confirmed by time.

pub mod config;
pub mod containers;
pub mod error;
pub mod memory;
pub mod oracle;
pub mod paths;
pub mod registry;
pub mod retry;
pub mod tree;
pub mod types;
pub mod watcher;

#[cfg(test)]
mod test_utils;

pub use config::WatcherConfig;
pub use error::{Cancelled, OracleError, TreeError, WatcherError};
pub use oracle::{AgreementOracle, ChainLogOracle};
pub use paths::AncestorsWithTimers;
pub use registry::{ChallengeRegistry, EvictionPolicy, RetainAll, TrackedChallenge};
pub use retry::RetryConfig;
pub use tree::{EdgeInsertion, HonestChallengeTree};
pub use types::{AssertionHash, ClaimId, Edge, EdgeId, HonestAncestors, PathTimer};
pub use watcher::{InitialSync, TrackedEdge, Watcher};
