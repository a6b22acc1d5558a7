//! Simple example: following a block challenge with the in-memory chain
//!
//! An honest validator and a rival bisect a 16 block dispute. The watcher
//! syncs, follows a few more blocks and reports the honest path timer of the
//! lowest honest edge.
//!
//! Run with:
//! ```bash
//! cargo run --example simple-watcher
//! ```

use alloy_primitives::B256;
use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use xlayer_challenge_watcher::{
    AssertionHash, ClaimId, Edge, EdgeId, Watcher, WatcherConfig,
    memory::{InMemoryChain, MemoryAgreement},
    oracle::ConfirmedAssertion,
    types::{ChallengeLevel, MutualId, OriginId},
};

const HONEST: u8 = 0xaa;
const RIVAL: u8 = 0xbb;
const CHALLENGE_PERIOD: u64 = 10;

/// History root of a branch at `height`
fn root(branch: u8, height: u64) -> B256 {
    let mut bytes = [branch; 32];
    bytes[24..].copy_from_slice(&height.to_be_bytes());
    B256::from(bytes)
}

fn block_edge(
    assertion: AssertionHash,
    (start, start_branch): (u64, u8),
    (end, end_branch): (u64, u8),
    claim: Option<ClaimId>,
    created_at_block: u64,
) -> Edge {
    let origin_id = OriginId(assertion.0);
    let start_root = root(start_branch, start);
    let end_root = root(end_branch, end);
    let mutual_id = MutualId::compute(ChallengeLevel::Block, origin_id, start, start_root, end);
    Edge {
        id: EdgeId::compute(mutual_id, end_root),
        origin_id,
        mutual_id,
        level: ChallengeLevel::Block,
        start_height: start,
        start_root,
        end_height: end,
        end_root,
        claim_id: claim,
        assertion_hash: assertion,
        created_at_block,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let assertion = AssertionHash(B256::repeat_byte(0x42));
    let claim = Some(ClaimId(assertion.0));

    let chain = Arc::new(InMemoryChain::new());
    let agreement = Arc::new(MemoryAgreement::new());
    chain.set_latest_confirmed(ConfirmedAssertion {
        hash: assertion,
        created_at_block: 0,
    });

    let honest_root = block_edge(assertion, (0, HONEST), (16, HONEST), claim, 1);
    let rival_root = block_edge(assertion, (0, HONEST), (16, RIVAL), claim, 3);
    let honest_lower = block_edge(assertion, (0, HONEST), (8, HONEST), None, 4);
    for edge in [&honest_root, &honest_lower] {
        agreement.add_honest_edge(edge);
    }
    chain.add_edge(honest_root.clone());
    chain.add_edge(rival_root);
    chain.set_head(5);

    let config = WatcherConfig {
        poll_interval_ms: 50,
        ..WatcherConfig::from_env()
    };
    let watcher = Arc::new(Watcher::new(chain.clone(), agreement, config));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn({
        let watcher = Arc::clone(&watcher);
        let cancel = cancel.clone();
        async move { watcher.watch(cancel).await }
    });

    let mut sync = watcher.initial_sync();
    sync.wait().await;
    info!(edges = watcher.get_edges().len(), "Initial sync complete");

    chain.add_edge(honest_lower.clone());
    chain.set_head(12);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let lowest = honest_lower.id;
    let (timer, ancestors) = watcher.compute_honest_path_timer(assertion, lowest).await?;
    info!(edge = %lowest.short(), %timer, ancestors = ancestors.len(), "Honest path timer");

    let with_timers = watcher.compute_ancestors(assertion, lowest).await?;
    let timers = &with_timers.local_timers;
    let confirmable = watcher.has_confirmable_ancestor(assertion, timers, CHALLENGE_PERIOD)?;
    info!(confirmable, period = CHALLENGE_PERIOD, "Checked honest ancestors");

    cancel.cancel();
    handle.await??;
    Ok(())
}
