//! Chain watcher
//!
//! Scans challenge manager events from the latest confirmed assertion up to
//! the chain head, then polls for new blocks. Every `EdgeAdded` event feeds
//! the honest challenge tree of its assertion; confirmation events index
//! confirmed edges by the id they claim.

use crate::{
    config::WatcherConfig,
    error::{OracleError, WatcherError},
    oracle::{AgreementOracle, BlockRange, ChainLogOracle, EdgeLog, EventKind},
    paths::AncestorsWithTimers,
    registry::{ChallengeRegistry, EvictionPolicy, TrackedChallenge},
    retry::{cancellable, until_succeeds},
    tree::HonestChallengeTree,
    types::{AssertionHash, BlockNumber, ClaimId, Edge, EdgeId, HonestAncestors, PathTimer},
};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Completion signal of the initial scan
#[derive(Clone, Debug)]
pub struct InitialSync {
    rx: watch::Receiver<bool>,
}

impl InitialSync {
    /// Whether the initial scan already completed.
    pub fn is_complete(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until the initial scan completes.
    ///
    /// Returns `false` if the watcher was dropped first.
    pub async fn wait(&mut self) -> bool {
        self.rx.wait_for(|synced| *synced).await.is_ok()
    }
}

/// Snapshot of one honest edge for API consumers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEdge {
    /// Assertion the edge's challenge disputes
    pub assertion_hash: AssertionHash,
    /// The honest edge
    pub edge: Edge,
    /// Whether a rival existed at the snapshot head
    pub has_rival: bool,
    /// Local timer at the head the snapshot was taken at
    pub time_unrivaled: u64,
}

/// Follows challenge manager events and answers honest path queries.
#[derive(Debug)]
pub struct Watcher {
    chain: Arc<dyn ChainLogOracle>,
    agreement: Arc<dyn AgreementOracle>,
    config: WatcherConfig,
    challenges: ChallengeRegistry,
    synced: watch::Sender<bool>,
}

impl Watcher {
    /// Create a watcher; nothing is scanned until [`Watcher::watch`] runs.
    pub fn new(
        chain: Arc<dyn ChainLogOracle>,
        agreement: Arc<dyn AgreementOracle>,
        config: WatcherConfig,
    ) -> Self {
        let (synced, _) = watch::channel(false);
        Self {
            chain,
            agreement,
            config,
            challenges: ChallengeRegistry::new(),
            synced,
        }
    }

    /// Replace the default policy, which keeps every challenge.
    pub fn with_eviction_policy(mut self, policy: impl EvictionPolicy + 'static) -> Self {
        self.challenges = ChallengeRegistry::with_eviction_policy(policy);
        self
    }

    /// Configuration the watcher runs with.
    pub const fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Signal completed once the initial scan finishes.
    pub fn initial_sync(&self) -> InitialSync {
        InitialSync {
            rx: self.synced.subscribe(),
        }
    }

    /// Whether the initial scan completed.
    pub fn is_synced(&self) -> bool {
        *self.synced.borrow()
    }

    /// Scan history, then poll the chain head until `cancel` fires.
    ///
    /// Cancellation before the initial scan completes returns
    /// [`WatcherError::Cancelled`]; afterwards it returns `Ok(())`.
    pub async fn watch(&self, cancel: CancellationToken) -> Result<(), WatcherError> {
        let retry = self.config.retry;
        let window = until_succeeds(&cancel, &retry, "initial scan window", || {
            self.initial_scan_window()
        })
        .await?;
        let manager = until_succeeds(&cancel, &retry, "challenge manager", || {
            self.chain.challenge_manager()
        })
        .await?;

        info!(
            target: "challenge_watcher",
            validator = %self.config.validator_name,
            from = window.from,
            to = window.to,
            "Scanning challenge events since latest confirmed assertion"
        );
        for chunk in window.chunks(self.config.max_get_log_blocks) {
            for kind in EventKind::SCAN_ORDER {
                until_succeeds(&cancel, &retry, kind.as_str(), || {
                    self.scan(&cancel, manager, kind, chunk)
                })
                .await?;
            }
        }

        self.synced.send_replace(true);
        info!(
            target: "challenge_watcher",
            validator = %self.config.validator_name,
            head = window.to,
            challenges = self.challenges.len(),
            "Initial challenge event sync complete"
        );

        let mut scanned_head = window.to;
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of an interval resolves immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match self.poll_once(&cancel, manager, scanned_head).await {
                Ok(head) => scanned_head = head,
                Err(WatcherError::Cancelled(_)) => break,
                Err(e) => {
                    error!(
                        target: "challenge_watcher",
                        validator = %self.config.validator_name,
                        scanned_head,
                        error = %e,
                        "Failed to scan new blocks, retrying next tick"
                    );
                }
            }
        }

        info!(
            target: "challenge_watcher",
            validator = %self.config.validator_name,
            scanned_head,
            "Chain watcher stopped"
        );
        Ok(())
    }

    async fn initial_scan_window(&self) -> Result<BlockRange, WatcherError> {
        let confirmed = self.chain.latest_confirmed_assertion().await?;
        let head = self.head_block_number().await?;
        Ok(BlockRange::new(confirmed.created_at_block, head))
    }

    /// Scan `(scanned_head, head]` if the head advanced. Returns the new scanned head.
    ///
    /// A failing log filter abandons the tick; the caller keeps the old
    /// scanned head so the same window is retried on the next tick. Pending
    /// chain requests are dropped as soon as `cancel` fires.
    async fn poll_once(
        &self,
        cancel: &CancellationToken,
        manager: Address,
        scanned_head: BlockNumber,
    ) -> Result<BlockNumber, WatcherError> {
        let head = cancellable(cancel, "chain head", self.head_block_number()).await??;
        if head <= scanned_head {
            if head < scanned_head {
                warn!(
                    target: "challenge_watcher",
                    head,
                    scanned_head,
                    "Chain head moved backwards, skipping tick"
                );
            }
            return Ok(scanned_head);
        }

        let window = BlockRange::new(scanned_head + 1, head);
        for kind in EventKind::SCAN_ORDER {
            self.scan(cancel, manager, kind, window).await?;
        }

        let evicted = self.challenges.sweep(head);
        debug!(
            target: "challenge_watcher",
            from = window.from,
            to = window.to,
            evicted,
            "Scanned new blocks"
        );
        Ok(head)
    }

    /// Filter logs of `kind` within `range` and apply them in log order.
    ///
    /// Applying a single event is retried until it succeeds or `cancel` fires.
    async fn scan(
        &self,
        cancel: &CancellationToken,
        manager: Address,
        kind: EventKind,
        range: BlockRange,
    ) -> Result<(), WatcherError> {
        let filter = self.chain.filter_logs(manager, kind, range);
        let mut logs = cancellable(cancel, kind.as_str(), filter).await??;
        logs.sort_by_key(|log| (log.block_number, log.log_index));

        let retry = self.config.retry;
        for log in &logs {
            if kind.is_confirmation() {
                until_succeeds(cancel, &retry, "process edge confirmation", || {
                    self.process_edge_confirmation(log)
                })
                .await?;
            } else {
                until_succeeds(cancel, &retry, "process edge added", || {
                    self.process_edge_added(log)
                })
                .await?;
            }
        }

        if !logs.is_empty() {
            debug!(
                target: "challenge_watcher",
                %kind,
                from = range.from,
                to = range.to,
                count = logs.len(),
                "Applied challenge events"
            );
        }
        Ok(())
    }

    async fn fetch_edge(&self, edge_id: EdgeId) -> Result<Edge, WatcherError> {
        let edge = self.chain.get_edge(edge_id).await?;
        Ok(edge.ok_or(OracleError::EdgeNotFound(edge_id))?)
    }

    async fn process_edge_added(&self, log: &EdgeLog) -> Result<(), WatcherError> {
        let edge = self.fetch_edge(log.edge_id).await?;
        let assertion_hash = edge.assertion_hash;
        if !self.config.tracks_assertion(assertion_hash) {
            return Ok(());
        }

        let origin_id = log.origin_id.unwrap_or(edge.origin_id);
        let challenge = self.challenges.get_or_create(assertion_hash, || {
            info!(
                target: "challenge_watcher",
                validator = %self.config.validator_name,
                assertion = %assertion_hash.short(),
                origin = %origin_id.short(),
                "Tracking new challenge"
            );
            TrackedChallenge::new(HonestChallengeTree::new(
                assertion_hash,
                Arc::clone(&self.agreement),
                self.config.validator_name.clone(),
            ))
        });

        challenge.tree().add_edge(edge).await?;
        Ok(())
    }

    async fn process_edge_confirmation(&self, log: &EdgeLog) -> Result<(), WatcherError> {
        let edge = self.fetch_edge(log.edge_id).await?;
        let Some(claim_id) = edge.claim_id else {
            return Ok(());
        };
        let Some(challenge) = self.challenges.get(&edge.assertion_hash) else {
            return Ok(());
        };

        if challenge.record_confirmed_claim(claim_id, edge.id) {
            info!(
                target: "challenge_watcher",
                validator = %self.config.validator_name,
                edge = %edge.id.short(),
                claim = %claim_id.short(),
                kind = %log.kind,
                "Confirmed edge with claim"
            );
        }
        Ok(())
    }

    async fn head_block_number(&self) -> Result<BlockNumber, WatcherError> {
        let number = self.chain.header_by_number().await?.number;
        u64::try_from(number).map_err(|_| WatcherError::HeaderNotRepresentable(number))
    }

    fn tracked(
        &self,
        assertion_hash: AssertionHash,
    ) -> Result<Arc<TrackedChallenge>, WatcherError> {
        self.challenges
            .get(&assertion_hash)
            .ok_or(WatcherError::NoTrackedChallenge(assertion_hash))
    }

    /// Confirmed edge of a tracked challenge that claims `claim_id`.
    pub fn confirmed_edge_with_claim_exists(
        &self,
        assertion_hash: AssertionHash,
        claim_id: ClaimId,
    ) -> Option<EdgeId> {
        self.challenges.get(&assertion_hash)?.confirmed_edge_with_claim(claim_id)
    }

    /// Path timer of an honest edge at the current chain head, with its honest ancestors.
    pub async fn compute_honest_path_timer(
        &self,
        assertion_hash: AssertionHash,
        edge_id: EdgeId,
    ) -> Result<(PathTimer, HonestAncestors), WatcherError> {
        let head = self.head_block_number().await?;
        let (timer, with_timers) =
            self.compute_honest_path_timer_at(assertion_hash, edge_id, head)?;
        Ok((timer, with_timers.ancestors))
    }

    /// Path timer of an honest edge at `block_number`, with its honest
    /// ancestors and their local timers.
    pub fn compute_honest_path_timer_at(
        &self,
        assertion_hash: AssertionHash,
        edge_id: EdgeId,
        block_number: BlockNumber,
    ) -> Result<(PathTimer, AncestorsWithTimers), WatcherError> {
        let challenge = self.tracked(assertion_hash)?;
        Ok(challenge.tree().honest_path_timer_with_timers(edge_id, block_number)?)
    }

    /// Whether the ancestor `local_timers` of an edge in a tracked challenge
    /// add up to `challenge_period_blocks` at some honest ancestor.
    pub fn has_confirmable_ancestor(
        &self,
        assertion_hash: AssertionHash,
        local_timers: &[u64],
        challenge_period_blocks: u64,
    ) -> Result<bool, WatcherError> {
        self.tracked(assertion_hash)?;
        Ok(HonestChallengeTree::has_confirmable_ancestor(local_timers, challenge_period_blocks))
    }

    /// Honest ancestors of an edge with their local timers at the current head.
    pub async fn compute_ancestors(
        &self,
        assertion_hash: AssertionHash,
        edge_id: EdgeId,
    ) -> Result<AncestorsWithTimers, WatcherError> {
        let head = self.head_block_number().await?;
        let challenge = self.tracked(assertion_hash)?;
        Ok(challenge.tree().compute_ancestors_with_timers(edge_id, head)?)
    }

    /// Whether `edge_id` is a tracked honest edge of the challenge on `assertion_hash`.
    pub fn is_honest_edge(&self, assertion_hash: AssertionHash, edge_id: EdgeId) -> bool {
        self.challenges
            .get(&assertion_hash)
            .is_some_and(|challenge| challenge.tree().has_edge(edge_id))
    }

    /// Honest level-zero edge of the block challenge on `assertion_hash`.
    pub fn block_challenge_root_edge(
        &self,
        assertion_hash: AssertionHash,
    ) -> Result<Edge, WatcherError> {
        Ok(self.tracked(assertion_hash)?.tree().block_challenge_root_edge()?)
    }

    /// Honest edges of every tracked challenge.
    pub fn get_edges(&self) -> Vec<Edge> {
        self.challenges.edges()
    }

    /// Snapshot of every honest edge with its rivalry status at the current head.
    pub async fn tracked_edges(&self) -> Result<Vec<TrackedEdge>, WatcherError> {
        let head = self.head_block_number().await?;
        let mut snapshot = Vec::new();
        for (assertion_hash, challenge) in self.challenges.challenges() {
            let tree = challenge.tree();
            for edge in tree.edges() {
                let has_rival = !tree.is_unrivaled_at(edge.id, head)?;
                let time_unrivaled = tree.time_unrivaled(edge.id, head)?;
                snapshot.push(TrackedEdge {
                    assertion_hash,
                    edge,
                    has_rival,
                    time_unrivaled,
                });
            }
        }
        Ok(snapshot)
    }
}
