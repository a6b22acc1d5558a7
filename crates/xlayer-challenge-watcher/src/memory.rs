//! In-memory oracles for tests and local runs.

use crate::{
    error::OracleError,
    oracle::{
        AgreementOracle, BlockRange, ChainLogOracle, ConfirmedAssertion, EdgeLog, EventKind,
        Header,
    },
    types::{
        Agreement, BlockNumber, ChallengeLevel, Edge, EdgeId, Height, HeightRange,
        HistoryCommitments,
    },
};
use alloy_primitives::{
    Address, B256, U256,
    map::{HashMap, HashSet},
};
use anyhow::anyhow;
use async_trait::async_trait;
use std::{
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

#[derive(Debug, Default)]
struct ChainState {
    head: U256,
    latest_confirmed: ConfirmedAssertion,
    manager: Address,
    edges: HashMap<EdgeId, Edge>,
    logs: Vec<EdgeLog>,
    next_log_index: u64,
    filter_failures: HashMap<EventKind, u32>,
    header_failures: u32,
    headers_stalled: bool,
    edge_lookup_failures: u32,
    filter_calls: Vec<(EventKind, BlockRange)>,
}

/// A challenge manager kept in memory.
///
/// Edges added here emit `EdgeAdded` logs at their creation block. Failures
/// can be injected per call kind; each injected failure is consumed by one call.
#[derive(Debug, Default)]
pub struct InMemoryChain {
    state: Mutex<ChainState>,
}

impl InMemoryChain {
    /// Create an empty chain at block zero.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the latest block number.
    pub fn set_head(&self, head: BlockNumber) {
        self.state().head = U256::from(head);
    }

    /// Set a head number that may not fit in 64 bits.
    pub fn set_head_number(&self, number: U256) {
        self.state().head = number;
    }

    /// Set the assertion reported as latest confirmed.
    pub fn set_latest_confirmed(&self, assertion: ConfirmedAssertion) {
        self.state().latest_confirmed = assertion;
    }

    /// Set the challenge manager address logs are served for.
    pub fn set_challenge_manager(&self, manager: Address) {
        self.state().manager = manager;
    }

    /// Store `edge` and emit its `EdgeAdded` log at `edge.created_at_block`.
    pub fn add_edge(&self, edge: Edge) {
        let mut state = self.state();
        let log_index = state.next_log_index;
        state.next_log_index += 1;
        state.logs.push(EdgeLog {
            kind: EventKind::EdgeAdded,
            edge_id: edge.id,
            origin_id: Some(edge.origin_id),
            block_number: edge.created_at_block,
            log_index,
        });
        state.edges.insert(edge.id, edge);
    }

    /// Emit a confirmation log of `kind` for `edge_id` at `block_number`.
    ///
    /// `EdgeAdded` is not a confirmation and is ignored.
    pub fn confirm_edge(&self, edge_id: EdgeId, kind: EventKind, block_number: BlockNumber) {
        if !kind.is_confirmation() {
            return;
        }
        let mut state = self.state();
        let log_index = state.next_log_index;
        state.next_log_index += 1;
        state.logs.push(EdgeLog {
            kind,
            edge_id,
            origin_id: None,
            block_number,
            log_index,
        });
    }

    /// Fail the next `times` log filters for `kind`.
    pub fn fail_next_filters(&self, kind: EventKind, times: u32) {
        *self.state().filter_failures.entry(kind).or_default() += times;
    }

    /// Fail the next `times` header requests.
    pub fn fail_next_headers(&self, times: u32) {
        self.state().header_failures += times;
    }

    /// Make header requests hang until `stalled` is cleared.
    pub fn stall_headers(&self, stalled: bool) {
        self.state().headers_stalled = stalled;
    }

    /// Fail the next `times` edge lookups.
    pub fn fail_next_edge_lookups(&self, times: u32) {
        self.state().edge_lookup_failures += times;
    }

    /// Every successful log filter served so far, in call order.
    pub fn filter_calls(&self) -> Vec<(EventKind, BlockRange)> {
        self.state().filter_calls.clone()
    }
}

fn take_failure(remaining: &mut u32) -> bool {
    if *remaining == 0 {
        return false;
    }
    *remaining -= 1;
    true
}

#[async_trait]
impl ChainLogOracle for InMemoryChain {
    async fn header_by_number(&self) -> Result<Header, OracleError> {
        while self.state().headers_stalled {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let mut state = self.state();
        if take_failure(&mut state.header_failures) {
            let cause = anyhow!("injected failure");
            return Err(OracleError::request("eth_getBlockByNumber", cause));
        }
        Ok(Header { number: state.head })
    }

    async fn latest_confirmed_assertion(&self) -> Result<ConfirmedAssertion, OracleError> {
        Ok(self.state().latest_confirmed)
    }

    async fn challenge_manager(&self) -> Result<Address, OracleError> {
        Ok(self.state().manager)
    }

    async fn filter_logs(
        &self,
        manager: Address,
        kind: EventKind,
        range: BlockRange,
    ) -> Result<Vec<EdgeLog>, OracleError> {
        let mut state = self.state();
        if take_failure(state.filter_failures.entry(kind).or_default()) {
            return Err(OracleError::LogFilter {
                kind,
                from: range.from,
                to: range.to,
                source: anyhow!("injected failure"),
            });
        }
        if manager != state.manager {
            return Ok(Vec::new());
        }
        state.filter_calls.push((kind, range));

        let mut logs: Vec<_> = state
            .logs
            .iter()
            .filter(|log| {
                log.kind == kind && range.from <= log.block_number && log.block_number <= range.to
            })
            .cloned()
            .collect();
        logs.sort_by_key(|log| (log.block_number, log.log_index));
        Ok(logs)
    }

    async fn get_edge(&self, edge_id: EdgeId) -> Result<Option<Edge>, OracleError> {
        let mut state = self.state();
        if take_failure(&mut state.edge_lookup_failures) {
            return Err(OracleError::request("getEdge", anyhow!("injected failure")));
        }
        Ok(state.edges.get(&edge_id).cloned())
    }
}

/// Agreement oracle backed by a set of honest history points.
///
/// A start or end commitment is agreed with when `(level, height, root)` was
/// registered as honest.
#[derive(Debug, Default)]
pub struct MemoryAgreement {
    honest: Mutex<HashSet<(ChallengeLevel, Height, B256)>>,
    calls: AtomicU64,
}

impl MemoryAgreement {
    /// Create an oracle that agrees with nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the history root at `height` of `level` as honest.
    pub fn add_honest_history(&self, level: ChallengeLevel, height: Height, root: B256) {
        self.honest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((level, height, root));
    }

    /// Mark both commitments of `edge` as honest.
    pub fn add_honest_edge(&self, edge: &Edge) {
        self.add_honest_history(edge.level, edge.start_height, edge.start_root);
        self.add_honest_history(edge.level, edge.end_height, edge.end_root);
    }

    /// Number of agreement checks served.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl AgreementOracle for MemoryAgreement {
    async fn agrees(
        &self,
        level: ChallengeLevel,
        heights: HeightRange,
        commitments: HistoryCommitments,
    ) -> Result<Agreement, OracleError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let honest = self.honest.lock().unwrap_or_else(PoisonError::into_inner);
        let agrees_with_start_commit =
            honest.contains(&(level, heights.start, commitments.start_root));
        let is_honest_edge = agrees_with_start_commit
            && honest.contains(&(level, heights.end, commitments.end_root));
        Ok(Agreement {
            is_honest_edge,
            agrees_with_start_commit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{ALICE, BOB, EdgeBuilder};

    #[tokio::test]
    async fn test_filter_logs_by_kind_and_range() {
        let chain = InMemoryChain::new();
        let early = EdgeBuilder::block(0, ALICE, 16, ALICE).created_at(3).build();
        let late = EdgeBuilder::block(0, ALICE, 16, BOB).created_at(9).build();
        chain.add_edge(late.clone());
        chain.add_edge(early.clone());
        chain.confirm_edge(early.id, EventKind::EdgeConfirmedByTime, 9);

        let added = chain
            .filter_logs(Address::ZERO, EventKind::EdgeAdded, BlockRange::new(0, 10))
            .await
            .unwrap();
        let added_ids: Vec<_> = added.iter().map(|log| log.edge_id).collect();
        assert_eq!(added_ids, vec![early.id, late.id]);
        assert_eq!(added[0].origin_id, Some(early.origin_id));

        let confirmed = chain
            .filter_logs(Address::ZERO, EventKind::EdgeConfirmedByTime, BlockRange::new(4, 9))
            .await
            .unwrap();
        assert_eq!(confirmed.len(), 1);
        assert_eq!(confirmed[0].edge_id, early.id);
        assert_eq!(confirmed[0].origin_id, None);

        let other_manager = Address::repeat_byte(1);
        assert!(
            chain
                .filter_logs(other_manager, EventKind::EdgeAdded, BlockRange::new(0, 10))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let chain = InMemoryChain::new();
        chain.fail_next_headers(1);
        chain.fail_next_filters(EventKind::EdgeAdded, 1);

        assert!(chain.header_by_number().await.is_err());
        assert!(chain.header_by_number().await.is_ok());

        let range = BlockRange::new(0, 1);
        assert!(chain.filter_logs(Address::ZERO, EventKind::EdgeAdded, range).await.is_err());
        assert!(chain.filter_logs(Address::ZERO, EventKind::EdgeAdded, range).await.is_ok());
        assert_eq!(chain.filter_calls(), vec![(EventKind::EdgeAdded, range)]);
    }

    #[tokio::test]
    async fn test_agreement_classification() {
        let agreement = MemoryAgreement::new();
        let honest = EdgeBuilder::block(0, ALICE, 8, ALICE).build();
        let rival = EdgeBuilder::block(0, ALICE, 8, BOB).build();
        let foreign = EdgeBuilder::block(8, BOB, 16, BOB).build();
        agreement.add_honest_edge(&honest);

        let check = |edge: &Edge| agreement.agrees(edge.level, edge.heights(), edge.commitments());
        let honest_agreement = Agreement {
            is_honest_edge: true,
            agrees_with_start_commit: true,
        };
        let rival_agreement = Agreement {
            is_honest_edge: false,
            agrees_with_start_commit: true,
        };
        assert_eq!(check(&honest).await.unwrap(), honest_agreement);
        assert_eq!(check(&rival).await.unwrap(), rival_agreement);
        assert_eq!(check(&foreign).await.unwrap(), Agreement::default());
        assert_eq!(agreement.calls(), 3);
    }
}
