// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! In-memory canonical store, used by `--in-memory` runs and pipeline tests

use super::{ApplyOutcome, CanonicalStore, CommitBatch};
use crate::error::StoreError;
use crate::types::{
    AccountState, ChainCursor, ChainStats, NaturalKey, NormalizedRecord, ProposalRecord,
    RecordKind, ValidatorRecord,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Default)]
struct ChainState {
    cursor: Option<ChainCursor>,
    records: BTreeMap<NaturalKey, NormalizedRecord>,
}

/// Records held per chain behind their own lock, so commits on different chains
/// never wait on each other.
#[derive(Default)]
pub struct MemoryStore {
    chains: RwLock<HashMap<String, Arc<RwLock<ChainState>>>>,
    unavailable: AtomicBool,
    fail_on: Mutex<Option<RecordKind>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`] until reset
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail any batch containing a record of `kind`, after earlier records were staged
    pub fn fail_on(&self, kind: Option<RecordKind>) {
        if let Ok(mut guard) = self.fail_on.lock() {
            *guard = kind;
        }
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store marked unavailable".to_string()));
        }
        Ok(())
    }

    fn injected_failure(&self) -> Option<RecordKind> {
        self.fail_on.lock().ok().and_then(|guard| *guard)
    }

    async fn chain(&self, chain: &str) -> Option<Arc<RwLock<ChainState>>> {
        self.chains.read().await.get(chain).cloned()
    }

    async fn chain_or_create(&self, chain: &str) -> Arc<RwLock<ChainState>> {
        if let Some(state) = self.chain(chain).await {
            return state;
        }
        self.chains
            .write()
            .await
            .entry(chain.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait::async_trait]
impl CanonicalStore for MemoryStore {
    async fn cursor(&self, chain: &str) -> Result<Option<ChainCursor>, StoreError> {
        self.check_available()?;
        let Some(state) = self.chain(chain).await else {
            return Ok(None);
        };
        let cursor = state.read().await.cursor.clone();
        Ok(cursor)
    }

    async fn list_cursors(&self) -> Result<Vec<ChainCursor>, StoreError> {
        self.check_available()?;
        let chains: Vec<_> = self.chains.read().await.values().cloned().collect();
        let mut cursors = Vec::new();
        for state in chains {
            if let Some(cursor) = state.read().await.cursor.clone() {
                cursors.push(cursor);
            }
        }
        cursors.sort_by(|a, b| a.chain.cmp(&b.chain));
        Ok(cursors)
    }

    async fn apply_batch(&self, batch: CommitBatch) -> Result<ApplyOutcome, StoreError> {
        self.check_available()?;
        let state = self.chain_or_create(&batch.chain).await;
        let mut state = state.write().await;

        if let Some(cursor) = &state.cursor {
            if batch.height < cursor.height {
                return Ok(ApplyOutcome::Stale {
                    cursor_height: cursor.height,
                });
            }
        }

        // Stage against the current view; nothing is visible until every record passed.
        let fail_on = self.injected_failure();
        let mut staged: BTreeMap<NaturalKey, NormalizedRecord> = BTreeMap::new();
        let mut applied = Vec::new();
        let mut skipped = 0;
        for mut record in batch.records {
            if Some(record.kind()) == fail_on {
                return Err(StoreError::Query(format!(
                    "injected failure writing {} record",
                    record.kind()
                )));
            }
            let key = record.natural_key();
            let stored = staged.get(&key).or_else(|| state.records.get(&key));
            if let Some(denom) = stored.and_then(NormalizedRecord::denom) {
                record.fill_missing_denom(denom);
            }
            match stored.map(NormalizedRecord::height) {
                Some(h) if h >= record.height() => skipped += 1,
                _ => {
                    applied.push(record.clone());
                    staged.insert(key, record);
                }
            }
        }

        let cursor = ChainCursor {
            chain: batch.chain.clone(),
            height: batch.height,
            updated_at: batch.committed_at,
        };
        state.records.extend(staged);
        state.cursor = Some(cursor.clone());
        debug!(
            "[{}] MemoryStore applied batch at height {}: {} applied, {} skipped",
            batch.chain,
            batch.height,
            applied.len(),
            skipped
        );

        Ok(ApplyOutcome::Applied {
            applied,
            skipped,
            cursor,
        })
    }

    async fn account_state(&self, chain: &str, address: &str) -> Result<AccountState, StoreError> {
        self.check_available()?;
        let mut account = AccountState::empty(chain, address);
        let Some(state) = self.chain(chain).await else {
            return Ok(account);
        };
        let state = state.read().await;
        for record in state.records.values() {
            if record.account() != Some(address) {
                continue;
            }
            match record {
                NormalizedRecord::Balance(r) => account.balances.push(r.clone()),
                NormalizedRecord::Delegation(r) => account.delegations.push(r.clone()),
                NormalizedRecord::Unbonding(r) => account.unbonding.push(r.clone()),
                _ => {}
            }
        }
        account.sort();
        Ok(account)
    }

    async fn validators(&self, chain: &str) -> Result<Vec<ValidatorRecord>, StoreError> {
        self.check_available()?;
        let Some(state) = self.chain(chain).await else {
            return Ok(Vec::new());
        };
        let state = state.read().await;
        Ok(state
            .records
            .values()
            .filter_map(|r| match r {
                NormalizedRecord::Validator(v) => Some(v.clone()),
                _ => None,
            })
            .collect())
    }

    async fn proposals(&self, chain: &str) -> Result<Vec<ProposalRecord>, StoreError> {
        self.check_available()?;
        let Some(state) = self.chain(chain).await else {
            return Ok(Vec::new());
        };
        let state = state.read().await;
        Ok(state
            .records
            .values()
            .filter_map(|r| match r {
                NormalizedRecord::Proposal(p) => Some(p.clone()),
                _ => None,
            })
            .collect())
    }

    async fn chain_stats(&self, chain: &str) -> Result<ChainStats, StoreError> {
        self.check_available()?;
        let mut stats = ChainStats {
            chain: chain.to_string(),
            ..Default::default()
        };
        let Some(state) = self.chain(chain).await else {
            return Ok(stats);
        };
        let state = state.read().await;
        stats.cursor = state.cursor.clone();
        for key in state.records.keys() {
            let counter = match key.kind() {
                RecordKind::Balance => &mut stats.balances,
                RecordKind::Delegation => &mut stats.delegations,
                RecordKind::Validator => &mut stats.validators,
                RecordKind::Unbonding => &mut stats.unbonding,
                RecordKind::Proposal => &mut stats.proposals,
                RecordKind::Vote => &mut stats.votes,
                RecordKind::Supply => &mut stats.supply,
            };
            *counter += 1;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::*;
    use assert_matches::assert_matches;

    async fn apply(store: &MemoryStore, chain: &str, height: u64, records: Vec<NormalizedRecord>) -> ApplyOutcome {
        store
            .apply_batch(CommitBatch::new(chain, height, records))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_first_commit_creates_cursor() {
        let store = MemoryStore::new();
        assert_eq!(store.cursor("cosmoshub").await.unwrap(), None);

        let outcome = apply(&store, "cosmoshub", 100, vec![balance("cosmoshub", "addrX", "uatom", 10, 100)]).await;
        assert_matches!(outcome, ApplyOutcome::Applied { applied, skipped: 0, cursor } => {
            assert_eq!(applied.len(), 1);
            assert_eq!(cursor.height, 100);
        });
        assert_eq!(store.cursor("cosmoshub").await.unwrap().unwrap().height, 100);
    }

    #[tokio::test]
    async fn test_stale_batch_writes_nothing() {
        let store = MemoryStore::new();
        apply(&store, "cosmoshub", 100, vec![balance("cosmoshub", "addrX", "uatom", 10, 100)]).await;

        let outcome = apply(&store, "cosmoshub", 99, vec![balance("cosmoshub", "addrX", "uatom", 99, 99)]).await;
        assert_eq!(outcome, ApplyOutcome::Stale { cursor_height: 100 });

        let state = store.account_state("cosmoshub", "addrX").await.unwrap();
        assert_eq!(state.balances[0].amount.to_string(), "10");
        assert_eq!(store.cursor("cosmoshub").await.unwrap().unwrap().height, 100);
    }

    #[tokio::test]
    async fn test_record_height_guard() {
        let store = MemoryStore::new();
        apply(&store, "c", 10, vec![balance("c", "a", "uatom", 1, 10)]).await;

        // Equal height is a no-op, higher height overwrites
        let outcome = apply(&store, "c", 10, vec![balance("c", "a", "uatom", 2, 10)]).await;
        assert_matches!(outcome, ApplyOutcome::Applied { applied, skipped: 1, .. } => assert!(applied.is_empty()));
        apply(&store, "c", 11, vec![balance("c", "a", "uatom", 3, 11)]).await;

        let state = store.account_state("c", "a").await.unwrap();
        assert_eq!(state.balances[0].amount.to_string(), "3");
        assert_eq!(state.balances[0].height, 11);
    }

    #[tokio::test]
    async fn test_injected_failure_rolls_back_whole_batch() {
        let store = MemoryStore::new();
        apply(&store, "c", 5, vec![balance("c", "a", "uatom", 1, 5)]).await;

        store.fail_on(Some(RecordKind::Validator));
        let result = store
            .apply_batch(CommitBatch::new(
                "c",
                6,
                vec![balance("c", "a", "uatom", 2, 6), validator("c", "v", 9, 6)],
            ))
            .await;
        assert_matches!(result, Err(StoreError::Query(_)));

        let state = store.account_state("c", "a").await.unwrap();
        assert_eq!(state.balances[0].amount.to_string(), "1");
        assert_eq!(store.cursor("c").await.unwrap().unwrap().height, 5);
        assert!(store.validators("c").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert_matches!(store.cursor("c").await, Err(StoreError::Unavailable(_)));
        store.set_unavailable(false);
        assert_eq!(store.cursor("c").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_account_state_is_chain_scoped_and_ordered() {
        let store = MemoryStore::new();
        apply(
            &store,
            "cosmoshub",
            100,
            vec![
                balance("cosmoshub", "addrX", "uosmo", 1, 100),
                balance("cosmoshub", "addrX", "uatom", 2, 100),
                delegation("cosmoshub", "addrX", "valB", "uatom", 3, 100),
                delegation("cosmoshub", "addrX", "valA", "uatom", 4, 100),
                unbonding("cosmoshub", "addrX", "valA", "uatom", 5, 100),
                balance("cosmoshub", "addrY", "uatom", 6, 100),
            ],
        )
        .await;
        apply(&store, "osmosis", 7, vec![balance("osmosis", "addrX", "uosmo", 7, 7)]).await;

        let state = store.account_state("cosmoshub", "addrX").await.unwrap();
        let denoms: Vec<_> = state.balances.iter().map(|b| b.denom.as_str()).collect();
        assert_eq!(denoms, vec!["uatom", "uosmo"]);
        let validators: Vec<_> = state.delegations.iter().map(|d| d.validator.as_str()).collect();
        assert_eq!(validators, vec!["valA", "valB"]);
        assert_eq!(state.unbonding.len(), 1);

        let unknown = store.account_state("cosmoshub", "nobody").await.unwrap();
        assert!(unknown.is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_listing() {
        let store = MemoryStore::new();
        apply(
            &store,
            "osmosis",
            3,
            vec![
                validator("osmosis", "valB", 10, 3),
                validator("osmosis", "valA", 20, 3),
                proposal("osmosis", 2, 3),
                proposal("osmosis", 1, 3),
                balance("osmosis", "a", "uosmo", 1, 3),
            ],
        )
        .await;
        apply(&store, "cosmoshub", 1, vec![]).await;

        let stats = store.chain_stats("osmosis").await.unwrap();
        assert_eq!(stats.validators, 2);
        assert_eq!(stats.proposals, 2);
        assert_eq!(stats.balances, 1);
        assert_eq!(stats.cursor.unwrap().height, 3);

        let ops: Vec<_> = store
            .validators("osmosis")
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.operator_address)
            .collect();
        assert_eq!(ops, vec!["valA", "valB"]);
        let ids: Vec<_> = store
            .proposals("osmosis")
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.proposal_id)
            .collect();
        assert_eq!(ids, vec![1, 2]);

        let chains: Vec<_> = store
            .list_cursors()
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.chain)
            .collect();
        assert_eq!(chains, vec!["cosmoshub", "osmosis"]);
    }
}
