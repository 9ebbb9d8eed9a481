// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Canonical Store
//!
//! Durable home of normalized records and chain cursors. Backends implement
//! [`CanonicalStore`]; the commit pipeline is the only writer.
//!
//! ## Write rules
//!
//! ```text
//! apply_batch(chain, height, records)
//!   height <  cursor          -> Stale, nothing written
//!   otherwise, atomically:
//!     for each record:  stored.height <  record.height -> overwrite
//!                       stored.height >= record.height -> skip
//!     cursor = height
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::types::{
    AccountState, ChainCursor, ChainStats, Height, NaturalKey, NormalizedRecord, ProposalRecord,
    ValidatorRecord,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// One chain's records to be applied at `height`
#[derive(Debug, Clone)]
pub struct CommitBatch {
    pub chain: String,
    pub height: Height,
    pub records: Vec<NormalizedRecord>,
    pub committed_at: DateTime<Utc>,
}

impl CommitBatch {
    pub fn new(chain: impl Into<String>, height: Height, records: Vec<NormalizedRecord>) -> Self {
        Self {
            chain: chain.into(),
            height,
            records,
            committed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied {
        /// Records that replaced (or created) a stored row, in batch order
        applied: Vec<NormalizedRecord>,
        /// Records dropped by the per-record height guard
        skipped: usize,
        cursor: ChainCursor,
    },
    Stale {
        cursor_height: Height,
    },
}

#[async_trait::async_trait]
pub trait CanonicalStore: Send + Sync {
    async fn cursor(&self, chain: &str) -> Result<Option<ChainCursor>, StoreError>;

    async fn list_cursors(&self) -> Result<Vec<ChainCursor>, StoreError>;

    /// Apply a batch as one atomic unit. On error nothing is written.
    async fn apply_batch(&self, batch: CommitBatch) -> Result<ApplyOutcome, StoreError>;

    /// Balances, delegations and unbonding of one address. Unknown addresses are empty, not errors.
    async fn account_state(&self, chain: &str, address: &str) -> Result<AccountState, StoreError>;

    async fn validators(&self, chain: &str) -> Result<Vec<ValidatorRecord>, StoreError>;

    async fn proposals(&self, chain: &str) -> Result<Vec<ProposalRecord>, StoreError>;

    async fn chain_stats(&self, chain: &str) -> Result<ChainStats, StoreError>;
}

/// Collapse records sharing a natural key. The higher height wins; at equal heights the
/// later record wins. The survivor takes the position of the first occurrence, so batch
/// order is otherwise preserved.
pub fn dedupe_records(records: Vec<NormalizedRecord>) -> Vec<NormalizedRecord> {
    let mut positions: HashMap<NaturalKey, usize> = HashMap::with_capacity(records.len());
    let mut out: Vec<NormalizedRecord> = Vec::with_capacity(records.len());
    for record in records {
        match positions.get(&record.natural_key()) {
            Some(&idx) => {
                if record.height() >= out[idx].height() {
                    out[idx] = record;
                }
            }
            None => {
                positions.insert(record.natural_key(), out.len());
                out.push(record);
            }
        }
    }
    out
}

#[cfg(test)]
pub(crate) mod test_utils {
    use crate::types::*;

    pub fn balance(chain: &str, address: &str, denom: &str, amount: u64, height: Height) -> NormalizedRecord {
        NormalizedRecord::Balance(BalanceRecord {
            chain: chain.to_string(),
            address: address.to_string(),
            denom: denom.to_string(),
            amount: amount.into(),
            height,
        })
    }

    pub fn delegation(
        chain: &str,
        delegator: &str,
        validator: &str,
        denom: &str,
        amount: u64,
        height: Height,
    ) -> NormalizedRecord {
        NormalizedRecord::Delegation(DelegationRecord {
            chain: chain.to_string(),
            delegator: delegator.to_string(),
            validator: validator.to_string(),
            denom: denom.to_string(),
            shares: format!("{}.000000000000000000", amount),
            amount: amount.into(),
            height,
        })
    }

    pub fn unbonding(
        chain: &str,
        delegator: &str,
        validator: &str,
        denom: &str,
        balance: u64,
        height: Height,
    ) -> NormalizedRecord {
        NormalizedRecord::Unbonding(UnbondingRecord {
            chain: chain.to_string(),
            delegator: delegator.to_string(),
            validator: validator.to_string(),
            denom: denom.to_string(),
            entries: vec![UnbondingEntry {
                creation_height: height,
                completion_time: "2025-03-01T00:00:00Z".to_string(),
                initial_balance: balance.into(),
                balance: balance.into(),
            }],
            height,
        })
    }

    pub fn validator(chain: &str, operator: &str, tokens: u64, height: Height) -> NormalizedRecord {
        NormalizedRecord::Validator(ValidatorRecord {
            chain: chain.to_string(),
            operator_address: operator.to_string(),
            moniker: operator.to_uppercase(),
            status: "BOND_STATUS_BONDED".to_string(),
            jailed: false,
            tokens: tokens.into(),
            delegator_shares: tokens.to_string(),
            commission_rate: "0.050000000000000000".to_string(),
            height,
        })
    }

    pub fn proposal(chain: &str, id: u64, height: Height) -> NormalizedRecord {
        NormalizedRecord::Proposal(ProposalRecord {
            chain: chain.to_string(),
            proposal_id: id,
            title: format!("Proposal {}", id),
            status: "PROPOSAL_STATUS_VOTING_PERIOD".to_string(),
            submit_time: None,
            voting_end_time: None,
            tally: None,
            height,
        })
    }
}
