// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cross-Chain Aggregator
//!
//! Reads one address on several chains concurrently and merges the answers.
//! A chain that cannot be read is reported in `failures` and left out of the
//! totals; the request only fails when no chain could be read at all.

use crate::catalog::ChainCatalog;
use crate::error::{IngestError, IngestResult};
use crate::metrics::IngestMetrics;
use crate::store::CanonicalStore;
use crate::types::{AccountState, Amount, CrossChainAccountState, TotalsBreakdown};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub struct CrossChainAggregator {
    store: Arc<dyn CanonicalStore>,
    catalog: Arc<ChainCatalog>,
    metrics: Arc<IngestMetrics>,
    query_timeout: Duration,
}

impl CrossChainAggregator {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        catalog: Arc<ChainCatalog>,
        metrics: Arc<IngestMetrics>,
        query_timeout: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            metrics,
            query_timeout,
        }
    }

    pub async fn aggregate(
        &self,
        address: &str,
        chains: &[String],
    ) -> IngestResult<CrossChainAccountState> {
        let requested: BTreeSet<&str> = chains.iter().map(String::as_str).collect();
        let results = futures::future::join_all(
            requested
                .iter()
                .map(|chain| async move { (*chain, self.read_chain(chain, address).await) }),
        )
        .await;

        let mut states = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (chain, result) in results {
            match result {
                Ok(state) => {
                    states.insert(chain.to_string(), state);
                }
                Err(reason) => {
                    warn!("[Aggregator] {} excluded for {}: {}", chain, address, reason);
                    self.metrics
                        .aggregation_chain_failures
                        .with_label_values(&[chain])
                        .inc();
                    failures.insert(chain.to_string(), reason);
                }
            }
        }

        if states.is_empty() {
            self.metrics
                .aggregation_requests
                .with_label_values(&["total_failure"])
                .inc();
            return Err(IngestError::TotalFailure { failures });
        }

        let result = if failures.is_empty() { "complete" } else { "partial" };
        self.metrics
            .aggregation_requests
            .with_label_values(&[result])
            .inc();

        let (totals, breakdown) = sum_totals(states.values());
        debug!(
            "[Aggregator] {} across {} chains: {} denoms, {} failures",
            address,
            states.len(),
            totals.len(),
            failures.len()
        );
        Ok(CrossChainAccountState {
            address: address.to_string(),
            chains: states,
            totals,
            breakdown,
            failures,
        })
    }

    /// Read one chain, mapping every failure to a human-readable reason
    async fn read_chain(&self, chain: &str, address: &str) -> Result<AccountState, String> {
        match self.catalog.ensure_enabled(chain) {
            Ok(()) => {}
            Err(IngestError::ChainDisabled(_)) => return Err("chain disabled".to_string()),
            Err(_) => return Err("unknown chain".to_string()),
        }
        match tokio::time::timeout(self.query_timeout, self.store.account_state(chain, address))
            .await
        {
            Ok(Ok(state)) => Ok(state),
            Ok(Err(e)) => Err(format!("storage error: {}", e)),
            Err(_) => Err(format!(
                "timed out after {}ms",
                self.query_timeout.as_millis()
            )),
        }
    }
}

/// Per-denomination totals of balances plus delegated amounts, and the split by kind.
/// Unbonding tokens appear in the breakdown only.
pub fn sum_totals<'a>(
    states: impl IntoIterator<Item = &'a AccountState>,
) -> (BTreeMap<String, Amount>, TotalsBreakdown) {
    let mut breakdown = TotalsBreakdown::default();
    for state in states {
        for balance in &state.balances {
            *breakdown
                .balance
                .entry(balance.denom.clone())
                .or_default() += &balance.amount;
        }
        // Removed delegations and unbondings stay stored as zero rows.
        for delegation in state.delegations.iter().filter(|d| !d.amount.is_zero()) {
            *breakdown
                .delegated
                .entry(delegation.denom.clone())
                .or_default() += &delegation.amount;
        }
        for unbonding in &state.unbonding {
            let balance = unbonding.total_balance();
            if balance.is_zero() {
                continue;
            }
            *breakdown
                .unbonding
                .entry(unbonding.denom.clone())
                .or_default() += &balance;
        }
    }

    let mut totals = breakdown.balance.clone();
    for (denom, amount) in &breakdown.delegated {
        *totals.entry(denom.clone()).or_default() += amount;
    }
    (totals, breakdown)
}
