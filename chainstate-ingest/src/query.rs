// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Read-only query surface over committed state. Safe to call while ingestion runs.

use crate::aggregator::CrossChainAggregator;
use crate::catalog::{ChainCatalog, ChainInfo};
use crate::config::AggregatorConfig;
use crate::error::{IngestError, IngestResult};
use crate::metrics::IngestMetrics;
use crate::store::CanonicalStore;
use crate::types::{
    AccountState, ChainCursor, ChainStats, CrossChainAccountState, ProposalRecord,
    ValidatorRecord,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A chain with its ingestion progress
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSummary {
    #[serde(flatten)]
    pub info: ChainInfo,
    pub cursor: Option<ChainCursor>,
}

pub struct QueryService {
    store: Arc<dyn CanonicalStore>,
    catalog: Arc<ChainCatalog>,
    aggregator: CrossChainAggregator,
}

impl QueryService {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        catalog: Arc<ChainCatalog>,
        metrics: Arc<IngestMetrics>,
        config: &AggregatorConfig,
    ) -> Self {
        let aggregator = CrossChainAggregator::new(
            store.clone(),
            catalog.clone(),
            metrics,
            config.query_timeout(),
        );
        Self {
            store,
            catalog,
            aggregator,
        }
    }

    /// One address on one enabled chain. An address with no records is empty, not an error.
    pub async fn get_account_state(&self, chain: &str, address: &str) -> IngestResult<AccountState> {
        self.catalog.ensure_enabled(chain)?;
        Ok(self.store.account_state(chain, address).await?)
    }

    /// One address across `chains`; an empty list means every enabled chain
    pub async fn get_cross_chain_account_state(
        &self,
        address: &str,
        chains: &[String],
    ) -> IngestResult<CrossChainAccountState> {
        if chains.is_empty() {
            let enabled = self.catalog.enabled();
            return self.aggregator.aggregate(address, &enabled).await;
        }
        self.aggregator.aggregate(address, chains).await
    }

    /// Last committed height, or None before the first commit
    pub async fn get_chain_cursor(&self, chain: &str) -> IngestResult<Option<ChainCursor>> {
        self.ensure_known(chain)?;
        Ok(self.store.cursor(chain).await?)
    }

    pub async fn list_chains(&self) -> IngestResult<Vec<ChainSummary>> {
        let mut cursors: HashMap<String, ChainCursor> = self
            .store
            .list_cursors()
            .await?
            .into_iter()
            .map(|c| (c.chain.clone(), c))
            .collect();
        Ok(self
            .catalog
            .list()
            .into_iter()
            .map(|info| ChainSummary {
                cursor: cursors.remove(&info.name),
                info,
            })
            .collect())
    }

    pub async fn validators(&self, chain: &str) -> IngestResult<Vec<ValidatorRecord>> {
        self.ensure_known(chain)?;
        Ok(self.store.validators(chain).await?)
    }

    pub async fn proposals(&self, chain: &str) -> IngestResult<Vec<ProposalRecord>> {
        self.ensure_known(chain)?;
        Ok(self.store.proposals(chain).await?)
    }

    pub async fn chain_stats(&self, chain: &str) -> IngestResult<ChainStats> {
        self.ensure_known(chain)?;
        Ok(self.store.chain_stats(chain).await?)
    }

    fn ensure_known(&self, chain: &str) -> IngestResult<()> {
        match self.catalog.status(chain) {
            Some(_) => Ok(()),
            None => Err(IngestError::UnknownChain(chain.to_string())),
        }
    }
}
