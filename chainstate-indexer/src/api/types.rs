// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! API request and response types

use chainstate_ingest::types::{BalanceRecord, ChainCursor, DelegationRecord, Height};
use serde::{Deserialize, Serialize};

/// `?chain=` selector for single-chain account endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct ChainQuery {
    pub chain: Option<String>,
}

/// `?chains=a,b` selector for the cross-chain endpoint. Empty means every enabled chain.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrossChainQuery {
    #[serde(default)]
    pub chains: Option<String>,
}

impl CrossChainQuery {
    pub fn chain_list(&self) -> Vec<String> {
        self.chains
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancesResponse {
    pub chain: String,
    pub address: String,
    pub balances: Vec<BalanceRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegationsResponse {
    pub chain: String,
    pub address: String,
    pub delegations: Vec<DelegationRecord>,
}

/// Cursor of one chain; `height` is absent before the first commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CursorResponse {
    pub chain: String,
    pub height: Option<Height>,
    pub cursor: Option<ChainCursor>,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub error: String,
    pub message: String,
}
