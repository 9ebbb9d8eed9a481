// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Known chains and whether they are currently ingested

use crate::config::{ChainConfig, IngestMode};
use crate::error::{IngestError, IngestResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChainStatus {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainInfo {
    pub name: String,
    pub chain_id: String,
    pub status: ChainStatus,
    pub mode: IngestMode,
    pub modules: Vec<String>,
}

/// Shared by the supervisor (writer) and the query side (readers)
#[derive(Debug, Default)]
pub struct ChainCatalog {
    chains: RwLock<BTreeMap<String, ChainInfo>>,
}

impl ChainCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, config: &ChainConfig, status: ChainStatus) {
        let info = ChainInfo {
            name: config.name.clone(),
            chain_id: config.chain_id.clone(),
            status,
            mode: config.mode,
            modules: config.modules.clone(),
        };
        self.chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.name.clone(), info);
    }

    /// Returns false for an unknown chain
    pub fn set_status(&self, chain: &str, status: ChainStatus) -> bool {
        match self
            .chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(chain)
        {
            Some(info) => {
                info.status = status;
                true
            }
            None => false,
        }
    }

    pub fn status(&self, chain: &str) -> Option<ChainStatus> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chain)
            .map(|info| info.status)
    }

    /// Ok if `chain` is known and enabled
    pub fn ensure_enabled(&self, chain: &str) -> IngestResult<()> {
        match self.status(chain) {
            Some(ChainStatus::Enabled) => Ok(()),
            Some(ChainStatus::Disabled) => Err(IngestError::ChainDisabled(chain.to_string())),
            None => Err(IngestError::UnknownChain(chain.to_string())),
        }
    }

    /// Enabled chain names, sorted
    pub fn enabled(&self) -> Vec<String> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|info| info.status == ChainStatus::Enabled)
            .map(|info| info.name.clone())
            .collect()
    }

    pub fn list(&self) -> Vec<ChainInfo> {
        self.chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
