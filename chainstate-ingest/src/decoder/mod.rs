// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Decoder Registry
//!
//! Maps raw state events to [`NormalizedRecord`]s, one stateless decoder per module.
//!
//! ## Key shapes
//!
//! ```text
//! bank       balances/{address}/{denom}       value: decimal amount
//!            supply/{denom}                   value: decimal amount
//! staking    validators/{operator}            value: JSON validator
//!            delegations/{delegator}/{valoper} value: JSON {shares, amount, denom}
//!            unbonding/{delegator}/{valoper}   value: JSON {denom, entries}
//! gov        proposals/{id}                   value: JSON proposal
//!            votes/{id}/{voter}               value: JSON {option}
//! ```
//!
//! Unknown modules and unknown key prefixes inside a known module decode to
//! `Ok(None)`. A key of the right prefix but the wrong shape is a
//! [`DecodeError::MalformedKey`]; callers skip and count it.

mod bank;
mod gov;
mod staking;

pub use bank::BankDecoder;
pub use gov::GovDecoder;
pub use staking::StakingDecoder;

use crate::error::DecodeError;
use crate::types::{AccountState, NormalizedRecord, RawStateEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub type DecodeResult = Result<Option<NormalizedRecord>, DecodeError>;

/// Pure decoder for one module's raw events
pub trait ModuleDecoder: Send + Sync {
    fn decode(&self, event: &RawStateEvent) -> DecodeResult;
}

/// Table of decoders keyed by module name
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<String, Arc<dyn ModuleDecoder>>,
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the bank, staking and governance decoders
    pub fn with_defaults() -> Self {
        let gov: Arc<dyn ModuleDecoder> = Arc::new(GovDecoder);
        let mut registry = Self::new();
        registry.register("bank", Arc::new(BankDecoder));
        registry.register("staking", Arc::new(StakingDecoder));
        registry.register("gov", gov.clone());
        registry.register("governance", gov);
        registry
    }

    /// Add or replace the decoder for a module
    pub fn register(&mut self, module: &str, decoder: Arc<dyn ModuleDecoder>) {
        self.decoders.insert(module.to_string(), decoder);
    }

    pub fn is_registered(&self, module: &str) -> bool {
        self.decoders.contains_key(module)
    }

    pub fn modules(&self) -> Vec<&str> {
        let mut modules: Vec<&str> = self.decoders.keys().map(String::as_str).collect();
        modules.sort();
        modules
    }

    pub fn decode(&self, module: &str, event: &RawStateEvent) -> DecodeResult {
        match self.decoders.get(module) {
            Some(decoder) => decoder.decode(event),
            None => {
                debug!(
                    "[{}] No decoder for module {}, skipping key {}",
                    event.chain,
                    module,
                    event.key_display()
                );
                Ok(None)
            }
        }
    }
}

// ============================================================================
// Shared helpers
// ============================================================================

/// Raw `(module, key)` pairs of the live account rows in `state`. Zeroed rows left
/// behind by deletes are not live.
pub fn account_source_keys(state: &AccountState) -> Vec<(&'static str, String)> {
    let balances = state
        .balances
        .iter()
        .filter(|b| !b.amount.is_zero())
        .map(|b| ("bank", format!("balances/{}/{}", b.address, b.denom)));
    let delegations = state
        .delegations
        .iter()
        .filter(|d| !d.amount.is_zero())
        .map(|d| ("staking", format!("delegations/{}/{}", d.delegator, d.validator)));
    let unbonding = state
        .unbonding
        .iter()
        .filter(|u| !u.entries.is_empty())
        .map(|u| ("staking", format!("unbonding/{}/{}", u.delegator, u.validator)));
    balances.chain(delegations).chain(unbonding).collect()
}

/// Key bytes as UTF-8
pub(crate) fn key_str<'a>(module: &str, event: &'a RawStateEvent) -> Result<&'a str, DecodeError> {
    std::str::from_utf8(&event.key)
        .map_err(|_| DecodeError::malformed_key(module, &event.key_display(), "key is not UTF-8"))
}

/// Split `remainder` into exactly `N` non-empty '/'-separated parts
pub(crate) fn split_exact<'a, const N: usize>(
    module: &str,
    key: &str,
    remainder: &'a str,
) -> Result<[&'a str; N], DecodeError> {
    let parts: Vec<&str> = remainder.split('/').collect();
    if parts.len() != N || parts.iter().any(|p| p.is_empty()) {
        return Err(DecodeError::malformed_key(
            module,
            key,
            format!("expected {} non-empty segments, found {:?}", N, parts),
        ));
    }
    let mut out = [""; N];
    out.copy_from_slice(&parts);
    Ok(out)
}

/// Parse a JSON payload
pub(crate) fn json_value<T: serde::de::DeserializeOwned>(
    module: &str,
    key: &str,
    value: &[u8],
) -> Result<T, DecodeError> {
    serde_json::from_slice(value).map_err(|e| DecodeError::malformed_value(module, key, e.to_string()))
}
