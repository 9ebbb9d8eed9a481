// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ingestion configuration
//!
//! Loaded from YAML with `${VAR}` environment substitution. Every tunable has a
//! serde default so a minimal file only needs the chain list.

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// How a chain's raw state reaches its worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestMode {
    /// Snapshot every enabled module on a fixed interval
    #[default]
    Poll,
    /// Drain the router, fed by the adapter's subscription
    Stream,
}

/// Per-chain configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub name: String,
    #[serde(default)]
    pub chain_id: String,
    pub rest_endpoint: String,
    /// Tried in order when the primary endpoint is unreachable
    #[serde(default)]
    pub fallback_endpoints: Vec<String>,
    #[serde(default)]
    pub modules: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub mode: IngestMode,
    /// Accounts whose balances, delegations and unbondings are polled
    #[serde(default)]
    pub tracked_addresses: Vec<String>,
}

impl ChainConfig {
    pub fn new(name: &str, rest_endpoint: &str, modules: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            chain_id: String::new(),
            rest_endpoint: rest_endpoint.to_string(),
            fallback_endpoints: Vec::new(),
            modules: modules.iter().map(|m| m.to_string()).collect(),
            enabled: true,
            mode: IngestMode::Poll,
            tracked_addresses: Vec::new(),
        }
    }

    /// Primary endpoint followed by the fallbacks
    pub fn endpoints(&self) -> Vec<String> {
        std::iter::once(self.rest_endpoint.clone())
            .chain(self.fallback_endpoints.iter().cloned())
            .collect()
    }
}

fn default_enabled() -> bool {
    true
}

/// Worker loop tunables shared by every chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngesterConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum events drained from the router per stream cycle
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Capacity of each chain's router queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl IngesterConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for IngesterConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            queue_capacity: default_queue_capacity(),
            source_timeout_ms: default_source_timeout_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_batch_size() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_source_timeout_ms() -> u64 {
    30_000
}

fn default_shutdown_grace_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatorConfig {
    /// Upper bound on each per-chain read during aggregation
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
}

impl AggregatorConfig {
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
        }
    }
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one chain must be configured")]
    NoChains,
    #[error("chain #{0} has no name")]
    MissingName(usize),
    #[error("chain {0} has no endpoint")]
    MissingEndpoint(String),
    #[error("chain {0} has no modules")]
    NoModules(String),
    #[error("chain {0} is configured more than once")]
    DuplicateChain(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Complete ingestion configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestConfig {
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub ingester: IngesterConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let mut hub = ChainConfig::new(
            "cosmoshub",
            "https://cosmos-rest.publicnode.com",
            &["bank", "staking", "distribution", "gov"],
        );
        hub.chain_id = "cosmoshub-4".to_string();
        Self {
            chains: vec![hub],
            ingester: IngesterConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from a YAML file with environment variable substitution
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .context(format!("Failed to read ingest config file: {:?}", path))?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let contents = substitute_env_vars(contents)?;
        let config: IngestConfig =
            serde_yaml::from_str(&contents).context("Failed to parse ingest config YAML")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chains.is_empty() {
            return Err(ConfigError::NoChains);
        }
        let mut seen = HashSet::new();
        for (idx, chain) in self.chains.iter().enumerate() {
            if chain.name.trim().is_empty() {
                return Err(ConfigError::MissingName(idx));
            }
            if chain.rest_endpoint.trim().is_empty() {
                return Err(ConfigError::MissingEndpoint(chain.name.clone()));
            }
            if chain.modules.is_empty() {
                return Err(ConfigError::NoModules(chain.name.clone()));
            }
            if !seen.insert(chain.name.as_str()) {
                return Err(ConfigError::DuplicateChain(chain.name.clone()));
            }
        }
        if self.ingester.batch_size == 0 {
            return Err(ConfigError::Zero("ingester.batch_size"));
        }
        if self.ingester.queue_capacity == 0 {
            return Err(ConfigError::Zero("ingester.queue_capacity"));
        }
        if self.ingester.poll_interval_ms == 0 {
            return Err(ConfigError::Zero("ingester.poll_interval_ms"));
        }
        Ok(())
    }

    /// Keep only the named chains. An empty filter keeps everything.
    pub fn filter_chains(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.chains.retain(|c| wanted.contains(c.name.as_str()));
    }

    /// Restrict every chain to the named modules. An empty filter keeps everything.
    pub fn filter_modules(&mut self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        for chain in &mut self.chains {
            chain.modules.retain(|m| wanted.contains(m.as_str()));
        }
    }

    pub fn enabled_chains(&self) -> impl Iterator<Item = &ChainConfig> {
        self.chains.iter().filter(|c| c.enabled)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").context("Invalid env pattern")?;
    let mut result = content.to_string();

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(var_value) = std::env::var(var_name) {
            result = result.replace(full_match, &var_value);
        } else {
            tracing::warn!(
                "Environment variable {} not found, keeping placeholder",
                var_name
            );
        }
    }

    Ok(result)
}
