// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Failover across several endpoints serving the same chain
//!
//! Only connectivity failures (unreachable, timed out) move traffic to the next
//! endpoint. A bad payload is the same everywhere and is returned as is.

use super::SourceAdapter;
use crate::error::SourceError;
use crate::types::{Height, RawStateEvent};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, RwLock};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Attempts on one endpoint before moving to the next
    pub max_retries_per_endpoint: u32,
    pub retry_delay: Duration,
    /// How long a failed endpoint is skipped when rotating
    pub cooldown_period: Duration,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            max_retries_per_endpoint: 1,
            retry_delay: Duration::from_millis(500),
            cooldown_period: Duration::from_secs(60),
        }
    }
}

pub struct FailoverSource {
    endpoints: Vec<(String, Arc<dyn SourceAdapter>)>,
    current_index: AtomicUsize,
    failed: RwLock<HashMap<usize, Instant>>,
    config: FailoverConfig,
}

impl FailoverSource {
    /// # Panics
    /// If `endpoints` is empty.
    pub fn new(endpoints: Vec<(String, Arc<dyn SourceAdapter>)>) -> Self {
        Self::with_config(endpoints, FailoverConfig::default())
    }

    pub fn with_config(
        endpoints: Vec<(String, Arc<dyn SourceAdapter>)>,
        config: FailoverConfig,
    ) -> Self {
        assert!(!endpoints.is_empty(), "At least one endpoint is required");
        Self {
            endpoints,
            current_index: AtomicUsize::new(0),
            failed: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn current_endpoint(&self) -> &str {
        &self.endpoints[self.current()].0
    }

    fn current(&self) -> usize {
        self.current_index.load(Ordering::SeqCst) % self.endpoints.len()
    }

    /// Mark the current endpoint failed and move to the next one out of cooldown
    async fn report_failure(&self) {
        let current = self.current();
        let len = self.endpoints.len();
        self.failed.write().await.insert(current, Instant::now());

        {
            let failed = self.failed.read().await;
            for offset in 1..=len {
                let candidate = (current + offset) % len;
                let cooling = failed
                    .get(&candidate)
                    .map(|at| at.elapsed() < self.config.cooldown_period)
                    .unwrap_or(false);
                if cooling {
                    continue;
                }
                if self
                    .current_index
                    .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
                {
                    warn!(
                        "[Failover] Switched from {} to {}",
                        self.endpoints[current].0, self.endpoints[candidate].0
                    );
                }
                return;
            }
        }

        let next = (current + 1) % len;
        self.current_index.store(next, Ordering::SeqCst);
        warn!(
            "[Failover] All endpoints in cooldown, rotating to {}",
            self.endpoints[next].0
        );
    }

    async fn report_success(&self) {
        let current = self.current();
        self.failed.write().await.remove(&current);
    }

    async fn with_failover<F, Fut, T>(&self, mut f: F) -> Result<T, SourceError>
    where
        F: FnMut(Arc<dyn SourceAdapter>) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let retries = self.config.max_retries_per_endpoint.max(1) as usize;
        let total_attempts = self.endpoints.len() * retries;
        let mut last_error = None;

        for attempt in 0..total_attempts {
            let (name, source) = self.endpoints[self.current()].clone();
            match f(source).await {
                Ok(result) => {
                    self.report_success().await;
                    return Ok(result);
                }
                Err(e) if e.is_connectivity() => {
                    warn!(
                        "[Failover] Request failed on {} (attempt {}/{}): {}",
                        name,
                        attempt + 1,
                        total_attempts,
                        e
                    );
                    last_error = Some(e);
                    if (attempt + 1) % retries == 0 {
                        self.report_failure().await;
                    } else {
                        tokio::time::sleep(self.config.retry_delay).await;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| SourceError::Connectivity("all endpoints failed".to_string())))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for FailoverSource {
    async fn latest_height(&self, chain: &str) -> Result<Height, SourceError> {
        self.with_failover(|source| async move { source.latest_height(chain).await })
            .await
    }

    async fn fetch_module_state(
        &self,
        chain: &str,
        module: &str,
    ) -> Result<Vec<RawStateEvent>, SourceError> {
        self.with_failover(|source| async move { source.fetch_module_state(chain, module).await })
            .await
    }

    async fn subscribe(&self, chain: &str) -> Result<mpsc::Receiver<RawStateEvent>, SourceError> {
        self.with_failover(|source| async move { source.subscribe(chain).await })
            .await
    }
}
