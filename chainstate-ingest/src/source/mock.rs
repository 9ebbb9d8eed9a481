// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A scriptable source adapter for tests and local runs.

use super::SourceAdapter;
use crate::error::SourceError;
use crate::types::{Height, RawStateEvent};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const STREAM_CHANNEL_SIZE: usize = 1024;

#[derive(Clone, Default)]
pub struct MockSource {
    heights: Arc<Mutex<HashMap<String, Height>>>,
    state: Arc<Mutex<HashMap<(String, String), Vec<RawStateEvent>>>>,
    // Error returned by every call for a chain until cleared
    failures: Arc<Mutex<HashMap<String, SourceError>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    streams: Arc<Mutex<HashMap<String, mpsc::Sender<RawStateEvent>>>>,
    calls: Arc<Mutex<HashMap<String, usize>>>,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_latest_height(&self, chain: &str, height: Height) {
        self.heights
            .lock()
            .unwrap()
            .insert(chain.to_string(), height);
    }

    /// Replace the module state returned for `(chain, module)`
    pub fn set_module_state(&self, chain: &str, module: &str, events: Vec<RawStateEvent>) {
        self.state
            .lock()
            .unwrap()
            .insert((chain.to_string(), module.to_string()), events);
    }

    pub fn fail_chain(&self, chain: &str, error: SourceError) {
        self.failures
            .lock()
            .unwrap()
            .insert(chain.to_string(), error);
    }

    pub fn recover_chain(&self, chain: &str) {
        self.failures.lock().unwrap().remove(chain);
    }

    /// Delay every answer for `chain`, e.g. to trip the caller's timeout
    pub fn delay_chain(&self, chain: &str, delay: Duration) {
        self.delays
            .lock()
            .unwrap()
            .insert(chain.to_string(), delay);
    }

    /// Push an event to the chain's subscriber. Returns false without one.
    pub async fn emit(&self, event: RawStateEvent) -> bool {
        let tx = self.streams.lock().unwrap().get(&event.chain).cloned();
        match tx {
            Some(tx) => tx.send(event).await.is_ok(),
            None => false,
        }
    }

    /// End the chain's subscription stream
    pub fn close_stream(&self, chain: &str) {
        self.streams.lock().unwrap().remove(chain);
    }

    /// Number of adapter calls made for `chain`
    pub fn calls(&self, chain: &str) -> usize {
        self.calls.lock().unwrap().get(chain).copied().unwrap_or(0)
    }

    async fn enter(&self, chain: &str) -> Result<(), SourceError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(chain.to_string())
            .or_default() += 1;
        let delay = self.delays.lock().unwrap().get(chain).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.failures.lock().unwrap().get(chain) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl SourceAdapter for MockSource {
    async fn latest_height(&self, chain: &str) -> Result<Height, SourceError> {
        self.enter(chain).await?;
        self.heights
            .lock()
            .unwrap()
            .get(chain)
            .copied()
            .ok_or_else(|| SourceError::InvalidResponse(format!("no height for {}", chain)))
    }

    async fn fetch_module_state(
        &self,
        chain: &str,
        module: &str,
    ) -> Result<Vec<RawStateEvent>, SourceError> {
        self.enter(chain).await?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .get(&(chain.to_string(), module.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn subscribe(&self, chain: &str) -> Result<mpsc::Receiver<RawStateEvent>, SourceError> {
        self.enter(chain).await?;
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
        self.streams.lock().unwrap().insert(chain.to_string(), tx);
        Ok(rx)
    }
}
