// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Source adapters: where raw state events come from.
//!
//! Adapters report transport problems as [`SourceError::Connectivity`] or
//! [`SourceError::Timeout`] and garbage answers as
//! [`SourceError::InvalidResponse`], so callers can tell a dead endpoint from a
//! bad payload.

mod failover;
mod mock;

pub use failover::{FailoverConfig, FailoverSource};
pub use mock::MockSource;

use crate::error::SourceError;
use crate::types::{Height, RawStateEvent};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;

#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Latest height the source can serve state for
    async fn latest_height(&self, chain: &str) -> Result<Height, SourceError>;

    /// Current state of one module as raw events. Events with height 0 are
    /// stamped by the caller with the height of the cycle.
    async fn fetch_module_state(
        &self,
        chain: &str,
        module: &str,
    ) -> Result<Vec<RawStateEvent>, SourceError>;

    /// Push stream of raw events. Polling-only sources keep the default.
    async fn subscribe(&self, chain: &str) -> Result<mpsc::Receiver<RawStateEvent>, SourceError> {
        Err(SourceError::Unsupported(format!("subscribe for {}", chain)))
    }
}

/// Bound a source call; running out of time is a connectivity failure
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(SourceError::Timeout(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_elapsed() {
        let result: Result<(), _> = with_timeout(Duration::from_millis(50), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        })
        .await;
        assert_eq!(result, Err(SourceError::Timeout(50)));
    }

    #[tokio::test]
    async fn test_with_timeout_passes_through() {
        let ok = with_timeout(Duration::from_secs(1), async { Ok(7u64) }).await;
        assert_eq!(ok, Ok(7));
        let err: Result<u64, _> = with_timeout(Duration::from_secs(1), async {
            Err(SourceError::InvalidResponse("bad".into()))
        })
        .await;
        assert_eq!(err, Err(SourceError::InvalidResponse("bad".into())));
    }

    struct PollOnly;

    #[async_trait::async_trait]
    impl SourceAdapter for PollOnly {
        async fn latest_height(&self, _chain: &str) -> Result<Height, SourceError> {
            Ok(1)
        }

        async fn fetch_module_state(
            &self,
            _chain: &str,
            _module: &str,
        ) -> Result<Vec<RawStateEvent>, SourceError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_default_subscribe_unsupported() {
        let err = PollOnly.subscribe("cosmoshub").await.unwrap_err();
        assert!(!err.is_recoverable());
    }
}
