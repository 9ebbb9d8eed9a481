// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Downstream publication of committed records. Fire-and-forget: a publish
//! failure never undoes or blocks a commit.

use crate::types::{Height, NormalizedRecord, RecordKind};
use std::collections::BTreeMap;
use tokio::sync::broadcast;
use tracing::info;

/// A record that is now part of canonical state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedEvent {
    /// `{chain}:{kind}:{natural key}`
    pub key: String,
    pub chain: String,
    pub kind: RecordKind,
    pub height: Height,
    pub record: NormalizedRecord,
    pub headers: BTreeMap<String, String>,
}

impl CommittedEvent {
    pub fn from_record(record: NormalizedRecord) -> Self {
        let chain = record.chain().to_string();
        let kind = record.kind();
        let key = format!("{}:{}:{}", chain, kind, record.natural_key());
        let headers = BTreeMap::from([
            ("chain".to_string(), chain.clone()),
            ("type".to_string(), kind.to_string()),
        ]);
        Self {
            key,
            chain,
            kind,
            height: record.height(),
            record,
            headers,
        }
    }

    /// JSON body as handed to external sinks
    pub fn payload(&self) -> Result<String, PublishError> {
        serde_json::to_string(&self.record).map_err(|e| PublishError::Encode(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("publisher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait::async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, event: &CommittedEvent) -> Result<(), PublishError>;
}

/// Traces every committed event at info level
pub struct LogPublisher;

#[async_trait::async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, event: &CommittedEvent) -> Result<(), PublishError> {
        let payload = event.payload()?;
        info!(
            "[Publisher] {} height={} payload={}",
            event.key, event.height, payload
        );
        Ok(())
    }
}

/// In-process fan-out to any number of subscribers. Slow subscribers lag and
/// lose events rather than holding up commits.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<CommittedEvent>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommittedEvent> {
        self.tx.subscribe()
    }
}

#[async_trait::async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, event: &CommittedEvent) -> Result<(), PublishError> {
        // No receivers is not an error; nobody asked for the event.
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

pub struct NoopPublisher;

#[async_trait::async_trait]
impl Publisher for NoopPublisher {
    async fn publish(&self, _event: &CommittedEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_utils::{balance, delegation};

    #[test]
    fn test_event_key_and_headers() {
        let event = CommittedEvent::from_record(balance("cosmoshub", "addrX", "uatom", 5, 101));
        assert_eq!(event.key, "cosmoshub:balance:addrX:uatom");
        assert_eq!(event.headers["chain"], "cosmoshub");
        assert_eq!(event.headers["type"], "balance");
        assert_eq!(event.height, 101);

        let event = CommittedEvent::from_record(delegation("osmosis", "d", "v", "uosmo", 1, 2));
        assert_eq!(event.key, "osmosis:delegation:d:v");
    }

    #[test]
    fn test_payload_is_tagged_json() {
        let event = CommittedEvent::from_record(balance("cosmoshub", "addrX", "uatom", 5, 101));
        let json: serde_json::Value = serde_json::from_str(&event.payload().unwrap()).unwrap();
        assert_eq!(json["kind"], "balance");
        assert_eq!(json["amount"], "5");
    }

    #[tokio::test]
    async fn test_broadcast_fan_out() {
        let publisher = BroadcastPublisher::new(16);
        // Publishing with nobody listening succeeds
        let event = CommittedEvent::from_record(balance("c", "a", "uatom", 1, 1));
        publisher.publish(&event).await.unwrap();

        let mut rx1 = publisher.subscribe();
        let mut rx2 = publisher.subscribe();
        publisher.publish(&event).await.unwrap();
        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_log_and_noop_publishers() {
        let event = CommittedEvent::from_record(balance("c", "a", "uatom", 1, 1));
        LogPublisher.publish(&event).await.unwrap();
        NoopPublisher.publish(&event).await.unwrap();
    }
}
