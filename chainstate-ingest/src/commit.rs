// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Commit Pipeline
//!
//! The only writer of canonical state. A batch either lands completely, with the
//! chain cursor moved to the batch height, or not at all.

use crate::error::{IngestError, IngestResult};
use crate::metrics::IngestMetrics;
use crate::publish::{CommittedEvent, Publisher};
use crate::store::{dedupe_records, ApplyOutcome, CanonicalStore, CommitBatch};
use crate::types::{Height, NormalizedRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed {
        height: Height,
        applied: usize,
        skipped: usize,
    },
    /// The batch was older than the cursor and was dropped without writing
    Stale { cursor: Height, attempted: Height },
}

pub struct CommitPipeline {
    store: Arc<dyn CanonicalStore>,
    publisher: Arc<dyn Publisher>,
    metrics: Arc<IngestMetrics>,
}

impl CommitPipeline {
    pub fn new(
        store: Arc<dyn CanonicalStore>,
        publisher: Arc<dyn Publisher>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            store,
            publisher,
            metrics,
        }
    }

    pub fn store(&self) -> &Arc<dyn CanonicalStore> {
        &self.store
    }

    pub async fn commit(
        &self,
        chain: &str,
        height: Height,
        records: Vec<NormalizedRecord>,
    ) -> IngestResult<CommitOutcome> {
        for record in &records {
            if record.chain() != chain {
                return Err(IngestError::InvalidBatch(format!(
                    "record for chain {} in batch for {}",
                    record.chain(),
                    chain
                )));
            }
            if record.height() > height {
                return Err(IngestError::InvalidBatch(format!(
                    "record {} at height {} above batch height {}",
                    record.natural_key(),
                    record.height(),
                    height
                )));
            }
        }

        let received = records.len();
        let records = dedupe_records(records);
        if records.len() < received {
            debug!(
                "[{}] Collapsed {} duplicate records in batch at height {}",
                chain,
                received - records.len(),
                height
            );
        }

        let timer = self
            .metrics
            .commit_latency
            .with_label_values(&[chain])
            .start_timer();
        let outcome = self
            .store
            .apply_batch(CommitBatch::new(chain, height, records))
            .await;
        timer.observe_duration();

        match outcome? {
            ApplyOutcome::Stale { cursor_height } => {
                info!(
                    "[{}] Dropping stale batch at height {} (cursor at {})",
                    chain, height, cursor_height
                );
                Ok(CommitOutcome::Stale {
                    cursor: cursor_height,
                    attempted: height,
                })
            }
            ApplyOutcome::Applied {
                applied,
                skipped,
                cursor,
            } => {
                let mut per_kind: BTreeMap<String, u64> = BTreeMap::new();
                for record in &applied {
                    *per_kind.entry(record.kind().to_string()).or_default() += 1;
                }
                for (kind, count) in per_kind {
                    self.metrics
                        .records_committed
                        .with_label_values(&[chain, &kind])
                        .inc_by(count);
                }
                self.metrics
                    .chain_cursor_height
                    .with_label_values(&[chain])
                    .set(cursor.height as i64);

                let applied_count = applied.len();
                debug!(
                    "[{}] Committed height {}: {} applied, {} skipped",
                    chain, height, applied_count, skipped
                );
                self.spawn_publish(chain, applied);

                Ok(CommitOutcome::Committed {
                    height: cursor.height,
                    applied: applied_count,
                    skipped,
                })
            }
        }
    }

    /// Publish applied records in batch order on a detached task
    fn spawn_publish(&self, chain: &str, applied: Vec<NormalizedRecord>) {
        if applied.is_empty() {
            return;
        }
        let publisher = self.publisher.clone();
        let metrics = self.metrics.clone();
        let chain = chain.to_string();
        tokio::spawn(async move {
            for record in applied {
                let event = CommittedEvent::from_record(record);
                if let Err(e) = publisher.publish(&event).await {
                    warn!("[{}] Failed to publish {}: {}", chain, event.key, e);
                    metrics.publish_failures.with_label_values(&[&chain]).inc();
                }
            }
        });
    }
}
