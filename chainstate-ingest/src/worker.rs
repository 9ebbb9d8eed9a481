// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Per-Chain Ingestion Worker
//!
//! One worker per enabled chain. Each cycle collects a batch of raw events,
//! decodes it and hands the records to the commit pipeline:
//!
//! ```text
//!   poll:    latest_height ─┐
//!            fetch_module_state(m) for every module ─┐
//!   stream:  router.drain(batch_size) ───────────────┴─▶ decode ─▶ commit
//! ```
//!
//! Only the collection phase is raced against cancellation. A batch that was
//! collected is committed to completion, so shutdown never leaves half a batch.
//!
//! A poll snapshot only lists what exists. Keys present in the last committed
//! snapshot but missing from the current one become deletions at the new height.
//! Before the first snapshot, the live account rows of tracked addresses stand in
//! for the last one.

use crate::commit::{CommitOutcome, CommitPipeline};
use crate::decoder::account_source_keys;
use crate::config::{ChainConfig, IngestMode, IngesterConfig};
use crate::decoder::DecoderRegistry;
use crate::error::{IngestError, IngestResult, SourceError, StoreError};
use crate::metrics::IngestMetrics;
use crate::router::EventRouter;
use crate::source::{with_timeout, SourceAdapter};
use crate::store::CanonicalStore;
use crate::types::{Height, NormalizedRecord, RawStateEvent};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a single cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub height: Height,
    /// Raw events collected
    pub events: usize,
    /// Records that decoded successfully
    pub records: usize,
    pub decode_errors: usize,
    /// None when there was nothing to commit
    pub outcome: Option<CommitOutcome>,
}

/// Keys of one poll snapshot, per module
type SnapshotKeys = HashMap<String, BTreeSet<Vec<u8>>>;

pub struct ChainWorker {
    chain: ChainConfig,
    settings: IngesterConfig,
    source: Arc<dyn SourceAdapter>,
    decoders: Arc<DecoderRegistry>,
    router: Arc<EventRouter>,
    pipeline: Arc<CommitPipeline>,
    metrics: Arc<IngestMetrics>,
    last_snapshot: Mutex<Option<SnapshotKeys>>,
}

impl ChainWorker {
    pub fn new(
        chain: ChainConfig,
        settings: IngesterConfig,
        source: Arc<dyn SourceAdapter>,
        decoders: Arc<DecoderRegistry>,
        router: Arc<EventRouter>,
        pipeline: Arc<CommitPipeline>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            chain,
            settings,
            source,
            decoders,
            router,
            pipeline,
            metrics,
            last_snapshot: Mutex::new(None),
        }
    }

    pub fn chain_name(&self) -> &str {
        &self.chain.name
    }

    /// Run one ingestion cycle. Errors leave the cursor where it was.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> IngestResult<CycleReport> {
        let collected = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            collected = self.collect_batch() => collected?,
        };
        let Some((height, mut events)) = collected else {
            return Ok(CycleReport::default());
        };
        let snapshot = match self.chain.mode {
            IngestMode::Poll => Some(self.add_vanished_keys(height, &mut events).await?),
            IngestMode::Stream => None,
        };

        let mut report = CycleReport {
            height,
            events: events.len(),
            ..Default::default()
        };
        let records = self.decode_batch(events, &mut report);
        report.records = records.len();

        let outcome = self
            .pipeline
            .commit(&self.chain.name, height, records)
            .await?;
        if let (Some(snapshot), CommitOutcome::Committed { .. }) = (snapshot, &outcome) {
            *self.last_snapshot.lock().await = Some(snapshot);
        }
        report.outcome = Some(outcome);
        Ok(report)
    }

    async fn collect_batch(&self) -> IngestResult<Option<(Height, Vec<RawStateEvent>)>> {
        match self.chain.mode {
            IngestMode::Poll => self.poll_snapshot().await.map(Some),
            IngestMode::Stream => self.drain_stream().await,
        }
    }

    /// Snapshot every module at the current height. Any failure abandons the cycle.
    async fn poll_snapshot(&self) -> IngestResult<(Height, Vec<RawStateEvent>)> {
        let chain = self.chain.name.as_str();
        let timeout = self.settings.source_timeout();

        let mut height = with_timeout(timeout, self.source.latest_height(chain))
            .await
            .map_err(|e| self.source_failure(e))?;

        let mut events = Vec::new();
        for module in &self.chain.modules {
            let module_events = with_timeout(timeout, self.source.fetch_module_state(chain, module))
                .await
                .map_err(|e| self.source_failure(e))?;
            debug!(
                "[{}] Fetched {} events for module {}",
                chain,
                module_events.len(),
                module
            );
            events.extend(module_events);
        }

        // An adapter may answer a module query from a newer block than latest_height did.
        height = events.iter().map(|e| e.height).fold(height, Height::max);
        for event in &mut events {
            if event.height == 0 {
                event.height = height;
            }
        }
        Ok((height, events))
    }

    /// Append a deletion for every key of the previous snapshot missing from `events`.
    /// Returns the keys of this snapshot, to be remembered once it is committed.
    async fn add_vanished_keys(
        &self,
        height: Height,
        events: &mut Vec<RawStateEvent>,
    ) -> IngestResult<SnapshotKeys> {
        let mut current = SnapshotKeys::new();
        for event in events.iter() {
            current
                .entry(event.module.clone())
                .or_default()
                .insert(event.key.clone());
        }

        let last = self.last_snapshot.lock().await.clone();
        let previous = match last {
            Some(previous) => previous,
            None => self.stored_account_keys().await?,
        };
        let chain = self.chain.name.as_str();
        let mut vanished = 0;
        for (module, keys) in previous {
            let seen = current.get(&module);
            for key in keys {
                if seen.is_some_and(|s| s.contains(&key)) {
                    continue;
                }
                events.push(RawStateEvent::deletion(chain, module.as_str(), key, height));
                vanished += 1;
            }
        }
        if vanished > 0 {
            debug!("[{}] {} keys vanished since the last snapshot at height {}", chain, vanished, height);
        }
        Ok(current)
    }

    /// Live stored account keys of tracked addresses, limited to polled modules
    async fn stored_account_keys(&self) -> IngestResult<SnapshotKeys> {
        let mut keys = SnapshotKeys::new();
        for address in &self.chain.tracked_addresses {
            let state = self
                .pipeline
                .store()
                .account_state(&self.chain.name, address)
                .await?;
            for (module, key) in account_source_keys(&state) {
                if self.chain.modules.iter().any(|m| m == module) {
                    keys.entry(module.to_string())
                        .or_default()
                        .insert(key.into_bytes());
                }
            }
        }
        Ok(keys)
    }

    /// Take up to `batch_size` queued events. The batch height is the highest event height.
    async fn drain_stream(&self) -> IngestResult<Option<(Height, Vec<RawStateEvent>)>> {
        let chain = self.chain.name.as_str();
        let mut events = self.router.drain(chain, self.settings.batch_size.max(1));
        if events.is_empty() {
            return Ok(None);
        }

        let mut height = events.iter().map(|e| e.height).max().unwrap_or(0);
        if height == 0 {
            height = with_timeout(self.settings.source_timeout(), self.source.latest_height(chain))
                .await
                .map_err(|e| self.source_failure(e))?;
        }
        for event in &mut events {
            if event.height == 0 {
                event.height = height;
            }
        }
        Ok(Some((height, events)))
    }

    fn source_failure(&self, source: SourceError) -> IngestError {
        self.metrics
            .source_errors
            .with_label_values(&[&self.chain.name, source.error_type()])
            .inc();
        IngestError::Connectivity {
            chain: self.chain.name.clone(),
            source,
        }
    }

    /// Decode a batch, skipping and counting events that do not decode
    fn decode_batch(
        &self,
        events: Vec<RawStateEvent>,
        report: &mut CycleReport,
    ) -> Vec<NormalizedRecord> {
        let chain = self.chain.name.as_str();
        let mut records = Vec::with_capacity(events.len());
        for event in events {
            if event.chain != chain {
                warn!(
                    "[{}] Ignoring event for chain {} (key {})",
                    chain,
                    event.chain,
                    event.key_display()
                );
                continue;
            }
            match self.decoders.decode(&event.module, &event) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => {
                    report.decode_errors += 1;
                    self.metrics
                        .decode_errors
                        .with_label_values(&[chain, &event.module, e.error_type()])
                        .inc();
                    warn!("[{}] Skipping undecodable event: {}", chain, e);
                }
            }
        }
        records
    }

    fn record_cycle(&self, result: &IngestResult<CycleReport>) {
        let label = match result {
            Ok(CycleReport {
                outcome: Some(CommitOutcome::Committed { .. }),
                ..
            }) => "committed",
            Ok(CycleReport {
                outcome: Some(CommitOutcome::Stale { .. }),
                ..
            }) => "stale",
            Ok(_) => "idle",
            Err(e) => e.error_type(),
        };
        self.metrics
            .ingest_cycles
            .with_label_values(&[&self.chain.name, label])
            .inc();
    }

    /// Drive cycles until `cancel` fires. Failures are logged and the loop continues,
    /// except an unavailable storage backend, which stops the worker with that error.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> IngestResult<()> {
        let chain = self.chain.name.clone();
        info!(
            "[{}] Starting ingestion worker (mode={:?}, modules={:?}, interval={:?})",
            chain,
            self.chain.mode,
            self.chain.modules,
            self.settings.poll_interval()
        );

        let mut interval = time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        let mut backlog = false;

        loop {
            if !backlog {
                match self.chain.mode {
                    IngestMode::Poll => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = interval.tick() => {}
                        }
                    }
                    IngestMode::Stream => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = self.router.ready(&chain) => {}
                            _ = interval.tick() => {}
                        }
                    }
                }
            } else if cancel.is_cancelled() {
                break;
            }

            let result = self.run_cycle(&cancel).await;
            self.record_cycle(&result);
            match &result {
                Ok(report) => {
                    if let Some(outcome) = &report.outcome {
                        debug!("[{}] Cycle done: {:?}", chain, report);
                        if let CommitOutcome::Stale { cursor, attempted } = outcome {
                            info!(
                                "[{}] Source served height {} behind cursor {}",
                                chain, attempted, cursor
                            );
                        }
                    }
                }
                Err(IngestError::Cancelled) => break,
                Err(e @ IngestError::Storage(StoreError::Unavailable(_))) => {
                    error!("[{}] Storage backend unavailable, stopping worker: {}", chain, e);
                    return Err(e.clone());
                }
                Err(e) if e.is_recoverable() => {
                    warn!("[{}] Ingestion cycle failed, retrying next cycle: {}", chain, e)
                }
                Err(e) => warn!("[{}] Ingestion cycle failed: {}", chain, e),
            }

            // Keep draining without waiting while the stream queue has a backlog.
            backlog = self.chain.mode == IngestMode::Stream
                && result.is_ok()
                && !self.router.is_empty(&chain);
        }

        info!("[{}] Ingestion worker stopped", chain);
        Ok(())
    }
}

/// Feed a chain's subscription into the router until cancelled, resubscribing
/// after the stream ends or fails.
pub async fn run_subscription_forwarder(
    chain: String,
    source: Arc<dyn SourceAdapter>,
    router: Arc<EventRouter>,
    retry_interval: time::Duration,
    cancel: CancellationToken,
) {
    info!("[{}] Starting subscription forwarder", chain);
    loop {
        let subscribed = tokio::select! {
            _ = cancel.cancelled() => break,
            subscribed = source.subscribe(&chain) => subscribed,
        };
        match subscribed {
            Ok(mut rx) => loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("[{}] Subscription forwarder stopped", chain);
                        return;
                    }
                    event = rx.recv() => match event {
                        // Drops are counted by the router; the stream keeps flowing.
                        Some(event) => { router.enqueue(&chain, event); }
                        None => {
                            warn!("[{}] Subscription stream closed, resubscribing", chain);
                            break;
                        }
                    }
                }
            },
            Err(e) if !e.is_recoverable() => {
                warn!("[{}] Source cannot stream: {}", chain, e);
                break;
            }
            Err(e) => warn!("[{}] Subscribe failed: {}", chain, e),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = time::sleep(retry_interval) => {}
        }
    }
    info!("[{}] Subscription forwarder stopped", chain);
}
