// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Owns the running chain workers.
//!
//! Each enabled chain gets a child cancellation token, a router queue, its
//! worker task and, in stream mode, a subscription forwarder. Disabling a chain
//! or shutting down cancels the token, waits up to the shutdown grace period
//! and aborts whatever is still running.
//!
//! A worker that stops because storage is unavailable reports the error through
//! [`IngestionSupervisor::fatal_error`]; the process is expected to shut down.

use crate::catalog::{ChainCatalog, ChainStatus};
use crate::commit::CommitPipeline;
use crate::config::{ChainConfig, IngestMode, IngesterConfig};
use crate::decoder::DecoderRegistry;
use crate::error::{IngestError, IngestResult};
use crate::metrics::IngestMetrics;
use crate::router::EventRouter;
use crate::source::SourceAdapter;
use crate::worker::{run_subscription_forwarder, ChainWorker};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct WorkerHandle {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub struct IngestionSupervisor {
    settings: IngesterConfig,
    decoders: Arc<DecoderRegistry>,
    router: Arc<EventRouter>,
    pipeline: Arc<CommitPipeline>,
    catalog: Arc<ChainCatalog>,
    metrics: Arc<IngestMetrics>,
    cancel: CancellationToken,
    workers: Mutex<HashMap<String, WorkerHandle>>,
    fatal: Arc<watch::Sender<Option<IngestError>>>,
}

impl IngestionSupervisor {
    pub fn new(
        settings: IngesterConfig,
        decoders: Arc<DecoderRegistry>,
        pipeline: Arc<CommitPipeline>,
        catalog: Arc<ChainCatalog>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        let router =
            Arc::new(EventRouter::new(settings.queue_capacity).with_metrics(metrics.clone()));
        Self {
            settings,
            decoders,
            router,
            pipeline,
            catalog,
            metrics,
            cancel: CancellationToken::new(),
            workers: Mutex::new(HashMap::new()),
            fatal: Arc::new(watch::channel(None).0),
        }
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn catalog(&self) -> &Arc<ChainCatalog> {
        &self.catalog
    }

    /// Make a chain known without ingesting it
    pub fn register_chain(&self, config: &ChainConfig) {
        if self.catalog.status(&config.name).is_none() {
            self.catalog.upsert(config, ChainStatus::Disabled);
        }
    }

    /// Start ingesting a chain
    pub async fn enable_chain(
        &self,
        config: ChainConfig,
        source: Arc<dyn SourceAdapter>,
    ) -> IngestResult<()> {
        let mut workers = self.workers.lock().await;
        if workers.contains_key(&config.name) {
            return Err(IngestError::AlreadyEnabled(config.name));
        }
        if self.cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let chain = config.name.clone();
        let cancel = self.cancel.child_token();
        let mut tasks = Vec::new();

        self.router.register(&chain);
        if config.mode == IngestMode::Stream {
            tasks.push(tokio::spawn(run_subscription_forwarder(
                chain.clone(),
                source.clone(),
                self.router.clone(),
                self.settings.poll_interval(),
                cancel.clone(),
            )));
        }

        self.catalog.upsert(&config, ChainStatus::Enabled);
        let worker = Arc::new(ChainWorker::new(
            config,
            self.settings.clone(),
            source,
            self.decoders.clone(),
            self.router.clone(),
            self.pipeline.clone(),
            self.metrics.clone(),
        ));
        let fatal = self.fatal.clone();
        let worker_chain = chain.clone();
        let worker_cancel = cancel.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = worker.run(worker_cancel).await {
                error!("[Supervisor] Worker for {} failed: {}", worker_chain, e);
                fatal.send_if_modified(|current| {
                    if current.is_some() {
                        return false;
                    }
                    *current = Some(e);
                    true
                });
            }
        }));

        workers.insert(chain.clone(), WorkerHandle { cancel, tasks });
        info!("[Supervisor] Enabled chain {}", chain);
        Ok(())
    }

    /// Stop ingesting a chain. Committed state is kept, but reads report the
    /// chain as disabled until it is enabled again. Queued events are discarded.
    pub async fn disable_chain(&self, chain: &str) -> IngestResult<()> {
        // Held until the queue is unregistered; enable_chain for this chain waits on it.
        let mut workers = self.workers.lock().await;
        let Some(handle) = workers.remove(chain) else {
            return match self.catalog.status(chain) {
                Some(_) => Err(IngestError::ChainDisabled(chain.to_string())),
                None => Err(IngestError::UnknownChain(chain.to_string())),
            };
        };

        self.catalog.set_status(chain, ChainStatus::Disabled);
        handle.cancel.cancel();
        stop_tasks(chain, handle.tasks, self.settings.shutdown_grace()).await;
        self.router.unregister(chain);
        drop(workers);
        info!("[Supervisor] Disabled chain {}", chain);
        Ok(())
    }

    /// Enabled chain names, sorted
    pub async fn enabled_chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self.workers.lock().await.keys().cloned().collect();
        chains.sort();
        chains
    }

    /// Resolves with the first error that stopped a worker for good
    pub async fn fatal_error(&self) -> IngestError {
        let mut rx = self.fatal.subscribe();
        let fatal = rx.wait_for(Option::is_some).await.map(|value| (*value).clone());
        match fatal {
            Ok(Some(e)) => e,
            _ => IngestError::Cancelled,
        }
    }

    /// Cancel every worker and wait for them, bounded by the shutdown grace period
    pub async fn shutdown(&self) {
        info!("[Supervisor] Shutting down");
        self.cancel.cancel();
        let handles: Vec<(String, WorkerHandle)> = self.workers.lock().await.drain().collect();
        let grace = self.settings.shutdown_grace();
        futures::future::join_all(handles.into_iter().map(|(chain, handle)| async move {
            stop_tasks(&chain, handle.tasks, grace).await;
            chain
        }))
        .await
        .into_iter()
        .for_each(|chain| {
            self.catalog.set_status(&chain, ChainStatus::Disabled);
            self.router.unregister(&chain);
        });
        info!("[Supervisor] All workers stopped");
    }
}

async fn stop_tasks(chain: &str, tasks: Vec<JoinHandle<()>>, grace: Duration) {
    let deadline = time::Instant::now() + grace;
    for mut task in tasks {
        if time::timeout_at(deadline, &mut task).await.is_err() {
            warn!(
                "[Supervisor] Task for {} did not stop within {:?}, aborting",
                chain, grace
            );
            task.abort();
        }
    }
}
