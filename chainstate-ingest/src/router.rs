// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Bounded per-chain staging queues between event producers and chain workers.
//!
//! `enqueue` never waits. When a chain's queue is full the incoming event is
//! dropped and counted, so one slow chain cannot stall producers of the others.
//! Accepted events keep FIFO order within a chain.

use crate::metrics::IngestMetrics;
use crate::types::RawStateEvent;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

struct ChainQueue {
    events: Mutex<VecDeque<RawStateEvent>>,
    dropped: AtomicU64,
    ready: Notify,
}

impl ChainQueue {
    fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            dropped: AtomicU64::new(0),
            ready: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RawStateEvent>> {
        // Queue operations cannot leave the deque half-modified, so a poisoned lock is usable.
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct EventRouter {
    capacity: usize,
    queues: RwLock<HashMap<String, Arc<ChainQueue>>>,
    metrics: Option<Arc<IngestMetrics>>,
}

impl EventRouter {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "router capacity must be positive");
        Self {
            capacity,
            queues: RwLock::new(HashMap::new()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn queue(&self, chain: &str) -> Option<Arc<ChainQueue>> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(chain)
            .cloned()
    }

    /// Create the queue for a newly enabled chain. Returns false if it already exists.
    pub fn register(&self, chain: &str) -> bool {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(chain) {
            return false;
        }
        queues.insert(chain.to_string(), Arc::new(ChainQueue::new(self.capacity)));
        info!(
            "[Router] Registered queue for {} (capacity={})",
            chain, self.capacity
        );
        true
    }

    /// Drain and discard a disabled chain's queue. Returns the number of discarded events.
    pub fn unregister(&self, chain: &str) -> usize {
        let removed = self
            .queues
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(chain);
        let Some(queue) = removed else {
            return 0;
        };
        let discarded = {
            let mut events = queue.lock();
            let n = events.len();
            events.clear();
            n
        };
        // Wake a worker that may still be parked on this queue.
        queue.ready.notify_waiters();
        if let Some(m) = &self.metrics {
            m.router_queue_depth.with_label_values(&[chain]).set(0);
        }
        info!(
            "[Router] Unregistered queue for {} (discarded {} events)",
            chain, discarded
        );
        discarded
    }

    pub fn is_registered(&self, chain: &str) -> bool {
        self.queue(chain).is_some()
    }

    /// Offer an event to a chain's queue without blocking.
    ///
    /// Returns false when the queue is full (the event is dropped and counted) or when
    /// the chain has no queue.
    pub fn enqueue(&self, chain: &str, event: RawStateEvent) -> bool {
        let Some(queue) = self.queue(chain) else {
            debug!("[Router] No queue for {}, rejecting event", chain);
            return false;
        };

        let depth = {
            let mut events = queue.lock();
            if events.len() >= self.capacity {
                None
            } else {
                events.push_back(event);
                Some(events.len())
            }
        };

        match depth {
            Some(depth) => {
                if let Some(m) = &self.metrics {
                    m.router_queue_depth
                        .with_label_values(&[chain])
                        .set(depth as i64);
                }
                queue.ready.notify_one();
                true
            }
            None => {
                let dropped = queue.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if let Some(m) = &self.metrics {
                    m.router_dropped_events.with_label_values(&[chain]).inc();
                }
                // Log the first drop and then every 1000th to avoid flooding under overload.
                if dropped == 1 || dropped % 1000 == 0 {
                    warn!(
                        "[Router] Queue for {} full (capacity={}), dropped {} events so far",
                        chain, self.capacity, dropped
                    );
                }
                false
            }
        }
    }

    /// Take the oldest event of a chain's queue
    pub fn dequeue(&self, chain: &str) -> Option<RawStateEvent> {
        let queue = self.queue(chain)?;
        let (event, depth) = {
            let mut events = queue.lock();
            let event = events.pop_front();
            (event, events.len())
        };
        self.record_depth(chain, depth);
        event
    }

    /// Take up to `max` events in FIFO order
    pub fn drain(&self, chain: &str, max: usize) -> Vec<RawStateEvent> {
        let Some(queue) = self.queue(chain) else {
            return Vec::new();
        };
        let (batch, depth) = {
            let mut events = queue.lock();
            let n = events.len().min(max);
            let batch: Vec<RawStateEvent> = events.drain(..n).collect();
            (batch, events.len())
        };
        self.record_depth(chain, depth);
        batch
    }

    pub fn len(&self, chain: &str) -> usize {
        self.queue(chain).map(|q| q.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self, chain: &str) -> bool {
        self.len(chain) == 0
    }

    /// Number of events dropped on a full queue since the chain was registered
    pub fn dropped(&self, chain: &str) -> u64 {
        self.queue(chain)
            .map(|q| q.dropped.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn chains(&self) -> Vec<String> {
        let mut chains: Vec<String> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        chains.sort();
        chains
    }

    /// Resolves once an event has been enqueued for `chain` since the last wake-up.
    /// Never resolves for a chain without a queue.
    pub async fn ready(&self, chain: &str) {
        match self.queue(chain) {
            Some(queue) => queue.ready.notified().await,
            None => std::future::pending().await,
        }
    }

    fn record_depth(&self, chain: &str, depth: usize) {
        if let Some(m) = &self.metrics {
            m.router_queue_depth
                .with_label_values(&[chain])
                .set(depth as i64);
        }
    }
}
