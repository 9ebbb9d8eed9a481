// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_gauge_vec_with_registry, HistogramVec, IntCounterVec, IntGaugeVec, Registry,
};

const COMMIT_LATENCY_SEC_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

#[derive(Clone, Debug)]
pub struct IngestMetrics {
    pub(crate) ingest_cycles: IntCounterVec,
    pub(crate) records_committed: IntCounterVec,
    pub(crate) decode_errors: IntCounterVec,
    pub(crate) source_errors: IntCounterVec,
    pub(crate) router_dropped_events: IntCounterVec,
    pub(crate) router_queue_depth: IntGaugeVec,
    pub(crate) chain_cursor_height: IntGaugeVec,
    pub(crate) commit_latency: HistogramVec,
    pub(crate) aggregation_requests: IntCounterVec,
    pub(crate) aggregation_chain_failures: IntCounterVec,
    pub(crate) publish_failures: IntCounterVec,
}

impl IngestMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            ingest_cycles: register_int_counter_vec_with_registry!(
                "ingest_cycles_total",
                "Ingestion cycles by chain and result",
                &["chain", "result"],
                registry,
            )
            .unwrap(),
            records_committed: register_int_counter_vec_with_registry!(
                "ingest_records_committed_total",
                "Records written to the canonical store",
                &["chain", "kind"],
                registry,
            )
            .unwrap(),
            decode_errors: register_int_counter_vec_with_registry!(
                "ingest_decode_errors_total",
                "Raw events skipped because they could not be decoded",
                &["chain", "module", "error"],
                registry,
            )
            .unwrap(),
            source_errors: register_int_counter_vec_with_registry!(
                "ingest_source_errors_total",
                "Source adapter failures that skipped a cycle",
                &["chain", "error"],
                registry,
            )
            .unwrap(),
            router_dropped_events: register_int_counter_vec_with_registry!(
                "router_dropped_events_total",
                "Events dropped because the chain queue was full",
                &["chain"],
                registry,
            )
            .unwrap(),
            router_queue_depth: register_int_gauge_vec_with_registry!(
                "router_queue_depth",
                "Events waiting in each chain queue",
                &["chain"],
                registry,
            )
            .unwrap(),
            chain_cursor_height: register_int_gauge_vec_with_registry!(
                "chain_cursor_height",
                "Last committed height per chain",
                &["chain"],
                registry,
            )
            .unwrap(),
            commit_latency: register_histogram_vec_with_registry!(
                "commit_latency_seconds",
                "Time spent applying one commit batch",
                &["chain"],
                COMMIT_LATENCY_SEC_BUCKETS.to_vec(),
                registry,
            )
            .unwrap(),
            aggregation_requests: register_int_counter_vec_with_registry!(
                "aggregation_requests_total",
                "Cross-chain aggregation requests by result",
                &["result"],
                registry,
            )
            .unwrap(),
            aggregation_chain_failures: register_int_counter_vec_with_registry!(
                "aggregation_chain_failures_total",
                "Chains excluded from an aggregation",
                &["chain"],
                registry,
            )
            .unwrap(),
            publish_failures: register_int_counter_vec_with_registry!(
                "publish_failures_total",
                "Committed events that could not be published",
                &["chain"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        let registry = Registry::new();
        Self::new(&registry)
    }
}
