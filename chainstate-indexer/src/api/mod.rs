// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! REST API over committed chain state
//!
//! Every endpoint is a read through [`QueryService`]; none of them touch the
//! ingestion path, so they are safe to serve while workers commit.

mod handlers;
mod types;

pub use handlers::create_api_router;
pub use types::*;

use chainstate_ingest::query::QueryService;
use std::sync::Arc;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub query: Arc<QueryService>,
}

impl ApiState {
    pub fn new(query: Arc<QueryService>) -> Arc<Self> {
        Arc::new(Self { query })
    }
}
