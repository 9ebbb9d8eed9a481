// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0
pub mod aggregator;
pub mod catalog;
pub mod commit;
pub mod config;
pub mod decoder;
pub mod error;
pub mod metrics;
pub mod publish;
pub mod query;
pub mod router;
pub mod source;
pub mod store;
pub mod supervisor;
pub mod types;
pub mod worker;

pub use error::{IngestError, IngestResult};
