// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0
pub mod api;
pub mod pg_store;
pub mod rest_source;
