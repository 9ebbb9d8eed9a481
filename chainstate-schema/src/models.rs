// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Row types for the canonical chain-state tables.
//!
//! Token quantities are stored as decimal strings so that values wider than
//! `BIGINT` survive the database round-trip unchanged.

use crate::schema::{
    balances, chain_cursors, delegations, proposals, supply, unbonding_delegations, validators,
    votes,
};
use chrono::{DateTime, Utc};
use diesel::{Insertable, Queryable, Selectable};

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = chain_cursors, check_for_backend(diesel::pg::Pg))]
pub struct ChainCursorRow {
    pub chain_name: String,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = balances, check_for_backend(diesel::pg::Pg))]
pub struct BalanceRow {
    pub chain_name: String,
    pub address: String,
    pub denom: String,
    pub amount: String,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = supply, check_for_backend(diesel::pg::Pg))]
pub struct SupplyRow {
    pub chain_name: String,
    pub denom: String,
    pub amount: String,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = delegations, check_for_backend(diesel::pg::Pg))]
pub struct DelegationRow {
    pub chain_name: String,
    pub delegator_address: String,
    pub validator_address: String,
    pub denom: String,
    pub shares: String,
    pub amount: String,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = validators, check_for_backend(diesel::pg::Pg))]
pub struct ValidatorRow {
    pub chain_name: String,
    pub operator_address: String,
    pub moniker: String,
    pub status: String,
    pub jailed: bool,
    pub tokens: String,
    pub delegator_shares: String,
    pub commission_rate: String,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

/// `entries` holds a JSON array of unbonding entries.
#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = unbonding_delegations, check_for_backend(diesel::pg::Pg))]
pub struct UnbondingRow {
    pub chain_name: String,
    pub delegator_address: String,
    pub validator_address: String,
    pub denom: String,
    pub entries: serde_json::Value,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = proposals, check_for_backend(diesel::pg::Pg))]
pub struct ProposalRow {
    pub chain_name: String,
    pub proposal_id: i64,
    pub title: String,
    pub status: String,
    pub submit_time: Option<String>,
    pub voting_end_time: Option<String>,
    pub tally: Option<serde_json::Value>,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Insertable, Debug, Clone, PartialEq)]
#[diesel(table_name = votes, check_for_backend(diesel::pg::Pg))]
pub struct VoteRow {
    pub chain_name: String,
    pub proposal_id: i64,
    pub voter: String,
    pub option: String,
    pub height: i64,
    pub updated_at: DateTime<Utc>,
}
