// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! API handlers for account and chain queries

use crate::api::types::*;
use crate::api::ApiState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chainstate_ingest::error::IngestError;
use chainstate_ingest::query::ChainSummary;
use chainstate_ingest::types::{
    AccountState, ChainStats, CrossChainAccountState, ProposalRecord, ValidatorRecord,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Create the API router with all endpoints
pub fn create_api_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/v1/accounts/:address/state", get(get_account_state))
        .route("/api/v1/accounts/:address/balances", get(get_account_balances))
        .route(
            "/api/v1/accounts/:address/delegations",
            get(get_account_delegations),
        )
        .route(
            "/api/v1/accounts/:address/cross-chain",
            get(get_cross_chain_account),
        )
        .route("/api/v1/chains", get(list_chains))
        .route("/api/v1/chains/:chain/cursor", get(get_chain_cursor))
        .route("/api/v1/chains/:chain/validators", get(get_validators))
        .route("/api/v1/chains/:chain/proposals", get(get_proposals))
        .route("/api/v1/chains/:chain/stats", get(get_chain_stats))
        .route("/health", get(health_check))
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chainstate-indexer"
    }))
}

/// Balances, delegations and unbonding of one address on one chain
async fn get_account_state(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(params): Query<ChainQuery>,
) -> Result<Json<AccountState>, ApiErrorResponse> {
    let chain = required_chain(&params)?;
    let account = state.query.get_account_state(chain, &address).await?;
    Ok(Json(account))
}

async fn get_account_balances(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(params): Query<ChainQuery>,
) -> Result<Json<BalancesResponse>, ApiErrorResponse> {
    let chain = required_chain(&params)?;
    let account = state.query.get_account_state(chain, &address).await?;
    Ok(Json(BalancesResponse {
        chain: account.chain,
        address: account.address,
        balances: account.balances,
    }))
}

async fn get_account_delegations(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(params): Query<ChainQuery>,
) -> Result<Json<DelegationsResponse>, ApiErrorResponse> {
    let chain = required_chain(&params)?;
    let account = state.query.get_account_state(chain, &address).await?;
    Ok(Json(DelegationsResponse {
        chain: account.chain,
        address: account.address,
        delegations: account.delegations,
    }))
}

/// One address across several chains. Chains that fail are listed under
/// `failures`; the request only fails when no chain could be read.
async fn get_cross_chain_account(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Query(params): Query<CrossChainQuery>,
) -> Result<Json<CrossChainAccountState>, ApiErrorResponse> {
    let chains = params.chain_list();
    debug!("Cross-chain query for {} over {:?}", address, chains);
    let merged = state
        .query
        .get_cross_chain_account_state(&address, &chains)
        .await?;
    Ok(Json(merged))
}

async fn list_chains(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<Vec<ChainSummary>>, ApiErrorResponse> {
    Ok(Json(state.query.list_chains().await?))
}

async fn get_chain_cursor(
    State(state): State<Arc<ApiState>>,
    Path(chain): Path<String>,
) -> Result<Json<CursorResponse>, ApiErrorResponse> {
    let cursor = state.query.get_chain_cursor(&chain).await?;
    Ok(Json(CursorResponse {
        height: cursor.as_ref().map(|c| c.height),
        chain,
        cursor,
    }))
}

async fn get_validators(
    State(state): State<Arc<ApiState>>,
    Path(chain): Path<String>,
) -> Result<Json<Vec<ValidatorRecord>>, ApiErrorResponse> {
    Ok(Json(state.query.validators(&chain).await?))
}

async fn get_proposals(
    State(state): State<Arc<ApiState>>,
    Path(chain): Path<String>,
) -> Result<Json<Vec<ProposalRecord>>, ApiErrorResponse> {
    Ok(Json(state.query.proposals(&chain).await?))
}

async fn get_chain_stats(
    State(state): State<Arc<ApiState>>,
    Path(chain): Path<String>,
) -> Result<Json<ChainStats>, ApiErrorResponse> {
    Ok(Json(state.query.chain_stats(&chain).await?))
}

fn required_chain(params: &ChainQuery) -> Result<&str, ApiErrorResponse> {
    params
        .chain
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiErrorResponse::bad_request("chain parameter is required"))
}

/// API error response wrapper
pub(crate) struct ApiErrorResponse {
    status: StatusCode,
    body: Json<ApiError>,
}

impl ApiErrorResponse {
    fn new(status: StatusCode, error: &str, message: &str) -> Self {
        Self {
            status,
            body: Json(ApiError {
                error: error.to_string(),
                message: message.to_string(),
            }),
        }
    }

    fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "bad_request", message)
    }

    fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    fn conflict(message: &str) -> Self {
        Self::new(StatusCode::CONFLICT, "chain_disabled", message)
    }

    fn unavailable(message: &str) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
    }

    fn internal(message: &str) -> Self {
        error!("Internal error: {}", message);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<IngestError> for ApiErrorResponse {
    fn from(err: IngestError) -> Self {
        let message = err.to_string();
        match err {
            IngestError::UnknownChain(_) => Self::not_found(&message),
            IngestError::ChainDisabled(_) => Self::conflict(&message),
            IngestError::TotalFailure { .. } => Self::unavailable(&message),
            _ => Self::internal(&message),
        }
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        (self.status, self.body).into_response()
    }
}
