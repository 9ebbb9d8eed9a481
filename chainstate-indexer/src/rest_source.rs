// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Cosmos LCD (REST) source adapter
//!
//! Polls the standard gRPC-gateway routes of one endpoint and turns the answers
//! into raw state events with the key shapes the decoders expect:
//!
//! ```text
//! bank     supply/{denom}                      <- /cosmos/bank/v1beta1/supply
//!          balances/{address}/{denom}          <- /cosmos/bank/v1beta1/balances/{address}
//! staking  validators/{operator}               <- /cosmos/staking/v1beta1/validators
//!          delegations/{delegator}/{validator} <- /cosmos/staking/v1beta1/delegations/{address}
//!          unbonding/{delegator}/{validator}   <- .../delegators/{address}/unbonding_delegations
//! gov      proposals/{id}                      <- /cosmos/gov/v1/proposals
//! ```
//!
//! Per-account state is only fetched for the chain's tracked addresses. Events
//! carry height 0; the worker stamps them with the cycle height.

use chainstate_ingest::error::SourceError;
use chainstate_ingest::source::SourceAdapter;
use chainstate_ingest::types::{Height, RawStateEvent};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const LATEST_BLOCK_PATH: &str = "/cosmos/base/tendermint/v1beta1/blocks/latest";
const SUPPLY_PATH: &str = "/cosmos/bank/v1beta1/supply";
const VALIDATORS_PATH: &str = "/cosmos/staking/v1beta1/validators";
const STAKING_PARAMS_PATH: &str = "/cosmos/staking/v1beta1/params";
const PROPOSALS_PATH: &str = "/cosmos/gov/v1/proposals";

const DEFAULT_PAGE_LIMIT: u32 = 200;

pub struct CosmosRestSource {
    client: reqwest::Client,
    base_url: String,
    tracked_addresses: Vec<String>,
    page_limit: u32,
}

impl CosmosRestSource {
    pub fn new(
        base_url: impl Into<String>,
        tracked_addresses: Vec<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tracked_addresses,
            page_limit: DEFAULT_PAGE_LIMIT,
        })
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Connectivity(format!("GET {}: {}", url, e)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(SourceError::Connectivity(format!("GET {} returned {}", url, status)));
        }
        if !status.is_success() {
            return Err(SourceError::InvalidResponse(format!(
                "GET {} returned {}",
                url, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Connectivity(format!("GET {}: {}", url, e)))?;
        serde_json::from_str(&body)
            .map_err(|e| SourceError::InvalidResponse(format!("GET {}: {}", url, e)))
    }

    /// Follow `pagination.next_key` until the endpoint reports no further page
    async fn get_all<P: Paged>(&self, path: &str) -> Result<Vec<P::Item>, SourceError> {
        let mut items = Vec::new();
        let mut key: Option<String> = None;
        loop {
            let mut query = vec![("pagination.limit", self.page_limit.to_string())];
            if let Some(k) = &key {
                query.push(("pagination.key", k.clone()));
            }
            let page: P = self.get_json(path, &query).await?;
            let (mut page_items, next) = page.into_page();
            items.append(&mut page_items);
            match next.filter(|k| !k.is_empty()) {
                Some(next) if key.as_ref() != Some(&next) => key = Some(next),
                _ => break,
            }
        }
        Ok(items)
    }

    async fn bank_events(&self, chain: &str, module: &str) -> Result<Vec<RawStateEvent>, SourceError> {
        let supply = self.get_all::<SupplyPage>(SUPPLY_PATH).await?;
        let mut events = supply_events(chain, module, &supply);
        for address in &self.tracked_addresses {
            let path = format!("/cosmos/bank/v1beta1/balances/{}", address);
            let balances = self.get_all::<BalancesPage>(&path).await?;
            events.extend(balance_events(chain, module, address, &balances));
        }
        Ok(events)
    }

    async fn staking_events(
        &self,
        chain: &str,
        module: &str,
    ) -> Result<Vec<RawStateEvent>, SourceError> {
        let validators = self.get_all::<ValidatorsPage>(VALIDATORS_PATH).await?;
        let mut events = validator_events(chain, module, &validators);
        if self.tracked_addresses.is_empty() {
            return Ok(events);
        }

        let params: StakingParamsResponse = self.get_json(STAKING_PARAMS_PATH, &[]).await?;
        for address in &self.tracked_addresses {
            let path = format!("/cosmos/staking/v1beta1/delegations/{}", address);
            let delegations = self.get_all::<DelegationsPage>(&path).await?;
            events.extend(delegation_events(chain, module, &delegations));

            let path = format!(
                "/cosmos/staking/v1beta1/delegators/{}/unbonding_delegations",
                address
            );
            let unbonding = self.get_all::<UnbondingPage>(&path).await?;
            events.extend(unbonding_events(
                chain,
                module,
                &params.params.bond_denom,
                &unbonding,
            )?);
        }
        Ok(events)
    }

    async fn gov_events(&self, chain: &str, module: &str) -> Result<Vec<RawStateEvent>, SourceError> {
        let proposals = self.get_all::<ProposalsPage>(PROPOSALS_PATH).await?;
        Ok(proposal_events(chain, module, &proposals))
    }
}

#[async_trait::async_trait]
impl SourceAdapter for CosmosRestSource {
    async fn latest_height(&self, _chain: &str) -> Result<Height, SourceError> {
        let latest: LatestBlockResponse = self.get_json(LATEST_BLOCK_PATH, &[]).await?;
        latest.height()
    }

    async fn fetch_module_state(
        &self,
        chain: &str,
        module: &str,
    ) -> Result<Vec<RawStateEvent>, SourceError> {
        match module {
            "bank" => self.bank_events(chain, module).await,
            "staking" => self.staking_events(chain, module).await,
            "gov" | "governance" => self.gov_events(chain, module).await,
            _ => {
                debug!(
                    "[{}] REST source has no query for module {}, nothing fetched",
                    chain, module
                );
                Ok(Vec::new())
            }
        }
    }
}

// ============================================================================
// LCD response shapes
// ============================================================================

trait Paged: DeserializeOwned {
    type Item;

    fn into_page(self) -> (Vec<Self::Item>, Option<String>);
}

#[derive(Debug, Default, Deserialize)]
struct Pagination {
    #[serde(default)]
    next_key: Option<String>,
}

macro_rules! paged_response {
    ($name:ident, $field:ident, $item:ty) => {
        #[derive(Debug, Deserialize)]
        struct $name {
            #[serde(default)]
            $field: Vec<$item>,
            #[serde(default)]
            pagination: Option<Pagination>,
        }

        impl Paged for $name {
            type Item = $item;

            fn into_page(self) -> (Vec<$item>, Option<String>) {
                (self.$field, self.pagination.and_then(|p| p.next_key))
            }
        }
    };
}

paged_response!(SupplyPage, supply, Coin);
paged_response!(BalancesPage, balances, Coin);
paged_response!(ValidatorsPage, validators, LcdValidator);
paged_response!(DelegationsPage, delegation_responses, DelegationResponse);
paged_response!(UnbondingPage, unbonding_responses, LcdUnbonding);
paged_response!(ProposalsPage, proposals, LcdProposal);

#[derive(Debug, Deserialize)]
struct LatestBlockResponse {
    #[serde(default)]
    block: Option<LcdBlock>,
    #[serde(default)]
    sdk_block: Option<LcdBlock>,
}

#[derive(Debug, Deserialize)]
struct LcdBlock {
    header: LcdHeader,
}

#[derive(Debug, Deserialize)]
struct LcdHeader {
    height: String,
}

impl LatestBlockResponse {
    fn height(&self) -> Result<Height, SourceError> {
        let block = self
            .sdk_block
            .as_ref()
            .or(self.block.as_ref())
            .ok_or_else(|| SourceError::InvalidResponse("latest block has no header".into()))?;
        block.header.height.parse().map_err(|_| {
            SourceError::InvalidResponse(format!("invalid block height {:?}", block.header.height))
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
struct Coin {
    denom: String,
    amount: String,
}

#[derive(Debug, Deserialize)]
struct LcdValidator {
    operator_address: String,
    #[serde(default)]
    jailed: bool,
    #[serde(default)]
    status: String,
    #[serde(default)]
    tokens: String,
    #[serde(default)]
    delegator_shares: String,
    #[serde(default)]
    description: LcdDescription,
    #[serde(default)]
    commission: LcdCommission,
}

#[derive(Debug, Default, Deserialize)]
struct LcdDescription {
    #[serde(default)]
    moniker: String,
}

#[derive(Debug, Default, Deserialize)]
struct LcdCommission {
    #[serde(default)]
    commission_rates: LcdCommissionRates,
}

#[derive(Debug, Default, Deserialize)]
struct LcdCommissionRates {
    #[serde(default)]
    rate: String,
}

#[derive(Debug, Deserialize)]
struct DelegationResponse {
    delegation: LcdDelegation,
    balance: Coin,
}

#[derive(Debug, Deserialize)]
struct LcdDelegation {
    delegator_address: String,
    validator_address: String,
    shares: String,
}

#[derive(Debug, Deserialize)]
struct LcdUnbonding {
    delegator_address: String,
    validator_address: String,
    #[serde(default)]
    entries: Vec<LcdUnbondingEntry>,
}

#[derive(Debug, Deserialize)]
struct LcdUnbondingEntry {
    creation_height: String,
    completion_time: String,
    initial_balance: String,
    balance: String,
}

#[derive(Debug, Deserialize)]
struct StakingParamsResponse {
    params: StakingParams,
}

#[derive(Debug, Deserialize)]
struct StakingParams {
    bond_denom: String,
}

#[derive(Debug, Deserialize)]
struct LcdProposal {
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    submit_time: Option<String>,
    #[serde(default)]
    voting_end_time: Option<String>,
    #[serde(default)]
    final_tally_result: Option<LcdTally>,
}

#[derive(Debug, Deserialize)]
struct LcdTally {
    #[serde(default)]
    yes_count: String,
    #[serde(default)]
    abstain_count: String,
    #[serde(default)]
    no_count: String,
    #[serde(default)]
    no_with_veto_count: String,
}

// ============================================================================
// Event building
// ============================================================================

fn zero_if_empty(value: &str) -> &str {
    if value.is_empty() {
        "0"
    } else {
        value
    }
}

fn supply_events(chain: &str, module: &str, supply: &[Coin]) -> Vec<RawStateEvent> {
    supply
        .iter()
        .map(|coin| {
            RawStateEvent::new(
                chain,
                module,
                format!("supply/{}", coin.denom),
                coin.amount.as_bytes(),
                0,
            )
        })
        .collect()
}

fn balance_events(chain: &str, module: &str, address: &str, balances: &[Coin]) -> Vec<RawStateEvent> {
    balances
        .iter()
        .map(|coin| {
            RawStateEvent::new(
                chain,
                module,
                format!("balances/{}/{}", address, coin.denom),
                coin.amount.as_bytes(),
                0,
            )
        })
        .collect()
}

fn validator_events(chain: &str, module: &str, validators: &[LcdValidator]) -> Vec<RawStateEvent> {
    validators
        .iter()
        .map(|v| {
            let value = json!({
                "moniker": v.description.moniker,
                "status": v.status,
                "jailed": v.jailed,
                "tokens": zero_if_empty(&v.tokens),
                "delegator_shares": v.delegator_shares,
                "commission_rate": v.commission.commission_rates.rate,
            });
            RawStateEvent::new(
                chain,
                module,
                format!("validators/{}", v.operator_address),
                value.to_string(),
                0,
            )
        })
        .collect()
}

fn delegation_events(
    chain: &str,
    module: &str,
    delegations: &[DelegationResponse],
) -> Vec<RawStateEvent> {
    delegations
        .iter()
        .map(|d| {
            let value = json!({
                "shares": d.delegation.shares,
                "amount": d.balance.amount,
                "denom": d.balance.denom,
            });
            RawStateEvent::new(
                chain,
                module,
                format!(
                    "delegations/{}/{}",
                    d.delegation.delegator_address, d.delegation.validator_address
                ),
                value.to_string(),
                0,
            )
        })
        .collect()
}

fn unbonding_events(
    chain: &str,
    module: &str,
    bond_denom: &str,
    unbonding: &[LcdUnbonding],
) -> Result<Vec<RawStateEvent>, SourceError> {
    unbonding
        .iter()
        .map(|u| {
            let entries = u
                .entries
                .iter()
                .map(|e| {
                    let creation_height: Height = e.creation_height.parse().map_err(|_| {
                        SourceError::InvalidResponse(format!(
                            "invalid unbonding creation height {:?}",
                            e.creation_height
                        ))
                    })?;
                    Ok(json!({
                        "creation_height": creation_height,
                        "completion_time": e.completion_time,
                        "initial_balance": e.initial_balance,
                        "balance": e.balance,
                    }))
                })
                .collect::<Result<Vec<_>, SourceError>>()?;
            let value = json!({ "denom": bond_denom, "entries": entries });
            Ok(RawStateEvent::new(
                chain,
                module,
                format!("unbonding/{}/{}", u.delegator_address, u.validator_address),
                value.to_string(),
                0,
            ))
        })
        .collect()
}

fn proposal_events(chain: &str, module: &str, proposals: &[LcdProposal]) -> Vec<RawStateEvent> {
    proposals
        .iter()
        .map(|p| {
            let tally = p.final_tally_result.as_ref().map(|t| {
                json!({
                    "yes": zero_if_empty(&t.yes_count),
                    "no": zero_if_empty(&t.no_count),
                    "abstain": zero_if_empty(&t.abstain_count),
                    "no_with_veto": zero_if_empty(&t.no_with_veto_count),
                })
            });
            let value = json!({
                "title": p.title,
                "status": p.status,
                "submit_time": p.submit_time,
                "voting_end_time": p.voting_end_time,
                "tally": tally,
            });
            RawStateEvent::new(
                chain,
                module,
                format!("proposals/{}", p.id),
                value.to_string(),
                0,
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::extract::Query;
    use axum::routing::get;
    use axum::{Json, Router};
    use chainstate_ingest::decoder::DecoderRegistry;
    use chainstate_ingest::types::NormalizedRecord;
    use std::collections::HashMap;

    fn decode_all(events: &[RawStateEvent]) -> Vec<NormalizedRecord> {
        let registry = DecoderRegistry::with_defaults();
        events
            .iter()
            .map(|e| registry.decode(&e.module, e).unwrap().unwrap())
            .collect()
    }

    #[test]
    fn test_latest_height_prefers_sdk_block() {
        let body = r#"{
            "block": {"header": {"height": "19000000"}},
            "sdk_block": {"header": {"height": "19000001"}}
        }"#;
        let latest: LatestBlockResponse = serde_json::from_str(body).unwrap();
        assert_eq!(latest.height().unwrap(), 19_000_001);

        let legacy: LatestBlockResponse =
            serde_json::from_str(r#"{"block": {"header": {"height": "42"}}}"#).unwrap();
        assert_eq!(legacy.height().unwrap(), 42);

        let bad: LatestBlockResponse =
            serde_json::from_str(r#"{"block": {"header": {"height": "abc"}}}"#).unwrap();
        assert_matches!(bad.height(), Err(SourceError::InvalidResponse(_)));
    }

    #[test]
    fn test_bank_events_decode() {
        let page: BalancesPage = serde_json::from_str(
            r#"{"balances": [
                {"denom": "uatom", "amount": "1000000"},
                {"denom": "ibc/27394FB092D2ECCD56123C74F36E4C1F926001CEADA9CA97EA622B25F41E5EB2", "amount": "5"}
            ], "pagination": {"next_key": null, "total": "2"}}"#,
        )
        .unwrap();
        let (coins, next) = page.into_page();
        assert_eq!(next, None);

        let events = balance_events("cosmoshub", "bank", "addrX", &coins);
        let records = decode_all(&events);
        assert_matches!(&records[0], NormalizedRecord::Balance(b) if b.denom == "uatom" && b.amount.to_string() == "1000000");
        assert_matches!(&records[1], NormalizedRecord::Balance(b) if b.denom.starts_with("ibc/"));
    }

    #[test]
    fn test_staking_events_decode() {
        let validators: ValidatorsPage = serde_json::from_str(
            r#"{"validators": [{
                "operator_address": "cosmosvaloper1abc",
                "jailed": false,
                "status": "BOND_STATUS_BONDED",
                "tokens": "2500000",
                "delegator_shares": "2500000.000000000000000000",
                "description": {"moniker": "Validator Y"},
                "commission": {"commission_rates": {"rate": "0.050000000000000000"}}
            }]}"#,
        )
        .unwrap();
        let (validators, _) = validators.into_page();
        let records = decode_all(&validator_events("cosmoshub", "staking", &validators));
        assert_matches!(&records[0], NormalizedRecord::Validator(v)
            if v.moniker == "Validator Y" && v.tokens.to_string() == "2500000");

        let delegations: DelegationsPage = serde_json::from_str(
            r#"{"delegation_responses": [{
                "delegation": {
                    "delegator_address": "addrX",
                    "validator_address": "cosmosvaloper1abc",
                    "shares": "2500000.000000000000000000"
                },
                "balance": {"denom": "uatom", "amount": "2500000"}
            }]}"#,
        )
        .unwrap();
        let (delegations, _) = delegations.into_page();
        let records = decode_all(&delegation_events("cosmoshub", "staking", &delegations));
        assert_matches!(&records[0], NormalizedRecord::Delegation(d)
            if d.denom == "uatom" && d.amount.to_string() == "2500000");

        let unbonding: UnbondingPage = serde_json::from_str(
            r#"{"unbonding_responses": [{
                "delegator_address": "addrX",
                "validator_address": "cosmosvaloper1abc",
                "entries": [{
                    "creation_height": "18000000",
                    "completion_time": "2025-03-01T00:00:00Z",
                    "initial_balance": "300",
                    "balance": "300"
                }]
            }]}"#,
        )
        .unwrap();
        let (unbonding, _) = unbonding.into_page();
        let events = unbonding_events("cosmoshub", "staking", "uatom", &unbonding).unwrap();
        let records = decode_all(&events);
        assert_matches!(&records[0], NormalizedRecord::Unbonding(u)
            if u.denom == "uatom" && u.total_balance().to_string() == "300");
    }

    #[test]
    fn test_unbonding_with_bad_height_is_invalid() {
        let unbonding = vec![LcdUnbonding {
            delegator_address: "d".into(),
            validator_address: "v".into(),
            entries: vec![LcdUnbondingEntry {
                creation_height: "soon".into(),
                completion_time: "2025-03-01T00:00:00Z".into(),
                initial_balance: "1".into(),
                balance: "1".into(),
            }],
        }];
        assert_matches!(
            unbonding_events("osmosis", "staking", "uosmo", &unbonding),
            Err(SourceError::InvalidResponse(_))
        );
    }

    #[test]
    fn test_proposal_events_decode() {
        let page: ProposalsPage = serde_json::from_str(
            r#"{"proposals": [{
                "id": "7",
                "title": "Upgrade v15",
                "status": "PROPOSAL_STATUS_PASSED",
                "submit_time": "2025-01-01T00:00:00Z",
                "voting_end_time": "2025-01-15T00:00:00Z",
                "final_tally_result": {"yes_count": "100", "abstain_count": "", "no_count": "3", "no_with_veto_count": "0"}
            }]}"#,
        )
        .unwrap();
        let (proposals, _) = page.into_page();
        let records = decode_all(&proposal_events("cosmoshub", "gov", &proposals));
        match &records[0] {
            NormalizedRecord::Proposal(p) => {
                assert_eq!(p.proposal_id, 7);
                let tally = p.tally.as_ref().unwrap();
                assert_eq!(tally.yes.to_string(), "100");
                assert_eq!(tally.abstain.to_string(), "0");
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    // ------------------------------------------------------------------------
    // HTTP round trips against a local LCD stand-in
    // ------------------------------------------------------------------------

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn paged_supply(Query(params): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        match params.get("pagination.key").map(String::as_str) {
            None => Json(json!({
                "supply": [{"denom": "uatom", "amount": "1000"}],
                "pagination": {"next_key": "cGFnZTI="}
            })),
            Some(_) => Json(json!({
                "supply": [{"denom": "uosmo", "amount": "2000"}],
                "pagination": {"next_key": null}
            })),
        }
    }

    #[tokio::test]
    async fn test_fetch_follows_pagination() {
        let router = Router::new()
            .route(SUPPLY_PATH, get(paged_supply))
            .route(
                "/cosmos/bank/v1beta1/balances/:address",
                get(|| async { Json(json!({"balances": [{"denom": "uatom", "amount": "7"}]})) }),
            )
            .route(
                LATEST_BLOCK_PATH,
                get(|| async { Json(json!({"sdk_block": {"header": {"height": "101"}}})) }),
            );
        let base = serve(router).await;
        let source =
            CosmosRestSource::new(&base, vec!["addrX".to_string()], Duration::from_secs(5))
                .unwrap()
                .with_page_limit(1);

        assert_eq!(source.latest_height("cosmoshub").await.unwrap(), 101);
        let events = source.fetch_module_state("cosmoshub", "bank").await.unwrap();
        let keys: Vec<String> = events.iter().map(RawStateEvent::key_display).collect();
        assert_eq!(keys, vec!["supply/uatom", "supply/uosmo", "balances/addrX/uatom"]);
        assert!(events.iter().all(|e| e.height == 0 && e.chain == "cosmoshub"));

        // Modules without a REST query produce nothing
        assert!(source
            .fetch_module_state("cosmoshub", "distribution")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_error_classification() {
        let router = Router::new()
            .route(
                LATEST_BLOCK_PATH,
                get(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "syncing") }),
            )
            .route(SUPPLY_PATH, get(|| async { "not json" }))
            .route(
                VALIDATORS_PATH,
                get(|| async { (axum::http::StatusCode::NOT_FOUND, "no route") }),
            );
        let base = serve(router).await;
        let source = CosmosRestSource::new(&base, vec![], Duration::from_secs(5)).unwrap();

        assert_matches!(
            source.latest_height("osmosis").await,
            Err(SourceError::Connectivity(_))
        );
        assert_matches!(
            source.fetch_module_state("osmosis", "bank").await,
            Err(SourceError::InvalidResponse(_))
        );
        assert_matches!(
            source.fetch_module_state("osmosis", "staking").await,
            Err(SourceError::InvalidResponse(_))
        );
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_connectivity() {
        // Port 9 (discard) is not expected to be listening on loopback
        let source =
            CosmosRestSource::new("http://127.0.0.1:9", vec![], Duration::from_secs(2)).unwrap();
        let err = source.latest_height("osmosis").await.unwrap_err();
        assert!(err.is_connectivity(), "{:?}", err);
    }
}
