// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{json_value, key_str, split_exact, DecodeResult, ModuleDecoder};
use crate::types::{
    Amount, DelegationRecord, NormalizedRecord, RawStateEvent, UnbondingEntry, UnbondingRecord,
    ValidatorRecord, DEFAULT_BOND_DENOM,
};
use serde::Deserialize;

const MODULE: &str = "staking";
const VALIDATORS_PREFIX: &str = "validators/";
const DELEGATIONS_PREFIX: &str = "delegations/";
const UNBONDING_PREFIX: &str = "unbonding/";

#[derive(Deserialize)]
struct ValidatorPayload {
    #[serde(default)]
    moniker: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    jailed: bool,
    #[serde(default)]
    tokens: Amount,
    #[serde(default)]
    delegator_shares: String,
    #[serde(default)]
    commission_rate: String,
}

#[derive(Deserialize)]
struct DelegationPayload {
    shares: String,
    amount: Amount,
    #[serde(default = "default_denom")]
    denom: String,
}

#[derive(Deserialize)]
struct UnbondingPayload {
    #[serde(default = "default_denom")]
    denom: String,
    #[serde(default)]
    entries: Vec<UnbondingEntry>,
}

fn default_denom() -> String {
    DEFAULT_BOND_DENOM.to_string()
}

/// Validators, delegations and unbonding delegations.
///
/// A deleted delegation decodes to a zero-share record and a deleted unbonding
/// to an empty entry list, so the removal is visible at its height. Deletes carry
/// no payload, so their denom is left empty for the store to keep the stored one.
/// Validators are never deleted on chain; a delete for one is ignored.
pub struct StakingDecoder;

impl ModuleDecoder for StakingDecoder {
    fn decode(&self, event: &RawStateEvent) -> DecodeResult {
        let key = key_str(MODULE, event)?;

        if let Some(rest) = key.strip_prefix(VALIDATORS_PREFIX) {
            let [operator] = split_exact::<1>(MODULE, key, rest)?;
            if event.delete {
                return Ok(None);
            }
            let payload: ValidatorPayload = json_value(MODULE, key, &event.value)?;
            return Ok(Some(NormalizedRecord::Validator(ValidatorRecord {
                chain: event.chain.clone(),
                operator_address: operator.to_string(),
                moniker: payload.moniker,
                status: payload.status,
                jailed: payload.jailed,
                tokens: payload.tokens,
                delegator_shares: payload.delegator_shares,
                commission_rate: payload.commission_rate,
                height: event.height,
            })));
        }

        if let Some(rest) = key.strip_prefix(DELEGATIONS_PREFIX) {
            let [delegator, validator] = split_exact::<2>(MODULE, key, rest)?;
            let payload = if event.delete {
                DelegationPayload {
                    shares: "0".to_string(),
                    amount: Amount::zero(),
                    denom: String::new(),
                }
            } else {
                json_value(MODULE, key, &event.value)?
            };
            return Ok(Some(NormalizedRecord::Delegation(DelegationRecord {
                chain: event.chain.clone(),
                delegator: delegator.to_string(),
                validator: validator.to_string(),
                denom: payload.denom,
                shares: payload.shares,
                amount: payload.amount,
                height: event.height,
            })));
        }

        if let Some(rest) = key.strip_prefix(UNBONDING_PREFIX) {
            let [delegator, validator] = split_exact::<2>(MODULE, key, rest)?;
            let payload = if event.delete {
                UnbondingPayload {
                    denom: String::new(),
                    entries: Vec::new(),
                }
            } else {
                json_value(MODULE, key, &event.value)?
            };
            return Ok(Some(NormalizedRecord::Unbonding(UnbondingRecord {
                chain: event.chain.clone(),
                delegator: delegator.to_string(),
                validator: validator.to_string(),
                denom: payload.denom,
                entries: payload.entries,
                height: event.height,
            })));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;
    use assert_matches::assert_matches;

    fn decode(key: &str, value: &str) -> DecodeResult {
        StakingDecoder.decode(&RawStateEvent::new("osmosis", "staking", key, value, 500))
    }

    #[test]
    fn test_delegation() {
        let value = r#"{"shares":"2500000.000000000000000000","amount":"2500000","denom":"uosmo"}"#;
        let record = decode("delegations/addrX/valoperY", value).unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Delegation(d) => {
            assert_eq!(d.delegator, "addrX");
            assert_eq!(d.validator, "valoperY");
            assert_eq!(d.denom, "uosmo");
            assert_eq!(d.amount.to_string(), "2500000");
            assert_eq!(d.shares, "2500000.000000000000000000");
            assert_eq!(d.height, 500);
        });
    }

    #[test]
    fn test_delegation_denom_defaults_to_bond_denom() {
        let record = decode("delegations/a/v", r#"{"shares":"1","amount":"1"}"#)
            .unwrap()
            .unwrap();
        assert_matches!(record, NormalizedRecord::Delegation(d) => assert_eq!(d.denom, DEFAULT_BOND_DENOM));
    }

    #[test]
    fn test_deleted_delegation_is_zeroed() {
        let event = RawStateEvent::deletion("osmosis", "staking", "delegations/a/v", 501);
        let record = StakingDecoder.decode(&event).unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Delegation(d) => {
            assert!(d.amount.is_zero());
            assert_eq!(d.shares, "0");
            assert!(d.denom.is_empty());
            assert_eq!(d.height, 501);
        });
    }

    #[test]
    fn test_validator_with_partial_payload() {
        let record = decode(
            "validators/valoperY",
            r#"{"moniker":"Y","status":"BOND_STATUS_BONDED","tokens":"9000"}"#,
        )
        .unwrap()
        .unwrap();
        assert_matches!(record, NormalizedRecord::Validator(v) => {
            assert_eq!(v.operator_address, "valoperY");
            assert_eq!(v.moniker, "Y");
            assert!(!v.jailed);
            assert_eq!(v.tokens.to_string(), "9000");
            assert_eq!(v.commission_rate, "");
        });
    }

    #[test]
    fn test_validator_delete_is_ignored() {
        let event = RawStateEvent::deletion("osmosis", "staking", "validators/valoperY", 9);
        assert_eq!(StakingDecoder.decode(&event), Ok(None));
    }

    #[test]
    fn test_unbonding_entries() {
        let value = r#"{"denom":"uosmo","entries":[
            {"creation_height":480,"completion_time":"2025-02-01T00:00:00Z","initial_balance":"100","balance":"90"},
            {"creation_height":490,"completion_time":"2025-02-02T00:00:00Z","initial_balance":"10","balance":"10"}
        ]}"#;
        let record = decode("unbonding/addrX/valoperY", value).unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Unbonding(u) => {
            assert_eq!(u.entries.len(), 2);
            assert_eq!(u.total_balance().to_string(), "100");
        });
    }

    #[test]
    fn test_deleted_unbonding_has_no_entries() {
        let event = RawStateEvent::deletion("osmosis", "staking", "unbonding/a/v", 7);
        let record = StakingDecoder.decode(&event).unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Unbonding(u) => assert!(u.entries.is_empty()));
    }

    // ------------------------------------------------------------------------
    // Malformed input
    // ------------------------------------------------------------------------

    #[test]
    fn test_wrong_segment_count_is_malformed_key() {
        for key in ["delegations/addrX", "delegations/a/b/c", "unbonding/a/", "validators/"] {
            assert_matches!(
                decode(key, "{}"),
                Err(DecodeError::MalformedKey { .. }),
                "key {}",
                key
            );
        }
    }

    #[test]
    fn test_bad_json_is_malformed_value() {
        assert_matches!(
            decode("delegations/a/v", "not json"),
            Err(DecodeError::MalformedValue { .. })
        );
        assert_matches!(
            decode("delegations/a/v", r#"{"shares":"1","amount":"-1"}"#),
            Err(DecodeError::MalformedValue { .. })
        );
    }

    #[test]
    fn test_unknown_prefix_is_ignored() {
        assert_eq!(decode("params", "{}"), Ok(None));
    }
}
