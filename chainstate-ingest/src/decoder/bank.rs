// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{key_str, DecodeResult, ModuleDecoder};
use crate::error::DecodeError;
use crate::types::{Amount, BalanceRecord, NormalizedRecord, RawStateEvent, SupplyRecord};

const MODULE: &str = "bank";
const BALANCES_PREFIX: &str = "balances/";
const SUPPLY_PREFIX: &str = "supply/";

/// Balances and total supply. A deleted balance is stored as zero.
pub struct BankDecoder;

impl ModuleDecoder for BankDecoder {
    fn decode(&self, event: &RawStateEvent) -> DecodeResult {
        let key = key_str(MODULE, event)?;

        if let Some(rest) = key.strip_prefix(BALANCES_PREFIX) {
            // Denoms may contain '/' (e.g. ibc/...), addresses never do.
            let (address, denom) = rest
                .split_once('/')
                .filter(|(a, d)| !a.is_empty() && !d.is_empty())
                .ok_or_else(|| {
                    DecodeError::malformed_key(MODULE, key, "expected balances/{address}/{denom}")
                })?;
            let amount = amount_value(key, event)?;
            return Ok(Some(NormalizedRecord::Balance(BalanceRecord {
                chain: event.chain.clone(),
                address: address.to_string(),
                denom: denom.to_string(),
                amount,
                height: event.height,
            })));
        }

        if let Some(denom) = key.strip_prefix(SUPPLY_PREFIX) {
            if denom.is_empty() {
                return Err(DecodeError::malformed_key(
                    MODULE,
                    key,
                    "expected supply/{denom}",
                ));
            }
            let amount = amount_value(key, event)?;
            return Ok(Some(NormalizedRecord::Supply(SupplyRecord {
                chain: event.chain.clone(),
                denom: denom.to_string(),
                amount,
                height: event.height,
            })));
        }

        Ok(None)
    }
}

fn amount_value(key: &str, event: &RawStateEvent) -> Result<Amount, DecodeError> {
    if event.delete {
        return Ok(Amount::zero());
    }
    let raw = std::str::from_utf8(&event.value)
        .map_err(|_| DecodeError::malformed_value(MODULE, key, "amount is not UTF-8"))?;
    raw.parse::<Amount>()
        .map_err(|e| DecodeError::malformed_value(MODULE, key, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn decode(key: &str, value: &str) -> DecodeResult {
        BankDecoder.decode(&RawStateEvent::new("cosmoshub", "bank", key, value, 101))
    }

    #[test]
    fn test_balance() {
        let record = decode("balances/addrX/uatom", "1000000").unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Balance(b) => {
            assert_eq!(b.chain, "cosmoshub");
            assert_eq!(b.address, "addrX");
            assert_eq!(b.denom, "uatom");
            assert_eq!(b.amount.to_string(), "1000000");
            assert_eq!(b.height, 101);
        });
    }

    #[test]
    fn test_ibc_denom_keeps_slashes() {
        let record = decode("balances/addrX/ibc/27394FB092D2ECCD", "7").unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Balance(b) => {
            assert_eq!(b.address, "addrX");
            assert_eq!(b.denom, "ibc/27394FB092D2ECCD");
        });
    }

    #[test]
    fn test_amount_beyond_u64() {
        let big = "123456789012345678901234567890";
        let record = decode("balances/a/uatom", big).unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Balance(b) => assert_eq!(b.amount.to_string(), big));
    }

    #[test]
    fn test_delete_becomes_zero() {
        let event = RawStateEvent::deletion("cosmoshub", "bank", "balances/addrX/uatom", 102);
        let record = BankDecoder.decode(&event).unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Balance(b) => assert!(b.amount.is_zero()));
    }

    #[test]
    fn test_supply() {
        let record = decode("supply/uatom", "390000000000000").unwrap().unwrap();
        assert_matches!(record, NormalizedRecord::Supply(s) => {
            assert_eq!(s.denom, "uatom");
            assert_eq!(s.amount.to_string(), "390000000000000");
        });
    }

    // ------------------------------------------------------------------------
    // Malformed input
    // ------------------------------------------------------------------------

    #[test]
    fn test_short_balance_key_is_malformed_key() {
        for key in ["balances/addrX", "balances/addrX/", "balances//uatom", "supply/"] {
            assert_matches!(
                decode(key, "1"),
                Err(DecodeError::MalformedKey { .. }),
                "key {}",
                key
            );
        }
    }

    #[test]
    fn test_bad_amount_is_malformed_value() {
        assert_matches!(
            decode("balances/a/uatom", "12.5"),
            Err(DecodeError::MalformedValue { .. })
        );
        assert_matches!(
            decode("balances/a/uatom", ""),
            Err(DecodeError::MalformedValue { .. })
        );
    }

    #[test]
    fn test_unknown_prefix_is_ignored() {
        assert_eq!(decode("denom_metadata/uatom", "{}"), Ok(None));
    }
}
