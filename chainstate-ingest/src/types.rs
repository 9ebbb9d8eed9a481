// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Core data model shared by the ingestion pipeline, the store and the query surface

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::AddAssign;
use std::str::FromStr;

/// Block height on a single chain
pub type Height = u64;

/// Bond denomination assumed when a delegation payload does not name one
pub const DEFAULT_BOND_DENOM: &str = "stake";

// ============================================================================
// Amount
// ============================================================================

/// Arbitrary-precision, non-negative token quantity.
///
/// Amounts cross every boundary (wire, database, HTTP) as decimal strings and are
/// summed with exact big-integer arithmetic.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(BigUint);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid amount {0:?}: expected a non-negative decimal integer")]
pub struct AmountParseError(pub String);

impl Amount {
    pub fn zero() -> Self {
        Self(BigUint::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl From<u64> for Amount {
    fn from(v: u64) -> Self {
        Self(BigUint::from(v))
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // BigUint parsing tolerates '+' and '_', which are not valid token amounts.
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError(s.to_string()));
        }
        BigUint::parse_bytes(trimmed.as_bytes(), 10)
            .map(Amount)
            .ok_or_else(|| AmountParseError(s.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AddAssign<&Amount> for Amount {
    fn add_assign(&mut self, rhs: &Amount) {
        self.0 += &rhs.0;
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.fold(Amount::zero(), |mut acc, a| {
            acc += a;
            acc
        })
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Raw events
// ============================================================================

/// A raw state change as produced by a source adapter. Discarded after decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawStateEvent {
    pub chain: String,
    /// Module / store key, e.g. `bank` or `staking`
    pub module: String,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub delete: bool,
    /// Height the change was observed at; 0 when the adapter does not know it
    pub height: Height,
}

impl RawStateEvent {
    pub fn new(
        chain: impl Into<String>,
        module: impl Into<String>,
        key: impl Into<Vec<u8>>,
        value: impl Into<Vec<u8>>,
        height: Height,
    ) -> Self {
        Self {
            chain: chain.into(),
            module: module.into(),
            key: key.into(),
            value: value.into(),
            delete: false,
            height,
        }
    }

    pub fn deletion(
        chain: impl Into<String>,
        module: impl Into<String>,
        key: impl Into<Vec<u8>>,
        height: Height,
    ) -> Self {
        Self {
            delete: true,
            ..Self::new(chain, module, key, Vec::new(), height)
        }
    }

    /// Key rendered for logs; non UTF-8 keys are hex encoded
    pub fn key_display(&self) -> String {
        match std::str::from_utf8(&self.key) {
            Ok(s) => s.to_string(),
            Err(_) => hex::encode(&self.key),
        }
    }
}

// ============================================================================
// Normalized records
// ============================================================================

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    strum_macros::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RecordKind {
    Balance,
    Delegation,
    Validator,
    Unbonding,
    Proposal,
    Vote,
    Supply,
}

/// Identity of a record within one chain, independent of its payload
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum NaturalKey {
    Balance { address: String, denom: String },
    Delegation { delegator: String, validator: String },
    Validator { operator_address: String },
    Unbonding { delegator: String, validator: String },
    Proposal { proposal_id: u64 },
    Vote { proposal_id: u64, voter: String },
    Supply { denom: String },
}

impl NaturalKey {
    pub fn kind(&self) -> RecordKind {
        match self {
            NaturalKey::Balance { .. } => RecordKind::Balance,
            NaturalKey::Delegation { .. } => RecordKind::Delegation,
            NaturalKey::Validator { .. } => RecordKind::Validator,
            NaturalKey::Unbonding { .. } => RecordKind::Unbonding,
            NaturalKey::Proposal { .. } => RecordKind::Proposal,
            NaturalKey::Vote { .. } => RecordKind::Vote,
            NaturalKey::Supply { .. } => RecordKind::Supply,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Balance { address, denom } => write!(f, "{}:{}", address, denom),
            NaturalKey::Delegation {
                delegator,
                validator,
            }
            | NaturalKey::Unbonding {
                delegator,
                validator,
            } => write!(f, "{}:{}", delegator, validator),
            NaturalKey::Validator { operator_address } => write!(f, "{}", operator_address),
            NaturalKey::Proposal { proposal_id } => write!(f, "{}", proposal_id),
            NaturalKey::Vote { proposal_id, voter } => write!(f, "{}:{}", proposal_id, voter),
            NaturalKey::Supply { denom } => write!(f, "{}", denom),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub chain: String,
    pub address: String,
    pub denom: String,
    pub amount: Amount,
    pub height: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub chain: String,
    pub delegator: String,
    pub validator: String,
    pub denom: String,
    /// Delegator shares, a fixed-point decimal kept verbatim
    pub shares: String,
    /// Token value of the shares
    pub amount: Amount,
    pub height: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorRecord {
    pub chain: String,
    pub operator_address: String,
    pub moniker: String,
    pub status: String,
    pub jailed: bool,
    pub tokens: Amount,
    pub delegator_shares: String,
    pub commission_rate: String,
    pub height: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingEntry {
    pub creation_height: Height,
    pub completion_time: String,
    pub initial_balance: Amount,
    pub balance: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnbondingRecord {
    pub chain: String,
    pub delegator: String,
    pub validator: String,
    pub denom: String,
    pub entries: Vec<UnbondingEntry>,
    pub height: Height,
}

impl UnbondingRecord {
    /// Sum of the remaining balance of every entry
    pub fn total_balance(&self) -> Amount {
        self.entries.iter().map(|e| &e.balance).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyResult {
    pub yes: Amount,
    pub no: Amount,
    pub abstain: Amount,
    pub no_with_veto: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalRecord {
    pub chain: String,
    pub proposal_id: u64,
    pub title: String,
    pub status: String,
    pub submit_time: Option<String>,
    pub voting_end_time: Option<String>,
    pub tally: Option<TallyResult>,
    pub height: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub chain: String,
    pub proposal_id: u64,
    pub voter: String,
    pub option: String,
    pub height: Height,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupplyRecord {
    pub chain: String,
    pub denom: String,
    pub amount: Amount,
    pub height: Height,
}

/// A decoded, chain-scoped state record.
///
/// For a given chain and [`NaturalKey`], the stored record only ever moves to a
/// strictly higher height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NormalizedRecord {
    Balance(BalanceRecord),
    Delegation(DelegationRecord),
    Validator(ValidatorRecord),
    Unbonding(UnbondingRecord),
    Proposal(ProposalRecord),
    Vote(VoteRecord),
    Supply(SupplyRecord),
}

impl NormalizedRecord {
    pub fn chain(&self) -> &str {
        match self {
            NormalizedRecord::Balance(r) => &r.chain,
            NormalizedRecord::Delegation(r) => &r.chain,
            NormalizedRecord::Validator(r) => &r.chain,
            NormalizedRecord::Unbonding(r) => &r.chain,
            NormalizedRecord::Proposal(r) => &r.chain,
            NormalizedRecord::Vote(r) => &r.chain,
            NormalizedRecord::Supply(r) => &r.chain,
        }
    }

    pub fn height(&self) -> Height {
        match self {
            NormalizedRecord::Balance(r) => r.height,
            NormalizedRecord::Delegation(r) => r.height,
            NormalizedRecord::Validator(r) => r.height,
            NormalizedRecord::Unbonding(r) => r.height,
            NormalizedRecord::Proposal(r) => r.height,
            NormalizedRecord::Vote(r) => r.height,
            NormalizedRecord::Supply(r) => r.height,
        }
    }

    pub fn kind(&self) -> RecordKind {
        match self {
            NormalizedRecord::Balance(_) => RecordKind::Balance,
            NormalizedRecord::Delegation(_) => RecordKind::Delegation,
            NormalizedRecord::Validator(_) => RecordKind::Validator,
            NormalizedRecord::Unbonding(_) => RecordKind::Unbonding,
            NormalizedRecord::Proposal(_) => RecordKind::Proposal,
            NormalizedRecord::Vote(_) => RecordKind::Vote,
            NormalizedRecord::Supply(_) => RecordKind::Supply,
        }
    }

    pub fn natural_key(&self) -> NaturalKey {
        match self {
            NormalizedRecord::Balance(r) => NaturalKey::Balance {
                address: r.address.clone(),
                denom: r.denom.clone(),
            },
            NormalizedRecord::Delegation(r) => NaturalKey::Delegation {
                delegator: r.delegator.clone(),
                validator: r.validator.clone(),
            },
            NormalizedRecord::Validator(r) => NaturalKey::Validator {
                operator_address: r.operator_address.clone(),
            },
            NormalizedRecord::Unbonding(r) => NaturalKey::Unbonding {
                delegator: r.delegator.clone(),
                validator: r.validator.clone(),
            },
            NormalizedRecord::Proposal(r) => NaturalKey::Proposal {
                proposal_id: r.proposal_id,
            },
            NormalizedRecord::Vote(r) => NaturalKey::Vote {
                proposal_id: r.proposal_id,
                voter: r.voter.clone(),
            },
            NormalizedRecord::Supply(r) => NaturalKey::Supply {
                denom: r.denom.clone(),
            },
        }
    }

    /// Denomination of amount-carrying records
    pub fn denom(&self) -> Option<&str> {
        match self {
            NormalizedRecord::Balance(r) => Some(&r.denom),
            NormalizedRecord::Delegation(r) => Some(&r.denom),
            NormalizedRecord::Unbonding(r) => Some(&r.denom),
            NormalizedRecord::Supply(r) => Some(&r.denom),
            _ => None,
        }
    }

    /// Delegation or unbonding without a denom. Deletes decode this way.
    pub fn missing_denom(&self) -> bool {
        self.denom().is_some_and(str::is_empty)
    }

    /// Set the denom of a delegation or unbonding that has none
    pub fn fill_missing_denom(&mut self, denom: &str) {
        match self {
            NormalizedRecord::Delegation(r) if r.denom.is_empty() => r.denom = denom.to_string(),
            NormalizedRecord::Unbonding(r) if r.denom.is_empty() => r.denom = denom.to_string(),
            _ => {}
        }
    }

    /// Account address this record belongs to, if any
    pub fn account(&self) -> Option<&str> {
        match self {
            NormalizedRecord::Balance(r) => Some(&r.address),
            NormalizedRecord::Delegation(r) => Some(&r.delegator),
            NormalizedRecord::Unbonding(r) => Some(&r.delegator),
            NormalizedRecord::Vote(r) => Some(&r.voter),
            _ => None,
        }
    }
}

// ============================================================================
// Cursors and views
// ============================================================================

/// Last committed height of one chain. Only the commit path moves it, and only forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainCursor {
    pub chain: String,
    pub height: Height,
    pub updated_at: DateTime<Utc>,
}

/// One account on one chain, materialized from the store on read
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountState {
    pub chain: String,
    pub address: String,
    /// Ordered by denom
    pub balances: Vec<BalanceRecord>,
    /// Ordered by validator
    pub delegations: Vec<DelegationRecord>,
    /// Ordered by validator
    pub unbonding: Vec<UnbondingRecord>,
}

impl AccountState {
    pub fn empty(chain: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            chain: chain.into(),
            address: address.into(),
            balances: Vec::new(),
            delegations: Vec::new(),
            unbonding: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty() && self.delegations.is_empty() && self.unbonding.is_empty()
    }

    /// Restore the documented ordering after records were gathered from an unordered source
    pub fn sort(&mut self) {
        self.balances.sort_by(|a, b| a.denom.cmp(&b.denom));
        self.delegations
            .sort_by(|a, b| a.validator.cmp(&b.validator));
        self.unbonding.sort_by(|a, b| a.validator.cmp(&b.validator));
    }
}

/// Per-denomination totals split by where the tokens sit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotalsBreakdown {
    pub balance: BTreeMap<String, Amount>,
    pub delegated: BTreeMap<String, Amount>,
    pub unbonding: BTreeMap<String, Amount>,
}

/// Merged view of one address across several chains. Built per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossChainAccountState {
    pub address: String,
    /// Chains that answered
    pub chains: BTreeMap<String, AccountState>,
    /// Balances plus delegated amounts, per denomination
    pub totals: BTreeMap<String, Amount>,
    pub breakdown: TotalsBreakdown,
    /// Chains that could not be read, with the reason
    pub failures: BTreeMap<String, String>,
}

/// Row counts for one chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStats {
    pub chain: String,
    pub cursor: Option<ChainCursor>,
    pub balances: u64,
    pub delegations: u64,
    pub validators: u64,
    pub unbonding: u64,
    pub proposals: u64,
    pub votes: u64,
    pub supply: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("0", "0")]
    #[case("1000000", "1000000")]
    #[case(" 42 ", "42")]
    #[case("340282366920938463463374607431768211456", "340282366920938463463374607431768211456")]
    fn test_amount_parse_display(#[case] input: &str, #[case] expected: &str) {
        let amount: Amount = input.parse().unwrap();
        assert_eq!(amount.to_string(), expected);
    }

    #[rstest]
    #[case("")]
    #[case("-5")]
    #[case("+5")]
    #[case("1_000")]
    #[case("1.5")]
    #[case("12abc")]
    fn test_amount_parse_rejects(#[case] input: &str) {
        assert!(input.parse::<Amount>().is_err());
    }

    #[test]
    fn test_amount_sum_exceeds_u64() {
        let a: Amount = u64::MAX.into();
        let b: Amount = u64::MAX.into();
        let total: Amount = [a, b].iter().sum();
        assert_eq!(total.to_string(), "36893488147419103230");
    }

    #[test]
    fn test_amount_serde_as_string() {
        let amount: Amount = "2500000".parse().unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, "\"2500000\"");
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
        assert!(serde_json::from_str::<Amount>("\"1e6\"").is_err());
    }

    #[test]
    fn test_natural_key_identity() {
        let record = NormalizedRecord::Balance(BalanceRecord {
            chain: "cosmoshub".to_string(),
            address: "addrX".to_string(),
            denom: "ibc/27394FB092D2ECCD".to_string(),
            amount: "5".parse().unwrap(),
            height: 10,
        });
        let key = record.natural_key();
        assert_eq!(key.kind(), RecordKind::Balance);
        assert_eq!(key.to_string(), "addrX:ibc/27394FB092D2ECCD");
        assert_eq!(record.account(), Some("addrX"));
    }

    #[test]
    fn test_record_kind_strings() {
        assert_eq!(RecordKind::Unbonding.to_string(), "unbonding");
        assert_eq!("vote".parse::<RecordKind>().unwrap(), RecordKind::Vote);
        assert_eq!(RecordKind::Supply.as_ref(), "supply");
    }

    #[test]
    fn test_unbonding_total_balance() {
        let entry = |b: u64| UnbondingEntry {
            creation_height: 1,
            completion_time: "2025-01-01T00:00:00Z".to_string(),
            initial_balance: b.into(),
            balance: b.into(),
        };
        let record = UnbondingRecord {
            chain: "osmosis".to_string(),
            delegator: "d".to_string(),
            validator: "v".to_string(),
            denom: "uosmo".to_string(),
            entries: vec![entry(10), entry(32)],
            height: 5,
        };
        assert_eq!(record.total_balance().to_string(), "42");
    }

    #[test]
    fn test_account_state_sort() {
        let mut state = AccountState::empty("c", "a");
        for denom in ["uosmo", "uatom"] {
            state.balances.push(BalanceRecord {
                chain: "c".to_string(),
                address: "a".to_string(),
                denom: denom.to_string(),
                amount: Amount::zero(),
                height: 1,
            });
        }
        state.sort();
        assert_eq!(state.balances[0].denom, "uatom");
        assert!(!state.is_empty());
    }

    #[test]
    fn test_raw_event_key_display() {
        let ev = RawStateEvent::new("c", "bank", vec![0xff, 0x01], Vec::new(), 1);
        assert_eq!(ev.key_display(), "ff01");
        let del = RawStateEvent::deletion("c", "bank", "balances/a/uatom", 2);
        assert!(del.delete);
        assert_eq!(del.key_display(), "balances/a/uatom");
    }
}
