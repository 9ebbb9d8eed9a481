// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL canonical store
//!
//! A batch is applied inside one transaction: the chain cursor row is locked
//! first, every record is upserted with a `WHERE stored.height < new.height`
//! guard, and the cursor is moved last. A failure anywhere rolls the whole
//! batch back.

use anyhow::Context;
use chainstate_ingest::error::StoreError;
use chainstate_ingest::store::{ApplyOutcome, CanonicalStore, CommitBatch};
use chainstate_ingest::types::{
    AccountState, Amount, BalanceRecord, ChainCursor, ChainStats, DelegationRecord, Height,
    NormalizedRecord, ProposalRecord, TallyResult, UnbondingEntry, UnbondingRecord,
    ValidatorRecord,
};
use chainstate_pg_db::Db;
use chainstate_schema::models::{
    BalanceRow, ChainCursorRow, DelegationRow, ProposalRow, SupplyRow, UnbondingRow, ValidatorRow,
    VoteRow,
};
use chainstate_schema::schema::{
    balances, chain_cursors, delegations, proposals, supply, unbonding_delegations, validators,
    votes,
};
use chrono::{DateTime, Utc};
use diesel::upsert::excluded;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, SelectableHelper};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use tracing::debug;

#[derive(Clone)]
pub struct PgStore {
    db: Db,
}

impl PgStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    async fn connect(&self) -> Result<chainstate_pg_db::Connection<'_>, StoreError> {
        self.db
            .connect()
            .await
            .map_err(|e| StoreError::Unavailable(format!("{:#}", e)))
    }
}

#[async_trait::async_trait]
impl CanonicalStore for PgStore {
    async fn cursor(&self, chain: &str) -> Result<Option<ChainCursor>, StoreError> {
        let mut conn = self.connect().await?;
        let row: Option<ChainCursorRow> = chain_cursors::table
            .filter(chain_cursors::chain_name.eq(chain))
            .select(ChainCursorRow::as_select())
            .first(&mut conn)
            .await
            .optional()
            .map_err(query_error)?;
        row.map(cursor_from_row).transpose()
    }

    async fn list_cursors(&self) -> Result<Vec<ChainCursor>, StoreError> {
        let mut conn = self.connect().await?;
        let rows: Vec<ChainCursorRow> = chain_cursors::table
            .order(chain_cursors::chain_name.asc())
            .select(ChainCursorRow::as_select())
            .load(&mut conn)
            .await
            .map_err(query_error)?;
        rows.into_iter().map(cursor_from_row).collect()
    }

    async fn apply_batch(&self, batch: CommitBatch) -> Result<ApplyOutcome, StoreError> {
        let mut conn = self.connect().await?;
        let pg: &mut AsyncPgConnection = &mut conn;
        let chain = batch.chain.clone();
        let height = batch.height;

        let outcome = pg
            .transaction::<_, anyhow::Error, _>(|conn| {
                async move { apply_in_transaction(conn, batch).await }.scope_boxed()
            })
            .await
            .map_err(|e| match e.downcast_ref::<StoreError>() {
                Some(store_error) => store_error.clone(),
                None => StoreError::Query(format!("{:#}", e)),
            })?;

        if let ApplyOutcome::Applied {
            applied, skipped, ..
        } = &outcome
        {
            debug!(
                "[{}] PgStore applied batch at height {}: {} applied, {} skipped",
                chain,
                height,
                applied.len(),
                skipped
            );
        }
        Ok(outcome)
    }

    async fn account_state(&self, chain: &str, address: &str) -> Result<AccountState, StoreError> {
        let mut conn = self.connect().await?;

        let balance_rows: Vec<BalanceRow> = balances::table
            .filter(balances::chain_name.eq(chain))
            .filter(balances::address.eq(address))
            .order(balances::denom.asc())
            .select(BalanceRow::as_select())
            .load(&mut conn)
            .await
            .map_err(query_error)?;

        let delegation_rows: Vec<DelegationRow> = delegations::table
            .filter(delegations::chain_name.eq(chain))
            .filter(delegations::delegator_address.eq(address))
            .order(delegations::validator_address.asc())
            .select(DelegationRow::as_select())
            .load(&mut conn)
            .await
            .map_err(query_error)?;

        let unbonding_rows: Vec<UnbondingRow> = unbonding_delegations::table
            .filter(unbonding_delegations::chain_name.eq(chain))
            .filter(unbonding_delegations::delegator_address.eq(address))
            .order(unbonding_delegations::validator_address.asc())
            .select(UnbondingRow::as_select())
            .load(&mut conn)
            .await
            .map_err(query_error)?;

        let mut state = AccountState::empty(chain, address);
        state.balances = balance_rows
            .into_iter()
            .map(balance_from_row)
            .collect::<Result<_, _>>()?;
        state.delegations = delegation_rows
            .into_iter()
            .map(delegation_from_row)
            .collect::<Result<_, _>>()?;
        state.unbonding = unbonding_rows
            .into_iter()
            .map(unbonding_from_row)
            .collect::<Result<_, _>>()?;
        Ok(state)
    }

    async fn validators(&self, chain: &str) -> Result<Vec<ValidatorRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let rows: Vec<ValidatorRow> = validators::table
            .filter(validators::chain_name.eq(chain))
            .order(validators::operator_address.asc())
            .select(ValidatorRow::as_select())
            .load(&mut conn)
            .await
            .map_err(query_error)?;
        rows.into_iter().map(validator_from_row).collect()
    }

    async fn proposals(&self, chain: &str) -> Result<Vec<ProposalRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let rows: Vec<ProposalRow> = proposals::table
            .filter(proposals::chain_name.eq(chain))
            .order(proposals::proposal_id.asc())
            .select(ProposalRow::as_select())
            .load(&mut conn)
            .await
            .map_err(query_error)?;
        rows.into_iter().map(proposal_from_row).collect()
    }

    async fn chain_stats(&self, chain: &str) -> Result<ChainStats, StoreError> {
        let cursor = self.cursor(chain).await?;
        let mut conn = self.connect().await?;

        let balances_count: i64 = balances::table
            .filter(balances::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;
        let delegations_count: i64 = delegations::table
            .filter(delegations::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;
        let validators_count: i64 = validators::table
            .filter(validators::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;
        let unbonding_count: i64 = unbonding_delegations::table
            .filter(unbonding_delegations::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;
        let proposals_count: i64 = proposals::table
            .filter(proposals::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;
        let votes_count: i64 = votes::table
            .filter(votes::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;
        let supply_count: i64 = supply::table
            .filter(supply::chain_name.eq(chain))
            .count()
            .get_result(&mut conn)
            .await
            .map_err(query_error)?;

        Ok(ChainStats {
            chain: chain.to_string(),
            cursor,
            balances: balances_count as u64,
            delegations: delegations_count as u64,
            validators: validators_count as u64,
            unbonding: unbonding_count as u64,
            proposals: proposals_count as u64,
            votes: votes_count as u64,
            supply: supply_count as u64,
        })
    }
}

// ============================================================================
// Write path
// ============================================================================

async fn apply_in_transaction(
    conn: &mut AsyncPgConnection,
    batch: CommitBatch,
) -> anyhow::Result<ApplyOutcome> {
    let height = to_db_height(batch.height)?;

    let stored: Option<i64> = chain_cursors::table
        .filter(chain_cursors::chain_name.eq(&batch.chain))
        .select(chain_cursors::height)
        .for_update()
        .first(conn)
        .await
        .optional()
        .context("Failed to lock chain cursor")?;
    if let Some(cursor_height) = stored {
        if height < cursor_height {
            return Ok(ApplyOutcome::Stale {
                cursor_height: from_db_height(cursor_height)?,
            });
        }
    }

    let mut applied = Vec::new();
    let mut skipped = 0;
    for mut record in batch.records {
        if record.missing_denom() {
            if let Some(denom) = stored_denom(conn, &record).await? {
                record.fill_missing_denom(&denom);
            }
        }
        if upsert_record(conn, &record, batch.committed_at).await? > 0 {
            applied.push(record);
        } else {
            skipped += 1;
        }
    }

    diesel::insert_into(chain_cursors::table)
        .values(&ChainCursorRow {
            chain_name: batch.chain.clone(),
            height,
            updated_at: batch.committed_at,
        })
        .on_conflict(chain_cursors::chain_name)
        .do_update()
        .set((
            chain_cursors::height.eq(excluded(chain_cursors::height)),
            chain_cursors::updated_at.eq(excluded(chain_cursors::updated_at)),
        ))
        .execute(conn)
        .await
        .context("Failed to advance chain cursor")?;

    Ok(ApplyOutcome::Applied {
        applied,
        skipped,
        cursor: ChainCursor {
            chain: batch.chain,
            height: batch.height,
            updated_at: batch.committed_at,
        },
    })
}

/// Denom of the stored delegation or unbonding row sharing the record's key
async fn stored_denom(
    conn: &mut AsyncPgConnection,
    record: &NormalizedRecord,
) -> anyhow::Result<Option<String>> {
    let denom = match record {
        NormalizedRecord::Delegation(r) => delegations::table
            .filter(delegations::chain_name.eq(&r.chain))
            .filter(delegations::delegator_address.eq(&r.delegator))
            .filter(delegations::validator_address.eq(&r.validator))
            .select(delegations::denom)
            .first::<String>(conn)
            .await
            .optional()
            .context("Failed to read stored delegation denom")?,
        NormalizedRecord::Unbonding(r) => unbonding_delegations::table
            .filter(unbonding_delegations::chain_name.eq(&r.chain))
            .filter(unbonding_delegations::delegator_address.eq(&r.delegator))
            .filter(unbonding_delegations::validator_address.eq(&r.validator))
            .select(unbonding_delegations::denom)
            .first::<String>(conn)
            .await
            .optional()
            .context("Failed to read stored unbonding denom")?,
        _ => None,
    };
    Ok(denom)
}

/// Insert or overwrite one record. Returns the number of rows written, which is
/// zero when the stored row is at the same or a newer height.
async fn upsert_record(
    conn: &mut AsyncPgConnection,
    record: &NormalizedRecord,
    now: DateTime<Utc>,
) -> anyhow::Result<usize> {
    use diesel::query_dsl::methods::FilterDsl;

    let written = match record {
        NormalizedRecord::Balance(r) => diesel::insert_into(balances::table)
            .values(&BalanceRow {
                chain_name: r.chain.clone(),
                address: r.address.clone(),
                denom: r.denom.clone(),
                amount: r.amount.to_string(),
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((balances::chain_name, balances::address, balances::denom))
            .do_update()
            .set((
                balances::amount.eq(excluded(balances::amount)),
                balances::height.eq(excluded(balances::height)),
                balances::updated_at.eq(excluded(balances::updated_at)),
            ))
            .filter(balances::height.lt(excluded(balances::height)))
            .execute(conn)
            .await
            .context("Failed to upsert balance")?,
        NormalizedRecord::Supply(r) => diesel::insert_into(supply::table)
            .values(&SupplyRow {
                chain_name: r.chain.clone(),
                denom: r.denom.clone(),
                amount: r.amount.to_string(),
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((supply::chain_name, supply::denom))
            .do_update()
            .set((
                supply::amount.eq(excluded(supply::amount)),
                supply::height.eq(excluded(supply::height)),
                supply::updated_at.eq(excluded(supply::updated_at)),
            ))
            .filter(supply::height.lt(excluded(supply::height)))
            .execute(conn)
            .await
            .context("Failed to upsert supply")?,
        NormalizedRecord::Delegation(r) => diesel::insert_into(delegations::table)
            .values(&DelegationRow {
                chain_name: r.chain.clone(),
                delegator_address: r.delegator.clone(),
                validator_address: r.validator.clone(),
                denom: r.denom.clone(),
                shares: r.shares.clone(),
                amount: r.amount.to_string(),
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((
                delegations::chain_name,
                delegations::delegator_address,
                delegations::validator_address,
            ))
            .do_update()
            .set((
                delegations::denom.eq(excluded(delegations::denom)),
                delegations::shares.eq(excluded(delegations::shares)),
                delegations::amount.eq(excluded(delegations::amount)),
                delegations::height.eq(excluded(delegations::height)),
                delegations::updated_at.eq(excluded(delegations::updated_at)),
            ))
            .filter(delegations::height.lt(excluded(delegations::height)))
            .execute(conn)
            .await
            .context("Failed to upsert delegation")?,
        NormalizedRecord::Validator(r) => diesel::insert_into(validators::table)
            .values(&ValidatorRow {
                chain_name: r.chain.clone(),
                operator_address: r.operator_address.clone(),
                moniker: r.moniker.clone(),
                status: r.status.clone(),
                jailed: r.jailed,
                tokens: r.tokens.to_string(),
                delegator_shares: r.delegator_shares.clone(),
                commission_rate: r.commission_rate.clone(),
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((validators::chain_name, validators::operator_address))
            .do_update()
            .set((
                validators::moniker.eq(excluded(validators::moniker)),
                validators::status.eq(excluded(validators::status)),
                validators::jailed.eq(excluded(validators::jailed)),
                validators::tokens.eq(excluded(validators::tokens)),
                validators::delegator_shares.eq(excluded(validators::delegator_shares)),
                validators::commission_rate.eq(excluded(validators::commission_rate)),
                validators::height.eq(excluded(validators::height)),
                validators::updated_at.eq(excluded(validators::updated_at)),
            ))
            .filter(validators::height.lt(excluded(validators::height)))
            .execute(conn)
            .await
            .context("Failed to upsert validator")?,
        NormalizedRecord::Unbonding(r) => diesel::insert_into(unbonding_delegations::table)
            .values(&UnbondingRow {
                chain_name: r.chain.clone(),
                delegator_address: r.delegator.clone(),
                validator_address: r.validator.clone(),
                denom: r.denom.clone(),
                entries: serde_json::to_value(&r.entries)
                    .context("Failed to encode unbonding entries")?,
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((
                unbonding_delegations::chain_name,
                unbonding_delegations::delegator_address,
                unbonding_delegations::validator_address,
            ))
            .do_update()
            .set((
                unbonding_delegations::denom.eq(excluded(unbonding_delegations::denom)),
                unbonding_delegations::entries.eq(excluded(unbonding_delegations::entries)),
                unbonding_delegations::height.eq(excluded(unbonding_delegations::height)),
                unbonding_delegations::updated_at.eq(excluded(unbonding_delegations::updated_at)),
            ))
            .filter(unbonding_delegations::height.lt(excluded(unbonding_delegations::height)))
            .execute(conn)
            .await
            .context("Failed to upsert unbonding delegation")?,
        NormalizedRecord::Proposal(r) => diesel::insert_into(proposals::table)
            .values(&ProposalRow {
                chain_name: r.chain.clone(),
                proposal_id: to_db_id(r.proposal_id)?,
                title: r.title.clone(),
                status: r.status.clone(),
                submit_time: r.submit_time.clone(),
                voting_end_time: r.voting_end_time.clone(),
                tally: r
                    .tally
                    .as_ref()
                    .map(serde_json::to_value)
                    .transpose()
                    .context("Failed to encode tally")?,
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((proposals::chain_name, proposals::proposal_id))
            .do_update()
            .set((
                proposals::title.eq(excluded(proposals::title)),
                proposals::status.eq(excluded(proposals::status)),
                proposals::submit_time.eq(excluded(proposals::submit_time)),
                proposals::voting_end_time.eq(excluded(proposals::voting_end_time)),
                proposals::tally.eq(excluded(proposals::tally)),
                proposals::height.eq(excluded(proposals::height)),
                proposals::updated_at.eq(excluded(proposals::updated_at)),
            ))
            .filter(proposals::height.lt(excluded(proposals::height)))
            .execute(conn)
            .await
            .context("Failed to upsert proposal")?,
        NormalizedRecord::Vote(r) => diesel::insert_into(votes::table)
            .values(&VoteRow {
                chain_name: r.chain.clone(),
                proposal_id: to_db_id(r.proposal_id)?,
                voter: r.voter.clone(),
                option: r.option.clone(),
                height: to_db_height(r.height)?,
                updated_at: now,
            })
            .on_conflict((votes::chain_name, votes::proposal_id, votes::voter))
            .do_update()
            .set((
                votes::option.eq(excluded(votes::option)),
                votes::height.eq(excluded(votes::height)),
                votes::updated_at.eq(excluded(votes::updated_at)),
            ))
            .filter(votes::height.lt(excluded(votes::height)))
            .execute(conn)
            .await
            .context("Failed to upsert vote")?,
    };
    Ok(written)
}

// ============================================================================
// Row conversions
// ============================================================================

fn query_error(e: diesel::result::Error) -> StoreError {
    StoreError::Query(e.to_string())
}

fn to_db_height(height: Height) -> Result<i64, StoreError> {
    i64::try_from(height).map_err(|_| StoreError::Query(format!("height {} exceeds BIGINT", height)))
}

fn from_db_height(height: i64) -> Result<Height, StoreError> {
    u64::try_from(height).map_err(|_| StoreError::Corrupt(format!("negative height {}", height)))
}

fn to_db_id(id: u64) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Query(format!("proposal id {} exceeds BIGINT", id)))
}

fn parse_amount(column: &str, raw: &str) -> Result<Amount, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupt(format!("{}: {}", column, e)))
}

fn cursor_from_row(row: ChainCursorRow) -> Result<ChainCursor, StoreError> {
    Ok(ChainCursor {
        height: from_db_height(row.height)?,
        chain: row.chain_name,
        updated_at: row.updated_at,
    })
}

fn balance_from_row(row: BalanceRow) -> Result<BalanceRecord, StoreError> {
    Ok(BalanceRecord {
        amount: parse_amount("balances.amount", &row.amount)?,
        height: from_db_height(row.height)?,
        chain: row.chain_name,
        address: row.address,
        denom: row.denom,
    })
}

fn delegation_from_row(row: DelegationRow) -> Result<DelegationRecord, StoreError> {
    Ok(DelegationRecord {
        amount: parse_amount("delegations.amount", &row.amount)?,
        height: from_db_height(row.height)?,
        chain: row.chain_name,
        delegator: row.delegator_address,
        validator: row.validator_address,
        denom: row.denom,
        shares: row.shares,
    })
}

fn unbonding_from_row(row: UnbondingRow) -> Result<UnbondingRecord, StoreError> {
    let entries: Vec<UnbondingEntry> = serde_json::from_value(row.entries)
        .map_err(|e| StoreError::Corrupt(format!("unbonding_delegations.entries: {}", e)))?;
    Ok(UnbondingRecord {
        height: from_db_height(row.height)?,
        chain: row.chain_name,
        delegator: row.delegator_address,
        validator: row.validator_address,
        denom: row.denom,
        entries,
    })
}

fn validator_from_row(row: ValidatorRow) -> Result<ValidatorRecord, StoreError> {
    Ok(ValidatorRecord {
        tokens: parse_amount("validators.tokens", &row.tokens)?,
        height: from_db_height(row.height)?,
        chain: row.chain_name,
        operator_address: row.operator_address,
        moniker: row.moniker,
        status: row.status,
        jailed: row.jailed,
        delegator_shares: row.delegator_shares,
        commission_rate: row.commission_rate,
    })
}

fn proposal_from_row(row: ProposalRow) -> Result<ProposalRecord, StoreError> {
    let tally: Option<TallyResult> = row
        .tally
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| StoreError::Corrupt(format!("proposals.tally: {}", e)))?;
    Ok(ProposalRecord {
        proposal_id: u64::try_from(row.proposal_id).map_err(|_| {
            StoreError::Corrupt(format!("negative proposal id {}", row.proposal_id))
        })?,
        height: from_db_height(row.height)?,
        chain: row.chain_name,
        title: row.title,
        status: row.status,
        submit_time: row.submit_time,
        voting_end_time: row.voting_end_time,
        tally,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chainstate_pg_db::DbArgs;
    use url::Url;

    #[test]
    fn test_height_conversion_bounds() {
        assert_eq!(to_db_height(101).unwrap(), 101);
        assert_matches!(to_db_height(u64::MAX), Err(StoreError::Query(_)));
        assert_eq!(from_db_height(500).unwrap(), 500);
        assert_matches!(from_db_height(-1), Err(StoreError::Corrupt(_)));
    }

    #[test]
    fn test_balance_row_with_wide_amount() {
        let row = BalanceRow {
            chain_name: "cosmoshub".to_string(),
            address: "addrX".to_string(),
            denom: "uatom".to_string(),
            amount: "340282366920938463463374607431768211456".to_string(),
            height: 101,
            updated_at: Utc::now(),
        };
        let record = balance_from_row(row).unwrap();
        assert_eq!(record.amount.to_string(), "340282366920938463463374607431768211456");
        assert_eq!(record.height, 101);
    }

    #[test]
    fn test_corrupt_rows_are_reported() {
        let row = ValidatorRow {
            chain_name: "osmosis".to_string(),
            operator_address: "osmovaloper1".to_string(),
            moniker: "v".to_string(),
            status: "BOND_STATUS_BONDED".to_string(),
            jailed: false,
            tokens: "not-a-number".to_string(),
            delegator_shares: "0".to_string(),
            commission_rate: "0.05".to_string(),
            height: 7,
            updated_at: Utc::now(),
        };
        assert_matches!(validator_from_row(row), Err(StoreError::Corrupt(_)));

        let row = UnbondingRow {
            chain_name: "osmosis".to_string(),
            delegator_address: "d".to_string(),
            validator_address: "v".to_string(),
            denom: "uosmo".to_string(),
            entries: serde_json::json!({"not": "an array"}),
            height: 7,
            updated_at: Utc::now(),
        };
        assert_matches!(unbonding_from_row(row), Err(StoreError::Corrupt(_)));
    }

    #[test]
    fn test_proposal_row_tally() {
        let row = ProposalRow {
            chain_name: "cosmoshub".to_string(),
            proposal_id: 7,
            title: "Upgrade".to_string(),
            status: "PROPOSAL_STATUS_PASSED".to_string(),
            submit_time: None,
            voting_end_time: None,
            tally: Some(serde_json::json!({
                "yes": "10", "no": "0", "abstain": "1", "no_with_veto": "0"
            })),
            height: 101,
            updated_at: Utc::now(),
        };
        let record = proposal_from_row(row).unwrap();
        assert_eq!(record.proposal_id, 7);
        assert_eq!(record.tally.unwrap().yes.to_string(), "10");
    }

    // ------------------------------------------------------------------------
    // Database-backed tests
    // ------------------------------------------------------------------------

    async fn test_store() -> PgStore {
        let database_url = std::env::var("TEST_DATABASE_URL")
            .expect("TEST_DATABASE_URL environment variable must be set");
        let url: Url = database_url.parse().expect("Invalid database URL format");
        let db = Db::new(url, DbArgs::default())
            .await
            .expect("Failed to connect to database");
        db.run_migrations(&chainstate_schema::MIGRATIONS)
            .await
            .expect("Failed to run migrations");
        PgStore::new(db)
    }

    fn unique_chain(prefix: &str) -> String {
        format!("{}-{}", prefix, Utc::now().timestamp_nanos_opt().unwrap_or_default())
    }

    fn balance(chain: &str, address: &str, amount: u64, height: Height) -> NormalizedRecord {
        NormalizedRecord::Balance(BalanceRecord {
            chain: chain.to_string(),
            address: address.to_string(),
            denom: "uatom".to_string(),
            amount: amount.into(),
            height,
        })
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_apply_batch_overwrites_and_guards() {
        let store = test_store().await;
        let chain = unique_chain("cosmoshub");

        let outcome = store
            .apply_batch(CommitBatch::new(&chain, 100, vec![balance(&chain, "addrX", 5, 100)]))
            .await
            .unwrap();
        assert_matches!(outcome, ApplyOutcome::Applied { ref applied, skipped: 0, .. } if applied.len() == 1);

        // Newer height replaces the row
        store
            .apply_batch(CommitBatch::new(&chain, 101, vec![balance(&chain, "addrX", 7, 101)]))
            .await
            .unwrap();
        let state = store.account_state(&chain, "addrX").await.unwrap();
        assert_eq!(state.balances[0].amount.to_string(), "7");
        assert_eq!(state.balances[0].height, 101);

        // Same height again is skipped, cursor stays put
        let outcome = store
            .apply_batch(CommitBatch::new(&chain, 101, vec![balance(&chain, "addrX", 9, 101)]))
            .await
            .unwrap();
        assert_matches!(outcome, ApplyOutcome::Applied { skipped: 1, .. });
        let state = store.account_state(&chain, "addrX").await.unwrap();
        assert_eq!(state.balances[0].amount.to_string(), "7");

        // Older batch is stale
        let outcome = store
            .apply_batch(CommitBatch::new(&chain, 99, vec![balance(&chain, "addrX", 1, 99)]))
            .await
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Stale { cursor_height: 101 });
        assert_eq!(store.cursor(&chain).await.unwrap().unwrap().height, 101);
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_chain_scoping_and_stats() {
        let store = test_store().await;
        let hub = unique_chain("cosmoshub");
        let osmo = unique_chain("osmosis");

        store
            .apply_batch(CommitBatch::new(&hub, 10, vec![balance(&hub, "addrX", 1, 10)]))
            .await
            .unwrap();
        store
            .apply_batch(CommitBatch::new(&osmo, 20, vec![balance(&osmo, "addrX", 2, 20)]))
            .await
            .unwrap();

        let hub_state = store.account_state(&hub, "addrX").await.unwrap();
        assert_eq!(hub_state.balances.len(), 1);
        assert_eq!(hub_state.balances[0].amount.to_string(), "1");

        let stats = store.chain_stats(&osmo).await.unwrap();
        assert_eq!(stats.balances, 1);
        assert_eq!(stats.cursor.unwrap().height, 20);

        let empty = store.account_state(&hub, "nobody").await.unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    #[ignore] // Requires TEST_DATABASE_URL environment variable
    async fn test_deleted_delegation_keeps_stored_denom() {
        let store = test_store().await;
        let chain = unique_chain("osmosis");
        let delegation = |denom: &str, amount: u64, height: Height| {
            NormalizedRecord::Delegation(DelegationRecord {
                chain: chain.clone(),
                delegator: "addrX".to_string(),
                validator: "valA".to_string(),
                denom: denom.to_string(),
                shares: amount.to_string(),
                amount: amount.into(),
                height,
            })
        };

        store
            .apply_batch(CommitBatch::new(&chain, 10, vec![delegation("uosmo", 5, 10)]))
            .await
            .unwrap();
        let outcome = store
            .apply_batch(CommitBatch::new(&chain, 11, vec![delegation("", 0, 11)]))
            .await
            .unwrap();
        assert_matches!(outcome, ApplyOutcome::Applied { ref applied, .. } if applied[0].denom() == Some("uosmo"));

        let state = store.account_state(&chain, "addrX").await.unwrap();
        assert_eq!(state.delegations[0].denom, "uosmo");
        assert!(state.delegations[0].amount.is_zero());
        assert_eq!(state.delegations[0].height, 11);
    }
}
