// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use super::{json_value, key_str, split_exact, DecodeResult, ModuleDecoder};
use crate::error::DecodeError;
use crate::types::{NormalizedRecord, ProposalRecord, RawStateEvent, TallyResult, VoteRecord};
use serde::Deserialize;

const MODULE: &str = "gov";
const PROPOSALS_PREFIX: &str = "proposals/";
const VOTES_PREFIX: &str = "votes/";

#[derive(Deserialize)]
struct ProposalPayload {
    #[serde(default)]
    title: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    submit_time: Option<String>,
    #[serde(default)]
    voting_end_time: Option<String>,
    #[serde(default)]
    tally: Option<TallyResult>,
}

#[derive(Deserialize)]
struct VotePayload {
    option: String,
}

/// Proposals and votes. Deletes are ignored; finished proposals stay queryable.
pub struct GovDecoder;

impl ModuleDecoder for GovDecoder {
    fn decode(&self, event: &RawStateEvent) -> DecodeResult {
        let key = key_str(MODULE, event)?;

        if let Some(rest) = key.strip_prefix(PROPOSALS_PREFIX) {
            let [id] = split_exact::<1>(MODULE, key, rest)?;
            let proposal_id = parse_proposal_id(key, id)?;
            if event.delete {
                return Ok(None);
            }
            let payload: ProposalPayload = json_value(MODULE, key, &event.value)?;
            return Ok(Some(NormalizedRecord::Proposal(ProposalRecord {
                chain: event.chain.clone(),
                proposal_id,
                title: payload.title,
                status: payload.status,
                submit_time: payload.submit_time,
                voting_end_time: payload.voting_end_time,
                tally: payload.tally,
                height: event.height,
            })));
        }

        if let Some(rest) = key.strip_prefix(VOTES_PREFIX) {
            let [id, voter] = split_exact::<2>(MODULE, key, rest)?;
            let proposal_id = parse_proposal_id(key, id)?;
            if event.delete {
                return Ok(None);
            }
            let payload: VotePayload = json_value(MODULE, key, &event.value)?;
            return Ok(Some(NormalizedRecord::Vote(VoteRecord {
                chain: event.chain.clone(),
                proposal_id,
                voter: voter.to_string(),
                option: payload.option,
                height: event.height,
            })));
        }

        Ok(None)
    }
}

fn parse_proposal_id(key: &str, id: &str) -> Result<u64, DecodeError> {
    id.parse()
        .map_err(|_| DecodeError::malformed_key(MODULE, key, format!("proposal id {:?} is not a number", id)))
}
