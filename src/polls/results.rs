//! Result projections
//!
//! Every tally rendering (vote receipts, dashboards, final results, history)
//! goes through [`percentage`], so all of them round the same way.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::model::Poll;

/// `round(vote_count / total_votes * 100)` with halves rounded up.
///
/// Zero when nothing has been counted yet.
pub fn percentage(vote_count: u64, total_votes: u64) -> u32 {
    if total_votes == 0 {
        return 0;
    }
    // (200c + t) / 2t == floor(100c/t + 1/2)
    let scaled = (200 * vote_count as u128 + total_votes as u128) / (2 * total_votes as u128);
    scaled as u32
}

/// Per-option row of a results snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionResult {
    pub id: String,
    pub text: String,
    pub vote_count: u64,
    pub percentage: u32,
}

/// Results snapshot for one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResults {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<OptionResult>,
    pub total_votes: u64,
}

impl PollResults {
    pub fn from_poll(poll: &Poll) -> Self {
        Self {
            poll_id: poll.id.clone(),
            question: poll.question.clone(),
            options: option_results(poll),
            total_votes: poll.total_votes,
        }
    }

    pub fn option(&self, option_id: &str) -> Option<&OptionResult> {
        self.options.iter().find(|o| o.id == option_id)
    }
}

/// Count and percentage for a single option, keyed by option id in
/// [`vote_counts`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionTally {
    pub vote_count: u64,
    pub percentage: u32,
}

/// Option id -> tally
pub fn vote_counts(poll: &Poll) -> BTreeMap<String, OptionTally> {
    poll.options
        .iter()
        .map(|o| {
            (
                o.id.clone(),
                OptionTally {
                    vote_count: o.vote_count,
                    percentage: percentage(o.vote_count, poll.total_votes),
                },
            )
        })
        .collect()
}

fn option_results(poll: &Poll) -> Vec<OptionResult> {
    poll.options
        .iter()
        .map(|o| OptionResult {
            id: o.id.clone(),
            text: o.text.clone(),
            vote_count: o.vote_count,
            percentage: percentage(o.vote_count, poll.total_votes),
        })
        .collect()
}

/// One ended poll in the history listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollHistoryEntry {
    pub poll_id: String,
    pub question: String,
    pub options: Vec<OptionResult>,
    pub total_votes: u64,
    pub ended_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PollHistoryEntry {
    pub fn from_poll(poll: &Poll) -> Self {
        Self {
            poll_id: poll.id.clone(),
            question: poll.question.clone(),
            options: option_results(poll),
            total_votes: poll.total_votes,
            ended_at: poll.end_time.unwrap_or(poll.updated_at),
            created_at: poll.created_at,
        }
    }
}
