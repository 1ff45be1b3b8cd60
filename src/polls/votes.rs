//! Vote Aggregator
//!
//! Validates and records one vote per (poll, respondent session). Counter
//! updates happen inside the store's atomic `record_vote`; this layer only
//! decides whether a submission is acceptable and relabels what the store
//! reports.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::clock::Clock;
use super::error::{PollError, PollResult};
use super::model::{PollStatus, Vote};
use super::results::{vote_counts, OptionTally, PollResults};
use super::store::PollStore;
use crate::metrics::PollMetrics;

/// Vote submission
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVote {
    #[serde(default)]
    pub poll_id: String,
    #[serde(default)]
    pub option_id: String,
    #[serde(default)]
    pub student_name: String,
    #[serde(default)]
    pub student_session_id: String,
}

impl SubmitVote {
    pub fn new(
        poll_id: impl Into<String>,
        option_id: impl Into<String>,
        student_name: impl Into<String>,
        student_session_id: impl Into<String>,
    ) -> Self {
        Self {
            poll_id: poll_id.into(),
            option_id: option_id.into(),
            student_name: student_name.into(),
            student_session_id: student_session_id.into(),
        }
    }

    fn validate(&self) -> PollResult<()> {
        let required = [
            (&self.poll_id, "pollId is required"),
            (&self.option_id, "optionId is required"),
            (&self.student_name, "studentName is required"),
            (&self.student_session_id, "studentSessionId is required"),
        ];
        for (value, message) in required {
            if value.trim().is_empty() {
                return Err(PollError::Validation(message.to_string()));
            }
        }
        Ok(())
    }
}

/// The recorded vote and the tallies right after it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceipt {
    pub vote: Vote,
    pub results: PollResults,
}

#[derive(Debug, Clone)]
pub struct VoteAggregator {
    store: Arc<dyn PollStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PollMetrics>,
}

impl VoteAggregator {
    pub fn new(store: Arc<dyn PollStore>, clock: Arc<dyn Clock>, metrics: Arc<PollMetrics>) -> Self {
        Self {
            store,
            clock,
            metrics,
        }
    }

    /// Record a vote.
    ///
    /// Rejections: `PollNotFound`, `NotActive`, `Expired`, `AlreadyVoted`,
    /// `OptionNotFound`, in that order. A duplicate that slips past the
    /// early check is still caught by the store and reported as
    /// `AlreadyVoted`.
    pub async fn submit_vote(&self, request: &SubmitVote) -> PollResult<VoteReceipt> {
        match self.record(request).await {
            Ok(receipt) => {
                self.metrics.votes_total.inc();
                info!(
                    poll_id = %receipt.vote.poll_id,
                    session_id = %receipt.vote.student_session_id,
                    total_votes = receipt.results.total_votes,
                    "Vote recorded"
                );
                Ok(receipt)
            }
            Err(err) => {
                self.metrics.votes_rejected_total.inc(&[err.code()]);
                debug!(
                    poll_id = %request.poll_id,
                    session_id = %request.student_session_id,
                    code = err.code(),
                    "Vote rejected"
                );
                Err(err)
            }
        }
    }

    async fn record(&self, request: &SubmitVote) -> PollResult<VoteReceipt> {
        request.validate()?;

        let poll = self
            .store
            .get_poll(&request.poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        if poll.status != PollStatus::Active {
            return Err(PollError::NotActive);
        }
        let now = self.clock.now();
        if poll.is_expired_at(now) {
            return Err(PollError::Expired);
        }
        if self
            .store
            .find_vote(&poll.id, &request.student_session_id)
            .await?
            .is_some()
        {
            return Err(PollError::AlreadyVoted);
        }
        let option = poll
            .option(&request.option_id)
            .ok_or(PollError::OptionNotFound)?;

        let vote = Vote {
            id: Uuid::new_v4().to_string(),
            poll_id: poll.id.clone(),
            option_id: option.id.clone(),
            student_name: request.student_name.trim().to_string(),
            student_session_id: request.student_session_id.clone(),
            submitted_at: now,
            poll_question: poll.question.clone(),
            selected_option: option.text.clone(),
        };
        let updated = self.store.record_vote(vote.clone()).await?;

        Ok(VoteReceipt {
            vote,
            results: PollResults::from_poll(&updated),
        })
    }

    /// Option id -> count and percentage
    pub async fn get_vote_counts(&self, poll_id: &str) -> PollResult<BTreeMap<String, OptionTally>> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        Ok(vote_counts(&poll))
    }

    pub async fn get_poll_results(&self, poll_id: &str) -> PollResult<PollResults> {
        let poll = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        Ok(PollResults::from_poll(&poll))
    }

    /// The vote a session cast on a poll, if any
    pub async fn find_vote(&self, poll_id: &str, student_session_id: &str) -> PollResult<Option<Vote>> {
        Ok(self.store.find_vote(poll_id, student_session_id).await?)
    }
}
