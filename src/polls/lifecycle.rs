//! Poll Lifecycle Manager
//!
//! Sole writer of a poll's status and time window. Every read that cares
//! about the active poll goes through [`PollLifecycle::reconciled_active`],
//! which ends a poll whose time has run out before anyone gets to see it as
//! active. A poll ended that way is remembered until someone announces it,
//! see [`PollLifecycle::take_unannounced`].

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

use super::clock::Clock;
use super::error::{PollError, PollResult};
use super::model::{NewPoll, Poll, PollStatus, DEFAULT_MAX_QUESTION_LENGTH};
use super::results::PollHistoryEntry;
use super::store::{PollStore, StoreError};
use crate::metrics::PollMetrics;
use crate::sessions::SessionRegistry;

/// Upper bound on a history page, whatever the caller asks for.
pub const MAX_HISTORY_PAGE_SIZE: usize = 100;

const DEFAULT_HISTORY_PAGE_SIZE: usize = 10;

/// A poll together with its countdown, as returned by `get_active_poll`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivePoll {
    #[serde(flatten)]
    pub poll: Poll,
    /// Seconds left; `None` for a draft
    pub remaining_time: Option<i64>,
}

/// Why a poll left the active state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    Explicit,
    Expired,
}

#[derive(Debug, Clone)]
pub struct PollLifecycle {
    store: Arc<dyn PollStore>,
    sessions: Arc<dyn SessionRegistry>,
    clock: Arc<dyn Clock>,
    metrics: Arc<PollMetrics>,
    max_question_length: usize,
    history_page_size: usize,
    /// Polls expired by a read, whose `poll_ended` has not gone out yet
    unannounced: Arc<Mutex<HashSet<String>>>,
}

impl PollLifecycle {
    pub fn new(
        store: Arc<dyn PollStore>,
        sessions: Arc<dyn SessionRegistry>,
        clock: Arc<dyn Clock>,
        metrics: Arc<PollMetrics>,
    ) -> Self {
        Self {
            store,
            sessions,
            clock,
            metrics,
            max_question_length: DEFAULT_MAX_QUESTION_LENGTH,
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            unannounced: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Override the question length and default history page size
    pub fn with_limits(mut self, max_question_length: usize, history_page_size: usize) -> Self {
        self.max_question_length = max_question_length;
        self.history_page_size = history_page_size.clamp(1, MAX_HISTORY_PAGE_SIZE);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn store(&self) -> &Arc<dyn PollStore> {
        &self.store
    }

    /// Validate and persist a new draft.
    pub async fn create_poll(&self, request: &NewPoll) -> PollResult<Poll> {
        let valid = request.validate(self.max_question_length)?;
        let poll = self.store.insert_poll(valid.into_draft(self.now())).await?;
        self.metrics.polls_created_total.inc();
        info!(
            poll_id = %poll.id,
            created_by = %poll.created_by,
            options = poll.options.len(),
            duration = poll.duration,
            "Poll created"
        );
        Ok(poll)
    }

    /// The stored active poll, unless its time has run out.
    ///
    /// An expired active poll is ended here and `None` is returned.
    pub async fn reconciled_active(&self) -> PollResult<Option<Poll>> {
        let Some(poll) = self.store.find_active().await? else {
            return Ok(None);
        };
        if poll.is_expired_at(self.now()) {
            self.reconcile_expired(&poll.id).await?;
            return Ok(None);
        }
        Ok(Some(poll))
    }

    async fn reconcile_expired(&self, poll_id: &str) -> PollResult<()> {
        match self.finish(poll_id, EndReason::Expired).await {
            Ok(poll) => {
                self.unannounced.lock().insert(poll.id);
                Ok(())
            }
            // Someone else (the timer, another reader) got there first
            Err(PollError::NotActive) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Claim the announcement of a poll expired by a read.
    ///
    /// True exactly once per such poll; the caller then owes the clients a
    /// `poll_ended`.
    pub fn take_unannounced(&self, poll_id: &str) -> bool {
        self.unannounced.lock().remove(poll_id)
    }

    /// Claim every pending announcement.
    pub fn drain_unannounced(&self) -> Vec<String> {
        self.unannounced.lock().drain().collect()
    }

    /// Draft -> active.
    ///
    /// Fails with `ActivePollExists` while another poll is running. Every
    /// active session is pointed at the new poll.
    pub async fn start_poll(&self, poll_id: &str, moderator_session_id: &str) -> PollResult<Poll> {
        if let Some(active) = self.reconciled_active().await? {
            debug!(poll_id, active_poll_id = %active.id, "Start rejected, poll already active");
            return Err(PollError::ActivePollExists);
        }

        let draft = self
            .store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)?;
        if !draft.status.can_transition_to(PollStatus::Active) {
            return Err(PollError::NotDraft);
        }

        let start = self.now();
        let end = start + Duration::seconds(i64::from(draft.duration));
        let poll = self.store.activate(poll_id, start, end).await?;

        let assigned = self.sessions.assign_current_poll_to_active(&poll.id).await?;
        self.metrics.polls_started_total.inc();
        info!(
            poll_id = %poll.id,
            session_id = %moderator_session_id,
            duration = poll.duration,
            sessions = assigned,
            "Poll started"
        );
        Ok(poll)
    }

    /// Active -> ended.
    ///
    /// A second call fails with `NotActive`; callers that only want the poll
    /// closed should treat that as done.
    pub async fn end_poll(&self, poll_id: &str) -> PollResult<Poll> {
        self.finish(poll_id, EndReason::Explicit).await
    }

    /// End a poll whose time has run out.
    pub async fn expire_poll(&self, poll_id: &str) -> PollResult<Poll> {
        self.finish(poll_id, EndReason::Expired).await
    }

    async fn finish(&self, poll_id: &str, reason: EndReason) -> PollResult<Poll> {
        let poll = match self.store.finish(poll_id, self.now()).await {
            Ok(poll) => poll,
            Err(StoreError::PollNotFound) => return Err(PollError::PollNotFound),
            Err(StoreError::StatusMismatch { .. }) => return Err(PollError::NotActive),
            Err(err) => return Err(err.into()),
        };
        self.metrics.polls_ended_total.inc();
        if reason == EndReason::Expired {
            self.metrics.polls_expired_total.inc();
        }
        info!(
            poll_id = %poll.id,
            total_votes = poll.total_votes,
            expired = reason == EndReason::Expired,
            "Poll ended"
        );
        Ok(poll)
    }

    /// The running poll with its countdown, else the newest draft.
    pub async fn get_active_poll(&self) -> PollResult<Option<ActivePoll>> {
        if let Some(poll) = self.reconciled_active().await? {
            let remaining_time = self.remaining_seconds(&poll);
            return Ok(Some(ActivePoll {
                poll,
                remaining_time,
            }));
        }
        Ok(self.store.latest_draft().await?.map(|poll| ActivePoll {
            poll,
            remaining_time: None,
        }))
    }

    /// Whether a moderator may move on to a new poll.
    ///
    /// True with no running poll, or once every respondent tracked for the
    /// running poll has voted. Respondent tracking is best-effort.
    pub async fn can_create_new_poll(&self) -> PollResult<bool> {
        let Some(active) = self.reconciled_active().await? else {
            return Ok(true);
        };
        let votes = self.store.count_votes(&active.id).await?;
        let respondents = self.sessions.count_active_respondents(&active.id).await?;
        debug!(poll_id = %active.id, votes, respondents, "Quorum check");
        Ok(votes >= respondents)
    }

    pub async fn get_poll(&self, poll_id: &str) -> PollResult<Poll> {
        self.store
            .get_poll(poll_id)
            .await?
            .ok_or(PollError::PollNotFound)
    }

    /// Whole seconds left on an active poll, as of now
    pub fn remaining_seconds(&self, poll: &Poll) -> Option<i64> {
        poll.remaining_seconds_at(self.now())
    }

    /// Ended polls, most recent first.
    ///
    /// `page` is 1-based. Non-positive values fall back to page 1 and the
    /// configured page size.
    pub async fn poll_history(&self, page: i64, limit: i64) -> PollResult<Vec<PollHistoryEntry>> {
        let page = page.max(1) as usize;
        let limit = if limit < 1 {
            self.history_page_size
        } else {
            (limit as usize).min(MAX_HISTORY_PAGE_SIZE)
        };
        let offset = (page - 1).saturating_mul(limit);
        let polls = self.store.ended_polls(offset, limit).await?;
        Ok(polls.iter().map(PollHistoryEntry::from_poll).collect())
    }
}
