//! Poll Store
//!
//! Narrow persistence contract for polls and votes, plus the in-memory
//! implementation the server runs with.
//!
//! Implementations must make every mutating call atomic with respect to the
//! others: status changes are compare-and-set, at most one poll is active,
//! and a vote insert, its uniqueness check and both counter increments happen
//! as one step.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use thiserror::Error;

use super::model::{Poll, PollStatus, Vote};

/// Storage-level errors. Never shown to callers as-is.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("poll not found")]
    PollNotFound,

    #[error("option not found")]
    OptionNotFound,

    #[error("session not found")]
    SessionNotFound,

    /// Unique (poll id, session id) constraint violated
    #[error("duplicate key: vote already recorded for this session")]
    DuplicateVote,

    #[error("status mismatch: expected {expected}, found {actual}")]
    StatusMismatch {
        expected: PollStatus,
        actual: PollStatus,
    },

    #[error("another poll is already active")]
    ActivePollExists,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable poll and vote storage.
#[async_trait]
pub trait PollStore: Send + Sync + Debug {
    /// Persist a new poll
    async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll>;

    async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>>;

    /// The poll whose stored status is `active`, if any
    async fn find_active(&self) -> StoreResult<Option<Poll>>;

    /// Most recently created draft
    async fn latest_draft(&self) -> StoreResult<Option<Poll>>;

    /// Draft -> active. Fails with `ActivePollExists` if any other poll is
    /// active at the time of the write.
    async fn activate(
        &self,
        poll_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> StoreResult<Poll>;

    /// Active -> ended
    async fn finish(&self, poll_id: &str, at: DateTime<Utc>) -> StoreResult<Poll>;

    /// Insert the vote and bump the option and total counters together.
    ///
    /// Returns the poll as it is after the increment.
    async fn record_vote(&self, vote: Vote) -> StoreResult<Poll>;

    async fn find_vote(&self, poll_id: &str, student_session_id: &str)
        -> StoreResult<Option<Vote>>;

    async fn count_votes(&self, poll_id: &str) -> StoreResult<u64>;

    /// Ended polls, most recently created first
    async fn ended_polls(&self, offset: usize, limit: usize) -> StoreResult<Vec<Poll>>;
}

#[derive(Debug)]
struct StoredPoll {
    /// Insertion order, breaks `created_at` ties
    seq: u64,
    poll: Poll,
}

#[derive(Debug, Default)]
struct Inner {
    next_seq: u64,
    polls: HashMap<String, StoredPoll>,
    /// (poll id, session id) -> vote
    votes: HashMap<(String, String), Vote>,
}

impl Inner {
    fn newest_first(&self, status: PollStatus) -> Vec<&StoredPoll> {
        let mut polls: Vec<&StoredPoll> = self
            .polls
            .values()
            .filter(|p| p.poll.status == status)
            .collect();
        polls.sort_by(|a, b| {
            b.poll
                .created_at
                .cmp(&a.poll.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        polls
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryPollStore {
    inner: RwLock<Inner>,
}

impl MemoryPollStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored polls
    pub fn poll_count(&self) -> usize {
        self.inner.read().polls.len()
    }

    /// Number of polls whose stored status is active
    pub fn active_count(&self) -> usize {
        self.inner
            .read()
            .polls
            .values()
            .filter(|p| p.poll.status == PollStatus::Active)
            .count()
    }
}

#[async_trait]
impl PollStore for MemoryPollStore {
    async fn insert_poll(&self, poll: Poll) -> StoreResult<Poll> {
        let mut inner = self.inner.write();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.polls.insert(
            poll.id.clone(),
            StoredPoll {
                seq,
                poll: poll.clone(),
            },
        );
        Ok(poll)
    }

    async fn get_poll(&self, poll_id: &str) -> StoreResult<Option<Poll>> {
        Ok(self.inner.read().polls.get(poll_id).map(|p| p.poll.clone()))
    }

    async fn find_active(&self) -> StoreResult<Option<Poll>> {
        Ok(self
            .inner
            .read()
            .polls
            .values()
            .find(|p| p.poll.status == PollStatus::Active)
            .map(|p| p.poll.clone()))
    }

    async fn latest_draft(&self) -> StoreResult<Option<Poll>> {
        let inner = self.inner.read();
        Ok(inner
            .newest_first(PollStatus::Draft)
            .first()
            .map(|p| p.poll.clone()))
    }

    async fn activate(
        &self,
        poll_id: &str,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> StoreResult<Poll> {
        let mut inner = self.inner.write();

        let status = inner
            .polls
            .get(poll_id)
            .map(|p| p.poll.status)
            .ok_or(StoreError::PollNotFound)?;
        if status != PollStatus::Draft {
            return Err(StoreError::StatusMismatch {
                expected: PollStatus::Draft,
                actual: status,
            });
        }
        if inner
            .polls
            .values()
            .any(|p| p.poll.status == PollStatus::Active)
        {
            return Err(StoreError::ActivePollExists);
        }

        let stored = inner
            .polls
            .get_mut(poll_id)
            .ok_or(StoreError::PollNotFound)?;
        stored.poll.status = PollStatus::Active;
        stored.poll.start_time = Some(start_time);
        stored.poll.end_time = Some(end_time);
        stored.poll.updated_at = start_time;
        Ok(stored.poll.clone())
    }

    async fn finish(&self, poll_id: &str, at: DateTime<Utc>) -> StoreResult<Poll> {
        let mut inner = self.inner.write();
        let stored = inner
            .polls
            .get_mut(poll_id)
            .ok_or(StoreError::PollNotFound)?;
        if stored.poll.status != PollStatus::Active {
            return Err(StoreError::StatusMismatch {
                expected: PollStatus::Active,
                actual: stored.poll.status,
            });
        }
        stored.poll.status = PollStatus::Ended;
        stored.poll.updated_at = at;
        Ok(stored.poll.clone())
    }

    async fn record_vote(&self, vote: Vote) -> StoreResult<Poll> {
        let mut inner = self.inner.write();
        let key = (vote.poll_id.clone(), vote.student_session_id.clone());

        let stored = inner
            .polls
            .get(&vote.poll_id)
            .ok_or(StoreError::PollNotFound)?;
        if stored.poll.status != PollStatus::Active {
            return Err(StoreError::StatusMismatch {
                expected: PollStatus::Active,
                actual: stored.poll.status,
            });
        }
        if stored.poll.option(&vote.option_id).is_none() {
            return Err(StoreError::OptionNotFound);
        }
        if inner.votes.contains_key(&key) {
            return Err(StoreError::DuplicateVote);
        }

        let submitted_at = vote.submitted_at;
        let option_id = vote.option_id.clone();
        let poll_id = vote.poll_id.clone();
        inner.votes.insert(key, vote);

        let stored = inner
            .polls
            .get_mut(&poll_id)
            .ok_or(StoreError::PollNotFound)?;
        if let Some(option) = stored.poll.options.iter_mut().find(|o| o.id == option_id) {
            option.vote_count += 1;
        }
        stored.poll.total_votes += 1;
        stored.poll.updated_at = submitted_at;
        Ok(stored.poll.clone())
    }

    async fn find_vote(
        &self,
        poll_id: &str,
        student_session_id: &str,
    ) -> StoreResult<Option<Vote>> {
        Ok(self
            .inner
            .read()
            .votes
            .get(&(poll_id.to_string(), student_session_id.to_string()))
            .cloned())
    }

    async fn count_votes(&self, poll_id: &str) -> StoreResult<u64> {
        Ok(self
            .inner
            .read()
            .votes
            .keys()
            .filter(|(p, _)| p == poll_id)
            .count() as u64)
    }

    async fn ended_polls(&self, offset: usize, limit: usize) -> StoreResult<Vec<Poll>> {
        let inner = self.inner.read();
        Ok(inner
            .newest_first(PollStatus::Ended)
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|p| p.poll.clone())
            .collect())
    }
}

/// Create a shared in-memory store
pub fn create_store() -> Arc<MemoryPollStore> {
    Arc::new(MemoryPollStore::new())
}
