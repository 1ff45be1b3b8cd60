//! Poll Model
//!
//! Records persisted by the poll store and the validated inputs that create them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::error::PollError;

/// Longest question accepted unless configured otherwise.
pub const DEFAULT_MAX_QUESTION_LENGTH: usize = 100;

/// Minimum number of options a poll is created with.
pub const MIN_OPTIONS: usize = 2;

/// Poll lifecycle status.
///
/// Transitions are monotonic: `Draft -> Active -> Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollStatus {
    #[default]
    Draft,
    Active,
    Ended,
}

impl PollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PollStatus::Draft => "draft",
            PollStatus::Active => "active",
            PollStatus::Ended => "ended",
        }
    }

    /// Whether `next` is the single legal successor of `self`.
    pub fn can_transition_to(&self, next: PollStatus) -> bool {
        matches!(
            (self, next),
            (PollStatus::Draft, PollStatus::Active) | (PollStatus::Active, PollStatus::Ended)
        )
    }
}

impl fmt::Display for PollStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Poll option/choice
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    /// Option ID (unique within poll)
    pub id: String,
    /// Option text/label
    pub text: String,
    /// Whether this is the correct answer
    #[serde(default)]
    pub is_correct: bool,
    /// Votes received so far
    #[serde(default)]
    pub vote_count: u64,
}

impl PollOption {
    /// Create a new option with a fresh id and no votes
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            is_correct: false,
            vote_count: 0,
        }
    }

    /// Mark as correct answer
    pub fn correct(mut self) -> Self {
        self.is_correct = true;
        self
    }
}

/// One question instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    /// Time limit in whole seconds
    pub duration: u32,
    pub status: PollStatus,
    /// Set together with `end_time` on the draft -> active transition
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Session id of the moderator that created the poll
    pub created_by: String,
    pub total_votes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Poll {
    /// Look up an option by id
    pub fn option(&self, option_id: &str) -> Option<&PollOption> {
        self.options.iter().find(|o| o.id == option_id)
    }

    /// Whether the active poll has passed its end time at `now`.
    ///
    /// Polls that are not active never count as expired.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.status != PollStatus::Active {
            return false;
        }
        match self.end_time {
            Some(end) => now >= end,
            None => false,
        }
    }

    /// Whole seconds left before the end time, clamped at zero.
    ///
    /// `None` when the poll is not active.
    pub fn remaining_seconds_at(&self, now: DateTime<Utc>) -> Option<i64> {
        if self.status != PollStatus::Active {
            return None;
        }
        let end = self.end_time?;
        Some((end - now).num_seconds().max(0))
    }

    /// Sum of the per-option counters
    pub fn counted_votes(&self) -> u64 {
        self.options.iter().map(|o| o.vote_count).sum()
    }
}

/// One respondent's choice for one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: String,
    pub poll_id: String,
    pub option_id: String,
    pub student_name: String,
    pub student_session_id: String,
    pub submitted_at: DateTime<Utc>,
    /// Question text at submission time
    pub poll_question: String,
    /// Chosen option text at submission time
    pub selected_option: String,
}

/// Option input for poll creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewOption {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_correct: bool,
}

impl NewOption {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_correct: false,
        }
    }

    pub fn correct(mut self) -> Self {
        self.is_correct = true;
        self
    }
}

/// Poll creation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPoll {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub options: Vec<NewOption>,
    /// Signed so out-of-range input surfaces as a validation error
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub created_by: String,
}

impl NewPoll {
    pub fn new(question: impl Into<String>, duration: i64, created_by: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            options: Vec::new(),
            duration,
            created_by: created_by.into(),
        }
    }

    /// Set options
    pub fn with_options(mut self, options: Vec<NewOption>) -> Self {
        self.options = options;
        self
    }

    /// Validate and normalize the request.
    pub fn validate(&self, max_question_length: usize) -> Result<ValidPoll, PollError> {
        let question = self.question.trim();
        if question.is_empty() {
            return Err(PollError::Validation(
                "Question is required and must be a string".to_string(),
            ));
        }
        if question.chars().count() > max_question_length {
            return Err(PollError::Validation(format!(
                "Question must be less than {} characters",
                max_question_length
            )));
        }

        if self.options.len() < MIN_OPTIONS {
            return Err(PollError::Validation(
                "Poll must have at least 2 options".to_string(),
            ));
        }
        let mut options = Vec::with_capacity(self.options.len());
        for option in &self.options {
            let text = option.text.trim();
            if text.is_empty() {
                return Err(PollError::Validation(
                    "Each option must have a text property".to_string(),
                ));
            }
            options.push(NewOption {
                text: text.to_string(),
                is_correct: option.is_correct,
            });
        }

        if self.duration < 1 || self.duration > u32::MAX as i64 {
            return Err(PollError::Validation(
                "Duration must be a positive number".to_string(),
            ));
        }

        let created_by = self.created_by.trim();
        if created_by.is_empty() {
            return Err(PollError::Validation("createdBy is required".to_string()));
        }

        Ok(ValidPoll {
            question: question.to_string(),
            options,
            duration: self.duration as u32,
            created_by: created_by.to_string(),
        })
    }
}

/// A creation request that passed validation.
#[derive(Debug, Clone)]
pub struct ValidPoll {
    pub question: String,
    pub options: Vec<NewOption>,
    pub duration: u32,
    pub created_by: String,
}

impl ValidPoll {
    /// Materialize a draft poll with fresh ids.
    pub fn into_draft(self, now: DateTime<Utc>) -> Poll {
        Poll {
            id: Uuid::new_v4().to_string(),
            question: self.question,
            options: self
                .options
                .into_iter()
                .map(|o| {
                    let option = PollOption::new(o.text);
                    if o.is_correct {
                        option.correct()
                    } else {
                        option
                    }
                })
                .collect(),
            duration: self.duration,
            status: PollStatus::Draft,
            start_time: None,
            end_time: None,
            created_by: self.created_by,
            total_votes: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn two_options() -> Vec<NewOption> {
        vec![NewOption::new("A"), NewOption::new("B")]
    }

    #[test]
    fn test_validate_accepts_minimal_poll() {
        let valid = NewPoll::new("  Q1  ", 30, "teacher-1")
            .with_options(two_options())
            .validate(DEFAULT_MAX_QUESTION_LENGTH)
            .unwrap();
        assert_eq!(valid.question, "Q1");
        assert_eq!(valid.duration, 30);
        assert_eq!(valid.options.len(), 2);
    }

    #[test]
    fn test_validate_rejects_bad_input() {
        let cases = vec![
            NewPoll::new("", 30, "t").with_options(two_options()),
            NewPoll::new("Q", 30, "t").with_options(vec![NewOption::new("A")]),
            NewPoll::new("Q", 0, "t").with_options(two_options()),
            NewPoll::new("Q", -5, "t").with_options(two_options()),
            NewPoll::new("Q", 30, " ").with_options(two_options()),
            NewPoll::new("Q", 30, "t").with_options(vec![NewOption::new("A"), NewOption::new(" ")]),
            NewPoll::new("x".repeat(101), 30, "t").with_options(two_options()),
        ];
        for poll in cases {
            let err = poll.validate(DEFAULT_MAX_QUESTION_LENGTH).unwrap_err();
            assert!(matches!(err, PollError::Validation(_)), "{:?}", poll);
        }
    }

    #[test]
    fn test_question_length_counts_chars() {
        let poll = NewPoll::new("é".repeat(100), 10, "t").with_options(two_options());
        assert!(poll.validate(DEFAULT_MAX_QUESTION_LENGTH).is_ok());
    }

    #[test]
    fn test_into_draft_starts_empty() {
        let now = Utc::now();
        let poll = NewPoll::new("Q1", 30, "t")
            .with_options(vec![NewOption::new("A").correct(), NewOption::new("B")])
            .validate(DEFAULT_MAX_QUESTION_LENGTH)
            .unwrap()
            .into_draft(now);
        assert_eq!(poll.status, PollStatus::Draft);
        assert_eq!(poll.total_votes, 0);
        assert!(poll.options.iter().all(|o| o.vote_count == 0));
        assert!(poll.options[0].is_correct);
        assert_ne!(poll.options[0].id, poll.options[1].id);
        assert!(poll.start_time.is_none() && poll.end_time.is_none());
    }

    #[test]
    fn test_status_transitions() {
        assert!(PollStatus::Draft.can_transition_to(PollStatus::Active));
        assert!(PollStatus::Active.can_transition_to(PollStatus::Ended));
        assert!(!PollStatus::Draft.can_transition_to(PollStatus::Ended));
        assert!(!PollStatus::Ended.can_transition_to(PollStatus::Active));
        assert!(!PollStatus::Active.can_transition_to(PollStatus::Draft));
    }

    #[test]
    fn test_expiry_and_remaining() {
        let start = Utc::now();
        let mut poll = NewPoll::new("Q", 30, "t")
            .with_options(two_options())
            .validate(DEFAULT_MAX_QUESTION_LENGTH)
            .unwrap()
            .into_draft(start);
        assert_eq!(poll.remaining_seconds_at(start), None);
        assert!(!poll.is_expired_at(start + Duration::seconds(60)));

        poll.status = PollStatus::Active;
        poll.start_time = Some(start);
        poll.end_time = Some(start + Duration::seconds(30));

        assert_eq!(poll.remaining_seconds_at(start), Some(30));
        assert_eq!(
            poll.remaining_seconds_at(start + Duration::milliseconds(1500)),
            Some(28)
        );
        assert!(!poll.is_expired_at(start + Duration::milliseconds(29_999)));
        assert!(poll.is_expired_at(start + Duration::seconds(30)));
        assert_eq!(poll.remaining_seconds_at(start + Duration::seconds(31)), Some(0));
    }

    #[test]
    fn test_poll_serializes_camel_case() {
        let poll = NewPoll::new("Q", 30, "t")
            .with_options(two_options())
            .validate(DEFAULT_MAX_QUESTION_LENGTH)
            .unwrap()
            .into_draft(Utc::now());
        let value = serde_json::to_value(&poll).unwrap();
        assert_eq!(value["status"], "draft");
        assert_eq!(value["totalVotes"], 0);
        assert_eq!(value["options"][0]["voteCount"], 0);
        assert_eq!(value["options"][0]["isCorrect"], false);
        assert!(value["startTime"].is_null());
    }
}
