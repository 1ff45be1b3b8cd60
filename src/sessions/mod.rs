//! Sessions
//!
//! Opaque session identifiers issued to moderators and respondents, and the
//! registry that maps them to role, display name, activity flag, current poll
//! and live connection.

pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::polls::{Poll, PollError, PollResults};

pub use registry::{create_registry, MemorySessionRegistry, SessionRegistry};

/// Who a session belongs to.
///
/// Wire names keep the classroom vocabulary clients already use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "teacher")]
    Moderator,
    #[serde(rename = "student")]
    Respondent,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Moderator => "teacher",
            Role::Respondent => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    #[serde(rename = "userType")]
    pub role: Role,
    pub user_name: String,
    /// Poll this session was assigned to when it was started
    pub current_poll_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// False once kicked
    pub is_active: bool,
    /// Live WebSocket connection, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<Uuid>,
}

impl Session {
    pub fn is_moderator(&self) -> bool {
        self.role == Role::Moderator
    }

    /// Fail unless the session is still active.
    pub fn ensure_active(&self) -> Result<(), PollError> {
        if self.is_active {
            Ok(())
        } else {
            Err(PollError::SessionKicked)
        }
    }
}

/// Roster row shown to moderators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub session_id: String,
    pub user_name: String,
    pub user_type: Role,
    pub joined_at: DateTime<Utc>,
}

impl From<&Session> for Participant {
    fn from(session: &Session) -> Self {
        Self {
            session_id: session.session_id.clone(),
            user_name: session.user_name.clone(),
            user_type: session.role,
            joined_at: session.joined_at,
        }
    }
}

/// Session creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSession {
    pub user_type: Role,
    #[serde(default)]
    pub user_name: String,
}

impl NewSession {
    pub fn new(user_type: Role, user_name: impl Into<String>) -> Self {
        Self {
            user_type,
            user_name: user_name.into(),
        }
    }

    /// Trimmed display name, or a validation error when blank
    pub fn validated_name(&self) -> Result<String, PollError> {
        let name = self.user_name.trim();
        if name.is_empty() {
            return Err(PollError::Validation(
                "userName is required and must be a string".to_string(),
            ));
        }
        Ok(name.to_string())
    }
}

/// Everything a (re)connecting client needs to rebuild its view.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session: Session,
    pub active_poll: Option<Poll>,
    pub remaining_time: Option<i64>,
    pub has_voted: bool,
    pub selected_option: Option<String>,
    pub poll_results: Option<PollResults>,
}
