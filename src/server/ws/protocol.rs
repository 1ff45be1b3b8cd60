//! WebSocket protocol message types.
//!
//! Every frame is a JSON object `{"event": "<name>", "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::polls::{NewPoll, Poll, PollError, PollResults};
use crate::sessions::SessionState;

/// Shown to a respondent removed by the moderator
pub const KICKED_MESSAGE: &str = "You've been kicked out";

// ============================================================================
// Client -> Server
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to a session and replay its state
    JoinSession(SessionRef),
    CreatePoll(NewPoll),
    StartPoll(StartPollPayload),
    SubmitVote(SubmitVotePayload),
    EndPoll(EndPollPayload),
    /// Replay state without re-subscribing
    RequestState(SessionRef),
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire name, echoed back on errors
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinSession(_) => "join_session",
            ClientEvent::CreatePoll(_) => "create_poll",
            ClientEvent::StartPoll(_) => "start_poll",
            ClientEvent::SubmitVote(_) => "submit_vote",
            ClientEvent::EndPoll(_) => "end_poll",
            ClientEvent::RequestState(_) => "request_state",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRef {
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPollPayload {
    pub poll_id: String,
    /// Defaults to the session bound to the connection
    #[serde(default)]
    pub teacher_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitVotePayload {
    pub poll_id: String,
    pub option_id: String,
    /// Defaults to the session's display name
    #[serde(default)]
    pub student_name: Option<String>,
    /// Defaults to the session bound to the connection
    #[serde(default)]
    pub student_session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndPollPayload {
    pub poll_id: String,
}

// ============================================================================
// Server -> Client
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    StateRecovered(Box<SessionState>),
    PollCreated(PollCreated),
    PollStarted(PollStarted),
    VoteReceived(VoteReceived),
    PollEnded(PollEnded),
    TimerUpdate(TimerUpdate),
    StudentKicked(StudentKicked),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::StateRecovered(_) => "state_recovered",
            ServerEvent::PollCreated(_) => "poll_created",
            ServerEvent::PollStarted(_) => "poll_started",
            ServerEvent::VoteReceived(_) => "vote_received",
            ServerEvent::PollEnded(_) => "poll_ended",
            ServerEvent::TimerUpdate(_) => "timer_update",
            ServerEvent::StudentKicked(_) => "student_kicked",
            ServerEvent::Error(_) => "error",
        }
    }

    pub fn state_recovered(state: SessionState) -> Self {
        ServerEvent::StateRecovered(Box::new(state))
    }

    pub fn poll_started(poll: &Poll) -> Self {
        ServerEvent::PollStarted(PollStarted {
            start_time: poll.start_time,
            duration: poll.duration,
            poll: poll.clone(),
        })
    }

    pub fn vote_received(results: PollResults) -> Self {
        ServerEvent::VoteReceived(VoteReceived {
            poll_id: results.poll_id.clone(),
            results,
        })
    }

    pub fn poll_ended(final_results: PollResults) -> Self {
        ServerEvent::PollEnded(PollEnded {
            poll_id: final_results.poll_id.clone(),
            final_results,
        })
    }

    pub fn timer_update(poll_id: &str, remaining_time: i64) -> Self {
        ServerEvent::TimerUpdate(TimerUpdate {
            poll_id: poll_id.to_string(),
            remaining_time,
        })
    }

    pub fn student_kicked(target_session_id: &str) -> Self {
        ServerEvent::StudentKicked(StudentKicked {
            target_session_id: target_session_id.to_string(),
            message: KICKED_MESSAGE.to_string(),
        })
    }

    /// Error frame for a failed inbound event
    pub fn error(err: &PollError, event: Option<&str>) -> Self {
        ServerEvent::Error(ErrorPayload {
            message: err.to_string(),
            code: err.code().to_string(),
            event: event.map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreated {
    pub poll: Poll,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStarted {
    pub poll: Poll,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteReceived {
    pub poll_id: String,
    pub results: PollResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollEnded {
    pub poll_id: String,
    pub final_results: PollResults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerUpdate {
    pub poll_id: String,
    pub remaining_time: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentKicked {
    pub target_session_id: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    /// Stable machine-readable code
    pub code: String,
    /// Inbound event that failed, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_join_session() {
        let event =
            ClientEvent::decode(r#"{"event":"join_session","data":{"sessionId":"s1"}}"#).unwrap();
        match event {
            ClientEvent::JoinSession(SessionRef { session_id }) => assert_eq!(session_id, "s1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_decode_create_poll() {
        let text = json!({
            "event": "create_poll",
            "data": {
                "question": "Q1",
                "options": [{"text": "A", "isCorrect": true}, {"text": "B"}],
                "duration": 30,
                "createdBy": "t1"
            }
        })
        .to_string();
        let ClientEvent::CreatePoll(poll) = ClientEvent::decode(&text).unwrap() else {
            panic!("expected create_poll");
        };
        assert_eq!(poll.question, "Q1");
        assert!(poll.options[0].is_correct);
        assert!(!poll.options[1].is_correct);
        assert_eq!(poll.duration, 30);
    }

    #[test]
    fn test_decode_vote_without_name() {
        let text = r#"{"event":"submit_vote","data":{"pollId":"p","optionId":"o","studentSessionId":"s"}}"#;
        let ClientEvent::SubmitVote(vote) = ClientEvent::decode(text).unwrap() else {
            panic!("expected submit_vote");
        };
        assert!(vote.student_name.is_none());
        assert_eq!(vote.student_session_id.as_deref(), Some("s"));
    }

    #[test]
    fn test_decode_rejects_unknown_event() {
        assert!(ClientEvent::decode(r#"{"event":"chat","data":{}}"#).is_err());
        assert!(ClientEvent::decode("not json").is_err());
    }

    #[test]
    fn test_encode_timer_update() {
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::timer_update("p1", 12).encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "timer_update", "data": {"pollId": "p1", "remainingTime": 12}})
        );
    }

    #[test]
    fn test_encode_error_and_kick() {
        let err = ServerEvent::error(&PollError::AlreadyVoted, Some("submit_vote"));
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["code"], "ALREADY_VOTED");
        assert_eq!(value["data"]["message"], "Student has already voted");
        assert_eq!(value["data"]["event"], "submit_vote");

        let kick = serde_json::to_value(ServerEvent::student_kicked("s9")).unwrap();
        assert_eq!(kick["data"]["targetSessionId"], "s9");
        assert_eq!(kick["data"]["message"], KICKED_MESSAGE);
    }

    #[test]
    fn test_names_match_wire_tags() {
        let event = ServerEvent::timer_update("p", 1);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], event.name());
    }
}
