//! Inbound event handlers
//!
//! Decodes one text frame, runs the matching action and answers failures with
//! an `error` frame to the sender only. Successful actions reply through the
//! broadcasts the action itself performs.

use std::sync::Arc;
use tracing::{debug, warn};

use super::gateway::Connection;
use super::protocol::{ClientEvent, SessionRef, ServerEvent};
use crate::polls::{ErrorKind, PollError, PollResult, SubmitVote};
use crate::server::state::AppState;

/// Handle one text frame from `connection`.
pub async fn handle_text(state: &Arc<AppState>, connection: &Arc<Connection>, text: &str) {
    let event = match ClientEvent::decode(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(conn_id = %connection.id, "Undecodable frame: {}", e);
            let err = PollError::Validation(format!("Invalid message: {}", e));
            state.gateway.send(&connection.id, &ServerEvent::error(&err, None));
            return;
        }
    };

    let name = event.name();
    if let Err(err) = dispatch(state, connection, event).await {
        if err.kind() == ErrorKind::Unavailable {
            warn!(conn_id = %connection.id, event = name, error = ?err, "Event failed");
        } else {
            debug!(conn_id = %connection.id, event = name, code = err.code(), "Event rejected");
        }
        state
            .gateway
            .send(&connection.id, &ServerEvent::error(&err, Some(name)));
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    connection: &Arc<Connection>,
    event: ClientEvent,
) -> PollResult<()> {
    match event {
        ClientEvent::JoinSession(SessionRef { session_id }) => {
            state.join_session(connection, &session_id).await?;
        }
        ClientEvent::RequestState(SessionRef { session_id }) => {
            let session_id = acting_session(connection, Some(session_id))?;
            let snapshot = state.session_state(&session_id).await?;
            state
                .gateway
                .send(&connection.id, &ServerEvent::state_recovered(snapshot));
        }
        ClientEvent::CreatePoll(mut request) => {
            let created_by = (!request.created_by.trim().is_empty())
                .then(|| request.created_by.clone());
            request.created_by = acting_session(connection, created_by)?;
            state.create_poll(&request).await?;
        }
        ClientEvent::StartPoll(payload) => {
            let session_id = acting_session(connection, payload.teacher_session_id)?;
            state.start_poll(&payload.poll_id, &session_id).await?;
        }
        ClientEvent::SubmitVote(payload) => {
            let session_id = acting_session(connection, payload.student_session_id)?;
            let request = SubmitVote::new(
                payload.poll_id,
                payload.option_id,
                payload.student_name.unwrap_or_default(),
                session_id,
            );
            state.submit_vote(request).await?;
        }
        ClientEvent::EndPoll(payload) => {
            let session_id = acting_session(connection, None)?;
            state.end_poll(&payload.poll_id, &session_id).await?;
        }
    }
    Ok(())
}

/// Session an event acts for.
///
/// An explicit id must agree with the session bound by `join_session`; without
/// one, the bound session is used.
fn acting_session(connection: &Connection, explicit: Option<String>) -> PollResult<String> {
    let explicit = explicit.filter(|id| !id.trim().is_empty());
    match (connection.session_id(), explicit) {
        (Some(bound), Some(explicit)) if bound != explicit => Err(PollError::forbidden(
            "Session does not match this connection",
        )),
        (_, Some(explicit)) => Ok(explicit),
        (Some(bound), None) => Ok(bound),
        (None, None) => Err(PollError::Validation(
            "Join a session before sending events".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PollsConfig;
    use crate::server::ws::gateway::Outbox;
    use crate::sessions::{NewSession, Role};
    use serde_json::{json, Value};

    fn app() -> Arc<AppState> {
        AppState::new(&PollsConfig {
            tick_interval_ms: 60_000,
            ..PollsConfig::default()
        })
    }

    fn drain(rx: &mut Outbox) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    async fn send(state: &Arc<AppState>, conn: &Arc<Connection>, frame: Value) {
        handle_text(state, conn, &frame.to_string()).await;
    }

    #[tokio::test]
    async fn test_garbage_frame_gets_error() {
        let state = app();
        let (conn, mut rx) = state.gateway.register();
        handle_text(&state, &conn, "{not json").await;

        let frames = drain(&mut rx);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["event"], "error");
        assert_eq!(frames[0]["data"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_event_before_join_is_rejected() {
        let state = app();
        let (conn, mut rx) = state.gateway.register();
        send(&state, &conn, json!({"event": "end_poll", "data": {"pollId": "p"}})).await;

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["data"]["event"], "end_poll");
        assert_eq!(frames[0]["data"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_full_round_over_socket_events() {
        let state = app();
        let teacher = state
            .create_session(&NewSession::new(Role::Moderator, "T"))
            .await
            .unwrap();
        let student = state
            .create_session(&NewSession::new(Role::Respondent, "Ada"))
            .await
            .unwrap();
        let (t_conn, mut t_rx) = state.gateway.register();
        let (s_conn, mut s_rx) = state.gateway.register();

        send(&state, &t_conn, json!({"event": "join_session", "data": {"sessionId": teacher.session_id}})).await;
        send(&state, &s_conn, json!({"event": "join_session", "data": {"sessionId": student.session_id}})).await;
        assert_eq!(drain(&mut t_rx)[0]["event"], "state_recovered");
        assert_eq!(drain(&mut s_rx)[0]["event"], "state_recovered");

        send(&state, &t_conn, json!({
            "event": "create_poll",
            "data": {"question": "Q", "options": [{"text": "A"}, {"text": "B"}], "duration": 30}
        }))
        .await;
        let created = drain(&mut t_rx);
        assert_eq!(created[0]["event"], "poll_created");
        let poll_id = created[0]["data"]["poll"]["id"].as_str().unwrap().to_string();
        let option_id = created[0]["data"]["poll"]["options"][0]["id"]
            .as_str()
            .unwrap()
            .to_string();

        send(&state, &t_conn, json!({"event": "start_poll", "data": {"pollId": poll_id}})).await;
        assert_eq!(drain(&mut s_rx)[0]["event"], "poll_started");
        drain(&mut t_rx);

        send(&state, &s_conn, json!({
            "event": "submit_vote",
            "data": {"pollId": poll_id, "optionId": option_id}
        }))
        .await;
        let received = drain(&mut t_rx);
        assert_eq!(received[0]["event"], "vote_received");
        assert_eq!(received[0]["data"]["results"]["totalVotes"], 1);
        drain(&mut s_rx);

        // Second vote only errors back to the voter
        send(&state, &s_conn, json!({
            "event": "submit_vote",
            "data": {"pollId": poll_id, "optionId": option_id}
        }))
        .await;
        let rejected = drain(&mut s_rx);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0]["data"]["code"], "ALREADY_VOTED");
        assert!(drain(&mut t_rx).is_empty());

        send(&state, &t_conn, json!({"event": "end_poll", "data": {"pollId": poll_id}})).await;
        let ended = drain(&mut s_rx);
        assert_eq!(ended[0]["event"], "poll_ended");
        assert_eq!(ended[0]["data"]["finalResults"]["totalVotes"], 1);
        state.shutdown();
    }

    #[tokio::test]
    async fn test_spoofed_session_is_forbidden() {
        let state = app();
        let student = state
            .create_session(&NewSession::new(Role::Respondent, "S"))
            .await
            .unwrap();
        let (conn, mut rx) = state.gateway.register();
        send(&state, &conn, json!({"event": "join_session", "data": {"sessionId": student.session_id}})).await;
        drain(&mut rx);

        send(&state, &conn, json!({
            "event": "start_poll",
            "data": {"pollId": "p", "teacherSessionId": "someone-else"}
        }))
        .await;
        let frames = drain(&mut rx);
        assert_eq!(frames[0]["data"]["code"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_request_state_replays_without_join() {
        let state = app();
        let student = state
            .create_session(&NewSession::new(Role::Respondent, "S"))
            .await
            .unwrap();
        let (conn, mut rx) = state.gateway.register();
        send(&state, &conn, json!({"event": "request_state", "data": {"sessionId": student.session_id}})).await;

        let frames = drain(&mut rx);
        assert_eq!(frames[0]["event"], "state_recovered");
        assert_eq!(frames[0]["data"]["session"]["userName"], "S");
        assert!(conn.session_id().is_none());
    }
}
