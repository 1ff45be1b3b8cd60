//! Shared server state
//!
//! Owns every service instance and exposes the actions both transports call.
//! Role checks, broadcasts and countdown start/stop all happen here, so an
//! HTTP request and the matching WebSocket event behave the same way.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::PollsConfig;
use crate::metrics::PollMetrics;
use crate::polls::{
    ActivePoll, Clock, MemoryPollStore, NewPoll, Poll, PollError, PollLifecycle, PollResult,
    PollResults, PollStore, SubmitVote, SystemClock, VoteAggregator, VoteReceipt,
};
use crate::server::ws::gateway::{Channel, Connection, Gateway};
use crate::server::ws::protocol::{PollCreated, ServerEvent};
use crate::sessions::{
    MemorySessionRegistry, NewSession, Participant, Role, Session, SessionRegistry, SessionState,
};
use crate::timer::TimerService;

/// An ended poll with its final tallies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndedPoll {
    pub poll: Poll,
    pub results: PollResults,
}

#[derive(Debug)]
pub struct AppState {
    pub sessions: Arc<dyn SessionRegistry>,
    pub lifecycle: PollLifecycle,
    pub votes: VoteAggregator,
    pub timer: Arc<TimerService>,
    pub gateway: Arc<Gateway>,
    pub metrics: Arc<PollMetrics>,
    clock: Arc<dyn Clock>,
}

impl AppState {
    /// In-memory store and registry on the system clock
    pub fn new(config: &PollsConfig) -> Arc<Self> {
        Self::with_parts(
            Arc::new(MemoryPollStore::new()),
            Arc::new(MemorySessionRegistry::new()),
            Arc::new(SystemClock),
            config,
        )
    }

    pub fn with_parts(
        store: Arc<dyn PollStore>,
        sessions: Arc<dyn SessionRegistry>,
        clock: Arc<dyn Clock>,
        config: &PollsConfig,
    ) -> Arc<Self> {
        let metrics = Arc::new(PollMetrics::new());
        let gateway = Arc::new(Gateway::new());
        let lifecycle = PollLifecycle::new(
            store.clone(),
            sessions.clone(),
            clock.clone(),
            metrics.clone(),
        )
        .with_limits(config.max_question_length, config.history_page_size);
        let votes = VoteAggregator::new(store, clock.clone(), metrics.clone());
        let timer = Arc::new(TimerService::new(
            lifecycle.clone(),
            votes.clone(),
            gateway.clone(),
            metrics.clone(),
            Duration::from_millis(config.tick_interval_ms),
        ));

        Arc::new(Self {
            sessions,
            lifecycle,
            votes,
            timer,
            gateway,
            metrics,
            clock,
        })
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub async fn create_session(&self, request: &NewSession) -> PollResult<Session> {
        let name = request.validated_name()?;
        let session = self
            .sessions
            .create(request.user_type, &name, self.clock.now())
            .await?;
        info!(
            session_id = %session.session_id,
            role = %session.role,
            "Session created"
        );
        Ok(session)
    }

    /// Resolve an active session.
    pub async fn require_session(&self, session_id: &str) -> PollResult<Session> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or(PollError::SessionNotFound)?;
        session.ensure_active()?;
        Ok(session)
    }

    /// Resolve an active moderator session.
    pub async fn require_moderator(&self, session_id: &str, action: &str) -> PollResult<Session> {
        let session = self.require_session(session_id).await?;
        if !session.is_moderator() {
            debug!(session_id, action, "Moderator action refused");
            return Err(PollError::forbidden(format!("Only teachers can {}", action)));
        }
        Ok(session)
    }

    /// Everything a client needs to rebuild its view.
    pub async fn session_state(&self, session_id: &str) -> PollResult<SessionState> {
        let session = self.require_session(session_id).await?;
        let active_poll = self.lifecycle.reconciled_active().await;
        self.announce_expired().await;
        let active_poll = active_poll?;

        let mut state = SessionState {
            remaining_time: None,
            has_voted: false,
            selected_option: None,
            poll_results: None,
            active_poll: None,
            session,
        };
        let Some(poll) = active_poll else {
            return Ok(state);
        };

        state.remaining_time = self.lifecycle.remaining_seconds(&poll);
        if state.session.role == Role::Respondent {
            if let Some(vote) = self
                .votes
                .find_vote(&poll.id, &state.session.session_id)
                .await?
            {
                state.has_voted = true;
                state.selected_option = Some(vote.option_id);
            }
        }
        if state.session.is_moderator() || state.has_voted {
            state.poll_results = Some(PollResults::from_poll(&poll));
        }
        state.active_poll = Some(poll);
        Ok(state)
    }

    /// Bind a connection to a session, subscribe it and replay its state.
    pub async fn join_session(
        &self,
        connection: &Arc<Connection>,
        session_id: &str,
    ) -> PollResult<SessionState> {
        let state = self.session_state(session_id).await?;
        self.sessions
            .attach_connection(session_id, connection.id, self.clock.now())
            .await?;

        self.gateway.leave_all(&connection.id);
        connection.bind_session(session_id);
        self.gateway
            .join(&connection.id, Channel::Session(session_id.to_string()));
        self.gateway
            .join(&connection.id, Channel::Role(state.session.role));

        if let Some(poll) = &state.active_poll {
            self.gateway
                .join(&connection.id, Channel::Poll(poll.id.clone()));
            if state.session.current_poll_id.as_deref() != Some(poll.id.as_str()) {
                self.sessions.set_current_poll(session_id, &poll.id).await?;
            }
            // Picks the countdown back up after a restart; no-op when running
            self.timer.start(&poll.id);
        }

        self.gateway
            .send(&connection.id, &ServerEvent::state_recovered(state.clone()));
        info!(
            conn_id = %connection.id,
            session_id,
            role = %state.session.role,
            "Session joined"
        );
        Ok(state)
    }

    /// Active sessions, most recently joined first.
    pub async fn participants(
        &self,
        moderator_session_id: &str,
        poll_id: Option<&str>,
    ) -> PollResult<Vec<Participant>> {
        self.require_moderator(moderator_session_id, "view participants")
            .await?;
        let sessions = self.sessions.participants(poll_id).await?;
        Ok(sessions.iter().map(Participant::from).collect())
    }

    /// Deactivate a session and tell it, and every moderator, about it.
    pub async fn kick(
        &self,
        moderator_session_id: &str,
        target_session_id: &str,
    ) -> PollResult<Session> {
        self.require_moderator(moderator_session_id, "kick students")
            .await?;
        let target = self.sessions.kick(target_session_id).await?;

        let event = ServerEvent::student_kicked(target_session_id);
        let session_channel = Channel::Session(target_session_id.to_string());
        self.gateway.broadcast(&session_channel, &event);
        self.gateway
            .broadcast(&Channel::Role(Role::Moderator), &event);
        for conn_id in self.gateway.close_channel(&session_channel) {
            self.gateway.revoke(&conn_id);
        }
        info!(
            session_id = %moderator_session_id,
            target_session_id,
            "Session kicked"
        );
        Ok(target)
    }

    // ------------------------------------------------------------------
    // Polls
    // ------------------------------------------------------------------

    pub async fn create_poll(&self, request: &NewPoll) -> PollResult<Poll> {
        if !request.created_by.trim().is_empty() {
            self.require_moderator(request.created_by.trim(), "create polls")
                .await?;
        }
        let poll = self.lifecycle.create_poll(request).await?;
        self.gateway.broadcast(
            &Channel::Role(Role::Moderator),
            &ServerEvent::PollCreated(PollCreated { poll: poll.clone() }),
        );
        Ok(poll)
    }

    /// Start a draft, move every live connection into its channel, announce
    /// it and start the countdown.
    pub async fn start_poll(&self, poll_id: &str, moderator_session_id: &str) -> PollResult<Poll> {
        self.require_moderator(moderator_session_id, "start polls")
            .await?;
        let started = self
            .lifecycle
            .start_poll(poll_id, moderator_session_id)
            .await;
        // The outgoing poll may have expired on the way in
        self.announce_expired().await;
        let poll = started?;

        let channel = Channel::Poll(poll.id.clone());
        self.gateway.join_all(channel.clone());
        self.gateway
            .broadcast(&channel, &ServerEvent::poll_started(&poll));
        self.timer.start(&poll.id);
        Ok(poll)
    }

    /// End an active poll early and announce the final results.
    pub async fn end_poll(&self, poll_id: &str, moderator_session_id: &str) -> PollResult<EndedPoll> {
        self.require_moderator(moderator_session_id, "end polls")
            .await?;
        let poll = self.lifecycle.end_poll(poll_id).await?;
        self.timer.stop(&poll.id);
        let results = self.timer.announce_ended(&poll.id).await?;
        Ok(EndedPoll { poll, results })
    }

    /// The running poll with its countdown, else the newest draft.
    pub async fn active_poll(&self) -> PollResult<Option<ActivePoll>> {
        let active = self.lifecycle.get_active_poll().await;
        self.announce_expired().await;
        active
    }

    pub async fn can_create_new_poll(&self) -> PollResult<bool> {
        let allowed = self.lifecycle.can_create_new_poll().await;
        self.announce_expired().await;
        allowed
    }

    /// Announce every poll a read found expired and stop its countdown.
    async fn announce_expired(&self) {
        for poll_id in self.lifecycle.drain_unannounced() {
            self.timer.stop(&poll_id);
            if let Err(err) = self.timer.announce_ended(&poll_id).await {
                warn!(poll_id = %poll_id, error = %err, "Failed to announce expired poll");
            }
        }
    }

    /// Record a respondent's vote and push the new tallies.
    pub async fn submit_vote(&self, mut request: SubmitVote) -> PollResult<VoteReceipt> {
        if request.student_session_id.trim().is_empty() {
            return Err(PollError::Validation(
                "studentSessionId is required".to_string(),
            ));
        }
        let session = self.require_session(&request.student_session_id).await?;
        if session.role != Role::Respondent {
            return Err(PollError::forbidden("Only students can vote"));
        }
        if request.student_name.trim().is_empty() {
            request.student_name = session.user_name.clone();
        }

        let receipt = self.votes.submit_vote(&request).await?;
        self.gateway.broadcast(
            &Channel::Poll(receipt.results.poll_id.clone()),
            &ServerEvent::vote_received(receipt.results.clone()),
        );
        Ok(receipt)
    }

    /// Stop background work.
    pub fn shutdown(&self) {
        self.timer.shutdown();
    }
}
