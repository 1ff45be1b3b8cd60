//! Session registry
//!
//! Boundary to the identity collaborator. The poll core only reads role,
//! activity and current-poll assignment; the in-memory implementation exists
//! so the server can run standalone.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;
use uuid::Uuid;

use super::{Role, Session};
use crate::polls::{StoreError, StoreResult};

#[async_trait]
pub trait SessionRegistry: Send + Sync + Debug {
    /// Issue a new session id
    async fn create(&self, role: Role, user_name: &str, now: DateTime<Utc>)
        -> StoreResult<Session>;

    async fn get(&self, session_id: &str) -> StoreResult<Option<Session>>;

    /// Record the live connection for a session and bump its activity time
    async fn attach_connection(
        &self,
        session_id: &str,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Point every active session at `poll_id`
    async fn assign_current_poll_to_active(&self, poll_id: &str) -> StoreResult<usize>;

    async fn set_current_poll(&self, session_id: &str, poll_id: &str) -> StoreResult<()>;

    /// Active respondents whose current poll is `poll_id`
    async fn count_active_respondents(&self, poll_id: &str) -> StoreResult<u64>;

    /// Active sessions, most recently joined first, optionally limited to a poll
    async fn participants(&self, poll_id: Option<&str>) -> StoreResult<Vec<Session>>;

    /// Deactivate a session. Returns the updated session.
    async fn kick(&self, session_id: &str) -> StoreResult<Session>;
}

/// In-memory session registry
#[derive(Debug, Default)]
pub struct MemorySessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRegistry for MemorySessionRegistry {
    async fn create(
        &self,
        role: Role,
        user_name: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Session> {
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            role,
            user_name: user_name.to_string(),
            current_poll_id: None,
            joined_at: now,
            last_active_at: now,
            is_active: true,
            connection_id: None,
        };
        self.sessions
            .write()
            .insert(session.session_id.clone(), session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: &str) -> StoreResult<Option<Session>> {
        Ok(self.sessions.read().get(session_id).cloned())
    }

    async fn attach_connection(
        &self,
        session_id: &str,
        connection_id: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or(StoreError::SessionNotFound)?;
        session.connection_id = Some(connection_id);
        session.last_active_at = now;
        Ok(())
    }

    async fn assign_current_poll_to_active(&self, poll_id: &str) -> StoreResult<usize> {
        let mut sessions = self.sessions.write();
        let mut assigned = 0;
        for session in sessions.values_mut().filter(|s| s.is_active) {
            session.current_poll_id = Some(poll_id.to_string());
            assigned += 1;
        }
        Ok(assigned)
    }

    async fn set_current_poll(&self, session_id: &str, poll_id: &str) -> StoreResult<()> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or(StoreError::SessionNotFound)?;
        session.current_poll_id = Some(poll_id.to_string());
        Ok(())
    }

    async fn count_active_respondents(&self, poll_id: &str) -> StoreResult<u64> {
        Ok(self
            .sessions
            .read()
            .values()
            .filter(|s| {
                s.is_active
                    && s.role == Role::Respondent
                    && s.current_poll_id.as_deref() == Some(poll_id)
            })
            .count() as u64)
    }

    async fn participants(&self, poll_id: Option<&str>) -> StoreResult<Vec<Session>> {
        let sessions = self.sessions.read();
        let mut results: Vec<Session> = sessions
            .values()
            .filter(|s| s.is_active)
            .filter(|s| match poll_id {
                Some(id) => s.current_poll_id.as_deref() == Some(id),
                None => true,
            })
            .cloned()
            .collect();
        drop(sessions);

        results.sort_by(|a, b| b.joined_at.cmp(&a.joined_at));
        Ok(results)
    }

    async fn kick(&self, session_id: &str) -> StoreResult<Session> {
        let mut sessions = self.sessions.write();
        let session = sessions
            .get_mut(session_id)
            .ok_or(StoreError::SessionNotFound)?;
        session.is_active = false;
        Ok(session.clone())
    }
}

/// Create a shared in-memory registry
pub fn create_registry() -> Arc<MemorySessionRegistry> {
    Arc::new(MemorySessionRegistry::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = MemorySessionRegistry::new();
        let session = registry
            .create(Role::Moderator, "Ms. Frizzle", Utc::now())
            .await
            .unwrap();
        assert!(session.is_active);
        let loaded = registry.get(&session.session_id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(registry.get("unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assign_and_count_respondents() {
        let registry = MemorySessionRegistry::new();
        let now = Utc::now();
        registry.create(Role::Moderator, "T", now).await.unwrap();
        let s1 = registry.create(Role::Respondent, "A", now).await.unwrap();
        let s2 = registry.create(Role::Respondent, "B", now).await.unwrap();
        registry.kick(&s2.session_id).await.unwrap();

        let assigned = registry.assign_current_poll_to_active("p1").await.unwrap();
        assert_eq!(assigned, 2);
        assert_eq!(registry.count_active_respondents("p1").await.unwrap(), 1);
        assert_eq!(registry.count_active_respondents("p2").await.unwrap(), 0);

        registry.set_current_poll(&s1.session_id, "p2").await.unwrap();
        assert_eq!(registry.count_active_respondents("p2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_participants_newest_first_and_active_only() {
        let registry = MemorySessionRegistry::new();
        let now = Utc::now();
        let old = registry.create(Role::Respondent, "old", now).await.unwrap();
        let new = registry
            .create(Role::Respondent, "new", now + Duration::seconds(5))
            .await
            .unwrap();
        let gone = registry
            .create(Role::Respondent, "gone", now + Duration::seconds(9))
            .await
            .unwrap();
        registry.kick(&gone.session_id).await.unwrap();

        let list = registry.participants(None).await.unwrap();
        let ids: Vec<_> = list.iter().map(|s| s.session_id.clone()).collect();
        assert_eq!(ids, vec![new.session_id.clone(), old.session_id.clone()]);
    }

    #[tokio::test]
    async fn test_kick_unknown_session() {
        let registry = MemorySessionRegistry::new();
        assert_eq!(
            registry.kick("nobody").await.unwrap_err(),
            StoreError::SessionNotFound
        );
    }
}
