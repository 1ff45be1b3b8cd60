//! Realtime Gateway
//!
//! In-memory pub/sub over live connections. A connection joins named
//! channels and receives every event broadcast to them. Nothing is buffered
//! for connections that are not currently live.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::protocol::ServerEvent;
use crate::sessions::Role;

pub type ConnectionId = Uuid;

/// Frames queued for one connection, pre-serialized
pub type Outbox = mpsc::UnboundedReceiver<Arc<str>>;

/// Fan-out group
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Session(String),
    Poll(String),
    Role(Role),
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Session(id) => write!(f, "session:{}", id),
            Channel::Poll(id) => write!(f, "poll:{}", id),
            Channel::Role(Role::Moderator) => f.write_str("teachers"),
            Channel::Role(Role::Respondent) => f.write_str("students"),
        }
    }
}

/// One live WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    pub id: ConnectionId,
    tx: mpsc::UnboundedSender<Arc<str>>,
    session_id: RwLock<Option<String>>,
    channels: RwLock<HashSet<Channel>>,
    /// Set once its session is kicked; cleared by the next bind
    revoked: AtomicBool,
    pub connected_at: DateTime<Utc>,
}

impl Connection {
    /// Session announced with `join_session`
    pub fn session_id(&self) -> Option<String> {
        self.session_id.read().clone()
    }

    pub fn bind_session(&self, session_id: &str) {
        *self.session_id.write() = Some(session_id.to_string());
        self.revoked.store(false, Ordering::Release);
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    pub fn is_member(&self, channel: &Channel) -> bool {
        self.channels.read().contains(channel)
    }

    fn push(&self, frame: Arc<str>) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Connection registry with a channel -> members index.
#[derive(Debug, Default)]
pub struct Gateway {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
    channels: RwLock<HashMap<Channel, HashSet<ConnectionId>>>,
}

impl Gateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new connection and hand back its outbox.
    pub fn register(&self) -> (Arc<Connection>, Outbox) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Connection {
            id: Uuid::new_v4(),
            tx,
            session_id: RwLock::new(None),
            channels: RwLock::new(HashSet::new()),
            revoked: AtomicBool::new(false),
            connected_at: Utc::now(),
        });
        self.connections
            .write()
            .insert(connection.id, connection.clone());
        debug!(conn_id = %connection.id, "Connection registered");
        (connection, rx)
    }

    /// Drop a connection and every membership it holds.
    pub fn unregister(&self, id: &ConnectionId) {
        let Some(connection) = self.connections.write().remove(id) else {
            return;
        };
        let joined: Vec<Channel> = connection.channels.write().drain().collect();
        let mut channels = self.channels.write();
        for channel in joined {
            remove_member(&mut channels, &channel, id);
        }
        debug!(conn_id = %id, "Connection unregistered");
    }

    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().get(id).cloned()
    }

    /// Add a connection to a channel. Returns false for unknown connections.
    pub fn join(&self, id: &ConnectionId, channel: Channel) -> bool {
        let Some(connection) = self.get(id) else {
            return false;
        };
        connection.channels.write().insert(channel.clone());
        self.channels.write().entry(channel).or_default().insert(*id);
        true
    }

    pub fn leave(&self, id: &ConnectionId, channel: &Channel) {
        if let Some(connection) = self.get(id) {
            connection.channels.write().remove(channel);
        }
        remove_member(&mut self.channels.write(), channel, id);
    }

    /// Leave every channel, keeping the connection registered.
    pub fn leave_all(&self, id: &ConnectionId) {
        let Some(connection) = self.get(id) else {
            return;
        };
        let joined: Vec<Channel> = connection.channels.write().drain().collect();
        let mut channels = self.channels.write();
        for channel in joined {
            remove_member(&mut channels, &channel, id);
        }
    }

    /// Drop every membership of a connection whose session was kicked and
    /// keep it out of later `join_all` calls until it binds a session again.
    pub fn revoke(&self, id: &ConnectionId) {
        let Some(connection) = self.get(id) else {
            return;
        };
        connection.revoked.store(true, Ordering::Release);
        self.leave_all(id);
        debug!(conn_id = %id, "Connection revoked");
    }

    /// Put every live, non-revoked connection into `channel`. Returns the
    /// member count.
    pub fn join_all(&self, channel: Channel) -> usize {
        let connections: Vec<Arc<Connection>> = self
            .connections
            .read()
            .values()
            .filter(|c| !c.is_revoked())
            .cloned()
            .collect();
        for connection in &connections {
            connection.channels.write().insert(channel.clone());
        }
        let mut channels = self.channels.write();
        let members = channels.entry(channel).or_default();
        members.extend(connections.iter().map(|c| c.id));
        members.len()
    }

    /// Send to one connection.
    pub fn send(&self, id: &ConnectionId, event: &ServerEvent) -> bool {
        let Some(connection) = self.get(id) else {
            return false;
        };
        match encode(event) {
            Some(frame) => connection.push(frame),
            None => false,
        }
    }

    /// Send to every member of `channel`. Returns how many were queued.
    pub fn broadcast(&self, channel: &Channel, event: &ServerEvent) -> usize {
        let members: Vec<Arc<Connection>> = {
            let channels = self.channels.read();
            let Some(ids) = channels.get(channel) else {
                return 0;
            };
            let connections = self.connections.read();
            ids.iter().filter_map(|id| connections.get(id).cloned()).collect()
        };
        if members.is_empty() {
            return 0;
        }
        // Serialize once for every member
        let Some(frame) = encode(event) else {
            return 0;
        };
        let mut delivered = 0;
        for connection in members {
            if connection.push(frame.clone()) {
                delivered += 1;
            } else {
                debug!(conn_id = %connection.id, "Dropping frame for closed connection");
            }
        }
        debug!(channel = %channel, event = event.name(), delivered, "Broadcast");
        delivered
    }

    /// Remove a channel and every membership in it. Returns the former members.
    pub fn close_channel(&self, channel: &Channel) -> Vec<ConnectionId> {
        let Some(members) = self.channels.write().remove(channel) else {
            return Vec::new();
        };
        let connections = self.connections.read();
        for id in &members {
            if let Some(connection) = connections.get(id) {
                connection.channels.write().remove(channel);
            }
        }
        debug!(channel = %channel, members = members.len(), "Channel closed");
        members.into_iter().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    pub fn member_count(&self, channel: &Channel) -> usize {
        self.channels.read().get(channel).map_or(0, |m| m.len())
    }
}

fn remove_member(
    channels: &mut HashMap<Channel, HashSet<ConnectionId>>,
    channel: &Channel,
    id: &ConnectionId,
) {
    if let Some(members) = channels.get_mut(channel) {
        members.remove(id);
        if members.is_empty() {
            channels.remove(channel);
        }
    }
}

fn encode(event: &ServerEvent) -> Option<Arc<str>> {
    match event.encode() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(event = event.name(), "Failed to serialize event: {}", e);
            None
        }
    }
}
