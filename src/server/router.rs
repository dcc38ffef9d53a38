//! Outbound routing: one connection, one user, one room or everyone.
//!
//! The router keeps room membership and the user-to-connection table; the
//! [`Transport`] underneath only knows how to deliver an envelope to a
//! single connection. Every send is fire-and-forget.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;

use crate::game::types::{ConnectionId, GAME_ROOM};

/// Wire unit in both directions: `{type, payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: &str, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            payload,
        }
    }
}

/// Delivers to a single connection. Returns false if the connection is gone.
pub trait Transport: Send + Sync {
    fn send_to(&self, connection: &str, envelope: &Envelope) -> bool;
}

#[derive(Debug, Default)]
struct RouterState {
    rooms: HashMap<String, HashSet<ConnectionId>>,
    memberships: HashMap<ConnectionId, HashSet<String>>,
    users: HashMap<String, ConnectionId>,
}

pub struct Router {
    transport: Arc<dyn Transport>,
    state: RwLock<RouterState>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router").finish_non_exhaustive()
    }
}

impl Router {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            state: RwLock::new(RouterState::default()),
        }
    }

    fn deliver(&self, connection: &str, envelope: &Envelope) {
        if !self.transport.send_to(connection, envelope) {
            crate::metrics::inc_message_dropped();
            log::debug!("dropped {} for closed connection {}", envelope.kind, connection);
        }
    }

    /// Binds a connection to a user and puts it in the global room.
    pub fn attach(&self, connection: &str, user_id: &str) {
        {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state.users.insert(user_id.to_string(), connection.to_string());
        }
        self.join(connection, GAME_ROOM);
    }

    /// Drops the connection from every room and the user table.
    pub fn detach(&self, connection: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(rooms) = state.memberships.remove(connection) {
            for room in rooms {
                if let Some(members) = state.rooms.get_mut(&room) {
                    members.remove(connection);
                    if members.is_empty() {
                        state.rooms.remove(&room);
                    }
                }
            }
        }
        state.users.retain(|_, c| c != connection);
    }

    pub fn join(&self, connection: &str, room: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state
            .rooms
            .entry(room.to_string())
            .or_default()
            .insert(connection.to_string());
        state
            .memberships
            .entry(connection.to_string())
            .or_default()
            .insert(room.to_string());
    }

    pub fn leave(&self, connection: &str, room: &str) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(connection);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
        if let Some(rooms) = state.memberships.get_mut(connection) {
            rooms.remove(room);
        }
    }

    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionId> {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .users
            .get(user_id)
            .cloned()
    }

    pub fn room_members(&self, room: &str) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rooms
            .get(room)
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    pub fn is_in_room(&self, connection: &str, room: &str) -> bool {
        self.state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .rooms
            .get(room)
            .map_or(false, |m| m.contains(connection))
    }

    pub fn to_connection(&self, connection: &str, envelope: Envelope) {
        self.deliver(connection, &envelope);
    }

    pub fn to_user(&self, user_id: &str, envelope: Envelope) {
        if let Some(connection) = self.connection_of(user_id) {
            self.deliver(&connection, &envelope);
        }
    }

    pub fn to_room(&self, room: &str, envelope: Envelope) {
        self.to_room_except(room, None, envelope);
    }

    pub fn to_room_except(&self, room: &str, except: Option<&str>, envelope: Envelope) {
        for connection in self.room_members(room) {
            if Some(connection.as_str()) != except {
                self.deliver(&connection, &envelope);
            }
        }
    }

    pub fn to_server(&self, envelope: Envelope) {
        let connections: Vec<ConnectionId> = self
            .state
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .memberships
            .keys()
            .cloned()
            .collect();
        for connection in connections {
            self.deliver(&connection, &envelope);
        }
    }
}

/// Transport backed by one unbounded channel per connection. The socket
/// writer task for each connection drains its receiver.
#[derive(Debug, Default)]
pub struct ChannelTransport {
    senders: RwLock<HashMap<ConnectionId, mpsc::UnboundedSender<Envelope>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection: &str) -> mpsc::UnboundedReceiver<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection.to_string(), tx);
        rx
    }

    pub fn unregister(&self, connection: &str) {
        self.senders
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(connection);
    }
}

impl Transport for ChannelTransport {
    fn send_to(&self, connection: &str, envelope: &Envelope) -> bool {
        match self
            .senders
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(connection)
        {
            Some(tx) => tx.send(envelope.clone()).is_ok(),
            None => false,
        }
    }
}

/// Captures every delivery. Used by tests and tooling.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(ConnectionId, Envelope)>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(ConnectionId, Envelope)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn take(&self) -> Vec<(ConnectionId, Envelope)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(|e| e.into_inner()))
    }

    /// Envelopes of one type delivered to `connection`.
    pub fn to(&self, connection: &str, kind: &str) -> Vec<Envelope> {
        self.sent()
            .into_iter()
            .filter(|(c, e)| c == connection && e.kind == kind)
            .map(|(_, e)| e)
            .collect()
    }

    pub fn of_kind(&self, kind: &str) -> Vec<(ConnectionId, Envelope)> {
        self.sent()
            .into_iter()
            .filter(|(_, e)| e.kind == kind)
            .collect()
    }
}

impl Transport for RecordingTransport {
    fn send_to(&self, connection: &str, envelope: &Envelope) -> bool {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((connection.to_string(), envelope.clone()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router() -> (Arc<RecordingTransport>, Router) {
        let transport = Arc::new(RecordingTransport::new());
        let router = Router::new(transport.clone());
        (transport, router)
    }

    #[test]
    fn room_broadcast_reaches_members_only() {
        let (t, r) = router();
        r.attach("c1", "u1");
        r.attach("c2", "u2");
        r.attach("c3", "u3");
        r.join("c1", "town_5_5");
        r.join("c2", "town_5_5");
        r.to_room_except("town_5_5", Some("c1"), Envelope::new("PING", json!({})));
        assert_eq!(t.of_kind("PING").len(), 1);
        assert_eq!(t.to("c2", "PING").len(), 1);

        r.to_server(Envelope::new("ALL", json!(null)));
        assert_eq!(t.of_kind("ALL").len(), 3);
    }

    #[test]
    fn user_routing_and_detach() {
        let (t, r) = router();
        r.attach("c1", "u1");
        r.join("c1", "room");
        r.to_user("u1", Envelope::new("HI", json!("x")));
        assert_eq!(t.to("c1", "HI").len(), 1);
        r.detach("c1");
        assert!(r.connection_of("u1").is_none());
        assert!(r.room_members("room").is_empty());
        assert!(r.room_members(GAME_ROOM).is_empty());
    }

    #[test]
    fn envelope_wire_shape() {
        let env: Envelope = serde_json::from_str(r#"{"type":"COMMAND","payload":"/look"}"#).unwrap();
        assert_eq!(env.kind, "COMMAND");
        assert_eq!(env.payload, json!("/look"));
        let text = serde_json::to_string(&Envelope::new("NEW_DAY", json!({"day": 2}))).unwrap();
        assert_eq!(text, r#"{"type":"NEW_DAY","payload":{"day":2}}"#);
    }

    #[tokio::test]
    async fn channel_transport_delivers_until_unregistered() {
        let transport = ChannelTransport::new();
        let mut rx = transport.register("c1");
        assert!(transport.send_to("c1", &Envelope::new("A", json!(1))));
        assert_eq!(rx.recv().await.unwrap().kind, "A");
        transport.unregister("c1");
        assert!(!transport.send_to("c1", &Envelope::new("B", json!(1))));
    }
}
