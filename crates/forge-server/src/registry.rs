use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{info, warn};

use forge_core::ids::{ConnectionId, SessionId};

use crate::frames::ServerFrame;

/// One live duplex connection. Belongs to exactly one session for its
/// lifetime; the receiver half is owned by the socket writer task.
struct ConnectionEntry {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
}

/// Tracks live connections per session and fans frames out to them.
///
/// A session may have any number of connections (multi-tab). Sends are
/// fire-and-forget: a closed connection is pruned and never fails the
/// overall call for the remaining ones.
pub struct ConnectionRegistry {
    connections: DashMap<SessionId, Vec<ConnectionEntry>>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue,
        }
    }

    /// Register a connection under a session and send the initial
    /// acknowledgement to that connection only.
    pub fn connect(&self, session_id: &SessionId) -> (ConnectionId, mpsc::Receiver<String>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);

        let ack = ServerFrame::Connected {
            session_id: session_id.as_str().to_string(),
            timestamp: Utc::now(),
        };
        let _ = tx.try_send(ack.to_json());

        self.connections
            .entry(session_id.clone())
            .or_default()
            .push(ConnectionEntry { id: id.clone(), tx });

        info!(session_id = %session_id, connection_id = %id, "connection registered");
        (id, rx)
    }

    /// Remove a connection. The session's entry itself is removed once its
    /// connection set becomes empty — no dangling empty sets.
    pub fn disconnect(&self, session_id: &SessionId, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.connections.get_mut(session_id) {
            entry.retain(|c| &c.id != connection_id);
        }
        self.connections.remove_if(session_id, |_, v| v.is_empty());
        info!(session_id = %session_id, connection_id = %connection_id, "connection removed");
    }

    /// Deliver a frame to every live connection of a session. Returns how
    /// many connections received it.
    pub fn send_to_session(&self, session_id: &SessionId, frame: &ServerFrame) -> usize {
        let json = frame.to_json();
        let mut delivered = 0;

        if let Some(mut entry) = self.connections.get_mut(session_id) {
            entry.retain(|conn| match conn.tx.try_send(json.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    // Backpressure: drop this frame but keep the connection.
                    warn!(connection_id = %conn.id, "send queue full, dropping frame");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    info!(connection_id = %conn.id, "pruning dead connection");
                    false
                }
            });
        }
        self.connections.remove_if(session_id, |_, v| v.is_empty());

        delivered
    }

    /// Send to one specific connection of a session.
    pub fn send_to(
        &self,
        session_id: &SessionId,
        connection_id: &ConnectionId,
        frame: &ServerFrame,
    ) -> bool {
        let json = frame.to_json();
        self.connections
            .get(session_id)
            .and_then(|entry| {
                entry
                    .iter()
                    .find(|c| &c.id == connection_id)
                    .map(|c| c.tx.try_send(json).is_ok())
            })
            .unwrap_or(false)
    }

    /// Deliver a frame to every connection across every session, with the
    /// same dead-connection pruning as session sends.
    pub fn broadcast(&self, frame: &ServerFrame) -> usize {
        let sessions: Vec<SessionId> = self
            .connections
            .iter()
            .map(|e| e.key().clone())
            .collect();
        sessions
            .iter()
            .map(|sid| self.send_to_session(sid, frame))
            .sum()
    }

    /// Sessions with at least one live connection.
    pub fn active_sessions(&self) -> Vec<SessionId> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.iter().map(|e| e.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> SessionId {
        SessionId::from_raw(s)
    }

    #[test]
    fn connect_sends_ack_to_that_connection_only() {
        let registry = ConnectionRegistry::new(8);
        let (_id1, mut rx1) = registry.connect(&sid("a"));
        let (_id2, mut rx2) = registry.connect(&sid("a"));

        let ack1 = rx1.try_recv().unwrap();
        assert!(ack1.contains(r#""type":"connected""#));
        let ack2 = rx2.try_recv().unwrap();
        assert!(ack2.contains(r#""type":"connected""#));

        // Exactly one ack each.
        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_err());
    }

    #[test]
    fn send_to_session_reaches_all_connections() {
        let registry = ConnectionRegistry::new(8);
        let (_a, mut rx_a) = registry.connect(&sid("s"));
        let (_b, mut rx_b) = registry.connect(&sid("s"));
        let (_c, mut rx_c) = registry.connect(&sid("other"));

        // Drain acks.
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();
        rx_c.try_recv().unwrap();

        let delivered = registry.send_to_session(&sid("s"), &ServerFrame::Pong);
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn dead_connection_is_pruned_without_failing_live_ones() {
        let registry = ConnectionRegistry::new(8);
        let (_dead, rx_dead) = registry.connect(&sid("s"));
        let (_live, mut rx_live) = registry.connect(&sid("s"));
        rx_live.try_recv().unwrap();
        drop(rx_dead); // client went away

        let delivered = registry.send_to_session(&sid("s"), &ServerFrame::Pong);
        assert_eq!(delivered, 1);
        assert!(rx_live.try_recv().is_ok());
        assert_eq!(registry.connection_count(), 1);
    }

    #[test]
    fn disconnect_last_connection_removes_session() {
        let registry = ConnectionRegistry::new(8);
        let (id1, _rx1) = registry.connect(&sid("s"));
        let (id2, _rx2) = registry.connect(&sid("s"));
        assert_eq!(registry.active_sessions(), vec![sid("s")]);

        registry.disconnect(&sid("s"), &id1);
        assert_eq!(registry.active_sessions(), vec![sid("s")]);

        registry.disconnect(&sid("s"), &id2);
        assert!(registry.active_sessions().is_empty());
        assert_eq!(registry.connection_count(), 0);
    }

    #[test]
    fn broadcast_reaches_every_session() {
        let registry = ConnectionRegistry::new(8);
        let (_a, mut rx_a) = registry.connect(&sid("one"));
        let (_b, mut rx_b) = registry.connect(&sid("two"));
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        let delivered = registry.broadcast(&ServerFrame::Pong);
        assert_eq!(delivered, 2);
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_ok());
    }

    #[test]
    fn send_to_specific_connection() {
        let registry = ConnectionRegistry::new(8);
        let (id_a, mut rx_a) = registry.connect(&sid("s"));
        let (_id_b, mut rx_b) = registry.connect(&sid("s"));
        rx_a.try_recv().unwrap();
        rx_b.try_recv().unwrap();

        assert!(registry.send_to(&sid("s"), &id_a, &ServerFrame::Pong));
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_b.try_recv().is_err());

        // Unknown connection id.
        assert!(!registry.send_to(&sid("s"), &ConnectionId::new(), &ServerFrame::Pong));
    }

    #[test]
    fn full_queue_drops_frame_but_keeps_connection() {
        let registry = ConnectionRegistry::new(1); // ack fills the queue
        let (_id, _rx) = registry.connect(&sid("s"));

        let delivered = registry.send_to_session(&sid("s"), &ServerFrame::Pong);
        assert_eq!(delivered, 0);
        assert_eq!(registry.connection_count(), 1);
    }
}
