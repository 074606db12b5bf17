//! WebSocket client connection state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{error, warn};

use skillroom_core::wire::{self, ServerMessage};
use skillroom_core::{ConnectionId, ParticipantId, SessionId};

/// A connected WebSocket client and the sessions it has joined.
pub struct ClientConnection {
    pub id: ConnectionId,
    /// Session → participant id this connection joined as.
    memberships: Mutex<HashMap<SessionId, ParticipantId>>,
    /// Send channel to the socket's writer task.
    tx: mpsc::Sender<Arc<String>>,
    pub connected_at: Instant,
    /// Whether any frame arrived since the last heartbeat check.
    pub is_alive: AtomicBool,
    last_seen: Mutex<Instant>,
    /// Frames dropped because the send queue was full or closed.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    pub fn new(id: ConnectionId, tx: mpsc::Sender<Arc<String>>) -> Self {
        let now = Instant::now();
        Self {
            id,
            memberships: Mutex::new(HashMap::new()),
            tx,
            connected_at: now,
            is_alive: AtomicBool::new(true),
            last_seen: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Queue a frame without waiting. A full or closed queue drops it.
    pub fn send(&self, frame: Arc<String>) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                warn!(connection_id = %self.id, frame_len = frame.len(), "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn send_event(&self, event: &ServerMessage) -> bool {
        match wire::encode(event) {
            Ok(json) => self.send(Arc::new(json)),
            Err(e) => {
                error!(connection_id = %self.id, error = %e, "failed to encode event");
                false
            }
        }
    }

    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    pub fn join_session(&self, session_id: SessionId, participant: ParticipantId) {
        let _ = self.memberships.lock().insert(session_id, participant);
    }

    /// Forget a session, returning who we were in it.
    pub fn leave_session(&self, session_id: &SessionId) -> Option<ParticipantId> {
        self.memberships.lock().remove(session_id)
    }

    pub fn membership(&self, session_id: &SessionId) -> Option<ParticipantId> {
        self.memberships.lock().get(session_id).cloned()
    }

    /// Drain every membership, for disconnect cleanup.
    pub fn take_memberships(&self) -> Vec<(SessionId, ParticipantId)> {
        self.memberships.lock().drain().collect()
    }

    pub fn mark_alive(&self) {
        self.is_alive.store(true, Ordering::Relaxed);
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen_elapsed(&self) -> Duration {
        self.last_seen.lock().elapsed()
    }

    /// Check and reset the alive flag for heartbeat.
    pub fn check_alive(&self) -> bool {
        self.is_alive.swap(false, Ordering::Relaxed)
    }

    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new(ConnectionId::new(), tx), rx)
    }

    #[tokio::test]
    async fn send_reaches_writer() {
        let (conn, mut rx) = make_connection(8);
        assert!(conn.send(Arc::new("hello".into())));
        assert_eq!(&*rx.recv().await.unwrap(), "hello");
    }

    #[test]
    fn full_queue_drops_and_counts() {
        let (conn, _rx) = make_connection(1);
        assert!(conn.send(Arc::new("one".into())));
        assert!(!conn.send(Arc::new("two".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[test]
    fn closed_queue_drops() {
        let (conn, rx) = make_connection(4);
        drop(rx);
        assert!(!conn.send(Arc::new("x".into())));
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn send_event_encodes_wire_frame() {
        let (conn, mut rx) = make_connection(4);
        assert!(conn.send_event(&ServerMessage::error("NOT_IN_SESSION", "join first")));
        let frame = rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["event"], "error");
        assert_eq!(value["data"]["code"], "NOT_IN_SESSION");
    }

    #[test]
    fn memberships_track_sessions() {
        let (conn, _rx) = make_connection(4);
        let s1 = SessionId::from_raw("room-1");
        let s2 = SessionId::from_raw("room-2");
        let me = ParticipantId::from_raw("user_a");
        conn.join_session(s1.clone(), me.clone());
        conn.join_session(s2.clone(), me.clone());
        assert_eq!(conn.membership(&s1), Some(me.clone()));
        assert_eq!(conn.leave_session(&s1), Some(me));
        assert_eq!(conn.membership(&s1), None);
        assert_eq!(conn.take_memberships().len(), 1);
        assert!(conn.membership(&s2).is_none());
    }

    #[test]
    fn check_alive_resets_flag() {
        let (conn, _rx) = make_connection(4);
        assert!(conn.check_alive());
        assert!(!conn.check_alive());
        conn.mark_alive();
        assert!(conn.check_alive());
        assert!(conn.last_seen_elapsed() < Duration::from_secs(1));
    }
}
