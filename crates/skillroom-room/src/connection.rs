//! Session connection manager.
//!
//! Owns the messaging link for one session at a time, the local media
//! stream, the peer-id registration and every media call. Presence events
//! are consumed here before the rest of the room sees them:
//!
//! - `peer-joined`: record the peer, place a call if our peer id sorts
//!   first (receive-only when we hold no media)
//! - `peer-left`: drop the registry entry, then hang up that peer's call
//! - `identity-rejected`: rejoin once with a disambiguated participant id
//!
//! Incoming calls are answered with the local stream unless a call with
//! that peer already exists.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use skillroom_core::wire::{ClientMessage, PeerInfo, ServerMessage};
use skillroom_core::{ParticipantId, PeerId, SessionId};

use crate::error::{PeerError, RoomError};
use crate::media::{IncomingCall, LocalStream, MediaCall, MediaDevices, MediaMode, PeerNetwork};
use crate::transport::{Connector, MessagingChannel};

/// Who we are in the room.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub id: ParticipantId,
    pub display_name: String,
}

impl Participant {
    pub fn new(id: ParticipantId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
        }
    }
}

/// Failure counters and media state for the current session.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectionHealth {
    pub failed_calls: u64,
    pub failed_sends: u64,
    pub media: MediaMode,
    pub audio_enabled: bool,
    pub video_enabled: bool,
}

#[derive(Debug, PartialEq, Eq)]
pub enum JoinReport {
    /// Same session and identity were already connected; nothing changed.
    AlreadyConnected,
    Joined { media: MediaMode },
}

struct ActiveSession {
    session_id: SessionId,
    /// Identity the caller asked for, before any disambiguation.
    requested: ParticipantId,
    local: Participant,
    channel: Arc<dyn MessagingChannel>,
    inbound: mpsc::Receiver<ServerMessage>,
    stream: Option<Arc<LocalStream>>,
    peer_id: Option<PeerId>,
    incoming: Option<mpsc::UnboundedReceiver<IncomingCall>>,
    peers: BTreeMap<ParticipantId, PeerInfo>,
    calls: HashMap<PeerId, MediaCall>,
    identity_retried: bool,
}

enum Wake {
    Event(Option<ServerMessage>),
    Call(Option<IncomingCall>),
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    devices: Arc<dyn MediaDevices>,
    network: Arc<dyn PeerNetwork>,
    active: Option<ActiveSession>,
    health: ConnectionHealth,
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        devices: Arc<dyn MediaDevices>,
        network: Arc<dyn PeerNetwork>,
    ) -> Self {
        Self {
            connector,
            devices,
            network,
            active: None,
            health: ConnectionHealth::default(),
        }
    }

    /// Join `session_id` as `local`.
    ///
    /// Calling again with the same session and identity is a no-op. A
    /// different session tears the current one down first.
    #[instrument(skip_all, fields(session_id = %session_id, participant_id = %local.id))]
    pub async fn connect(
        &mut self,
        session_id: SessionId,
        local: Participant,
    ) -> Result<JoinReport, RoomError> {
        if let Some(active) = &self.active {
            if active.session_id == session_id && active.requested == local.id {
                debug!("already connected");
                return Ok(JoinReport::AlreadyConnected);
            }
            info!(previous = %active.session_id, "switching sessions");
            self.disconnect().await;
        }

        let link = self.connector.open().await?;

        let (stream, media) = match self.devices.capture().await {
            Ok(stream) => (Some(stream), MediaMode::Full),
            Err(e) => {
                warn!(error = %e, "media capture failed, continuing without media");
                (None, MediaMode::Degraded { reason: e.to_string() })
            }
        };

        let (peer_id, incoming) = self.register_peer(&local.id).await.unzip();

        let join = ClientMessage::JoinRoom {
            session_id: session_id.clone(),
            participant_id: local.id.clone(),
            display_name: local.display_name.clone(),
            peer_id: peer_id.clone(),
        };
        if let Err(e) = link.channel.send(&join).await {
            self.health.failed_sends += 1;
            warn!(error = %e, "join announcement failed");
            if let Some(stream) = stream {
                stop_stream(stream);
            }
            if let Some(peer_id) = &peer_id {
                self.network.release(peer_id).await;
            }
            link.channel.close().await;
            return Err(e.into());
        }

        info!(peer_id = ?peer_id, degraded = media.is_degraded(), "joined session");
        self.health.media = media.clone();
        self.health.audio_enabled = stream.as_ref().is_some_and(|s| s.audio_enabled());
        self.health.video_enabled = stream.as_ref().is_some_and(|s| s.video_enabled());
        self.active = Some(ActiveSession {
            session_id,
            requested: local.id.clone(),
            local,
            channel: link.channel,
            inbound: link.inbound,
            stream,
            peer_id,
            incoming,
            peers: BTreeMap::new(),
            calls: HashMap::new(),
            identity_retried: false,
        });
        Ok(JoinReport::Joined { media })
    }

    /// Register our peer id, stepping around one collision.
    async fn register_peer(
        &self,
        participant: &ParticipantId,
    ) -> Option<(PeerId, mpsc::UnboundedReceiver<IncomingCall>)> {
        let base = PeerId::for_participant(participant);
        let attempt = match self.network.open(&base).await {
            Ok(rx) => return Some((base, rx)),
            Err(PeerError::IdTaken(_)) => {
                let retry = base.disambiguated();
                info!(taken = %base, retry = %retry, "peer id taken, retrying once");
                self.network.open(&retry).await.map(|rx| (retry, rx))
            }
            Err(e) => Err(e),
        };
        match attempt {
            Ok(pair) => Some(pair),
            Err(e) => {
                warn!(error = %e, "peer network unavailable, calls disabled");
                None
            }
        }
    }

    /// Leave the session and release everything it held.
    ///
    /// Order: leave announcement, hang up calls, stop the local stream,
    /// release the peer id, close the channel.
    pub async fn disconnect(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        let leave = ClientMessage::LeaveRoom {
            session_id: active.session_id.clone(),
        };
        if let Err(e) = active.channel.send(&leave).await {
            debug!(error = %e, "leave announcement not delivered");
        }
        for (_, mut call) in active.calls.drain() {
            call.close();
        }
        active.peers.clear();
        if let Some(stream) = active.stream.take() {
            stop_stream(stream);
        }
        if let Some(peer_id) = &active.peer_id {
            self.network.release(peer_id).await;
        }
        active.channel.close().await;
        self.health.audio_enabled = false;
        self.health.video_enabled = false;
        info!(session_id = %active.session_id, "left session");
    }

    /// Mute or unmute the microphone. False when there is no local media.
    pub fn set_audio_enabled(&mut self, enabled: bool) -> bool {
        let Some(stream) = self.active.as_ref().and_then(|a| a.stream.as_ref()) else {
            return false;
        };
        stream.set_audio_enabled(enabled);
        self.health.audio_enabled = enabled;
        info!(enabled, "microphone toggled");
        true
    }

    /// Turn the camera on or off. False when there is no local media.
    pub fn set_video_enabled(&mut self, enabled: bool) -> bool {
        let Some(stream) = self.active.as_ref().and_then(|a| a.stream.as_ref()) else {
            return false;
        };
        stream.set_video_enabled(enabled);
        self.health.video_enabled = enabled;
        info!(enabled, "camera toggled");
        true
    }

    /// Send an event on the current session's channel.
    pub async fn send(&mut self, message: ClientMessage) -> Result<(), RoomError> {
        let Some(active) = &self.active else {
            return Err(RoomError::NotConnected);
        };
        match active.channel.send(&message).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.health.failed_sends += 1;
                warn!(event = message.event_name(), error = %e, "send failed");
                Err(e.into())
            }
        }
    }

    /// Next server event for the tools. Incoming calls are handled inline.
    /// `None` once the link is gone or nothing is connected.
    pub async fn recv(&mut self) -> Option<ServerMessage> {
        loop {
            let wake = {
                let active = self.active.as_mut()?;
                tokio::select! {
                    biased;
                    call = next_call(&mut active.incoming) => Wake::Call(call),
                    event = active.inbound.recv() => Wake::Event(event),
                }
            };
            match wake {
                Wake::Event(Some(event)) => {
                    self.handle_server_message(&event).await;
                    return Some(event);
                }
                Wake::Event(None) => {
                    warn!("messaging channel closed by server");
                    return None;
                }
                Wake::Call(Some(call)) => self.accept_call(call),
                Wake::Call(None) => {
                    if let Some(active) = self.active.as_mut() {
                        active.incoming = None;
                    }
                }
            }
        }
    }

    /// Apply the presence side effects of a server event.
    pub async fn handle_server_message(&mut self, event: &ServerMessage) {
        match event {
            ServerMessage::PeerJoined { session_id, peer } if self.is_current(session_id) => {
                self.on_peer_joined(peer).await;
            }
            ServerMessage::PeerLeft {
                session_id,
                participant_id,
            } if self.is_current(session_id) => self.on_peer_left(participant_id),
            ServerMessage::IdentityRejected {
                session_id, reason, ..
            } if self.is_current(session_id) => self.on_identity_rejected(reason).await,
            ServerMessage::Joined { participants, .. } => {
                debug!(participants, "join acknowledged");
            }
            _ => {}
        }
    }

    async fn on_peer_joined(&mut self, peer: &PeerInfo) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if peer.participant_id == active.local.id {
            return;
        }
        let _ = active.peers.insert(peer.participant_id.clone(), peer.clone());
        info!(participant_id = %peer.participant_id, name = %peer.display_name, "peer joined");

        let (Some(local_peer), Some(remote_peer)) = (&active.peer_id, &peer.peer_id) else {
            return;
        };
        if local_peer >= remote_peer || active.calls.contains_key(remote_peer) {
            return;
        }
        let stream = active.stream.clone();
        if stream.is_none() {
            debug!(peer_id = %remote_peer, "no local media, placing receive-only call");
        }
        match self.network.call(local_peer, remote_peer, stream).await {
            Ok(call) => {
                let _ = active.calls.insert(remote_peer.clone(), call);
            }
            Err(e) => {
                self.health.failed_calls += 1;
                warn!(peer_id = %remote_peer, error = %e, "outbound call failed");
            }
        }
    }

    fn on_peer_left(&mut self, participant: &ParticipantId) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(peer) = active.peers.remove(participant) else {
            return;
        };
        info!(participant_id = %participant, "peer left");
        if let Some(mut call) = peer.peer_id.and_then(|id| active.calls.remove(&id)) {
            call.close();
        }
    }

    async fn on_identity_rejected(&mut self, reason: &str) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.identity_retried {
            warn!(reason, "identity rejected again, giving up");
            return;
        }
        active.identity_retried = true;
        let retry = active.local.id.disambiguated();
        info!(reason, retry = %retry, "identity rejected, rejoining once");
        active.local.id = retry;
        let join = ClientMessage::JoinRoom {
            session_id: active.session_id.clone(),
            participant_id: active.local.id.clone(),
            display_name: active.local.display_name.clone(),
            peer_id: active.peer_id.clone(),
        };
        if let Err(e) = active.channel.send(&join).await {
            self.health.failed_sends += 1;
            warn!(error = %e, "rejoin failed");
        }
    }

    fn accept_call(&mut self, call: IncomingCall) {
        let Some(active) = self.active.as_mut() else {
            call.decline();
            return;
        };
        if active.calls.contains_key(&call.from) {
            debug!(peer_id = %call.from, "duplicate call declined");
            call.decline();
            return;
        }
        let answered = call.answer(active.stream.clone());
        info!(peer_id = %answered.peer(), sends_media = answered.sends_media(), "call answered");
        let _ = active.calls.insert(answered.peer().clone(), answered);
    }

    fn is_current(&self, session_id: &SessionId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| &a.session_id == session_id)
    }

    pub fn is_connected(&self) -> bool {
        self.active.as_ref().is_some_and(|a| a.channel.is_open())
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.active.as_ref().map(|a| &a.session_id)
    }

    /// Local identity in effect (after any disambiguation).
    pub fn local(&self) -> Option<&Participant> {
        self.active.as_ref().map(|a| &a.local)
    }

    pub fn peer_id(&self) -> Option<&PeerId> {
        self.active.as_ref().and_then(|a| a.peer_id.as_ref())
    }

    pub fn peers(&self) -> Vec<&PeerInfo> {
        self.active
            .as_ref()
            .map(|a| a.peers.values().collect())
            .unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.calls.len())
    }

    pub fn has_call_with(&self, peer: &PeerId) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.calls.contains_key(peer))
    }

    pub fn health(&self) -> &ConnectionHealth {
        &self.health
    }
}

async fn next_call(incoming: &mut Option<mpsc::UnboundedReceiver<IncomingCall>>) -> Option<IncomingCall> {
    match incoming {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn stop_stream(stream: Arc<LocalStream>) {
    match Arc::try_unwrap(stream) {
        Ok(stream) => stream.stop(),
        Err(shared) => warn!(
            references = Arc::strong_count(&shared),
            "local stream still referenced, not stopping"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{Switchboard, SyntheticDevices};
    use crate::transport::loopback::LoopbackConnector;
    use crate::error::TransportError;
    use skillroom_core::chat::ChatMessage;

    struct Fixture {
        connector: LoopbackConnector,
        devices: Arc<SyntheticDevices>,
        board: Switchboard,
        manager: ConnectionManager,
    }

    fn fixture(devices: SyntheticDevices) -> Fixture {
        fixture_on(devices, Switchboard::new())
    }

    fn fixture_on(devices: SyntheticDevices, board: Switchboard) -> Fixture {
        let connector = LoopbackConnector::new();
        let devices = Arc::new(devices);
        let manager = ConnectionManager::new(
            Arc::new(connector.clone()),
            devices.clone(),
            Arc::new(board.clone()),
        );
        Fixture {
            connector,
            devices,
            board,
            manager,
        }
    }

    fn session() -> SessionId {
        SessionId::from_raw("room-1")
    }

    fn alice() -> Participant {
        Participant::new(ParticipantId::from_raw("user_alice"), "Alice")
    }

    fn peer_info(id: &str, name: &str) -> PeerInfo {
        let participant_id = ParticipantId::from_raw(id);
        PeerInfo {
            peer_id: Some(PeerId::for_participant(&participant_id)),
            participant_id,
            display_name: name.into(),
        }
    }

    fn joined_event(peer: PeerInfo) -> ServerMessage {
        ServerMessage::PeerJoined {
            session_id: session(),
            peer,
        }
    }

    #[tokio::test]
    async fn connect_announces_join_with_identity() {
        let mut f = fixture(SyntheticDevices::granted());
        let report = f.manager.connect(session(), alice()).await.unwrap();
        assert_eq!(report, JoinReport::Joined { media: MediaMode::Full });

        let sent = f.connector.sent();
        assert_eq!(sent.len(), 1);
        match &sent[0] {
            ClientMessage::JoinRoom {
                session_id,
                participant_id,
                display_name,
                peer_id,
            } => {
                assert_eq!(session_id, &session());
                assert_eq!(participant_id.as_str(), "user_alice");
                assert_eq!(display_name, "Alice");
                assert_eq!(peer_id.as_ref().unwrap().as_str(), "peer-user_alice");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_twice_opens_one_channel() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let again = f.manager.connect(session(), alice()).await.unwrap();
        assert_eq!(again, JoinReport::AlreadyConnected);
        assert_eq!(f.connector.opens(), 1);
        assert_eq!(f.connector.sent().len(), 1);
        assert_eq!(f.devices.captures(), 1);
    }

    #[tokio::test]
    async fn switching_sessions_tears_down_first() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let _ = f
            .manager
            .connect(SessionId::from_raw("room-2"), alice())
            .await
            .unwrap();

        assert_eq!(f.connector.opens(), 2);
        assert_eq!(f.connector.closes(), 1);
        assert_eq!(f.devices.stops(), 1);
        let events: Vec<_> = f.connector.sent().iter().map(|m| m.event_name()).collect();
        assert_eq!(events, vec!["join-room", "leave-room", "join-room"]);
        assert_eq!(f.manager.session_id().unwrap().as_str(), "room-2");
    }

    #[tokio::test]
    async fn denied_media_degrades_but_connects() {
        let mut f = fixture(SyntheticDevices::denied());
        let report = f.manager.connect(session(), alice()).await.unwrap();
        assert!(matches!(report, JoinReport::Joined { media: MediaMode::Degraded { .. } }));
        assert!(f.manager.health().media.is_degraded());
        assert!(f.manager.is_connected());

        let msg = ClientMessage::SendMessage {
            session_id: session(),
            message: ChatMessage::user(alice().id, "Alice", "still here"),
        };
        f.manager.send(msg).await.unwrap();
        assert_eq!(f.connector.sent().len(), 2);
    }

    #[tokio::test]
    async fn refused_connection_is_an_error() {
        let mut f = fixture(SyntheticDevices::granted());
        f.connector.refuse_connections(true);
        let err = f.manager.connect(session(), alice()).await.unwrap_err();
        assert!(matches!(err, RoomError::Transport(TransportError::Connect(_))));
        assert!(!f.manager.is_connected());
    }

    #[tokio::test]
    async fn failed_join_releases_media_and_peer_id() {
        let mut f = fixture(SyntheticDevices::granted());
        f.connector.fail_sends(true);
        assert!(f.manager.connect(session(), alice()).await.is_err());
        assert_eq!(f.devices.stops(), 1);
        assert!(!f.board.is_registered(&PeerId::from_raw("peer-user_alice")));
        assert_eq!(f.manager.health().failed_sends, 1);
    }

    #[tokio::test]
    async fn taken_peer_id_retries_with_suffix() {
        let mut f = fixture(SyntheticDevices::granted());
        let _squatter = f
            .board
            .open(&PeerId::from_raw("peer-user_alice"))
            .await
            .unwrap();
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let peer = f.manager.peer_id().unwrap();
        assert!(peer.as_str().starts_with("peer-user_alice-"), "got {peer}");
    }

    #[tokio::test]
    async fn smaller_peer_id_places_the_call() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let zed = peer_info("user_zed", "Zed");
        let mut zed_rx = f.board.open(zed.peer_id.as_ref().unwrap()).await.unwrap();

        f.manager.handle_server_message(&joined_event(zed.clone())).await;
        f.manager.handle_server_message(&joined_event(zed.clone())).await;

        assert_eq!(f.manager.call_count(), 1);
        assert_eq!(f.board.calls_placed(), 1);
        assert_eq!(f.manager.peers().len(), 1);
        assert!(zed_rx.try_recv().is_ok());
        assert!(zed_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn larger_peer_id_waits_for_inbound_call() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let aaron = peer_info("user_aaron", "Aaron");

        f.manager.handle_server_message(&joined_event(aaron.clone())).await;
        assert_eq!(f.manager.call_count(), 0);
        assert_eq!(f.manager.peers().len(), 1);

        let local = f.manager.peer_id().unwrap().clone();
        let _ = f
            .board
            .call(aaron.peer_id.as_ref().unwrap(), &local, None)
            .await
            .unwrap();
        f.connector.hang_up();
        assert!(f.manager.recv().await.is_none());
        assert!(f.manager.has_call_with(aaron.peer_id.as_ref().unwrap()));
    }

    #[tokio::test]
    async fn duplicate_inbound_call_is_declined() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let local = f.manager.peer_id().unwrap().clone();
        let remote = PeerId::from_raw("peer-user_aaron");

        let first = f.board.call(&remote, &local, None).await.unwrap();
        let second = f.board.call(&remote, &local, None).await.unwrap();
        f.connector.hang_up();
        assert!(f.manager.recv().await.is_none());

        assert_eq!(f.manager.call_count(), 1);
        assert!(first.is_open());
        assert!(!second.is_open());
    }

    #[tokio::test]
    async fn own_peer_joined_is_ignored() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let me = peer_info("user_alice", "Alice");
        f.manager.handle_server_message(&joined_event(me)).await;
        assert!(f.manager.peers().is_empty());
    }

    #[tokio::test]
    async fn degraded_smaller_side_places_receive_only_call() {
        let mut f = fixture(SyntheticDevices::no_device());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let zed = peer_info("user_zed", "Zed");
        let mut zed_rx = f.board.open(zed.peer_id.as_ref().unwrap()).await.unwrap();
        f.manager.handle_server_message(&joined_event(zed)).await;
        assert_eq!(f.manager.call_count(), 1);
        assert!(zed_rx.try_recv().is_ok());
    }

    /// Two managers on one switchboard, each told about the other.
    async fn meet(aaron_devices: SyntheticDevices, zed_devices: SyntheticDevices) -> (Fixture, Fixture) {
        let board = Switchboard::new();
        let mut aaron = fixture_on(aaron_devices, board.clone());
        let mut zed = fixture_on(zed_devices, board);
        let _ = aaron
            .manager
            .connect(session(), Participant::new(ParticipantId::from_raw("user_aaron"), "Aaron"))
            .await
            .unwrap();
        let _ = zed
            .manager
            .connect(session(), Participant::new(ParticipantId::from_raw("user_zed"), "Zed"))
            .await
            .unwrap();
        aaron
            .manager
            .handle_server_message(&joined_event(peer_info("user_zed", "Zed")))
            .await;
        zed.manager
            .handle_server_message(&joined_event(peer_info("user_aaron", "Aaron")))
            .await;
        zed.connector.hang_up();
        assert!(zed.manager.recv().await.is_none());
        (aaron, zed)
    }

    #[tokio::test]
    async fn camera_less_caller_still_gets_one_call() {
        let (aaron, zed) = meet(SyntheticDevices::no_device(), SyntheticDevices::granted()).await;
        assert_eq!(aaron.board.calls_placed(), 1);
        assert_eq!(aaron.manager.call_count(), 1);
        assert_eq!(zed.manager.call_count(), 1);
        assert!(zed.manager.has_call_with(&PeerId::from_raw("peer-user_aaron")));
    }

    #[tokio::test]
    async fn camera_less_callee_still_gets_one_call() {
        let (aaron, zed) = meet(SyntheticDevices::granted(), SyntheticDevices::no_device()).await;
        assert_eq!(aaron.board.calls_placed(), 1);
        assert_eq!(aaron.manager.call_count(), 1);
        assert_eq!(zed.manager.call_count(), 1);
    }

    #[tokio::test]
    async fn peer_left_removes_entry_and_closes_call() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let zed = peer_info("user_zed", "Zed");
        let mut zed_rx = f.board.open(zed.peer_id.as_ref().unwrap()).await.unwrap();
        f.manager.handle_server_message(&joined_event(zed.clone())).await;
        let remote_end = zed_rx.try_recv().unwrap().answer(None);

        f.manager
            .handle_server_message(&ServerMessage::PeerLeft {
                session_id: session(),
                participant_id: zed.participant_id.clone(),
            })
            .await;
        assert!(f.manager.peers().is_empty());
        assert_eq!(f.manager.call_count(), 0);
        assert!(!remote_end.is_open());
    }

    #[tokio::test]
    async fn unreachable_peer_counts_failed_call() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        f.manager
            .handle_server_message(&joined_event(peer_info("user_zed", "Zed")))
            .await;
        assert_eq!(f.manager.health().failed_calls, 1);
        assert_eq!(f.manager.call_count(), 0);
    }

    #[tokio::test]
    async fn identity_rejection_rejoins_once() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let rejected = ServerMessage::IdentityRejected {
            session_id: session(),
            participant_id: alice().id,
            reason: "taken".into(),
        };
        f.manager.handle_server_message(&rejected).await;
        f.manager.handle_server_message(&rejected).await;

        let joins: Vec<_> = f
            .connector
            .sent()
            .into_iter()
            .filter_map(|m| match m {
                ClientMessage::JoinRoom { participant_id, .. } => Some(participant_id),
                _ => None,
            })
            .collect();
        assert_eq!(joins.len(), 2);
        assert!(joins[1].as_str().starts_with("user_alice-"));
        assert_eq!(f.manager.local().unwrap().id, joins[1]);
    }

    #[tokio::test]
    async fn disconnect_stops_stream_once_after_calls_close() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        let zed = peer_info("user_zed", "Zed");
        let _zed_rx = f.board.open(zed.peer_id.as_ref().unwrap()).await.unwrap();
        f.manager.handle_server_message(&joined_event(zed)).await;
        assert_eq!(f.manager.call_count(), 1);

        f.manager.disconnect().await;
        f.manager.disconnect().await;
        assert_eq!(f.devices.stops(), 1);
        assert_eq!(f.connector.closes(), 1);
        assert!(!f.board.is_registered(&PeerId::from_raw("peer-user_alice")));
        assert!(!f.manager.is_connected());
        assert_eq!(f.connector.sent().last().unwrap().event_name(), "leave-room");
    }

    #[tokio::test]
    async fn toggles_reach_the_shared_stream() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        assert!(f.manager.health().audio_enabled);
        assert!(f.manager.health().video_enabled);

        assert!(f.manager.set_video_enabled(false));
        assert!(f.manager.set_audio_enabled(false));
        assert!(!f.manager.health().video_enabled);
        assert!(!f.manager.health().audio_enabled);

        assert!(f.manager.set_audio_enabled(true));
        assert!(f.manager.health().audio_enabled);
        assert!(!f.manager.health().video_enabled);
    }

    #[tokio::test]
    async fn toggles_without_media_do_nothing() {
        let mut f = fixture(SyntheticDevices::denied());
        assert!(!f.manager.set_audio_enabled(true));
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        assert!(!f.manager.set_video_enabled(true));
        assert!(!f.manager.health().video_enabled);
        assert!(!f.manager.health().audio_enabled);
    }

    #[tokio::test]
    async fn failed_send_is_counted() {
        let mut f = fixture(SyntheticDevices::granted());
        let _ = f.manager.connect(session(), alice()).await.unwrap();
        f.connector.fail_sends(true);
        let msg = ClientMessage::LeaveRoom { session_id: session() };
        assert!(f.manager.send(msg).await.is_err());
        assert_eq!(f.manager.health().failed_sends, 1);
    }

    #[tokio::test]
    async fn send_without_session_is_not_connected() {
        let mut f = fixture(SyntheticDevices::granted());
        let msg = ClientMessage::LeaveRoom { session_id: session() };
        assert!(matches!(f.manager.send(msg).await, Err(RoomError::NotConnected)));
    }
}
