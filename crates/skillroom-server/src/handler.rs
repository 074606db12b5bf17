//! Inbound frame dispatch: membership changes and relay.

use std::sync::Arc;

use tracing::{debug, error, info, instrument, warn};

use skillroom_core::errors::{IDENTITY_TAKEN, NOT_IN_SESSION};
use skillroom_core::wire::{self, ClientMessage, PeerInfo, ServerMessage};
use skillroom_core::{ParticipantId, PeerId, SessionId};

use crate::connection::ClientConnection;
use crate::rooms::{JoinOutcome, RoomRegistry};

/// Decode one text frame from `connection` and act on it.
#[instrument(skip_all, fields(connection_id = %connection.id))]
pub fn handle_frame(text: &str, connection: &Arc<ClientConnection>, rooms: &RoomRegistry, limit: usize) {
    let message: ClientMessage = match wire::decode(text, limit) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "rejected frame");
            let _ = connection.send_event(&ServerMessage::error(e.code(), e.to_string()));
            return;
        }
    };
    debug!(event = message.event_name(), session_id = %message.session_id(), "frame received");

    match message {
        ClientMessage::JoinRoom {
            session_id,
            participant_id,
            display_name,
            peer_id,
        } => join(connection, rooms, session_id, participant_id, display_name, peer_id),
        ClientMessage::LeaveRoom { session_id } => leave(connection, rooms, &session_id),
        ClientMessage::SendMessage {
            session_id,
            message,
        } => {
            let event = ServerMessage::ReceiveMessage {
                session_id: session_id.clone(),
                message,
            };
            relay(connection, rooms, &session_id, &event);
        }
        ClientMessage::ShareFile { session_id, file } => {
            let event = ServerMessage::ShareFile {
                session_id: session_id.clone(),
                file,
            };
            relay(connection, rooms, &session_id, &event);
        }
        ClientMessage::FileChunk { session_id, chunk } => {
            let event = ServerMessage::FileChunk {
                session_id: session_id.clone(),
                chunk,
            };
            relay(connection, rooms, &session_id, &event);
        }
        ClientMessage::CodeUpdate { session_id, update } => {
            let event = ServerMessage::CodeUpdate {
                session_id: session_id.clone(),
                update,
            };
            relay(connection, rooms, &session_id, &event);
        }
    }
}

fn join(
    connection: &Arc<ClientConnection>,
    rooms: &RoomRegistry,
    session_id: SessionId,
    participant_id: ParticipantId,
    display_name: String,
    peer_id: Option<PeerId>,
) {
    if connection
        .membership(&session_id)
        .is_some_and(|current| current != participant_id)
    {
        leave(connection, rooms, &session_id);
    }

    match rooms.join(&session_id, &participant_id, &display_name, peer_id.clone(), connection) {
        JoinOutcome::Taken => {
            info!(session_id = %session_id, participant_id = %participant_id, "identity taken");
            let _ = connection.send_event(&ServerMessage::IdentityRejected {
                session_id,
                participant_id,
                reason: format!("{IDENTITY_TAKEN}: participant id is already in this session"),
            });
        }
        JoinOutcome::AlreadyJoined { participants } => {
            debug!(session_id = %session_id, "repeated join");
            let _ = connection.send_event(&ServerMessage::Joined {
                session_id,
                participant_id,
                participants,
            });
        }
        JoinOutcome::Joined {
            existing,
            others,
            participants,
        } => {
            connection.join_session(session_id.clone(), participant_id.clone());
            info!(session_id = %session_id, participant_id = %participant_id, participants, "participant joined");

            let _ = connection.send_event(&ServerMessage::Joined {
                session_id: session_id.clone(),
                participant_id: participant_id.clone(),
                participants,
            });
            for peer in existing {
                let _ = connection.send_event(&ServerMessage::PeerJoined {
                    session_id: session_id.clone(),
                    peer,
                });
            }
            let announce = ServerMessage::PeerJoined {
                session_id,
                peer: PeerInfo {
                    participant_id,
                    display_name,
                    peer_id,
                },
            };
            broadcast(&others, &announce);
        }
    }
}

/// Leave one session and tell whoever is left.
pub fn leave(connection: &ClientConnection, rooms: &RoomRegistry, session_id: &SessionId) {
    let Some(participant) = connection.leave_session(session_id) else {
        return;
    };
    announce_departure(connection, rooms, session_id.clone(), participant);
}

/// Leave every session the connection joined.
pub fn disconnect(connection: &ClientConnection, rooms: &RoomRegistry) {
    for (session_id, participant) in connection.take_memberships() {
        announce_departure(connection, rooms, session_id, participant);
    }
}

fn announce_departure(
    connection: &ClientConnection,
    rooms: &RoomRegistry,
    session_id: SessionId,
    participant: ParticipantId,
) {
    let Some(remaining) = rooms.leave(&session_id, &participant, &connection.id) else {
        return;
    };
    info!(session_id = %session_id, participant_id = %participant, "participant left");
    let event = ServerMessage::PeerLeft {
        session_id,
        participant_id: participant,
    };
    broadcast(&remaining, &event);
}

fn relay(connection: &ClientConnection, rooms: &RoomRegistry, session_id: &SessionId, event: &ServerMessage) {
    let targets = connection
        .membership(session_id)
        .and_then(|participant| rooms.others(session_id, &participant));
    let Some(targets) = targets else {
        debug!(session_id = %session_id, "relay from non-member refused");
        let _ = connection.send_event(&ServerMessage::error(
            NOT_IN_SESSION,
            format!("join session {session_id} first"),
        ));
        return;
    };
    broadcast(&targets, event);
}

fn broadcast(targets: &[Arc<ClientConnection>], event: &ServerMessage) {
    if targets.is_empty() {
        return;
    }
    let frame = match wire::encode(event) {
        Ok(json) => Arc::new(json),
        Err(e) => {
            error!(error = %e, "failed to encode broadcast");
            return;
        }
    };
    for target in targets {
        let _ = target.send(Arc::clone(&frame));
    }
}
