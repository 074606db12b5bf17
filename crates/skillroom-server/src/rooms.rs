//! Room membership: session id → participants and their connections.
//!
//! A room exists while it has at least one member. A participant id is
//! owned by one connection at a time within a room.

use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;

use skillroom_core::wire::PeerInfo;
use skillroom_core::{ConnectionId, ParticipantId, PeerId, SessionId};

use crate::connection::ClientConnection;

struct Member {
    connection: Arc<ClientConnection>,
    display_name: String,
    peer_id: Option<PeerId>,
}

impl Member {
    fn info(&self, participant: &ParticipantId) -> PeerInfo {
        PeerInfo {
            participant_id: participant.clone(),
            display_name: self.display_name.clone(),
            peer_id: self.peer_id.clone(),
        }
    }
}

#[derive(Default)]
struct Room {
    members: BTreeMap<ParticipantId, Member>,
}

impl Room {
    fn connections_except(&self, participant: &ParticipantId) -> Vec<Arc<ClientConnection>> {
        self.members
            .iter()
            .filter(|(id, _)| *id != participant)
            .map(|(_, m)| Arc::clone(&m.connection))
            .collect()
    }
}

pub enum JoinOutcome {
    /// Newly added. `existing` are the members already there, `others`
    /// their connections, `participants` the count including the joiner.
    Joined {
        existing: Vec<PeerInfo>,
        others: Vec<Arc<ClientConnection>>,
        participants: usize,
    },
    /// This connection already holds the id.
    AlreadyJoined { participants: usize },
    /// Another connection holds the id.
    Taken,
}

#[derive(Default)]
pub struct RoomRegistry {
    rooms: DashMap<SessionId, Room>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        display_name: &str,
        peer_id: Option<PeerId>,
        connection: &Arc<ClientConnection>,
    ) -> JoinOutcome {
        let mut room = self.rooms.entry(session_id.clone()).or_default();
        if let Some(member) = room.members.get(participant) {
            return if member.connection.id == connection.id {
                JoinOutcome::AlreadyJoined {
                    participants: room.members.len(),
                }
            } else {
                JoinOutcome::Taken
            };
        }

        let existing = room
            .members
            .iter()
            .map(|(id, member)| member.info(id))
            .collect();
        let others = room.connections_except(participant);
        let _ = room.members.insert(
            participant.clone(),
            Member {
                connection: Arc::clone(connection),
                display_name: display_name.to_string(),
                peer_id,
            },
        );
        JoinOutcome::Joined {
            existing,
            others,
            participants: room.members.len(),
        }
    }

    /// Remove `participant` if `connection` owns it. Returns the remaining
    /// members' connections.
    pub fn leave(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
        connection: &ConnectionId,
    ) -> Option<Vec<Arc<ClientConnection>>> {
        let remaining = {
            let mut room = self.rooms.get_mut(session_id)?;
            match room.members.get(participant) {
                Some(member) if &member.connection.id == connection => {}
                _ => return None,
            }
            let _ = room.members.remove(participant);
            room.connections_except(participant)
        };
        let _ = self
            .rooms
            .remove_if(session_id, |_, room| room.members.is_empty());
        Some(remaining)
    }

    /// Connections of everyone in the room except `participant`, provided
    /// `participant` is a member.
    pub fn others(
        &self,
        session_id: &SessionId,
        participant: &ParticipantId,
    ) -> Option<Vec<Arc<ClientConnection>>> {
        let room = self.rooms.get(session_id)?;
        if !room.members.contains_key(participant) {
            return None;
        }
        Some(room.connections_except(participant))
    }

    pub fn participants(&self, session_id: &SessionId) -> Vec<PeerInfo> {
        self.rooms
            .get(session_id)
            .map(|room| room.members.iter().map(|(id, m)| m.info(id)).collect())
            .unwrap_or_default()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}
