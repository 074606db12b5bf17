use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Same id with a short random suffix appended, used to step
            /// around an identity collision.
            pub fn disambiguated(&self) -> Self {
                Self(format!("{}-{}", self.0, random_suffix()))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

branded_id!(SessionId, "sess");
branded_id!(ParticipantId, "user");
branded_id!(MessageId, "msg");
branded_id!(FileId, "file");
branded_id!(ConnectionId, "conn");
branded_id!(PeerId, "peer");

impl PeerId {
    /// Media-network identity derived from a participant id.
    pub fn for_participant(participant: &ParticipantId) -> Self {
        Self(format!("peer-{participant}"))
    }
}

/// Six hex chars taken from the random tail of a v7 uuid.
fn random_suffix() -> String {
    let simple = Uuid::now_v7().simple().to_string();
    simple[simple.len() - 6..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_has_prefix() {
        let id = SessionId::new();
        assert!(id.as_str().starts_with("sess_"), "got: {id}");
    }

    #[test]
    fn participant_id_has_prefix() {
        let id = ParticipantId::new();
        assert!(id.as_str().starts_with("user_"), "got: {id}");
    }

    #[test]
    fn message_and_file_ids_have_prefix() {
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(FileId::new().as_str().starts_with("file_"));
        assert!(ConnectionId::new().as_str().starts_with("conn_"));
    }

    #[test]
    fn ids_are_unique() {
        let a = MessageId::new();
        let b = MessageId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn peer_id_derives_from_participant() {
        let user = ParticipantId::from_raw("user_abc");
        let peer = PeerId::for_participant(&user);
        assert_eq!(peer.as_str(), "peer-user_abc");
    }

    #[test]
    fn disambiguated_keeps_base_and_differs() {
        let base = ParticipantId::from_raw("user_abc");
        let a = base.disambiguated();
        let b = base.disambiguated();
        assert!(a.as_str().starts_with("user_abc-"), "got: {a}");
        assert_eq!(a.as_str().len(), "user_abc-".len() + 6);
        assert_ne!(a, base);
        assert_ne!(a, b);
    }

    #[test]
    fn peer_ids_order_lexicographically() {
        let a = PeerId::from_raw("peer-a");
        let b = PeerId::from_raw("peer-b");
        assert!(a < b);
    }

    #[test]
    fn display_and_from_str_roundtrip() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = SessionId::from_raw("room-42");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"room-42\"");
    }
}
