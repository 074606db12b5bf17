use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use skillroom_core::ids::ParticipantId;

use crate::database::Database;
use crate::error::StoreError;

/// The participant this installation acts as.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub participant_id: ParticipantId,
    pub display_name: String,
    /// Opaque per-installation token; never sent in chat frames.
    pub session_token: String,
    pub created_at: String,
}

impl LocalIdentity {
    pub fn generate(display_name: &str) -> Self {
        Self {
            participant_id: ParticipantId::new(),
            display_name: display_name.to_string(),
            session_token: new_token(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

fn new_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Single-row repository for [`LocalIdentity`].
pub struct IdentityRepo {
    db: Database,
}

impl IdentityRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn load(&self) -> Result<Option<LocalIdentity>, StoreError> {
        self.db.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT participant_id, display_name, session_token, created_at
                 FROM local_identity WHERE slot = 1",
                [],
                |row| {
                    Ok(LocalIdentity {
                        participant_id: ParticipantId::from_raw(row.get::<_, String>(0)?),
                        display_name: row.get(1)?,
                        session_token: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            );
            match row {
                Ok(identity) => Ok(Some(identity)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Load the stored identity, creating one named `display_name` if none exists.
    #[instrument(skip(self))]
    pub fn load_or_create(&self, display_name: &str) -> Result<LocalIdentity, StoreError> {
        if let Some(existing) = self.load()? {
            return Ok(existing);
        }
        let identity = LocalIdentity::generate(display_name);
        self.save(&identity)?;
        info!(participant_id = %identity.participant_id, "created local identity");
        Ok(identity)
    }

    pub fn save(&self, identity: &LocalIdentity) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let _ = conn.execute(
                "INSERT INTO local_identity
                     (slot, participant_id, display_name, session_token, created_at, updated_at)
                 VALUES (1, ?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(slot) DO UPDATE SET
                     participant_id = excluded.participant_id,
                     display_name = excluded.display_name,
                     session_token = excluded.session_token,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    identity.participant_id.as_str(),
                    identity.display_name,
                    identity.session_token,
                    identity.created_at,
                    Utc::now().to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// Change only the display label; the participant id stays stable.
    pub fn rename(&self, display_name: &str) -> Result<LocalIdentity, StoreError> {
        let mut identity = self
            .load()?
            .ok_or_else(|| StoreError::NotFound("local identity".into()))?;
        identity.display_name = display_name.to_string();
        self.save(&identity)?;
        Ok(identity)
    }

    /// Forget the stored identity. Returns whether one existed.
    pub fn reset(&self) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let removed = conn.execute("DELETE FROM local_identity", [])?;
            Ok(removed > 0)
        })
    }
}
