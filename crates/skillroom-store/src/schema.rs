/// SQL DDL for the identity database.
pub const SCHEMA_VERSION: u32 = 1;

pub const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;";

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS local_identity (
    slot INTEGER PRIMARY KEY CHECK (slot = 1),
    participant_id TEXT NOT NULL,
    display_name TEXT NOT NULL,
    session_token TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;
