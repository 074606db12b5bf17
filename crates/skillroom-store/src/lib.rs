//! # skillroom-store
//!
//! The only durable client state: who this participant is. Chat, code and
//! whiteboard contents live for the length of a session and are never
//! written here.

#![deny(unsafe_code)]

pub mod database;
pub mod error;
pub mod identity;
mod schema;

pub use database::Database;
pub use error::StoreError;
pub use identity::{IdentityRepo, LocalIdentity};
