//! Core data models for the drive service.
//!
//! These entities represent the logical structure of a user's drive: an
//! account with a storage ledger, a folder tree, and the files inside it.
//! They map cleanly to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod file;
pub mod folder;
pub mod user;
