//! Core data models for the chunked file-transfer service.
//!
//! These entities represent upload sessions, their chunks, and the share
//! links that gate access to merged artifacts. They map cleanly to database
//! tables via `sqlx::FromRow` and serialize naturally as JSON via `serde`.

pub mod chunk;
pub mod file;
pub mod share;
