//! Core data models for the resumable upload service.
//!
//! An [`upload::Upload`] is the metadata half of an upload unit of work; the
//! bytes live in the storage backend under the same id. Records map to the
//! `uploads` table via `sqlx::FromRow` and serialize as JSON via `serde`.

pub mod upload;
