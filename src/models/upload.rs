//! Represents one upload unit of work, partial or final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Placeholder stored when the client sends no `filename` metadata.
pub const UNKNOWN_FILENAME: &str = "FILE NAME NOT EXISTS";
/// Placeholder stored when the client sends no `fingerprint` metadata.
pub const UNKNOWN_FINGERPRINT: &str = "FINGERPRINT NAME NOT EXISTS";

/// Metadata record of an upload.
///
/// The record never holds payload bytes. `content_offset` counts the bytes
/// durably committed to the backing object and always satisfies
/// `0 <= content_offset <= content_length`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    /// Time-ordered id, also the storage key of the backing object.
    pub id: i64,

    /// Content type declared by the client (advisory).
    pub mime_type: String,

    /// Declared total size in bytes.
    pub content_length: i64,

    /// Bytes committed so far.
    pub content_offset: i64,

    /// Number of successful append operations.
    pub last_uploaded_chunk_number: i64,

    /// File name taken from the `filename` metadata entry.
    pub original_name: String,

    /// Opaque client fingerprint taken from the `fingerprint` metadata entry.
    pub fingerprint: String,

    /// True for fragments created with `Upload-Concat: partial`.
    #[sqlx(rename = "is_partial")]
    pub partial_status: bool,

    /// Raw `Upload-Metadata` header as sent at creation.
    pub metadata: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn is_complete(&self) -> bool {
        self.content_offset == self.content_length
    }
}

/// Values for a record about to be inserted; timestamps are assigned by the store.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub id: i64,
    pub mime_type: String,
    pub content_length: i64,
    pub content_offset: i64,
    pub original_name: String,
    pub fingerprint: String,
    pub partial_status: bool,
    pub metadata: String,
}
