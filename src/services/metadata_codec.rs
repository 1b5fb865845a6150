//! Codec for the `Upload-Metadata` header.
//!
//! The header is a comma separated list of `key base64value` pairs. Two parse
//! modes exist: [`parse_strict`] rejects the whole header on the first bad
//! pair and is used when creating uploads, [`parse_lenient`] skips bad pairs
//! and is used when reading metadata back for auxiliary headers.

use base64::{Engine as _, engine::general_purpose};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::warn;

/// Metadata key holding the client side file name.
pub const FILENAME_KEY: &str = "filename";
/// Metadata key holding the client fingerprint used for deduplication.
pub const FINGERPRINT_KEY: &str = "fingerprint";
/// Metadata key holding the client declared content type.
pub const FILETYPE_KEY: &str = "filetype";

pub type Metadata = BTreeMap<String, String>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetadataError {
    #[error("Upload-Metadata header is missing or empty")]
    Missing,
    #[error("invalid base64 encoding for metadata key `{key}`")]
    InvalidEncoding { key: String },
    #[error("malformed metadata pair `{0}`")]
    MalformedPair(String),
    #[error("duplicate metadata key `{0}`")]
    DuplicateKey(String),
}

/// Decode a metadata header, failing on any malformed element.
pub fn parse_strict(header: Option<&str>) -> Result<Metadata, MetadataError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or(MetadataError::Missing)?;

    let mut metadata = Metadata::new();
    for pair in header.split(',') {
        let pair = pair.trim();
        let mut elements = pair.split(' ');
        let key = elements.next().unwrap_or_default();
        let value = elements.next();
        if key.is_empty() || elements.next().is_some() {
            return Err(MetadataError::MalformedPair(pair.to_string()));
        }

        // A key without a value is allowed and maps to an empty string.
        let decoded = match value {
            Some(encoded) => decode_value(encoded).ok_or_else(|| {
                warn!("invalid metadata encoding for key `{}`: `{}`", key, encoded);
                MetadataError::InvalidEncoding {
                    key: key.to_string(),
                }
            })?,
            None => String::new(),
        };

        if metadata.insert(key.to_string(), decoded).is_some() {
            return Err(MetadataError::DuplicateKey(key.to_string()));
        }
    }
    Ok(metadata)
}

/// Decode a metadata header, skipping malformed elements.
///
/// A missing header yields an empty map.
pub fn parse_lenient(header: Option<&str>) -> Metadata {
    let mut metadata = Metadata::new();
    let Some(header) = header else {
        return metadata;
    };

    for pair in header.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let elements: Vec<&str> = pair.split(' ').collect();
        let [key, encoded] = elements.as_slice() else {
            warn!("ignoring metadata element `{}`", pair);
            continue;
        };
        match decode_value(encoded).or_else(|| decode_url_safe(encoded)) {
            Some(value) => {
                metadata.insert((*key).to_string(), value);
            }
            None => warn!("invalid encoding of metadata element `{}`", pair),
        }
    }
    metadata
}

/// Encode metadata back into header form. Keys are emitted in sorted order.
pub fn encode(metadata: &Metadata) -> String {
    metadata
        .iter()
        .map(|(key, value)| {
            if value.is_empty() {
                key.clone()
            } else {
                format!("{} {}", key, general_purpose::STANDARD.encode(value))
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn decode_value(encoded: &str) -> Option<String> {
    general_purpose::STANDARD
        .decode(encoded)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn decode_url_safe(encoded: &str) -> Option<String> {
    general_purpose::URL_SAFE
        .decode(encoded)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}
