//! UploadService, the upload coordinator. It owns every protocol rule:
//! creation limits, contiguous appends, checksum verification, expiration,
//! concatenation of partial uploads and termination. Metadata lives in the
//! [`UploadRepository`]; payload bytes go through a [`FileStorage`] backend.

use crate::{
    config::TusSettings,
    models::upload::{NewUpload, UNKNOWN_FILENAME, UNKNOWN_FINGERPRINT, Upload},
    services::{
        checksum::{ChecksumClaim, ChecksumError},
        id_generator::IdGenerator,
        metadata_codec::{self, FILENAME_KEY, FINGERPRINT_KEY, MetadataError},
        storage_service::{
            ByteStream, FileStorage, StorageError, collect_bytes, single_buffer,
        },
        upload_locks::UploadLocks,
        upload_repository::UploadRepository,
    },
};
use chrono::{DateTime, Utc};
use futures::{StreamExt, future};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("upload `{0}` not found")]
    NotFound(i64),
    #[error("upload size {size} exceeds the allowed maximum of {limit} bytes")]
    SizeExceeded { size: i64, limit: i64 },
    #[error("offset mismatch: upload is at {expected}, request claimed {claimed}")]
    OffsetMismatch { expected: i64, claimed: i64 },
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("checksum algorithm `{0}` is not supported")]
    UnsupportedChecksumAlgorithm(String),
    #[error("upload `{id}` expired at {expired_at}")]
    Expired { id: i64, expired_at: DateTime<Utc> },
    #[error(transparent)]
    MetadataDecode(#[from] MetadataError),
    #[error(transparent)]
    StorageFailure(#[from] StorageError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl From<ChecksumError> for UploadError {
    fn from(err: ChecksumError) -> Self {
        match err {
            ChecksumError::Unsupported(name) => UploadError::UnsupportedChecksumAlgorithm(name),
            ChecksumError::Mismatch { .. } => UploadError::ChecksumMismatch,
            ChecksumError::Malformed(header) => {
                UploadError::InvalidRequest(format!("malformed Upload-Checksum `{}`", header))
            }
        }
    }
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Coordinates uploads; cheap to clone and shared as router state.
#[derive(Clone)]
pub struct UploadService {
    repository: UploadRepository,
    storage: Arc<dyn FileStorage>,
    settings: Arc<TusSettings>,
    ids: Arc<IdGenerator>,
    locks: UploadLocks,
}

impl UploadService {
    pub fn new(
        repository: UploadRepository,
        storage: Arc<dyn FileStorage>,
        settings: TusSettings,
        ids: Arc<IdGenerator>,
    ) -> Self {
        Self {
            repository,
            storage,
            settings: Arc::new(settings),
            ids,
            locks: UploadLocks::new(),
        }
    }

    pub fn settings(&self) -> &TusSettings {
        &self.settings
    }

    pub fn repository(&self) -> &UploadRepository {
        &self.repository
    }

    pub fn storage(&self) -> &dyn FileStorage {
        self.storage.as_ref()
    }

    /// Value for the `Upload-Expires` header of an upload.
    pub fn expires_header(&self, upload: &Upload) -> String {
        self.settings.expiration.header_value(upload)
    }

    pub async fn find_upload(&self, id: i64) -> UploadResult<Upload> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or(UploadError::NotFound(id))
    }

    /// Create a new upload unit of work with an empty backing object.
    #[instrument(skip(self, metadata))]
    pub async fn create_upload(
        &self,
        declared_length: i64,
        metadata: Option<&str>,
        mime_type: &str,
        is_partial: bool,
    ) -> UploadResult<Upload> {
        if declared_length < 1 {
            return Err(UploadError::InvalidRequest(format!(
                "Upload-Length must be at least 1, got {}",
                declared_length
            )));
        }
        self.ensure_within_max_size(declared_length)?;
        let parsed = metadata_codec::parse_strict(metadata)?;

        let new_upload = NewUpload {
            id: self.ids.next_id(),
            mime_type: mime_type.to_string(),
            content_length: declared_length,
            content_offset: 0,
            original_name: metadata_value(&parsed, FILENAME_KEY, UNKNOWN_FILENAME),
            fingerprint: metadata_value(&parsed, FINGERPRINT_KEY, UNKNOWN_FINGERPRINT),
            partial_status: is_partial,
            metadata: metadata.unwrap_or_default().trim().to_string(),
        };

        let upload = self.persist_with_object(&new_upload).await?;
        info!(
            "created upload {} (length {}, partial {})",
            upload.id, upload.content_length, upload.partial_status
        );
        Ok(upload)
    }

    /// Append one chunk at `claimed_offset`.
    ///
    /// The offset only advances after the backend reports the full chunk as
    /// written. A failed or interrupted write leaves the stored offset where it
    /// was; bytes already on disk past that offset are overwritten by the retry.
    #[instrument(skip(self, parts, checksum))]
    pub async fn append_chunk(
        &self,
        id: i64,
        parts: ByteStream,
        claimed_offset: i64,
        claimed_length: i64,
        checksum: Option<ChecksumClaim>,
    ) -> UploadResult<Upload> {
        let _guard = self.locks.lock(id).await;

        let upload = self.find_upload(id).await?;
        if self.settings.expiration.is_expired(&upload) {
            return Err(UploadError::Expired {
                id,
                expired_at: self.settings.expiration.expires_at(&upload),
            });
        }
        if claimed_offset != upload.content_offset {
            return Err(UploadError::OffsetMismatch {
                expected: upload.content_offset,
                claimed: claimed_offset,
            });
        }
        if claimed_length < 0 {
            return Err(UploadError::InvalidRequest(format!(
                "Content-Length must not be negative, got {}",
                claimed_length
            )));
        }
        match claimed_offset.checked_add(claimed_length) {
            Some(end) if end <= upload.content_length => {}
            _ => {
                return Err(UploadError::SizeExceeded {
                    size: claimed_offset.saturating_add(claimed_length),
                    limit: upload.content_length,
                });
            }
        }

        let parts = limit_stream(parts, claimed_length as u64);
        let parts = match checksum {
            Some(claim) => {
                let algorithm = claim.algorithm_in(&self.settings.checksum_algorithms)?;
                // The digest covers the whole chunk, so it has to be buffered before anything is committed.
                let body = collect_bytes(parts).await.map_err(StorageError::Io)?;
                if let Err(err) = claim.verify(&body) {
                    warn!("upload {}: {}", id, err);
                    return Err(err.into());
                }
                debug!("upload {}: {} checksum verified over {} bytes", id, algorithm, body.len());
                single_buffer(body)
            }
            None => parts,
        };

        let written = self
            .storage
            .write_chunk(id, parts, claimed_offset as u64)
            .await?;
        let written = i64::try_from(written).map_err(|_| {
            StorageError::Io(io::Error::other("written byte count overflows i64"))
        })?;

        let updated = self
            .repository
            .record_chunk(id, written)
            .await?
            .ok_or(UploadError::NotFound(id))?;
        info!(
            "upload {}: offset {} -> {} (chunk {})",
            id, upload.content_offset, updated.content_offset, updated.last_uploaded_chunk_number
        );
        Ok(updated)
    }

    /// Concatenate complete uploads, in the given order, into a new final upload.
    #[instrument(skip(self, metadata))]
    pub async fn merge_uploads(
        &self,
        partial_ids: &[i64],
        metadata: Option<&str>,
        mime_type: &str,
    ) -> UploadResult<Upload> {
        if partial_ids.len() < 2 {
            return Err(UploadError::InvalidRequest(format!(
                "concatenation needs at least 2 uploads, got {}",
                partial_ids.len()
            )));
        }

        let parts = match self.repository.find_all_by_ids(partial_ids).await? {
            Ok(parts) => parts,
            Err(missing) => return Err(UploadError::NotFound(missing)),
        };
        if let Some(incomplete) = parts.iter().find(|p| !p.is_complete()) {
            return Err(UploadError::InvalidRequest(format!(
                "upload {} is incomplete ({} of {} bytes)",
                incomplete.id, incomplete.content_offset, incomplete.content_length
            )));
        }

        let total = parts
            .iter()
            .try_fold(0i64, |sum, p| sum.checked_add(p.content_length))
            .ok_or_else(|| UploadError::InvalidRequest("combined length overflows".into()))?;
        self.ensure_within_max_size(total)?;
        let parsed = metadata_codec::parse_strict(metadata)?;

        let new_upload = NewUpload {
            id: self.ids.next_id(),
            mime_type: mime_type.to_string(),
            content_length: total,
            content_offset: total,
            original_name: metadata_value(&parsed, FILENAME_KEY, UNKNOWN_FILENAME),
            fingerprint: metadata_value(&parsed, FINGERPRINT_KEY, UNKNOWN_FINGERPRINT),
            partial_status: false,
            metadata: metadata.unwrap_or_default().trim().to_string(),
        };
        let upload = self.persist_with_object(&new_upload).await?;

        let merged = match self.storage.merge_chunk(upload.id, partial_ids, 0).await {
            Ok(written) if written == total as u64 => written,
            Ok(written) => {
                self.discard(upload.id).await;
                return Err(StorageError::Io(io::Error::other(format!(
                    "merged {} bytes, expected {}",
                    written, total
                )))
                .into());
            }
            Err(err) => {
                self.discard(upload.id).await;
                return Err(err.into());
            }
        };

        info!(
            "merged uploads {:?} into {} ({} bytes)",
            partial_ids, upload.id, merged
        );
        Ok(upload)
    }

    /// Remove an upload's backing object and its record.
    #[instrument(skip(self))]
    pub async fn delete_upload(&self, id: i64) -> UploadResult<()> {
        let _guard = self.locks.lock(id).await;

        self.find_upload(id).await?;
        self.storage.delete_file(id).await?;
        if !self.repository.delete_by_id(id).await? {
            return Err(UploadError::NotFound(id));
        }
        self.locks.forget(id);

        info!("deleted upload {}", id);
        Ok(())
    }

    /// Record plus a stream of its committed bytes, for download.
    ///
    /// Bytes an interrupted append left past `content_offset` are not served.
    pub async fn open_download(&self, id: i64) -> UploadResult<(Upload, ByteStream)> {
        let upload = self.find_upload(id).await?;
        let stream = self.storage.read_file(id).await?;
        let committed = u64::try_from(upload.content_offset).unwrap_or(0);
        Ok((upload, take_bytes(stream, committed)))
    }

    fn ensure_within_max_size(&self, size: i64) -> UploadResult<()> {
        let limit = i64::try_from(self.settings.max_size).unwrap_or(i64::MAX);
        if size > limit {
            return Err(UploadError::SizeExceeded { size, limit });
        }
        Ok(())
    }

    /// Insert the record, then allocate its object; the record is rolled back if allocation fails.
    async fn persist_with_object(&self, new_upload: &NewUpload) -> UploadResult<Upload> {
        let upload = self.repository.insert(new_upload).await?;
        if let Err(err) = self.storage.create_file(upload.id).await {
            if let Err(cleanup) = self.repository.delete_by_id(upload.id).await {
                warn!("failed to roll back record {}: {}", upload.id, cleanup);
            }
            return Err(err.into());
        }
        Ok(upload)
    }

    async fn discard(&self, id: i64) {
        if let Err(err) = self.storage.delete_file(id).await {
            warn!("failed to remove storage object {}: {}", id, err);
        }
        if let Err(err) = self.repository.delete_by_id(id).await {
            warn!("failed to remove record {}: {}", id, err);
        }
    }
}

fn metadata_value(metadata: &metadata_codec::Metadata, key: &str, default: &str) -> String {
    metadata
        .get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| default.to_string())
}

/// Fail the stream once it yields more than `limit` bytes.
fn limit_stream(parts: ByteStream, limit: u64) -> ByteStream {
    let mut seen: u64 = 0;
    Box::pin(parts.map(move |part| {
        let part = part?;
        seen += part.len() as u64;
        if seen > limit {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("request body exceeds declared length of {} bytes", limit),
            ));
        }
        Ok(part)
    }))
}

/// Yield at most `limit` bytes, splitting the buffer that crosses the limit.
fn take_bytes(parts: ByteStream, limit: u64) -> ByteStream {
    Box::pin(
        parts
            .scan(limit, |remaining, part| {
                let next = match part {
                    Ok(_) if *remaining == 0 => None,
                    Ok(mut bytes) => {
                        if bytes.len() as u64 > *remaining {
                            bytes.truncate(*remaining as usize);
                        }
                        *remaining -= bytes.len() as u64;
                        Some(Ok(bytes))
                    }
                    Err(err) => Some(Err(err)),
                };
                future::ready(next)
            })
            .fuse(),
    )
}
