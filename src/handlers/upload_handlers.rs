//! HTTP handlers for the tus core protocol and its creation, expiration,
//! termination and concatenation extensions.
//! Handlers translate headers into coordinator calls; request bodies are
//! streamed into storage without buffering unless a checksum is supplied.

use crate::{
    errors::AppError,
    handlers::tus_headers::{self as tus, UploadConcat, header_i64, header_str, put},
    models::upload::Upload,
    services::{
        checksum::ChecksumClaim, metadata_codec, storage_service::ByteStream,
        upload_service::UploadService,
    },
};
use axum::{
    Json,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use std::io;
use tracing::debug;

/// `OPTIONS {ctx}`: advertise protocol version, limits and extensions.
pub async fn options_upload(State(service): State<UploadService>) -> Response {
    let settings = service.settings();
    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    put(headers, tus::TUS_RESUMABLE, tus::TUS_RESUMABLE_VALUE);
    put(headers, tus::TUS_VERSION, tus::TUS_VERSION_VALUE);
    put(headers, tus::TUS_MAX_SIZE, settings.max_size.to_string());
    put(headers, tus::TUS_EXTENSION, tus::TUS_EXTENSION_VALUE);
    put(headers, tus::TUS_CHECKSUM_ALGORITHM, settings.checksum_algorithm_header());
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        header::HeaderValue::from_static(tus::ALLOW_ORIGIN_VALUE),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        header::HeaderValue::from_static(tus::ALLOW_METHODS_VALUE),
    );
    headers.insert(
        header::ACCESS_CONTROL_EXPOSE_HEADERS,
        header::HeaderValue::from_static(tus::EXPOSE_OPTIONS_VALUE),
    );
    response
}

/// `POST {ctx}`: create an upload, or concatenate partial uploads when
/// `Upload-Concat: final;...` is present.
pub async fn create_upload(
    State(service): State<UploadService>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    ensure_tus_resumable(&headers)?;
    debug!("POST headers: {:?}", headers);

    let metadata = header_str(&headers, tus::UPLOAD_METADATA);
    let mime_type = header_str(&headers, tus::MIME_TYPE).unwrap_or_default();
    let concat = tus::parse_upload_concat(header_str(&headers, tus::UPLOAD_CONCAT))
        .map_err(AppError::bad_request)?;

    let upload = match concat {
        Some(UploadConcat::Final(ids)) => {
            service.merge_uploads(&ids, metadata, mime_type).await?
        }
        other => {
            let length = match header_i64(&headers, tus::UPLOAD_LENGTH) {
                Some(Ok(length)) => length,
                Some(Err(())) => return Err(AppError::bad_request("Upload-Length must be an integer")),
                None => return Err(AppError::bad_request("Upload-Length header is required")),
            };
            let is_partial = matches!(other, Some(UploadConcat::Partial));
            service
                .create_upload(length, metadata, mime_type, is_partial)
                .await?
        }
    };

    let mut response = StatusCode::CREATED.into_response();
    let headers = response.headers_mut();
    put(headers, "location", service.settings().location(upload.id));
    put(headers, tus::UPLOAD_EXPIRES, service.expires_header(&upload));
    put(headers, tus::TUS_RESUMABLE, tus::TUS_RESUMABLE_VALUE);
    put(headers, "access-control-expose-headers", tus::EXPOSE_POST_VALUE);
    Ok(response)
}

/// `HEAD {ctx}/{id}`: report the committed offset of an upload.
pub async fn head_upload(
    State(service): State<UploadService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let upload = service.find_upload(id).await?;

    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    put(headers, "location", service.settings().location(upload.id));
    put(headers, "cache-control", tus::CACHE_CONTROL_VALUE);
    put(headers, tus::UPLOAD_LENGTH, upload.content_length.to_string());
    put(headers, tus::UPLOAD_OFFSET, upload.content_offset.to_string());
    put(headers, tus::UPLOAD_EXPIRES, service.expires_header(&upload));
    put(headers, tus::TUS_RESUMABLE, tus::TUS_RESUMABLE_VALUE);
    put(headers, "access-control-expose-headers", tus::EXPOSE_HEAD_VALUE);

    let metadata = metadata_codec::parse_lenient(Some(&upload.metadata));
    if !metadata.is_empty() {
        put(headers, tus::UPLOAD_METADATA, metadata_codec::encode(&metadata));
    }
    if upload.partial_status {
        put(headers, tus::UPLOAD_CONCAT, "partial");
    }
    Ok(response)
}

/// `PATCH {ctx}/{id}` (also reachable as `POST {ctx}/{id}`): append bytes.
pub async fn patch_upload(
    State(service): State<UploadService>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    ensure_tus_resumable(&headers)?;

    if header_str(&headers, header::CONTENT_TYPE.as_str()) != Some(tus::OFFSET_OCTET_STREAM) {
        return Err(AppError::bad_request(format!(
            "Content-Type must be {}",
            tus::OFFSET_OCTET_STREAM
        )));
    }
    let offset = match header_i64(&headers, tus::UPLOAD_OFFSET) {
        Some(Ok(offset)) if offset >= 0 => offset,
        _ => return Err(AppError::bad_request("Upload-Offset must be a non-negative integer")),
    };
    let length = match header_i64(&headers, header::CONTENT_LENGTH.as_str()) {
        Some(Ok(length)) if length >= 0 => length,
        _ => return Err(AppError::bad_request("Content-Length header is required")),
    };
    let checksum = header_str(&headers, tus::UPLOAD_CHECKSUM)
        .map(ChecksumClaim::parse)
        .transpose()
        .map_err(|err| AppError::bad_request(err.to_string()))?;

    let parts: ByteStream = Box::pin(body.into_data_stream().map_err(io::Error::other));
    let upload = service
        .append_chunk(id, parts, offset, length, checksum)
        .await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    let headers = response.headers_mut();
    put(headers, tus::UPLOAD_OFFSET, upload.content_offset.to_string());
    put(headers, tus::UPLOAD_EXPIRES, service.expires_header(&upload));
    put(headers, tus::TUS_RESUMABLE, tus::TUS_RESUMABLE_VALUE);
    put(headers, "access-control-expose-headers", tus::EXPOSE_PATCH_VALUE);
    Ok(response)
}

/// `DELETE {ctx}/{id}`: terminate an upload and release its bytes.
pub async fn delete_upload(
    State(service): State<UploadService>,
    Path(id): Path<i64>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    ensure_tus_resumable(&headers)?;
    service.delete_upload(id).await?;

    let mut response = StatusCode::NO_CONTENT.into_response();
    put(response.headers_mut(), tus::TUS_RESUMABLE, tus::TUS_RESUMABLE_VALUE);
    Ok(response)
}

/// `GET {ctx}/{id}`: the upload record as JSON.
pub async fn get_upload(
    State(service): State<UploadService>,
    Path(id): Path<i64>,
) -> Result<Json<Upload>, AppError> {
    Ok(Json(service.find_upload(id).await?))
}

/// Reject requests that announce a protocol version other than 1.0.0.
fn ensure_tus_resumable(headers: &HeaderMap) -> Result<(), AppError> {
    match header_str(headers, tus::TUS_RESUMABLE) {
        Some(version) if version != tus::TUS_RESUMABLE_VALUE => Err(AppError::new(
            StatusCode::PRECONDITION_FAILED,
            format!("unsupported Tus-Resumable version `{}`", version),
        )),
        _ => Ok(()),
    }
}
