//! tus 1.0.0 wire constants and request header extraction.

use axum::http::{HeaderMap, HeaderName, HeaderValue};

pub const TUS_RESUMABLE: &str = "tus-resumable";
pub const TUS_VERSION: &str = "tus-version";
pub const TUS_EXTENSION: &str = "tus-extension";
pub const TUS_MAX_SIZE: &str = "tus-max-size";
pub const TUS_CHECKSUM_ALGORITHM: &str = "tus-checksum-algorithm";
pub const UPLOAD_OFFSET: &str = "upload-offset";
pub const UPLOAD_LENGTH: &str = "upload-length";
pub const UPLOAD_METADATA: &str = "upload-metadata";
pub const UPLOAD_CHECKSUM: &str = "upload-checksum";
pub const UPLOAD_CONCAT: &str = "upload-concat";
pub const UPLOAD_EXPIRES: &str = "upload-expires";
pub const MIME_TYPE: &str = "mime-type";

pub const TUS_RESUMABLE_VALUE: &str = "1.0.0";
pub const TUS_VERSION_VALUE: &str = "1.0.0,0.2.2,0.2.1";
pub const TUS_EXTENSION_VALUE: &str = "creation,expiration,termination,concatenation";
pub const OFFSET_OCTET_STREAM: &str = "application/offset+octet-stream";
pub const CACHE_CONTROL_VALUE: &str = "no-store";

pub const ALLOW_ORIGIN_VALUE: &str = "*";
pub const ALLOW_METHODS_VALUE: &str = "GET,PUT,PATCH,POST,DELETE";
pub const EXPOSE_OPTIONS_VALUE: &str = "Tus-Resumable, Tus-Version, Tus-Max-Size, Tus-Extension";
pub const EXPOSE_POST_VALUE: &str = "Location, Tus-Resumable";
pub const EXPOSE_HEAD_VALUE: &str = "Upload-Offset, Upload-Length, Tus-Resumable";
pub const EXPOSE_PATCH_VALUE: &str = "Upload-Offset, Tus-Resumable";

const CONCAT_PARTIAL: &str = "partial";
const CONCAT_FINAL_PREFIX: &str = "final;";

/// Parsed `Upload-Concat` request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadConcat {
    Partial,
    Final(Vec<i64>),
}

pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// `None` when absent, `Some(Err(()))` when present but not an integer.
pub fn header_i64(headers: &HeaderMap, name: &str) -> Option<Result<i64, ()>> {
    header_str(headers, name).map(|v| v.parse::<i64>().map_err(|_| ()))
}

/// Parse `Upload-Concat`. Unknown values are treated as absent; a `final;`
/// value whose references do not end in a numeric id is an error.
pub fn parse_upload_concat(value: Option<&str>) -> Result<Option<UploadConcat>, String> {
    let Some(value) = value else {
        return Ok(None);
    };
    if value == CONCAT_PARTIAL {
        return Ok(Some(UploadConcat::Partial));
    }
    let Some(references) = value.strip_prefix(CONCAT_FINAL_PREFIX) else {
        return Ok(None);
    };

    references
        .split_whitespace()
        .map(|reference| {
            upload_id_from_reference(reference)
                .ok_or_else(|| format!("invalid upload reference `{}`", reference))
        })
        .collect::<Result<Vec<_>, _>>()
        .map(|ids| Some(UploadConcat::Final(ids)))
}

/// The id is the last path segment of a URL or path, ignoring any query string.
fn upload_id_from_reference(reference: &str) -> Option<i64> {
    let without_query = reference.split(['?', '#']).next().unwrap_or(reference);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| segment.parse::<i64>().ok())
}

/// Insert a header, silently skipping values that are not valid header text.
pub fn put(headers: &mut HeaderMap, name: &'static str, value: impl AsRef<str>) {
    if let Ok(value) = HeaderValue::from_str(value.as_ref()) {
        headers.insert(HeaderName::from_static(name), value);
    }
}
