use crate::{
    errors::AppError,
    handlers::tus_headers::put,
    models::upload::Upload,
    services::{metadata_codec, upload_service::UploadService},
};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Response,
};

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Download the bytes received so far for `/download/{id}` as a streaming response.
pub async fn download_upload(
    State(service): State<UploadService>,
    Path(id): Path<i64>,
) -> Result<Response, AppError> {
    let (upload, stream) = service.open_download(id).await?;

    let mut response = Response::new(Body::from_stream(stream));
    *response.status_mut() = StatusCode::OK;
    set_download_headers(response.headers_mut(), &upload);
    Ok(response)
}

fn set_download_headers(headers: &mut HeaderMap, upload: &Upload) {
    put(headers, "content-type", content_type(upload));
    put(headers, "content-length", upload.content_offset.to_string());
    put(
        headers,
        "content-disposition",
        format!(
            "attachment; filename=\"{}\"",
            upload.original_name.replace(['"', '\\'], "_")
        ),
    );
}

/// Stored mime type, then the `filetype` metadata entry, then a binary default.
fn content_type(upload: &Upload) -> String {
    if !upload.mime_type.is_empty() {
        return upload.mime_type.clone();
    }
    metadata_codec::parse_lenient(Some(&upload.metadata))
        .remove(metadata_codec::FILETYPE_KEY)
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}
