//! Defines routes for the tus upload protocol.
//!
//! ## Structure
//! - **Collection endpoints** (mounted at the configured context path, `/tus/upload` by default)
//!   - `OPTIONS {ctx}`: protocol discovery
//!   - `POST    {ctx}`: create an upload or concatenate partial uploads
//!
//! - **Upload endpoints**
//!   - `HEAD    {ctx}/{id}`: current offset
//!   - `PATCH   {ctx}/{id}`: append a chunk (`POST` is accepted as a fallback)
//!   - `DELETE  {ctx}/{id}`: terminate
//!   - `GET     {ctx}/{id}`: record as JSON
//!
//! - `GET /download/{id}` streams the received bytes; `/healthz` and `/readyz` are probes.

use crate::{
    config::TusSettings,
    handlers::{
        download_handlers::download_upload,
        health_handlers::{healthz, readyz},
        upload_handlers::{
            create_upload, delete_upload, get_upload, head_upload, options_upload, patch_upload,
        },
    },
    services::upload_service::UploadService,
};
use axum::{
    Router,
    routing::{get, options},
};

/// Build the router for all upload routes, carrying `UploadService` as shared state.
pub fn routes(settings: &TusSettings) -> Router<UploadService> {
    let context = settings.context_path.as_str();

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/download/{id}", get(download_upload))
        // Collection routes
        .route(context, options(options_upload).post(create_upload))
        .route(
            &format!("{}/", context),
            options(options_upload).post(create_upload),
        )
        // Upload routes
        .route(
            &format!("{}/{{id}}", context),
            get(get_upload)
                .head(head_upload)
                .patch(patch_upload)
                .post(patch_upload)
                .delete(delete_upload),
        )
}
