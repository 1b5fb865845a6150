pub mod download_handlers;
pub mod health_handlers;
pub mod tus_headers;
pub mod upload_handlers;
