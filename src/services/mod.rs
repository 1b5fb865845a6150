pub mod checksum;
pub mod expiration;
pub mod id_generator;
pub mod metadata_codec;
pub mod storage_service;
pub mod upload_locks;
pub mod upload_repository;
pub mod upload_service;
