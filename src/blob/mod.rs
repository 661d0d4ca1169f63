//! Durable object storage for session credentials.
//!
//! Objects are addressed by slash-separated keys such as
//! `sessions/alice.session`.

mod fs;
mod http;

use async_trait::async_trait;
use thiserror::Error;

pub use fs::FsBlobStore;
pub use http::HttpBlobStore;

/// Errors raised by blob store adapters.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("blob transport error: {0}")]
    Transport(String),

    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Key-based get/put/delete over a bucket.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Fetches the object body.
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, BlobError>;

    /// Stores the object and returns its public locator.
    async fn put_object(&self, key: &str, bytes: Vec<u8>) -> Result<String, BlobError>;

    async fn delete_object(&self, key: &str) -> Result<(), BlobError>;
}

/// Rejects keys that are empty, absolute, or climb out of the bucket.
pub(crate) fn validate_key(key: &str) -> Result<(), BlobError> {
    if key.is_empty()
        || key.starts_with('/')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..")
    {
        return Err(BlobError::InvalidKey(key.to_owned()));
    }
    Ok(())
}
