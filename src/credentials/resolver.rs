//! Ordered credential lookup: durable storage first, local directories next.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempPath;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::name::{extract_session_name, session_file_name};
use crate::blob::{BlobError, BlobStore};

/// Where a credential was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Downloaded from the blob store into a temporary file.
    Durable,
    /// An existing file in one of the fallback directories.
    Local,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Durable => write!(f, "durable"),
            Self::Local => write!(f, "local"),
        }
    }
}

/// A usable credential file on local disk.
///
/// Durable credentials are materialized in a temporary file that is removed
/// when the handle drops, whatever path the caller exits through.
#[derive(Debug)]
pub struct CredentialHandle {
    name: String,
    path: PathBuf,
    source: Source,
    _temp: Option<TempPath>,
}

impl CredentialHandle {
    /// Wraps a caller-owned file. Nothing is deleted on drop.
    #[must_use]
    pub fn borrowed(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = extract_session_name(&path.to_string_lossy());
        Self {
            name,
            path,
            source: Source::Local,
            _temp: None,
        }
    }

    /// Canonical session name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the credential file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source(&self) -> Source {
        self.source
    }
}

/// Outcome of a lookup.
#[derive(Debug)]
pub enum Resolution {
    Found(CredentialHandle),
    NotFound { name: String },
}

/// Errors from credential resolution.
#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("credential unavailable: {0}")]
    Unavailable(String),

    #[error("failed to materialize credential: {0}")]
    Io(#[from] std::io::Error),
}

/// Finds session material for an account reference.
pub struct CredentialResolver {
    blob: Option<Arc<dyn BlobStore>>,
    prefix: String,
    local_dirs: Vec<PathBuf>,
    temp_dir: Option<PathBuf>,
}

impl CredentialResolver {
    /// Creates a resolver. `blob` may be `None` when no durable store is
    /// configured; lookups then go straight to the local directories.
    #[must_use]
    pub fn new(
        blob: Option<Arc<dyn BlobStore>>,
        prefix: impl Into<String>,
        local_dirs: Vec<PathBuf>,
    ) -> Self {
        Self {
            blob,
            prefix: prefix.into(),
            local_dirs,
            temp_dir: None,
        }
    }

    /// Materializes durable credentials under `dir` instead of the system
    /// temporary directory.
    #[must_use]
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Blob key for a canonical session name.
    #[must_use]
    pub fn blob_key(&self, name: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            session_file_name(name)
        } else {
            format!("{prefix}/{}", session_file_name(name))
        }
    }

    /// Local fallback directories, in lookup order.
    #[must_use]
    pub fn local_dirs(&self) -> &[PathBuf] {
        &self.local_dirs
    }

    /// Looks the reference up in the blob store, then in each local directory.
    pub async fn resolve(&self, reference: &str) -> Resolution {
        let name = extract_session_name(reference);
        if name.is_empty() {
            warn!(reference, "credential reference has no session name");
            return Resolution::NotFound { name };
        }

        if let Some(blob) = &self.blob {
            match self.fetch_durable(blob.as_ref(), &name).await {
                Ok(handle) => {
                    info!(session = %name, "session loaded from durable storage");
                    return Resolution::Found(handle);
                }
                Err(CredentialError::Unavailable(reason)) => {
                    debug!(session = %name, %reason, "durable session missing, trying local");
                }
                Err(e) => {
                    warn!(session = %name, error = %e, "durable session fetch failed, trying local");
                }
            }
        }

        if let Some(path) = self.find_local(&name).await {
            info!(session = %name, path = %path.display(), "session found locally");
            return Resolution::Found(CredentialHandle {
                name,
                path,
                source: Source::Local,
                _temp: None,
            });
        }

        warn!(session = %name, "session not found in any source");
        Resolution::NotFound { name }
    }

    /// Like [`resolve`](Self::resolve) but treats a miss as an error.
    pub async fn resolve_required(&self, reference: &str) -> Result<CredentialHandle, CredentialError> {
        match self.resolve(reference).await {
            Resolution::Found(handle) => Ok(handle),
            Resolution::NotFound { name } => Err(CredentialError::Unavailable(name)),
        }
    }

    /// Path of the session file in the first local directory, existing or not.
    #[must_use]
    pub fn primary_local_path(&self, name: &str) -> Option<PathBuf> {
        self.local_dirs
            .first()
            .map(|dir| dir.join(session_file_name(name)))
    }

    async fn fetch_durable(
        &self,
        blob: &dyn BlobStore,
        name: &str,
    ) -> Result<CredentialHandle, CredentialError> {
        let key = self.blob_key(name);
        let bytes = match blob.get_object(&key).await {
            Ok(bytes) => bytes,
            Err(BlobError::NotFound(key)) => return Err(CredentialError::Unavailable(key)),
            Err(e) => return Err(CredentialError::Unavailable(e.to_string())),
        };

        let mut builder = tempfile::Builder::new();
        builder.prefix("userbot-").suffix(".session");
        let file = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        let temp = file.into_temp_path();
        tokio::fs::write(&temp, &bytes).await?;

        Ok(CredentialHandle {
            name: name.to_owned(),
            path: temp.to_path_buf(),
            source: Source::Durable,
            _temp: Some(temp),
        })
    }

    async fn find_local(&self, name: &str) -> Option<PathBuf> {
        let file_name = session_file_name(name);
        for dir in &self.local_dirs {
            let candidate = dir.join(&file_name);
            if tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
                return Some(candidate);
            }
        }
        None
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialResolver")
            .field("durable", &self.blob.is_some())
            .field("prefix", &self.prefix)
            .field("local_dirs", &self.local_dirs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::blob::FsBlobStore;

    struct BrokenBlobStore;

    #[async_trait]
    impl BlobStore for BrokenBlobStore {
        async fn get_object(&self, _key: &str) -> Result<Vec<u8>, BlobError> {
            Err(BlobError::Transport("connection reset".to_owned()))
        }

        async fn put_object(&self, _key: &str, _bytes: Vec<u8>) -> Result<String, BlobError> {
            Err(BlobError::Transport("connection reset".to_owned()))
        }

        async fn delete_object(&self, _key: &str) -> Result<(), BlobError> {
            Err(BlobError::Transport("connection reset".to_owned()))
        }
    }

    #[tokio::test]
    async fn test_durable_first() {
        let bucket = tempfile::tempdir().unwrap();
        let local = tempfile::tempdir().unwrap();
        let blob = FsBlobStore::new(bucket.path());
        blob.put_object("sessions/alice.session", b"durable".to_vec())
            .await
            .unwrap();
        std::fs::write(local.path().join("alice.session"), b"local").unwrap();

        let resolver = CredentialResolver::new(
            Some(Arc::new(blob)),
            "sessions",
            vec![local.path().to_path_buf()],
        );

        let Resolution::Found(handle) = resolver
            .resolve("https://host/bucket/sessions/alice.session")
            .await
        else {
            panic!("expected a credential");
        };
        assert_eq!(handle.source(), Source::Durable);
        assert_eq!(std::fs::read(handle.path()).unwrap(), b"durable");
    }

    #[tokio::test]
    async fn test_durable_temp_file_removed_on_drop() {
        let bucket = tempfile::tempdir().unwrap();
        let blob = FsBlobStore::new(bucket.path());
        blob.put_object("sessions/alice.session", b"x".to_vec())
            .await
            .unwrap();
        let resolver = CredentialResolver::new(Some(Arc::new(blob)), "sessions", vec![]);

        let handle = resolver.resolve_required("alice").await.unwrap();
        let path = handle.path().to_path_buf();
        assert!(path.exists());
        drop(handle);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_local_when_durable_missing() {
        let bucket = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("alice.session"), b"local").unwrap();

        let resolver = CredentialResolver::new(
            Some(Arc::new(FsBlobStore::new(bucket.path()))),
            "sessions",
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );

        let handle = resolver
            .resolve_required("https://host/bucket/sessions/alice.session")
            .await
            .unwrap();
        assert_eq!(handle.source(), Source::Local);
        assert_eq!(handle.path(), second.path().join("alice.session"));

        drop(handle);
        assert!(second.path().join("alice.session").exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_local_on_transport_error() {
        let local = tempfile::tempdir().unwrap();
        std::fs::write(local.path().join("bob.session"), b"local").unwrap();

        let resolver = CredentialResolver::new(
            Some(Arc::new(BrokenBlobStore)),
            "sessions",
            vec![local.path().to_path_buf()],
        );

        let handle = resolver.resolve_required("bob.session").await.unwrap();
        assert_eq!(handle.source(), Source::Local);
    }

    #[tokio::test]
    async fn test_not_found_anywhere() {
        let local = tempfile::tempdir().unwrap();
        let resolver = CredentialResolver::new(None, "sessions", vec![local.path().to_path_buf()]);

        assert!(matches!(
            resolver.resolve("ghost").await,
            Resolution::NotFound { name } if name == "ghost"
        ));
        assert!(matches!(
            resolver.resolve_required("ghost").await,
            Err(CredentialError::Unavailable(_))
        ));
    }

    #[test]
    fn test_blob_key() {
        let resolver = CredentialResolver::new(None, "sessions/", vec![]);
        assert_eq!(resolver.blob_key("alice"), "sessions/alice.session");

        let resolver = CredentialResolver::new(None, "", vec![]);
        assert_eq!(resolver.blob_key("alice"), "alice.session");
    }
}
