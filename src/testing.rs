//! Shared fixtures for orchestration tests.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use crate::blob::{BlobStore, FsBlobStore};
use crate::credentials::CredentialResolver;
use crate::store::{Account, MemoryStore, NewAccount, Repository};
use crate::telegram::fake::{FakeConnector, FakeIdentity};
use crate::userbot::{RetryPolicy, UserbotManager};

/// In-memory store, fake identities, a local session directory and an
/// empty directory-backed bucket.
pub(crate) struct Harness {
    pub store: Arc<MemoryStore>,
    pub connector: FakeConnector,
    pub sessions: TempDir,
    pub bucket: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            connector: FakeConnector::default(),
            sessions: tempfile::tempdir().unwrap(),
            bucket: tempfile::tempdir().unwrap(),
        }
    }

    fn blob(&self) -> Arc<dyn BlobStore> {
        Arc::new(FsBlobStore::new(self.bucket.path()))
    }

    pub fn manager(&self) -> UserbotManager {
        self.build_manager(Some(self.blob()))
    }

    /// Manager with no durable store; sessions live only in the local
    /// directory.
    pub fn local_manager(&self) -> UserbotManager {
        self.build_manager(None)
    }

    fn build_manager(&self, blob: Option<Arc<dyn BlobStore>>) -> UserbotManager {
        let resolver = CredentialResolver::new(
            blob.clone(),
            "sessions",
            vec![self.sessions.path().to_path_buf()],
        );
        UserbotManager::new(
            self.store.clone(),
            blob,
            resolver,
            Arc::new(self.connector.clone()),
        )
        .with_retry(RetryPolicy {
            attempts: 3,
            delay: Duration::ZERO,
        })
        .with_spam_timeout(Duration::ZERO)
    }

    /// Writes placeholder session material into the local directory.
    pub fn write_session(&self, name: &str) -> PathBuf {
        let path = self.sessions.path().join(format!("{name}.session"));
        std::fs::write(&path, b"session").unwrap();
        path
    }

    /// Registers an account with a local session and a scripted identity
    /// whose first name is `Original`.
    pub async fn add_bot(&self, name: &str, external_id: i64) -> Account {
        self.write_session(name);
        self.connector
            .add(name, FakeIdentity::new(external_id, "Original"));
        self.add_account_without_session(name, external_id).await
    }

    /// Registers an account row only.
    pub async fn add_account_without_session(&self, name: &str, external_id: i64) -> Account {
        let (account, _) = self
            .store
            .replace_account(NewAccount {
                owner_id: 1,
                external_account_id: external_id,
                credential_reference: format!(
                    "https://storage.example.com/bucket/sessions/{name}.session"
                ),
            })
            .await
            .unwrap();
        account
    }
}
