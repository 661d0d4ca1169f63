//! Ports over a connected remote identity.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use super::TelegramError;
use crate::credentials::CredentialHandle;

/// Profile of the connected account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Profile {
    pub id: i64,
    pub first_name: String,
    pub username: Option<String>,

    /// Bio text, if any.
    pub about: Option<String>,
}

/// What the status bot says about an account's sending restrictions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reply", rename_all = "snake_case")]
pub enum SpamStatus {
    /// No restrictions.
    Clear,
    /// The account is spam-limited.
    Limited,
    /// A reply that matched neither pattern (first 100 characters).
    Other(String),
    /// No reply within the wait.
    Unknown,
}

impl SpamStatus {
    /// Classifies a status bot reply.
    #[must_use]
    pub fn classify(reply: &str) -> Self {
        let lower = reply.to_lowercase();
        if lower.contains("good news") || lower.contains("не ограничен") {
            Self::Clear
        } else if lower.contains("spam") || lower.contains("спам") {
            Self::Limited
        } else {
            Self::Other(reply.chars().take(100).collect())
        }
    }
}

/// Opens remote identities from local credential files.
#[async_trait]
pub trait IdentityConnector: Send + Sync {
    /// Connects and verifies authorization.
    ///
    /// The credential must outlive the returned session.
    async fn open(
        &self,
        credential: &CredentialHandle,
    ) -> Result<Box<dyn IdentitySession>, TelegramError>;
}

/// A connected, authorized account.
#[async_trait]
pub trait IdentitySession: Send + Sync {
    async fn profile(&self) -> Result<Profile, TelegramError>;

    /// Overwrites both the first name and the bio.
    async fn set_profile(&self, first_name: &str, about: &str) -> Result<(), TelegramError>;

    async fn upload_profile_photo(&self, path: &Path) -> Result<(), TelegramError>;

    /// Ids of the creator and administrators of a public channel.
    async fn channel_admin_ids(&self, channel: &str) -> Result<Vec<i64>, TelegramError>;

    /// Sends `/start` to the status bot and waits up to `timeout` for a reply.
    async fn probe_spam_status(&self, timeout: Duration) -> Result<SpamStatus, TelegramError>;

    /// Disconnects. Consumes the session so it cannot be used afterwards.
    async fn close(self: Box<Self>);
}
