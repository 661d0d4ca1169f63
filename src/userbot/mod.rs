//! Per-account remote operations.
//!
//! Each operation resolves the account's credential, opens one session,
//! performs its calls, and closes the session before returning.

mod manager;
mod retry;

use thiserror::Error;

pub use manager::{Registration, RemovalReport, SessionReport, UserbotManager};
pub use retry::RetryPolicy;

use crate::blob::BlobError;
use crate::credentials::CredentialError;
use crate::store::{AccountId, StoreError};
use crate::telegram::TelegramError;

/// Errors from account operations.
#[derive(Debug, Error)]
pub enum UserbotError {
    #[error("credential unavailable: {0}")]
    CredentialUnavailable(String),

    #[error("authorization failed: {0}")]
    AuthFailure(#[source] TelegramError),

    #[error("remote call failed: {0}")]
    RemoteMutation(#[source] TelegramError),

    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error("account {0} is occupied or bound to a campaign")]
    InUse(AccountId),

    #[error("persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("blob storage failed: {0}")]
    Blob(#[from] BlobError),

    #[error("failed to read session file: {0}")]
    Io(#[from] std::io::Error),
}

impl UserbotError {
    /// Whether the account can no longer be used for the current flow.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CredentialUnavailable(_) | Self::AuthFailure(_) | Self::NotFound(_)
        )
    }

    /// Whether retrying the same read may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteMutation(e) if e.is_transient())
    }
}

impl From<TelegramError> for UserbotError {
    fn from(err: TelegramError) -> Self {
        if err.is_auth_failure() {
            Self::AuthFailure(err)
        } else {
            Self::RemoteMutation(err)
        }
    }
}

impl From<CredentialError> for UserbotError {
    fn from(err: CredentialError) -> Self {
        match err {
            CredentialError::Unavailable(name) => Self::CredentialUnavailable(name),
            CredentialError::Io(e) => Self::CredentialUnavailable(e.to_string()),
        }
    }
}
