//! Persistent storage for accounts, the balance ledger and campaigns.
//!
//! The [`Repository`] trait is the only way the rest of the crate touches
//! durable state. Every state transition is expressed as a single-row
//! conditional update so that concurrent flows never race on a
//! read-modify-write across two round trips.

mod memory;
mod models;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

pub use memory::{JournalEntry, MemoryStore};
pub use models::{
    Account, AccountId, Campaign, CampaignSummary, DebitOutcome, DeleteOutcome, NewAccount,
    NewCampaign, UserSnapshot,
};
pub use postgres::PgStore;

/// Errors raised by repository adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store query failed: {0}")]
    Query(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed => Self::Connection(err.to_string()),
            other => Self::Query(other.to_string()),
        }
    }
}

/// Port over the transactional datastore.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Round-trips a trivial query to prove connectivity.
    async fn ping(&self) -> Result<(), StoreError>;

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError>;

    /// All accounts ordered by id.
    async fn accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Uniformly random free account, without claiming it.
    async fn random_free_account(&self) -> Result<Option<Account>, StoreError>;

    /// Compare-and-set a single account from free to occupied.
    ///
    /// Returns `false` if the account is missing or already occupied.
    async fn claim_account(&self, id: AccountId) -> Result<bool, StoreError>;

    /// Atomically selects a random free account and marks it occupied.
    async fn claim_random_free(&self) -> Result<Option<Account>, StoreError>;

    /// Sets the occupied flag, and the display name when one is given.
    ///
    /// Returns `false` if the account does not exist.
    async fn set_occupied(
        &self,
        id: AccountId,
        occupied: bool,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError>;

    /// Frees every occupied account. Returns the number of rows changed.
    async fn release_all(&self) -> Result<u64, StoreError>;

    /// Inserts an account, first deleting any row with the same external id.
    ///
    /// Returns the new row and whether an older one was replaced.
    async fn replace_account(&self, new: NewAccount) -> Result<(Account, bool), StoreError>;

    /// Deletes a free account that no campaign refers to.
    async fn delete_account(&self, id: AccountId) -> Result<DeleteOutcome, StoreError>;

    async fn register_or_get_user(
        &self,
        external_id: i64,
        handle: Option<&str>,
    ) -> Result<UserSnapshot, StoreError>;

    async fn user(&self, external_id: i64) -> Result<Option<UserSnapshot>, StoreError>;

    /// Adds funds. Returns `false` for an unknown user.
    async fn credit(&self, external_id: i64, amount: i64) -> Result<bool, StoreError>;

    /// Takes funds only if the balance covers them.
    async fn debit(&self, external_id: i64, amount: i64) -> Result<DebitOutcome, StoreError>;

    async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, StoreError>;

    async fn campaigns_for(&self, creator_id: i64) -> Result<Vec<CampaignSummary>, StoreError>;
}
