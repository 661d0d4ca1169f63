//! Occupied/free bookkeeping over the repository.
//!
//! Transitions:
//! - Free → Occupied (`claim`, `acquire_free_account`, `mark_occupied`)
//! - Occupied → Free (`mark_free`, `reset_one`, `reset_all`)
//!
//! Every transition is one conditional row update, so the manager holds no
//! state of its own and any number of flows can share it.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::store::{Account, AccountId, Repository, StoreError};

/// Errors from pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no free account in the pool")]
    NoneAvailable,

    #[error("account {0} not found")]
    NotFound(AccountId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Pool occupancy counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub occupied: usize,
    pub free: usize,
}

/// Allocates accounts to campaigns.
#[derive(Clone)]
pub struct PoolManager {
    repo: Arc<dyn Repository>,
}

impl PoolManager {
    #[must_use]
    pub fn new(repo: Arc<dyn Repository>) -> Self {
        Self { repo }
    }

    /// Picks a random free account and marks it occupied in one step.
    ///
    /// Never returns an account that was already occupied.
    pub async fn acquire_free_account(&self) -> Result<Account, PoolError> {
        match self.repo.claim_random_free().await? {
            Some(account) => {
                info!(account_id = account.id, "account acquired");
                Ok(account)
            }
            None => {
                warn!("pool exhausted");
                Err(PoolError::NoneAvailable)
            }
        }
    }

    /// Picks a random free account without claiming it.
    ///
    /// The result is only a hint: another flow may claim it first.
    pub async fn peek_free_account(&self) -> Result<Account, PoolError> {
        self.repo
            .random_free_account()
            .await?
            .ok_or(PoolError::NoneAvailable)
    }

    /// Claims a specific account. Returns `false` if it was taken or is gone.
    pub async fn claim(&self, id: AccountId) -> Result<bool, PoolError> {
        let claimed = self.repo.claim_account(id).await?;
        debug!(account_id = id, claimed, "claim attempted");
        Ok(claimed)
    }

    /// Marks an account occupied, optionally renaming it.
    pub async fn mark_occupied(
        &self,
        id: AccountId,
        display_name: Option<&str>,
    ) -> Result<(), PoolError> {
        if !self.repo.set_occupied(id, true, display_name).await? {
            return Err(PoolError::NotFound(id));
        }
        info!(account_id = id, display_name, "account occupied");
        Ok(())
    }

    /// Records a new display name on an account held by a flow.
    pub async fn rename(&self, id: AccountId, display_name: &str) -> Result<(), PoolError> {
        self.mark_occupied(id, Some(display_name)).await
    }

    /// Returns an account to the pool.
    pub async fn mark_free(&self, id: AccountId) -> Result<(), PoolError> {
        if !self.repo.set_occupied(id, false, None).await? {
            return Err(PoolError::NotFound(id));
        }
        info!(account_id = id, "account freed");
        Ok(())
    }

    /// Frees one account regardless of the campaigns referencing it.
    pub async fn reset_one(&self, id: AccountId) -> Result<(), PoolError> {
        warn!(account_id = id, "force-freeing account");
        self.mark_free(id).await
    }

    /// Frees every occupied account. Campaigns are left untouched.
    pub async fn reset_all(&self) -> Result<u64, PoolError> {
        let count = self.repo.release_all().await?;
        warn!(count, "all accounts force-freed");
        Ok(count)
    }

    pub async fn account(&self, id: AccountId) -> Result<Account, PoolError> {
        self.repo
            .account(id)
            .await?
            .ok_or(PoolError::NotFound(id))
    }

    /// All accounts ordered by id.
    pub async fn list(&self) -> Result<Vec<Account>, PoolError> {
        Ok(self.repo.accounts().await?)
    }

    pub async fn stats(&self) -> Result<PoolStats, PoolError> {
        let accounts = self.repo.accounts().await?;
        let occupied = accounts.iter().filter(|a| a.occupied).count();
        Ok(PoolStats {
            total: accounts.len(),
            occupied,
            free: accounts.len() - occupied,
        })
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::store::{MemoryStore, NewAccount};

    async fn pool_with(n: i64) -> (Arc<MemoryStore>, PoolManager) {
        let store = Arc::new(MemoryStore::new());
        for i in 0..n {
            store
                .replace_account(NewAccount {
                    owner_id: 1,
                    external_account_id: 100 + i,
                    credential_reference: format!("bot{i}"),
                })
                .await
                .unwrap();
        }
        let pool = PoolManager::new(store.clone());
        (store, pool)
    }

    #[tokio::test]
    async fn test_acquire_never_returns_occupied() {
        let (_store, pool) = pool_with(3).await;
        let mut seen = HashSet::new();
        for _ in 0..3 {
            let account = pool.acquire_free_account().await.unwrap();
            assert!(seen.insert(account.id));
        }
        assert!(matches!(
            pool.acquire_free_account().await,
            Err(PoolError::NoneAvailable)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_account() {
        let (_store, pool) = pool_with(1).await;
        let (a, b) = tokio::join!(pool.acquire_free_account(), pool.acquire_free_account());
        assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1);
    }

    #[tokio::test]
    async fn test_claim_is_compare_and_set() {
        let (_store, pool) = pool_with(1).await;
        let peeked = pool.peek_free_account().await.unwrap();
        assert!(pool.claim(peeked.id).await.unwrap());
        assert!(!pool.claim(peeked.id).await.unwrap());
        assert!(matches!(
            pool.peek_free_account().await,
            Err(PoolError::NoneAvailable)
        ));
    }

    #[tokio::test]
    async fn test_mark_transitions_and_rename() {
        let (_store, pool) = pool_with(1).await;
        let id = pool.list().await.unwrap()[0].id;

        pool.mark_occupied(id, Some("Helper")).await.unwrap();
        let account = pool.account(id).await.unwrap();
        assert!(account.occupied);
        assert_eq!(account.display_name.as_deref(), Some("Helper"));

        pool.mark_free(id).await.unwrap();
        pool.mark_free(id).await.unwrap();
        let account = pool.account(id).await.unwrap();
        assert!(!account.occupied);
        assert_eq!(account.label(), "Helper");
    }

    #[tokio::test]
    async fn test_unknown_account() {
        let (_store, pool) = pool_with(0).await;
        assert!(matches!(pool.mark_free(42).await, Err(PoolError::NotFound(42))));
        assert!(matches!(
            pool.mark_occupied(42, None).await,
            Err(PoolError::NotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_reset_all_and_stats() {
        let (_store, pool) = pool_with(3).await;
        pool.acquire_free_account().await.unwrap();
        pool.acquire_free_account().await.unwrap();
        assert_eq!(
            pool.stats().await.unwrap(),
            PoolStats {
                total: 3,
                occupied: 2,
                free: 1
            }
        );

        assert_eq!(pool.reset_all().await.unwrap(), 2);
        assert_eq!(pool.stats().await.unwrap().free, 3);
        assert_eq!(pool.reset_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let (store, pool) = pool_with(1).await;
        store.set_offline(true);
        assert!(matches!(
            pool.acquire_free_account().await,
            Err(PoolError::Store(StoreError::Connection(_)))
        ));
    }
}
