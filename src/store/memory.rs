//! In-process repository adapter.
//!
//! Holds all tables behind one mutex, so every operation is trivially
//! atomic. Used for tests and for dry runs without a database.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use tracing::debug;

use super::models::{
    Account, AccountId, Campaign, CampaignSummary, DebitOutcome, DeleteOutcome, NewAccount,
    NewCampaign, UserSnapshot,
};
use super::{Repository, StoreError};

/// A mutation applied to the ledger or the pool, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalEntry {
    Claimed(AccountId),
    Occupied(AccountId),
    Freed(AccountId),
    Credited { external_id: i64, amount: i64 },
    Debited { external_id: i64, amount: i64 },
    CampaignCreated(i32),
}

#[derive(Debug, Default)]
struct Tables {
    accounts: BTreeMap<AccountId, Account>,
    users: HashMap<i64, UserSnapshot>,
    campaigns: Vec<Campaign>,
    next_account_id: AccountId,
    next_user_id: i32,
    next_campaign_id: i32,
    journal: Vec<JournalEntry>,
}

/// Repository kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    offline: AtomicBool,
    reject_campaigns: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates losing the connection: every call fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes campaign inserts fail while set.
    pub fn set_reject_campaigns(&self, reject: bool) {
        self.reject_campaigns.store(reject, Ordering::SeqCst);
    }

    /// Ordered list of mutations applied so far.
    pub async fn journal(&self) -> Vec<JournalEntry> {
        self.tables.lock().await.journal.clone()
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("memory store is offline".to_owned()));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().await.accounts.get(&id).cloned())
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().await.accounts.values().cloned().collect())
    }

    async fn random_free_account(&self) -> Result<Option<Account>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        let free: Vec<&Account> = tables.accounts.values().filter(|a| !a.occupied).collect();
        Ok(free.choose(&mut rand::thread_rng()).map(|a| (*a).clone()))
    }

    async fn claim_account(&self, id: AccountId) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let claimed = match tables.accounts.get_mut(&id) {
            Some(account) if !account.occupied => {
                account.occupied = true;
                true
            }
            _ => false,
        };
        if claimed {
            tables.journal.push(JournalEntry::Claimed(id));
        }
        Ok(claimed)
    }

    async fn claim_random_free(&self) -> Result<Option<Account>, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let free: Vec<AccountId> = tables
            .accounts
            .values()
            .filter(|a| !a.occupied)
            .map(|a| a.id)
            .collect();
        let Some(&id) = free.choose(&mut rand::thread_rng()) else {
            return Ok(None);
        };
        let claimed = tables.accounts.get_mut(&id).map(|account| {
            account.occupied = true;
            account.clone()
        });
        tables.journal.push(JournalEntry::Claimed(id));
        Ok(claimed)
    }

    async fn set_occupied(
        &self,
        id: AccountId,
        occupied: bool,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let Some(account) = tables.accounts.get_mut(&id) else {
            return Ok(false);
        };
        account.occupied = occupied;
        if let Some(name) = display_name {
            account.display_name = Some(name.to_owned());
        }
        tables.journal.push(if occupied {
            JournalEntry::Occupied(id)
        } else {
            JournalEntry::Freed(id)
        });
        Ok(true)
    }

    async fn release_all(&self) -> Result<u64, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let mut released = Vec::new();
        for account in tables.accounts.values_mut().filter(|a| a.occupied) {
            account.occupied = false;
            released.push(account.id);
        }
        let count = released.len() as u64;
        tables
            .journal
            .extend(released.into_iter().map(JournalEntry::Freed));
        Ok(count)
    }

    async fn replace_account(&self, new: NewAccount) -> Result<(Account, bool), StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let before = tables.accounts.len();
        tables
            .accounts
            .retain(|_, a| a.external_account_id != new.external_account_id);
        let replaced = tables.accounts.len() != before;

        tables.next_account_id += 1;
        let account = Account {
            id: tables.next_account_id,
            owner_id: new.owner_id,
            external_account_id: new.external_account_id,
            credential_reference: new.credential_reference,
            display_name: None,
            occupied: false,
            created_at: Utc::now(),
        };
        tables.accounts.insert(account.id, account.clone());
        debug!(account_id = account.id, replaced, "account stored in memory");
        Ok((account, replaced))
    }

    async fn delete_account(&self, id: AccountId) -> Result<DeleteOutcome, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let Some(account) = tables.accounts.get(&id) else {
            return Ok(DeleteOutcome::Missing);
        };
        if account.occupied || tables.campaigns.iter().any(|c| c.account_id == id) {
            return Ok(DeleteOutcome::InUse);
        }
        tables.accounts.remove(&id);
        Ok(DeleteOutcome::Deleted)
    }

    async fn register_or_get_user(
        &self,
        external_id: i64,
        handle: Option<&str>,
    ) -> Result<UserSnapshot, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get(&external_id) {
            return Ok(user.clone());
        }
        tables.next_user_id += 1;
        let user = UserSnapshot {
            id: tables.next_user_id,
            external_id,
            handle: handle.map(str::to_owned),
            balance: 0,
            created_at: Utc::now(),
        };
        tables.users.insert(external_id, user.clone());
        Ok(user)
    }

    async fn user(&self, external_id: i64) -> Result<Option<UserSnapshot>, StoreError> {
        self.check_online()?;
        Ok(self.tables.lock().await.users.get(&external_id).cloned())
    }

    async fn credit(&self, external_id: i64, amount: i64) -> Result<bool, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&external_id) else {
            return Ok(false);
        };
        user.balance += amount;
        tables
            .journal
            .push(JournalEntry::Credited { external_id, amount });
        Ok(true)
    }

    async fn debit(&self, external_id: i64, amount: i64) -> Result<DebitOutcome, StoreError> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let Some(user) = tables.users.get_mut(&external_id) else {
            return Ok(DebitOutcome::UnknownUser);
        };
        if user.balance < amount {
            return Ok(DebitOutcome::Insufficient {
                balance: user.balance,
            });
        }
        user.balance -= amount;
        let balance = user.balance;
        tables
            .journal
            .push(JournalEntry::Debited { external_id, amount });
        Ok(DebitOutcome::Debited { balance })
    }

    async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, StoreError> {
        self.check_online()?;
        if self.reject_campaigns.load(Ordering::SeqCst) {
            return Err(StoreError::Query("campaign insert rejected".to_owned()));
        }
        let mut tables = self.tables.lock().await;
        tables.next_campaign_id += 1;
        let campaign = Campaign {
            id: tables.next_campaign_id,
            creator_id: new.creator_id,
            name: new.name,
            account_id: new.account_id,
            paid_until: new.paid_until,
            target: new.target,
            created_at: Utc::now(),
        };
        tables.campaigns.push(campaign.clone());
        tables
            .journal
            .push(JournalEntry::CampaignCreated(campaign.id));
        Ok(campaign)
    }

    async fn campaigns_for(&self, creator_id: i64) -> Result<Vec<CampaignSummary>, StoreError> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .campaigns
            .iter()
            .filter(|c| c.creator_id == creator_id)
            .map(|c| CampaignSummary {
                campaign: c.clone(),
                account_name: tables
                    .accounts
                    .get(&c.account_id)
                    .and_then(|a| a.display_name.clone()),
            })
            .collect())
    }
}
