//! PostgreSQL repository adapter.
//!
//! Table and column names follow the existing deployment schema
//! (`userbots.isoccupied`, `userbots.session_name`, `campaigns.bot_id`).

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use super::models::{
    Account, AccountId, Campaign, CampaignSummary, DebitOutcome, DeleteOutcome, NewAccount,
    NewCampaign, UserSnapshot,
};
use super::{Repository, StoreError};

const ACCOUNT_COLUMNS: &str =
    "id, owner_id, account_id, session_name, display_name, isoccupied, created_at";

const USER_COLUMNS: &str = "id, telegram_id, username, balance, created_at";

const CAMPAIGN_COLUMNS: &str = "id, creator_id, name, bot_id, paid_until, target, created_at";

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS userbots (
    id SERIAL PRIMARY KEY,
    owner_id BIGINT NOT NULL,
    account_id BIGINT NOT NULL UNIQUE,
    session_name TEXT NOT NULL,
    display_name TEXT,
    isoccupied BOOLEAN NOT NULL DEFAULT FALSE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS users (
    id SERIAL PRIMARY KEY,
    username TEXT,
    telegram_id BIGINT NOT NULL UNIQUE,
    balance BIGINT NOT NULL DEFAULT 0 CHECK (balance >= 0),
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS campaigns (
    id SERIAL PRIMARY KEY,
    creator_id BIGINT NOT NULL REFERENCES users (telegram_id),
    name TEXT NOT NULL,
    bot_id INTEGER NOT NULL REFERENCES userbots (id),
    paid_until TIMESTAMPTZ NOT NULL,
    target TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
";

/// Repository backed by a PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connects to the database.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connection`] if the pool cannot be established.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates missing tables.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        debug!("Schema ensured");
        Ok(())
    }
}

fn account_from_row(row: &PgRow) -> Result<Account, sqlx::Error> {
    Ok(Account {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        external_account_id: row.try_get("account_id")?,
        credential_reference: row.try_get("session_name")?,
        display_name: row.try_get("display_name")?,
        occupied: row.try_get("isoccupied")?,
        created_at: row.try_get("created_at")?,
    })
}

fn user_from_row(row: &PgRow) -> Result<UserSnapshot, sqlx::Error> {
    Ok(UserSnapshot {
        id: row.try_get("id")?,
        external_id: row.try_get("telegram_id")?,
        handle: row.try_get("username")?,
        balance: row.try_get("balance")?,
        created_at: row.try_get("created_at")?,
    })
}

fn campaign_from_row(row: &PgRow) -> Result<Campaign, sqlx::Error> {
    Ok(Campaign {
        id: row.try_get("id")?,
        creator_id: row.try_get("creator_id")?,
        name: row.try_get("name")?,
        account_id: row.try_get("bot_id")?,
        paid_until: row.try_get("paid_until")?,
        target: row.try_get("target")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl Repository for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let one: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        if one == 1 {
            Ok(())
        } else {
            Err(StoreError::Query(format!("unexpected ping result: {one}")))
        }
    }

    async fn account(&self, id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM userbots WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn accounts(&self) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM userbots ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(account_from_row)
            .collect::<Result<_, _>>()?)
    }

    async fn random_free_account(&self) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM userbots WHERE NOT isoccupied ORDER BY random() LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn claim_account(&self, id: AccountId) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE userbots SET isoccupied = TRUE WHERE id = $1 AND NOT isoccupied")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_random_free(&self) -> Result<Option<Account>, StoreError> {
        // SKIP LOCKED lets concurrent claimers pick different rows instead of
        // queueing on the same one.
        let row = sqlx::query(&format!(
            "UPDATE userbots SET isoccupied = TRUE \
             WHERE id = (SELECT id FROM userbots WHERE NOT isoccupied \
                         ORDER BY random() LIMIT 1 FOR UPDATE SKIP LOCKED) \
               AND NOT isoccupied \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(account_from_row).transpose()?)
    }

    async fn set_occupied(
        &self,
        id: AccountId,
        occupied: bool,
        display_name: Option<&str>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE userbots SET isoccupied = $2, display_name = COALESCE($3, display_name) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(occupied)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_all(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("UPDATE userbots SET isoccupied = FALSE WHERE isoccupied")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn replace_account(&self, new: NewAccount) -> Result<(Account, bool), StoreError> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query("DELETE FROM userbots WHERE account_id = $1")
            .bind(new.external_account_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let row = sqlx::query(&format!(
            "INSERT INTO userbots (owner_id, account_id, session_name) VALUES ($1, $2, $3) \
             RETURNING {ACCOUNT_COLUMNS}"
        ))
        .bind(new.owner_id)
        .bind(new.external_account_id)
        .bind(&new.credential_reference)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok((account_from_row(&row)?, deleted > 0))
    }

    async fn delete_account(&self, id: AccountId) -> Result<DeleteOutcome, StoreError> {
        let result = sqlx::query(
            "DELETE FROM userbots WHERE id = $1 AND NOT isoccupied \
             AND NOT EXISTS (SELECT 1 FROM campaigns WHERE bot_id = $1)",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 1 {
            return Ok(DeleteOutcome::Deleted);
        }

        // Nothing changed; read only to tell the caller why.
        Ok(match self.account(id).await? {
            Some(_) => DeleteOutcome::InUse,
            None => DeleteOutcome::Missing,
        })
    }

    async fn register_or_get_user(
        &self,
        external_id: i64,
        handle: Option<&str>,
    ) -> Result<UserSnapshot, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO users (telegram_id, username, balance) VALUES ($1, $2, 0) \
             ON CONFLICT (telegram_id) DO UPDATE \
                 SET username = COALESCE(EXCLUDED.username, users.username) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(external_id)
        .bind(handle)
        .fetch_one(&self.pool)
        .await?;
        Ok(user_from_row(&row)?)
    }

    async fn user(&self, external_id: i64) -> Result<Option<UserSnapshot>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE telegram_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn credit(&self, external_id: i64, amount: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE users SET balance = balance + $2 WHERE telegram_id = $1")
            .bind(external_id)
            .bind(amount)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn debit(&self, external_id: i64, amount: i64) -> Result<DebitOutcome, StoreError> {
        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET balance = balance - $2 \
             WHERE telegram_id = $1 AND balance >= $2 RETURNING balance",
        )
        .bind(external_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(balance) = balance {
            return Ok(DebitOutcome::Debited { balance });
        }

        // Nothing changed; read only to tell the caller why.
        Ok(match self.user(external_id).await? {
            Some(user) => DebitOutcome::Insufficient {
                balance: user.balance,
            },
            None => DebitOutcome::UnknownUser,
        })
    }

    async fn create_campaign(&self, new: NewCampaign) -> Result<Campaign, StoreError> {
        let row = sqlx::query(&format!(
            "INSERT INTO campaigns (creator_id, name, bot_id, paid_until, target) \
             VALUES ($1, $2, $3, $4, $5) RETURNING {CAMPAIGN_COLUMNS}"
        ))
        .bind(new.creator_id)
        .bind(&new.name)
        .bind(new.account_id)
        .bind(new.paid_until)
        .bind(&new.target)
        .fetch_one(&self.pool)
        .await?;
        Ok(campaign_from_row(&row)?)
    }

    async fn campaigns_for(&self, creator_id: i64) -> Result<Vec<CampaignSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT c.id, c.creator_id, c.name, c.bot_id, c.paid_until, c.target, c.created_at, \
                    u.display_name \
             FROM campaigns c LEFT JOIN userbots u ON u.id = c.bot_id \
             WHERE c.creator_id = $1 ORDER BY c.id",
        )
        .bind(creator_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(CampaignSummary {
                    campaign: campaign_from_row(row)?,
                    account_name: row.try_get("display_name")?,
                })
            })
            .collect::<Result<_, sqlx::Error>>()
            .map_err(StoreError::from)
    }
}
