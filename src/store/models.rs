//! Persisted entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Primary key of an account row.
pub type AccountId = i32;

/// A pooled userbot account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,

    /// Administrator who registered the account.
    pub owner_id: i64,

    /// The remote platform's numeric identity for this credential.
    pub external_account_id: i64,

    /// Locator of the stored session blob (URL or bare name).
    pub credential_reference: String,

    /// Current profile name, set once a campaign names the bot.
    pub display_name: Option<String>,

    /// Whether the account is bound to a campaign or a paid flow.
    pub occupied: bool,

    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Name shown in listings: the display name, else the credential reference.
    #[must_use]
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or(&self.credential_reference)
    }
}

/// Fields required to register an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub owner_id: i64,
    pub external_account_id: i64,
    pub credential_reference: String,
}

/// A customer's view of their ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSnapshot {
    pub id: i32,
    pub external_id: i64,
    pub handle: Option<String>,

    /// Balance in minor currency units.
    pub balance: i64,

    pub created_at: DateTime<Utc>,
}

/// Result of a conditional debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    /// Funds were taken; carries the new balance.
    Debited { balance: i64 },
    /// Balance was too low; nothing changed.
    Insufficient { balance: i64 },
    /// No ledger entry for this user.
    UnknownUser,
}

/// Result of a guarded account deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    /// No row with this id.
    Missing,
    /// The account is occupied or a campaign refers to it; nothing changed.
    InUse,
}

/// A paid binding of one account to a customer's campaign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i32,
    pub creator_id: i64,
    pub name: String,
    pub account_id: AccountId,
    pub paid_until: DateTime<Utc>,

    /// Category tag the bot comments on.
    pub target: String,

    pub created_at: DateTime<Utc>,
}

/// Fields required to persist a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    pub creator_id: i64,
    pub name: String,
    pub account_id: AccountId,
    pub paid_until: DateTime<Utc>,
    pub target: String,
}

/// Campaign joined with the current name of its account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub account_name: Option<String>,
}
