//! Structured replies for the conversational front-end.
//!
//! `base` says what the customer should do next; `status` reports what
//! happened to their last input. Rendering is up to the front-end.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::validate::Category;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub base: Prompt,
    pub status: Option<Status>,
}

impl Reply {
    #[must_use]
    pub fn prompt(base: Prompt) -> Self {
        Self { base, status: None }
    }

    #[must_use]
    pub fn with_status(base: Prompt, status: Status) -> Self {
        Self {
            base,
            status: Some(status),
        }
    }
}

/// What the customer is asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "prompt", rename_all = "snake_case")]
pub enum Prompt {
    Payment { cost: i64, balance: i64 },
    CampaignName,
    Category { options: Vec<Category> },
    BotName,
    Avatar,
    Bio,
    /// Add the bot as channel admin, then send the channel handle.
    Channel { bot_username: Option<String> },
    FinalConfirm(Summary),
    Done { campaign_id: i32, paid_until: DateTime<Utc> },
    Closed,
}

/// Everything the customer entered, shown before the final confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub campaign_name: String,
    pub target: Category,
    pub bot_name: String,
    pub bio: String,
    pub channel: String,
    pub paid_until: DateTime<Utc>,
}

/// Outcome of the last input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Status {
    Paid { balance: i64 },
    InsufficientFunds { balance: i64, cost: i64 },
    Invalid { reason: String },
    ImageRequired,
    NotAdmin { channel: String },
    /// A remote call failed; the same step may be retried.
    RemoteFailure { reason: String },
    /// Storage failed; the same step may be retried.
    PersistenceFailure { reason: String },
    Cancelled {
        reason: CancelReason,
        /// Amount returned to the balance, if any was charged.
        refunded: Option<i64>,
    },
    UnexpectedInput,
    AlreadyFinished,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum CancelReason {
    ByCustomer,
    NoneAvailable,
    AccountUnavailable(String),
    PersistenceFailure(String),
    Expired,
    Replaced,
}
