//! State of one in-progress campaign creation.
//!
//! Steps advance strictly in order:
//! 1. `AwaitingPayment` → `AwaitingName` (debit, then claim an account)
//! 2. `AwaitingName` → `AwaitingTarget` → `AwaitingBotName`
//! 3. `AwaitingBotName` → `AwaitingAvatar` → `AwaitingBio` (one remote mutation each)
//! 4. `AwaitingChannelAttach` → `AwaitingFinalConfirm` → `Created`
//!
//! Any step before `Created` may end in `Cancelled`. A cancellation whose
//! refund or account release fails parks the flow in `Compensating` until a
//! later attempt returns everything.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::reply::CancelReason;
use super::validate::Category;
use crate::store::AccountId;

/// Position of a flow in the provisioning sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    AwaitingPayment,
    AwaitingName,
    AwaitingTarget,
    AwaitingBotName,
    AwaitingAvatar,
    AwaitingBio,
    AwaitingChannelAttach,
    AwaitingFinalConfirm,
    /// Cancelled, but still holding money or an account.
    Compensating,
    Created,
    Cancelled,
}

impl Step {
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Created | Self::Cancelled)
    }
}

/// One customer action delivered to a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Pay for the campaign from the balance.
    Pay,
    Text(String),
    /// An image already downloaded to local disk.
    Photo(PathBuf),
    Confirm,
    Cancel,
}

/// Money and account a flow must give back if it does not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Holdings {
    pub account: Option<AccountId>,
    pub charged: i64,
}

/// An in-progress campaign creation.
#[derive(Debug, Clone)]
pub struct Flow {
    pub(crate) user_id: i64,
    pub(crate) step: Step,

    /// Free account seen when the flow started; claimed only after payment.
    pub(crate) candidate: Option<AccountId>,

    /// Account claimed by this flow.
    pub(crate) account: Option<AccountId>,

    /// Amount debited and not yet settled by a campaign or a refund.
    pub(crate) charged: Option<i64>,

    pub(crate) paid_at: Option<DateTime<Utc>>,
    pub(crate) campaign_name: Option<String>,
    pub(crate) target: Option<Category>,
    pub(crate) bot_name: Option<String>,
    pub(crate) bot_username: Option<String>,
    pub(crate) bio: Option<String>,
    pub(crate) channel: Option<String>,
    pub(crate) campaign_id: Option<i32>,

    /// Why the flow is being cancelled, kept while compensation is pending.
    pub(crate) cancel_reason: Option<CancelReason>,

    /// Amount already returned by an earlier compensation attempt.
    pub(crate) refunded: Option<i64>,
}

impl Flow {
    pub(crate) fn new(user_id: i64, candidate: AccountId) -> Self {
        Self {
            user_id,
            step: Step::AwaitingPayment,
            candidate: Some(candidate),
            account: None,
            charged: None,
            paid_at: None,
            campaign_name: None,
            target: None,
            bot_name: None,
            bot_username: None,
            bio: None,
            channel: None,
            campaign_id: None,
            cancel_reason: None,
            refunded: None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    #[must_use]
    pub fn step(&self) -> Step {
        self.step
    }

    /// Account held by the flow, once paid.
    #[must_use]
    pub fn account(&self) -> Option<AccountId> {
        self.account
    }

    #[must_use]
    pub fn campaign_id(&self) -> Option<i32> {
        self.campaign_id
    }

    /// Whether the flow holds money or an account it would have to return.
    #[must_use]
    pub fn has_holdings(&self) -> bool {
        self.charged.is_some() || self.account.is_some()
    }

    /// What the flow still has to give back.
    #[must_use]
    pub fn holdings(&self) -> Option<Holdings> {
        self.has_holdings().then(|| Holdings {
            account: self.account,
            charged: self.charged.unwrap_or_default(),
        })
    }

    /// Hands the account and payment over to a persisted campaign.
    pub(crate) fn settle(&mut self, campaign_id: i32) {
        self.campaign_id = Some(campaign_id);
        self.charged = None;
        self.account = None;
        self.step = Step::Created;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holdings() {
        let mut flow = Flow::new(1, 7);
        assert!(flow.holdings().is_none());

        flow.charged = Some(1000);
        flow.account = Some(7);
        assert_eq!(
            flow.holdings(),
            Some(Holdings {
                account: Some(7),
                charged: 1000
            })
        );

        flow.account = None;
        assert_eq!(
            flow.holdings(),
            Some(Holdings {
                account: None,
                charged: 1000
            })
        );
    }

    #[test]
    fn test_settle_clears_holdings() {
        let mut flow = Flow::new(1, 7);
        flow.charged = Some(1000);
        flow.account = Some(7);
        flow.settle(3);
        assert_eq!(flow.step(), Step::Created);
        assert_eq!(flow.campaign_id(), Some(3));
        assert!(flow.holdings().is_none());
    }

    #[test]
    fn test_terminal_steps() {
        assert!(Step::Created.is_terminal());
        assert!(Step::Cancelled.is_terminal());
        assert!(!Step::AwaitingFinalConfirm.is_terminal());
        assert!(!Step::Compensating.is_terminal());
    }
}
