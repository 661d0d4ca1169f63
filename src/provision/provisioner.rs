//! Drives a [`Flow`] through payment, account setup and campaign creation.
//!
//! Compensation (free the held account, refund the charge) completes at most
//! once per flow, whatever step the flow is cancelled or aborted from. An
//! attempt the store rejects leaves the flow in `Compensating` for a retry.

use std::path::Path;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::flow::{Flow, Input, Step};
use super::reply::{CancelReason, Prompt, Reply, Status, Summary};
use super::validate::{
    Category, ValidationError, validate_bio, validate_bot_name, validate_campaign_name,
    validate_channel,
};
use crate::config::ProvisionSettings;
use crate::pool::{PoolError, PoolManager};
use crate::store::{
    AccountId, CampaignSummary, DebitOutcome, NewCampaign, Repository, StoreError, UserSnapshot,
};
use crate::userbot::{UserbotError, UserbotManager};

/// Errors that prevent a flow from starting.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Campaign provisioning service.
pub struct Provisioner {
    repo: Arc<dyn Repository>,
    pool: PoolManager,
    userbots: Arc<UserbotManager>,
    settings: ProvisionSettings,
}

impl Provisioner {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        userbots: Arc<UserbotManager>,
        settings: ProvisionSettings,
    ) -> Self {
        Self {
            pool: PoolManager::new(Arc::clone(&repo)),
            repo,
            userbots,
            settings,
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PoolManager {
        &self.pool
    }

    #[must_use]
    pub fn userbots(&self) -> &UserbotManager {
        &self.userbots
    }

    #[must_use]
    pub fn settings(&self) -> &ProvisionSettings {
        &self.settings
    }

    pub async fn register_or_get_user(
        &self,
        external_id: i64,
        handle: Option<&str>,
    ) -> Result<UserSnapshot, StoreError> {
        self.repo.register_or_get_user(external_id, handle).await
    }

    /// Balance in minor units, or `None` for an unknown user.
    pub async fn get_balance(&self, external_id: i64) -> Result<Option<i64>, StoreError> {
        Ok(self.repo.user(external_id).await?.map(|u| u.balance))
    }

    pub async fn credit(&self, external_id: i64, amount: i64) -> Result<bool, StoreError> {
        self.repo.credit(external_id, amount).await
    }

    pub async fn debit(&self, external_id: i64, amount: i64) -> Result<DebitOutcome, StoreError> {
        self.repo.debit(external_id, amount).await
    }

    pub async fn campaigns_for(&self, creator_id: i64) -> Result<Vec<CampaignSummary>, StoreError> {
        self.repo.campaigns_for(creator_id).await
    }

    /// Opens a flow if the pool has a free account. Nothing is claimed yet.
    pub async fn start(&self, user_id: i64) -> Result<(Flow, Reply), ProvisionError> {
        let user = self.repo.register_or_get_user(user_id, None).await?;
        let candidate = self.pool.peek_free_account().await?;
        debug!(user_id, account_id = candidate.id, "flow started");

        let reply = Reply::prompt(Prompt::Payment {
            cost: self.settings.campaign_cost,
            balance: user.balance,
        });
        Ok((Flow::new(user_id, candidate.id), reply))
    }

    /// Applies one customer input to the flow.
    pub async fn handle(&self, flow: &mut Flow, input: Input) -> Reply {
        if flow.step.is_terminal() {
            return Reply::with_status(Prompt::Closed, Status::AlreadyFinished);
        }

        match (flow.step, input) {
            (Step::Compensating, _) | (_, Input::Cancel) => {
                self.abort(flow, CancelReason::ByCustomer).await
            }
            (Step::AwaitingPayment, Input::Pay) => self.pay(flow).await,
            (Step::AwaitingName, Input::Text(text)) => match validate_campaign_name(&text) {
                Ok(name) => {
                    flow.campaign_name = Some(name);
                    flow.step = Step::AwaitingTarget;
                    Reply::prompt(category_prompt())
                }
                Err(e) => self.invalid(flow, &e).await,
            },
            (Step::AwaitingTarget, Input::Text(text)) => match text.parse::<Category>() {
                Ok(target) => {
                    flow.target = Some(target);
                    flow.step = Step::AwaitingBotName;
                    Reply::prompt(Prompt::BotName)
                }
                Err(e) => self.invalid(flow, &e).await,
            },
            (Step::AwaitingBotName, Input::Text(text)) => self.name_bot(flow, &text).await,
            (Step::AwaitingAvatar, Input::Photo(path)) => self.set_avatar(flow, &path).await,
            (Step::AwaitingAvatar, _) => Reply::with_status(Prompt::Avatar, Status::ImageRequired),
            (Step::AwaitingBio, Input::Text(text)) => self.set_bio(flow, &text).await,
            (Step::AwaitingChannelAttach, Input::Text(text)) => {
                self.attach_channel(flow, &text).await
            }
            (Step::AwaitingFinalConfirm, Input::Confirm) => self.finalize(flow).await,
            _ => Reply::with_status(self.prompt_for(flow).await, Status::UnexpectedInput),
        }
    }

    /// Cancels the flow, returning whatever it holds.
    ///
    /// If the store rejects the refund or the release, the flow moves to
    /// [`Step::Compensating`] with its remaining holdings and the first
    /// cancellation reason. Calling `abort` again retries.
    pub async fn abort(&self, flow: &mut Flow, reason: CancelReason) -> Reply {
        if flow.step.is_terminal() {
            return Reply::with_status(Prompt::Closed, Status::AlreadyFinished);
        }
        let reason = flow.cancel_reason.take().unwrap_or(reason);

        if let Err(failure) = self.compensate(flow).await {
            warn!(user_id = flow.user_id, ?reason, %failure, "compensation pending");
            flow.step = Step::Compensating;
            flow.cancel_reason = Some(reason);
            return Reply::with_status(
                Prompt::Closed,
                Status::PersistenceFailure { reason: failure },
            );
        }

        flow.step = Step::Cancelled;
        let refunded = flow.refunded;
        info!(user_id = flow.user_id, ?reason, ?refunded, "flow cancelled");
        Reply::with_status(Prompt::Closed, Status::Cancelled { reason, refunded })
    }

    /// Frees the held account and refunds the charge.
    ///
    /// Each holding is cleared only once its store call succeeds, so a
    /// failed attempt can be repeated without double refunds.
    async fn compensate(&self, flow: &mut Flow) -> Result<(), String> {
        let mut failure = None;

        if let Some(account) = flow.account {
            match self.pool.mark_free(account).await {
                Ok(()) => flow.account = None,
                Err(PoolError::NotFound(_)) => {
                    warn!(account_id = account, "held account no longer exists");
                    flow.account = None;
                }
                Err(e) => {
                    error!(account_id = account, error = %e, "failed to release account");
                    failure = Some(e.to_string());
                }
            }
        }

        if let Some(amount) = flow.charged {
            if amount <= 0 {
                flow.charged = None;
            } else {
                match self.repo.credit(flow.user_id, amount).await {
                    Ok(true) => {
                        info!(user_id = flow.user_id, amount, "payment refunded");
                        flow.charged = None;
                        flow.refunded = Some(amount);
                    }
                    Ok(false) => {
                        error!(user_id = flow.user_id, "refund target vanished");
                        flow.charged = None;
                    }
                    Err(e) => {
                        error!(user_id = flow.user_id, amount, error = %e, "refund failed");
                        failure = Some(e.to_string());
                    }
                }
            }
        }

        failure.map_or(Ok(()), Err)
    }

    async fn pay(&self, flow: &mut Flow) -> Reply {
        let cost = self.settings.campaign_cost;
        let balance = match self.repo.debit(flow.user_id, cost).await {
            Ok(DebitOutcome::Debited { balance }) => balance,
            Ok(DebitOutcome::Insufficient { balance }) => {
                return Reply::with_status(
                    Prompt::Payment { cost, balance },
                    Status::InsufficientFunds { balance, cost },
                );
            }
            Ok(DebitOutcome::UnknownUser) => {
                return Reply::with_status(
                    Prompt::Payment { cost, balance: 0 },
                    Status::InsufficientFunds { balance: 0, cost },
                );
            }
            Err(e) => {
                error!(user_id = flow.user_id, error = %e, "debit failed");
                return Reply::with_status(
                    self.prompt_for(flow).await,
                    Status::PersistenceFailure {
                        reason: e.to_string(),
                    },
                );
            }
        };
        flow.charged = Some(cost);
        flow.paid_at = Some(Utc::now());
        info!(user_id = flow.user_id, cost, balance, "campaign paid");

        match self.claim_for(flow).await {
            Ok(account) => {
                flow.account = Some(account);
                flow.step = Step::AwaitingName;
                Reply::with_status(Prompt::CampaignName, Status::Paid { balance })
            }
            Err(PoolError::NoneAvailable) => self.abort(flow, CancelReason::NoneAvailable).await,
            Err(e) => {
                self.abort(flow, CancelReason::PersistenceFailure(e.to_string()))
                    .await
            }
        }
    }

    /// Claims the candidate seen at start, or any free account if it was taken.
    async fn claim_for(&self, flow: &mut Flow) -> Result<AccountId, PoolError> {
        if let Some(candidate) = flow.candidate.take() {
            if self.pool.claim(candidate).await? {
                return Ok(candidate);
            }
            debug!(account_id = candidate, "candidate taken by another flow");
        }
        Ok(self.pool.acquire_free_account().await?.id)
    }

    async fn name_bot(&self, flow: &mut Flow, text: &str) -> Reply {
        let name = match validate_bot_name(text) {
            Ok(name) => name,
            Err(e) => return self.invalid(flow, &e).await,
        };
        let Some(account) = flow.account else {
            return self.lost_account(flow).await;
        };

        if let Err(e) = self.userbots.check_userbot_availability(account).await {
            warn!(account_id = account, error = %e, "account unavailable");
            return self
                .abort(flow, CancelReason::AccountUnavailable(e.to_string()))
                .await;
        }

        let profile = match self
            .userbots
            .update_bot_profile(account, Some(&name), None, None)
            .await
        {
            Ok(profile) => profile,
            Err(e) => return self.remote_failure(flow, e).await,
        };

        match self.pool.rename(account, &name).await {
            Ok(()) => {}
            Err(PoolError::NotFound(_)) => return self.lost_account(flow).await,
            Err(e) => {
                return Reply::with_status(
                    Prompt::BotName,
                    Status::PersistenceFailure {
                        reason: e.to_string(),
                    },
                );
            }
        }

        flow.bot_name = Some(name);
        flow.bot_username = profile.username;
        flow.step = Step::AwaitingAvatar;
        Reply::prompt(Prompt::Avatar)
    }

    async fn set_avatar(&self, flow: &mut Flow, path: &Path) -> Reply {
        let Some(account) = flow.account else {
            return self.lost_account(flow).await;
        };
        match self
            .userbots
            .update_bot_profile(account, None, None, Some(path))
            .await
        {
            Ok(_) => {
                flow.step = Step::AwaitingBio;
                Reply::prompt(Prompt::Bio)
            }
            Err(e) => self.remote_failure(flow, e).await,
        }
    }

    async fn set_bio(&self, flow: &mut Flow, text: &str) -> Reply {
        let bio = match validate_bio(text) {
            Ok(bio) => bio,
            Err(e) => return self.invalid(flow, &e).await,
        };
        let Some(account) = flow.account else {
            return self.lost_account(flow).await;
        };
        match self
            .userbots
            .update_bot_profile(account, None, Some(&bio), None)
            .await
        {
            Ok(_) => {
                flow.bio = Some(bio);
                flow.step = Step::AwaitingChannelAttach;
                Reply::prompt(Prompt::Channel {
                    bot_username: flow.bot_username.clone(),
                })
            }
            Err(e) => self.remote_failure(flow, e).await,
        }
    }

    async fn attach_channel(&self, flow: &mut Flow, text: &str) -> Reply {
        let channel = match validate_channel(text) {
            Ok(channel) => channel,
            Err(e) => return self.invalid(flow, &e).await,
        };
        let Some(account) = flow.account else {
            return self.lost_account(flow).await;
        };

        match self.userbots.check_channel_admin(account, &channel).await {
            Ok(true) => {}
            Ok(false) => {
                return Reply::with_status(
                    self.prompt_for(flow).await,
                    Status::NotAdmin { channel },
                );
            }
            Err(e) => return self.remote_failure(flow, e).await,
        }

        if let Err(e) = self.userbots.add_channel_to_profile(account, &channel).await {
            return self.remote_failure(flow, e).await;
        }

        flow.channel = Some(channel);
        flow.step = Step::AwaitingFinalConfirm;
        self.prompt_for(flow).await.into()
    }

    async fn finalize(&self, flow: &mut Flow) -> Reply {
        let (Some(summary), Some(account)) = (self.summary(flow), flow.account) else {
            return self.lost_account(flow).await;
        };

        let new = NewCampaign {
            creator_id: flow.user_id,
            name: summary.campaign_name,
            account_id: account,
            paid_until: summary.paid_until,
            target: summary.target.as_str().to_owned(),
        };

        match self.repo.create_campaign(new).await {
            Ok(campaign) => {
                flow.settle(campaign.id);
                info!(
                    user_id = flow.user_id,
                    campaign_id = campaign.id,
                    account_id = account,
                    "campaign created"
                );
                Reply::prompt(Prompt::Done {
                    campaign_id: campaign.id,
                    paid_until: campaign.paid_until,
                })
            }
            Err(e) => {
                error!(user_id = flow.user_id, error = %e, "failed to persist campaign");
                self.abort(flow, CancelReason::PersistenceFailure(e.to_string()))
                    .await
            }
        }
    }

    async fn invalid(&self, flow: &Flow, err: &ValidationError) -> Reply {
        Reply::with_status(
            self.prompt_for(flow).await,
            Status::Invalid {
                reason: err.to_string(),
            },
        )
    }

    async fn remote_failure(&self, flow: &mut Flow, err: UserbotError) -> Reply {
        if err.is_terminal() {
            warn!(user_id = flow.user_id, error = %err, "account unusable, aborting flow");
            return self
                .abort(flow, CancelReason::AccountUnavailable(err.to_string()))
                .await;
        }
        warn!(user_id = flow.user_id, step = ?flow.step, error = %err, "step failed, re-prompting");
        Reply::with_status(
            self.prompt_for(flow).await,
            Status::RemoteFailure {
                reason: err.to_string(),
            },
        )
    }

    async fn lost_account(&self, flow: &mut Flow) -> Reply {
        self.abort(
            flow,
            CancelReason::AccountUnavailable("the flow holds no account".to_owned()),
        )
        .await
    }

    fn summary(&self, flow: &Flow) -> Option<Summary> {
        Some(Summary {
            campaign_name: flow.campaign_name.clone()?,
            target: flow.target?,
            bot_name: flow.bot_name.clone()?,
            bio: flow.bio.clone()?,
            channel: flow.channel.clone()?,
            paid_until: flow.paid_at? + Duration::days(self.settings.campaign_days),
        })
    }

    async fn prompt_for(&self, flow: &Flow) -> Prompt {
        match flow.step {
            Step::AwaitingPayment => {
                let balance = match self.repo.user(flow.user_id).await {
                    Ok(user) => user.map_or(0, |u| u.balance),
                    Err(e) => {
                        warn!(user_id = flow.user_id, error = %e, "balance lookup failed");
                        0
                    }
                };
                Prompt::Payment {
                    cost: self.settings.campaign_cost,
                    balance,
                }
            }
            Step::AwaitingName => Prompt::CampaignName,
            Step::AwaitingTarget => category_prompt(),
            Step::AwaitingBotName => Prompt::BotName,
            Step::AwaitingAvatar => Prompt::Avatar,
            Step::AwaitingBio => Prompt::Bio,
            Step::AwaitingChannelAttach => Prompt::Channel {
                bot_username: flow.bot_username.clone(),
            },
            Step::AwaitingFinalConfirm => self
                .summary(flow)
                .map_or(Prompt::Closed, Prompt::FinalConfirm),
            Step::Compensating | Step::Created | Step::Cancelled => Prompt::Closed,
        }
    }
}

fn category_prompt() -> Prompt {
    Prompt::Category {
        options: Category::ALL.to_vec(),
    }
}

impl From<Prompt> for Reply {
    fn from(base: Prompt) -> Self {
        Self::prompt(base)
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
