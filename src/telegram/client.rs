//! grammers-backed remote identity.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use grammers_client::{Client, InvocationError, SenderPool, sender};
use grammers_session::storages::SqliteSession;
use grammers_tl_types as tl;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::session::{IdentityConnector, IdentitySession, Profile, SpamStatus};
use crate::credentials::CredentialHandle;

/// Username of the platform's restriction status bot.
pub const SPAM_BOT: &str = "SpamBot";

const SPAM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Errors that can occur during Telegram operations.
#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("Not authorized: the session is missing, revoked or deactivated")]
    NotAuthorized,

    #[error("Session error: {0}")]
    Session(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Flood wait required: {0} seconds")]
    FloodWait(u32),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("API invocation error: {0}")]
    Invocation(String),
}

impl TelegramError {
    /// Whether the credential itself is unusable.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::NotAuthorized | Self::Session(_))
    }

    /// Whether retrying the same read may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<InvocationError> for TelegramError {
    fn from(err: InvocationError) -> Self {
        let is_rpc = matches!(err, InvocationError::Rpc(_));
        let err_str = err.to_string();

        if ["AUTH_KEY_UNREGISTERED", "AUTH_KEY_INVALID", "SESSION_REVOKED", "USER_DEACTIVATED"]
            .iter()
            .any(|code| err_str.contains(code))
        {
            return Self::NotAuthorized;
        }

        if (err_str.contains("FLOOD_WAIT") || err_str.contains("flood"))
            && let Some(seconds) = extract_flood_wait_seconds(&err_str)
        {
            return Self::FloodWait(seconds);
        }

        if ["USERNAME_NOT_OCCUPIED", "USERNAME_INVALID", "CHANNEL_INVALID", "CHANNEL_PRIVATE"]
            .iter()
            .any(|code| err_str.contains(code))
        {
            return Self::NotFound(err_str);
        }

        if is_rpc {
            Self::Invocation(err_str)
        } else {
            Self::Connection(err_str)
        }
    }
}

/// Extracts flood wait seconds from an error message.
fn extract_flood_wait_seconds(err_msg: &str) -> Option<u32> {
    let patterns = ["FLOOD_WAIT_", "flood wait "];

    for pattern in patterns {
        if let Some(idx) = err_msg.to_lowercase().find(&pattern.to_lowercase()) {
            let start = idx + pattern.len();
            let num_str: String = err_msg[start..]
                .chars()
                .take_while(char::is_ascii_digit)
                .collect();
            if let Ok(seconds) = num_str.parse() {
                return Some(seconds);
            }
        }
    }
    None
}

/// Opens sessions over MTProto with a fixed application identity.
#[derive(Debug, Clone)]
pub struct GrammersConnector {
    api_id: i32,
}

impl GrammersConnector {
    #[must_use]
    pub fn new(api_id: i32) -> Self {
        Self { api_id }
    }
}

#[async_trait]
impl IdentityConnector for GrammersConnector {
    async fn open(
        &self,
        credential: &CredentialHandle,
    ) -> Result<Box<dyn IdentitySession>, TelegramError> {
        debug!(
            session = credential.name(),
            source = %credential.source(),
            "connecting to Telegram"
        );

        let session = Arc::new(
            SqliteSession::open(credential.path())
                .await
                .map_err(|e| TelegramError::Session(e.to_string()))?,
        );

        let SenderPool {
            runner,
            updates: _updates,
            handle,
        } = SenderPool::new(Arc::clone(&session), self.api_id);

        let client = Client::new(handle.clone());

        let pool_task = tokio::spawn(async move {
            runner.run().await;
        });

        let session = GrammersSession {
            client,
            handle: handle.thin,
            pool_task,
        };

        match session.client.is_authorized().await {
            Ok(true) => {
                info!(session = credential.name(), "connected and authorized");
                Ok(Box::new(session))
            }
            Ok(false) => {
                warn!(session = credential.name(), "session is not authorized");
                session.shutdown().await;
                Err(TelegramError::NotAuthorized)
            }
            Err(e) => {
                session.shutdown().await;
                Err(TelegramError::Connection(e.to_string()))
            }
        }
    }
}

/// A live grammers client bound to one account.
pub struct GrammersSession {
    client: Client,

    /// Handle to the sender pool for disconnection.
    handle: sender::SenderPoolHandle,

    /// Background task running the sender pool.
    pool_task: JoinHandle<()>,
}

impl GrammersSession {
    async fn shutdown(self) {
        self.handle.quit();
        if let Err(e) = self.pool_task.await {
            warn!(error = %e, "sender pool task ended abnormally");
        }
    }

    async fn resolve_channel(&self, channel: &str) -> Result<tl::enums::InputChannel, TelegramError> {
        let request = tl::functions::contacts::ResolveUsername {
            username: channel.trim_start_matches('@').to_owned(),
            referer: None,
        };
        let tl::enums::contacts::ResolvedPeer::Peer(resolved) = self.client.invoke(&request).await?;

        resolved
            .chats
            .into_iter()
            .find_map(|chat| match chat {
                tl::enums::Chat::Channel(c) => {
                    Some(tl::enums::InputChannel::Channel(tl::types::InputChannel {
                        channel_id: c.id,
                        access_hash: c.access_hash.unwrap_or_default(),
                    }))
                }
                _ => None,
            })
            .ok_or_else(|| TelegramError::NotFound(format!("{channel} is not a channel")))
    }
}

fn participant_user_id(participant: &tl::enums::ChannelParticipant) -> Option<i64> {
    match participant {
        tl::enums::ChannelParticipant::Creator(c) => Some(c.user_id),
        tl::enums::ChannelParticipant::Admin(a) => Some(a.user_id),
        _ => None,
    }
}

#[async_trait]
impl IdentitySession for GrammersSession {
    async fn profile(&self) -> Result<Profile, TelegramError> {
        let request = tl::functions::users::GetFullUser {
            id: tl::enums::InputUser::UserSelf,
        };
        let tl::enums::users::UserFull::Full(full) = self.client.invoke(&request).await?;
        let tl::enums::UserFull::Full(details) = full.full_user;

        let user = full
            .users
            .into_iter()
            .find_map(|user| match user {
                tl::enums::User::User(u) if u.id == details.id => Some(u),
                _ => None,
            })
            .ok_or_else(|| TelegramError::Invocation("own user missing from response".to_owned()))?;

        Ok(Profile {
            id: user.id,
            first_name: user.first_name.unwrap_or_default(),
            username: user.username,
            about: details.about,
        })
    }

    async fn set_profile(&self, first_name: &str, about: &str) -> Result<(), TelegramError> {
        info!(
            first_name,
            about = %truncate_for_log(about, 30),
            "updating profile"
        );

        let request = tl::functions::account::UpdateProfile {
            first_name: Some(first_name.to_owned()),
            last_name: None,
            about: Some(about.to_owned()),
        };

        match self.client.invoke(&request).await {
            Ok(_user) => Ok(()),
            Err(e) => {
                let err: TelegramError = e.into();
                if let TelegramError::FloodWait(seconds) = &err {
                    warn!("Flood wait triggered: {} seconds", seconds);
                }
                Err(err)
            }
        }
    }

    async fn upload_profile_photo(&self, path: &Path) -> Result<(), TelegramError> {
        info!(path = %path.display(), "uploading profile photo");

        let uploaded = self
            .client
            .upload_file(path)
            .await
            .map_err(|e| TelegramError::Upload(e.to_string()))?;

        let request = tl::functions::photos::UploadProfilePhoto {
            fallback: false,
            bot: None,
            file: Some(uploaded.raw),
            video: None,
            video_start_ts: None,
            video_emoji_markup: None,
        };
        self.client.invoke(&request).await?;
        Ok(())
    }

    async fn channel_admin_ids(&self, channel: &str) -> Result<Vec<i64>, TelegramError> {
        let input_channel = self.resolve_channel(channel).await?;

        let request = tl::functions::channels::GetParticipants {
            channel: input_channel,
            filter: tl::enums::ChannelParticipantsFilter::ChannelParticipantsAdmins,
            offset: 0,
            limit: 200,
            hash: 0,
        };

        match self.client.invoke(&request).await? {
            tl::enums::channels::ChannelParticipants::Participants(p) => {
                let ids: Vec<i64> = p.participants.iter().filter_map(participant_user_id).collect();
                debug!(channel, admins = ids.len(), "fetched channel admins");
                Ok(ids)
            }
            tl::enums::channels::ChannelParticipants::NotModified => Ok(Vec::new()),
        }
    }

    async fn probe_spam_status(&self, timeout: Duration) -> Result<SpamStatus, TelegramError> {
        let peer = self
            .client
            .resolve_username(SPAM_BOT)
            .await?
            .ok_or_else(|| TelegramError::NotFound(format!("@{SPAM_BOT}")))?;

        let probe = self.client.send_message(&peer, "/start").await?;
        let probe_id = probe.id();
        let deadline = Instant::now() + timeout;

        loop {
            let mut history = self.client.iter_messages(&peer).limit(1);
            if let Some(message) = history.next().await?
                && message.id() > probe_id
                && !message.outgoing()
            {
                let status = SpamStatus::classify(message.text());
                debug!(?status, "status bot replied");
                return Ok(status);
            }

            if Instant::now() >= deadline {
                debug!("status bot did not reply in time");
                return Ok(SpamStatus::Unknown);
            }
            tokio::time::sleep(SPAM_POLL_INTERVAL).await;
        }
    }

    async fn close(self: Box<Self>) {
        debug!("disconnecting from Telegram");
        self.shutdown().await;
    }
}

impl std::fmt::Debug for GrammersSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrammersSession").finish_non_exhaustive()
    }
}

/// Truncates a string for logging purposes.
pub(crate) fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }

    #[test]
    fn test_extract_flood_wait() {
        assert_eq!(extract_flood_wait_seconds("FLOOD_WAIT_120"), Some(120));
        assert_eq!(extract_flood_wait_seconds("flood wait 60 seconds"), Some(60));
        assert_eq!(extract_flood_wait_seconds("some other error"), None);
    }

    #[test]
    fn test_error_classes() {
        assert!(TelegramError::NotAuthorized.is_auth_failure());
        assert!(TelegramError::Session("locked".to_owned()).is_auth_failure());
        assert!(TelegramError::Connection("reset".to_owned()).is_transient());
        assert!(!TelegramError::FloodWait(30).is_transient());
        assert!(!TelegramError::Invocation("BAD_REQUEST".to_owned()).is_transient());
    }
}
