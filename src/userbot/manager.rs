//! Scoped session operations on pooled accounts.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{RetryPolicy, UserbotError};
use crate::blob::{BlobError, BlobStore};
use crate::credentials::{CredentialHandle, CredentialResolver, Source, extract_session_name};
use crate::store::{Account, AccountId, DeleteOutcome, NewAccount, Repository};
use crate::telegram::{IdentityConnector, IdentitySession, Profile, SpamStatus, TelegramError};

/// Health of one account's session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub account_id: AccountId,
    pub identity: Profile,
    pub source: String,
    pub spam: SpamStatus,
}

/// Outcome of registering a session file.
#[derive(Debug, Clone)]
pub struct Registration {
    pub account: Account,

    /// Whether an older account with the same identity was replaced.
    pub replaced: bool,
}

/// Which parts of an account were deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemovalReport {
    pub blob_deleted: bool,
    pub local_deleted: bool,
}

/// An open session together with the credential file backing it.
///
/// Fields drop in declaration order, so the credential outlives the session.
struct Scoped {
    session: Box<dyn IdentitySession>,
    credential: CredentialHandle,
}

impl Scoped {
    async fn close(self) {
        self.session.close().await;
        debug!(session = self.credential.name(), "session closed");
    }
}

/// Runs remote operations on behalf of pooled accounts.
pub struct UserbotManager {
    repo: Arc<dyn Repository>,
    blob: Option<Arc<dyn BlobStore>>,
    resolver: CredentialResolver,
    connector: Arc<dyn IdentityConnector>,
    retry: RetryPolicy,
    spam_timeout: Duration,
}

impl UserbotManager {
    #[must_use]
    pub fn new(
        repo: Arc<dyn Repository>,
        blob: Option<Arc<dyn BlobStore>>,
        resolver: CredentialResolver,
        connector: Arc<dyn IdentityConnector>,
    ) -> Self {
        Self {
            repo,
            blob,
            resolver,
            connector,
            retry: RetryPolicy::default(),
            spam_timeout: Duration::from_secs(5),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_spam_timeout(mut self, timeout: Duration) -> Self {
        self.spam_timeout = timeout;
        self
    }

    async fn load(&self, id: AccountId) -> Result<Account, UserbotError> {
        self.repo
            .account(id)
            .await?
            .ok_or(UserbotError::NotFound(id))
    }

    async fn open(&self, account: &Account) -> Result<Scoped, UserbotError> {
        let credential = self
            .resolver
            .resolve_required(&account.credential_reference)
            .await?;
        let session = self.connector.open(&credential).await.map_err(|e| {
            warn!(account_id = account.id, error = %e, "failed to open session");
            UserbotError::from(e)
        })?;
        Ok(Scoped {
            session,
            credential,
        })
    }

    /// Updates the account's name, bio and photo.
    ///
    /// Fields left as `None` keep their current remote value. The photo is
    /// uploaded after the text; a failed upload leaves the new text in place.
    pub async fn update_bot_profile(
        &self,
        id: AccountId,
        name: Option<&str>,
        bio: Option<&str>,
        photo: Option<&Path>,
    ) -> Result<Profile, UserbotError> {
        let account = self.load(id).await?;
        let scoped = self.open(&account).await?;
        let result = apply_profile(scoped.session.as_ref(), name, bio, photo).await;
        scoped.close().await;

        match &result {
            Ok(_) => info!(account_id = id, "profile updated"),
            Err(e) => warn!(account_id = id, error = %e, "profile update failed"),
        }
        result
    }

    /// Whether the account administers `channel`.
    ///
    /// A channel that does not resolve counts as not administered.
    pub async fn check_channel_admin(
        &self,
        id: AccountId,
        channel: &str,
    ) -> Result<bool, UserbotError> {
        let account = self.load(id).await?;
        let scoped = self.open(&account).await?;
        let session = scoped.session.as_ref();

        let result = async {
            let me = session.profile().await?;
            let admins = self
                .retry
                .run("channel admin check", || async move {
                    session
                        .channel_admin_ids(channel)
                        .await
                        .map_err(UserbotError::from)
                })
                .await;
            match admins {
                Ok(admins) => Ok::<_, UserbotError>(admins.contains(&me.id)),
                Err(UserbotError::RemoteMutation(TelegramError::NotFound(reason))) => {
                    warn!(account_id = id, channel, %reason, "channel not resolvable");
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        }
        .await;
        scoped.close().await;

        if let Ok(is_admin) = result {
            info!(account_id = id, channel, is_admin, "admin check finished");
        }
        result
    }

    /// Appends `channel` to the bio on its own line.
    ///
    /// Returns `false` when the bio already mentions it; nothing is sent then.
    pub async fn add_channel_to_profile(
        &self,
        id: AccountId,
        channel: &str,
    ) -> Result<bool, UserbotError> {
        let account = self.load(id).await?;
        let scoped = self.open(&account).await?;
        let session = scoped.session.as_ref();

        let result = async {
            let current = session.profile().await?;
            let about = current.about.as_deref().unwrap_or_default();
            if about.contains(channel) {
                debug!(account_id = id, channel, "channel already in bio");
                return Ok(false);
            }
            let updated = format!("{about}\n{channel}").trim().to_owned();
            session.set_profile(&current.first_name, &updated).await?;
            Ok::<_, UserbotError>(true)
        }
        .await;
        scoped.close().await;

        if let Ok(true) = result {
            info!(account_id = id, channel, "channel added to bio");
        }
        result
    }

    /// Confirms the account's credential resolves and its session is
    /// authorized. Returns the live profile.
    pub async fn check_userbot_availability(&self, id: AccountId) -> Result<Profile, UserbotError> {
        let account = &self.load(id).await?;
        self.retry
            .run("availability check", || async move {
                let scoped = self.open(account).await?;
                let profile = scoped.session.profile().await;
                scoped.close().await;
                Ok::<_, UserbotError>(profile?)
            })
            .await
    }

    /// Reports identity and spam-restriction status of one account.
    pub async fn check_session(&self, id: AccountId) -> Result<SessionReport, UserbotError> {
        let account = self.load(id).await?;
        let scoped = self.open(&account).await?;
        let source = match scoped.credential.source() {
            Source::Durable => "durable",
            Source::Local => "local",
        };

        let result = async {
            let identity = scoped.session.profile().await?;
            let spam = match scoped.session.probe_spam_status(self.spam_timeout).await {
                Ok(status) => status,
                Err(e) => {
                    warn!(account_id = id, error = %e, "spam probe failed");
                    SpamStatus::Unknown
                }
            };
            Ok::<_, UserbotError>((identity, spam))
        }
        .await;
        scoped.close().await;

        let (identity, spam) = result?;
        info!(account_id = id, ?spam, "session checked");
        Ok(SessionReport {
            account_id: id,
            identity,
            source: source.to_owned(),
            spam,
        })
    }

    /// Registers a session file as a pooled account.
    ///
    /// The file is always copied into the first local session directory.
    /// It is also uploaded to durable storage when one is configured;
    /// otherwise the account refers to it by session name.
    pub async fn register_account(
        &self,
        owner_id: i64,
        session_file: &Path,
    ) -> Result<Registration, UserbotError> {
        let credential = CredentialHandle::borrowed(session_file);
        let name = credential.name().to_owned();

        let session = self.connector.open(&credential).await?;
        let identity = session.profile().await;
        session.close().await;
        let identity = identity?;
        info!(session = %name, external_id = identity.id, "session verified");

        self.store_local_copy(session_file, &name).await?;

        let credential_reference = match &self.blob {
            Some(blob) => {
                let bytes = tokio::fs::read(session_file).await?;
                let locator = blob.put_object(&self.resolver.blob_key(&name), bytes).await?;
                info!(session = %name, %locator, "session uploaded");
                locator
            }
            None => name,
        };

        let (account, replaced) = self
            .repo
            .replace_account(NewAccount {
                owner_id,
                external_account_id: identity.id,
                credential_reference,
            })
            .await?;
        if replaced {
            info!(account_id = account.id, "replaced earlier registration of the same identity");
        }
        Ok(Registration { account, replaced })
    }

    /// Deletes an account with its stored and local session copies.
    ///
    /// Accounts that are occupied or referenced by a campaign are refused
    /// with their credentials left in place. The row goes first, so a failed
    /// delete never strands a row without its session.
    pub async fn remove_account(&self, id: AccountId) -> Result<RemovalReport, UserbotError> {
        let account = self.load(id).await?;
        let name = extract_session_name(&account.credential_reference);

        match self.repo.delete_account(id).await? {
            DeleteOutcome::Deleted => {}
            DeleteOutcome::Missing => return Err(UserbotError::NotFound(id)),
            DeleteOutcome::InUse => {
                warn!(account_id = id, "refusing to remove an account in use");
                return Err(UserbotError::InUse(id));
            }
        }

        let blob_deleted = match &self.blob {
            Some(blob) => match blob.delete_object(&self.resolver.blob_key(&name)).await {
                Ok(()) => true,
                Err(BlobError::NotFound(_)) => false,
                Err(e) => {
                    warn!(account_id = id, error = %e, "failed to delete stored session");
                    false
                }
            },
            None => false,
        };

        let local_deleted = match self.resolver.primary_local_path(&name) {
            Some(path) => match tokio::fs::remove_file(&path).await {
                Ok(()) => true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
                Err(e) => {
                    warn!(account_id = id, path = %path.display(), error = %e, "failed to delete local session");
                    false
                }
            },
            None => false,
        };

        info!(account_id = id, blob_deleted, local_deleted, "account removed");
        Ok(RemovalReport {
            blob_deleted,
            local_deleted,
        })
    }

    /// Copies a session file into the first local directory, unless it
    /// already lives there.
    async fn store_local_copy(&self, source: &Path, name: &str) -> Result<(), UserbotError> {
        let Some(target) = self.resolver.primary_local_path(name) else {
            return Ok(());
        };
        if let (Ok(from), Ok(to)) = (
            tokio::fs::canonicalize(source).await,
            tokio::fs::canonicalize(&target).await,
        ) && from == to
        {
            return Ok(());
        }

        if let Some(dir) = target.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::copy(source, &target).await?;
        info!(session = name, path = %target.display(), "session copied to local directory");
        Ok(())
    }
}

async fn apply_profile(
    session: &dyn IdentitySession,
    name: Option<&str>,
    bio: Option<&str>,
    photo: Option<&Path>,
) -> Result<Profile, UserbotError> {
    let mut profile = session.profile().await?;

    if name.is_some() || bio.is_some() {
        if let Some(name) = name {
            profile.first_name = name.to_owned();
        }
        if let Some(bio) = bio {
            profile.about = Some(bio.to_owned());
        }
        session
            .set_profile(&profile.first_name, profile.about.as_deref().unwrap_or_default())
            .await?;
    }

    if let Some(photo) = photo {
        session.upload_profile_photo(photo).await?;
    }
    Ok(profile)
}

impl std::fmt::Debug for UserbotManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserbotManager")
            .field("resolver", &self.resolver)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;

    #[tokio::test]
    async fn test_bio_only_update_keeps_name() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        let manager = h.manager();

        let profile = manager
            .update_bot_profile(bot.id, None, Some("Daily tech news"), None)
            .await
            .unwrap();

        assert_eq!(profile.first_name, "Original");
        let remote = h.connector.identity("alice").profile;
        assert_eq!(remote.first_name, "Original");
        assert_eq!(remote.about.as_deref(), Some("Daily tech news"));
        assert_eq!(h.connector.open_close_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_failed_photo_keeps_text() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        h.connector.update("alice", |id| id.fail_photo = true);

        let result = h
            .manager()
            .update_bot_profile(bot.id, Some("Helper"), None, Some(Path::new("avatar.jpg")))
            .await;

        assert!(matches!(result, Err(UserbotError::RemoteMutation(_))));
        assert_eq!(h.connector.identity("alice").profile.first_name, "Helper");
        assert_eq!(h.connector.open_close_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_not_admin_is_false() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;

        let is_admin = h.manager().check_channel_admin(bot.id, "@news").await.unwrap();
        assert!(!is_admin);
    }

    #[tokio::test]
    async fn test_admin_check_retries_transient() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        h.connector.update("alice", |id| {
            id.admin_of.push("@news".to_owned());
            id.transient_failures = 2;
        });

        assert!(h.manager().check_channel_admin(bot.id, "@news").await.unwrap());
        assert_eq!(h.connector.admin_lookups(), 3);
    }

    #[tokio::test]
    async fn test_admin_check_gives_up() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        h.connector.update("alice", |id| id.transient_failures = 5);

        let result = h.manager().check_channel_admin(bot.id, "@news").await;
        assert!(result.unwrap_err().is_transient());
        assert_eq!(h.connector.admin_lookups(), 3);
        assert_eq!(h.connector.open_close_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_add_channel_is_idempotent() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        h.connector
            .update("alice", |id| id.profile.about = Some("Tech digest".to_owned()));
        let manager = h.manager();

        assert!(manager.add_channel_to_profile(bot.id, "@news").await.unwrap());
        let after_first = h.connector.identity("alice").profile.about;
        assert_eq!(after_first.as_deref(), Some("Tech digest\n@news"));

        assert!(!manager.add_channel_to_profile(bot.id, "@news").await.unwrap());
        assert_eq!(h.connector.identity("alice").profile.about, after_first);
    }

    #[tokio::test]
    async fn test_add_channel_to_empty_bio() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;

        h.manager().add_channel_to_profile(bot.id, "@news").await.unwrap();
        assert_eq!(
            h.connector.identity("alice").profile.about.as_deref(),
            Some("@news")
        );
    }

    #[tokio::test]
    async fn test_availability() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        let ghost = h.add_account_without_session("ghost", 502).await;
        let manager = h.manager();

        assert_eq!(manager.check_userbot_availability(bot.id).await.unwrap().id, 501);
        assert!(matches!(
            manager.check_userbot_availability(ghost.id).await,
            Err(UserbotError::CredentialUnavailable(_))
        ));
        assert!(matches!(
            manager.check_userbot_availability(999).await,
            Err(UserbotError::NotFound(999))
        ));

        h.connector.update("alice", |id| id.authorized = false);
        let err = manager.check_userbot_availability(bot.id).await.unwrap_err();
        assert!(matches!(err, UserbotError::AuthFailure(_)));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn test_check_session_reports_spam_status() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        let manager = h.manager();

        let report = manager.check_session(bot.id).await.unwrap();
        assert_eq!(report.spam, SpamStatus::Unknown);
        assert_eq!(report.source, "local");

        h.connector
            .update("alice", |id| id.spam_reply = Some("Good news, no limits".to_owned()));
        let report = manager.check_session(bot.id).await.unwrap();
        assert_eq!(report.spam, SpamStatus::Clear);
        assert_eq!(report.identity.id, 501);
    }

    #[tokio::test]
    async fn test_register_uploads_and_replaces() {
        let h = Harness::new();
        let file = h.write_session("carol");
        h.connector
            .add("carol", crate::telegram::fake::FakeIdentity::new(777, "Carol"));
        let manager = h.manager();

        let first = manager.register_account(10, &file).await.unwrap();
        assert!(!first.replaced);
        assert_eq!(first.account.external_account_id, 777);
        assert_eq!(first.account.credential_reference, "sessions/carol.session");
        assert!(h.bucket.path().join("sessions").join("carol.session").exists());
        assert_eq!(std::fs::read(&file).unwrap(), b"session");

        let second = manager.register_account(10, &file).await.unwrap();
        assert!(second.replaced);
        assert_eq!(manager.check_userbot_availability(second.account.id).await.unwrap().id, 777);
        assert!(matches!(
            manager.check_userbot_availability(first.account.id).await,
            Err(UserbotError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_without_blob_store_keeps_local_copy() {
        let h = Harness::new();
        let incoming = tempfile::tempdir().unwrap();
        let file = incoming.path().join("carol.session");
        std::fs::write(&file, b"carol-session").unwrap();
        h.connector
            .add("carol", crate::telegram::fake::FakeIdentity::new(777, "Carol"));
        let manager = h.local_manager();

        let registration = manager.register_account(10, &file).await.unwrap();
        assert_eq!(registration.account.credential_reference, "carol");

        let copy = h.sessions.path().join("carol.session");
        assert_eq!(std::fs::read(&copy).unwrap(), b"carol-session");
        assert_eq!(
            manager
                .check_userbot_availability(registration.account.id)
                .await
                .unwrap()
                .id,
            777
        );
    }

    #[tokio::test]
    async fn test_register_rejects_unauthorized_session() {
        let h = Harness::new();
        let file = h.write_session("dave");
        let mut identity = crate::telegram::fake::FakeIdentity::new(888, "Dave");
        identity.authorized = false;
        h.connector.add("dave", identity);

        let result = h.manager().register_account(10, &file).await;
        assert!(matches!(result, Err(UserbotError::AuthFailure(_))));
        assert!(h.store.accounts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_refuses_account_in_use() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        let stored = h.bucket.path().join("sessions").join("alice.session");
        std::fs::create_dir_all(stored.parent().unwrap()).unwrap();
        std::fs::write(&stored, b"session").unwrap();
        h.store.set_occupied(bot.id, true, None).await.unwrap();
        let manager = h.manager();

        assert!(matches!(
            manager.remove_account(bot.id).await,
            Err(UserbotError::InUse(id)) if id == bot.id
        ));
        assert!(stored.exists());
        assert!(h.sessions.path().join("alice.session").exists());
        assert!(h.store.account(bot.id).await.unwrap().is_some());

        h.store.set_occupied(bot.id, false, None).await.unwrap();
        let report = manager.remove_account(bot.id).await.unwrap();
        assert!(report.blob_deleted && report.local_deleted);
        assert!(!stored.exists());
    }

    #[tokio::test]
    async fn test_remove_account() {
        let h = Harness::new();
        let bot = h.add_bot("alice", 501).await;
        let manager = h.manager();

        let report = manager.remove_account(bot.id).await.unwrap();
        assert_eq!(
            report,
            RemovalReport {
                blob_deleted: false,
                local_deleted: true
            }
        );
        assert!(!h.sessions.path().join("alice.session").exists());
        assert!(h.store.account(bot.id).await.unwrap().is_none());
        assert!(matches!(
            manager.remove_account(bot.id).await,
            Err(UserbotError::NotFound(_))
        ));
    }
}
