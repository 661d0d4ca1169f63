//! Scriptable in-process identities for orchestration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::TelegramError;
use super::session::{IdentityConnector, IdentitySession, Profile, SpamStatus};
use crate::credentials::CredentialHandle;

#[derive(Debug, Clone)]
pub(crate) struct FakeIdentity {
    pub profile: Profile,
    pub authorized: bool,
    /// Channels (with `@`) this identity administers.
    pub admin_of: Vec<String>,
    pub fail_updates: bool,
    pub fail_photo: bool,
    /// Admin lookups that fail with a connection error before succeeding.
    pub transient_failures: u32,
    pub spam_reply: Option<String>,
    pub photos: Vec<String>,
}

impl FakeIdentity {
    pub fn new(id: i64, first_name: &str) -> Self {
        Self {
            profile: Profile {
                id,
                first_name: first_name.to_owned(),
                username: None,
                about: None,
            },
            authorized: true,
            admin_of: Vec::new(),
            fail_updates: false,
            fail_photo: false,
            transient_failures: 0,
            spam_reply: None,
            photos: Vec::new(),
        }
    }
}

#[derive(Debug, Default)]
struct FakeState {
    identities: HashMap<String, FakeIdentity>,
    opened: u32,
    closed: u32,
    admin_lookups: u32,
}

/// Connector resolving sessions by name from a shared table.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeConnector {
    state: Arc<Mutex<FakeState>>,
}

impl FakeConnector {
    pub fn add(&self, session_name: &str, identity: FakeIdentity) {
        self.state
            .lock()
            .unwrap()
            .identities
            .insert(session_name.to_owned(), identity);
    }

    pub fn identity(&self, session_name: &str) -> FakeIdentity {
        self.state.lock().unwrap().identities[session_name].clone()
    }

    pub fn update(&self, session_name: &str, f: impl FnOnce(&mut FakeIdentity)) {
        let mut state = self.state.lock().unwrap();
        f(state.identities.get_mut(session_name).unwrap());
    }

    /// Sessions opened and closed so far.
    pub fn open_close_counts(&self) -> (u32, u32) {
        let state = self.state.lock().unwrap();
        (state.opened, state.closed)
    }

    pub fn admin_lookups(&self) -> u32 {
        self.state.lock().unwrap().admin_lookups
    }
}

#[async_trait]
impl IdentityConnector for FakeConnector {
    async fn open(
        &self,
        credential: &CredentialHandle,
    ) -> Result<Box<dyn IdentitySession>, TelegramError> {
        let mut state = self.state.lock().unwrap();
        let identity = state
            .identities
            .get(credential.name())
            .ok_or_else(|| TelegramError::Session(format!("no session {}", credential.name())))?;
        if !identity.authorized {
            return Err(TelegramError::NotAuthorized);
        }
        state.opened += 1;
        Ok(Box::new(FakeSession {
            name: credential.name().to_owned(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeSession {
    name: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeSession {
    fn with<T>(&self, f: impl FnOnce(&mut FakeIdentity) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        f(state.identities.get_mut(&self.name).unwrap())
    }
}

#[async_trait]
impl IdentitySession for FakeSession {
    async fn profile(&self) -> Result<Profile, TelegramError> {
        Ok(self.with(|id| id.profile.clone()))
    }

    async fn set_profile(&self, first_name: &str, about: &str) -> Result<(), TelegramError> {
        self.with(|id| {
            if id.fail_updates {
                return Err(TelegramError::Invocation("FIRSTNAME_INVALID".to_owned()));
            }
            id.profile.first_name = first_name.to_owned();
            id.profile.about = Some(about.to_owned());
            Ok(())
        })
    }

    async fn upload_profile_photo(&self, path: &Path) -> Result<(), TelegramError> {
        self.with(|id| {
            if id.fail_photo {
                return Err(TelegramError::Upload("PHOTO_INVALID".to_owned()));
            }
            id.photos.push(path.display().to_string());
            Ok(())
        })
    }

    async fn channel_admin_ids(&self, channel: &str) -> Result<Vec<i64>, TelegramError> {
        let mut state = self.state.lock().unwrap();
        state.admin_lookups += 1;
        let identity = state.identities.get_mut(&self.name).unwrap();
        if identity.transient_failures > 0 {
            identity.transient_failures -= 1;
            return Err(TelegramError::Connection("connection reset".to_owned()));
        }
        let mut admins = vec![1];
        if identity.admin_of.iter().any(|c| c == channel) {
            admins.push(identity.profile.id);
        }
        Ok(admins)
    }

    async fn probe_spam_status(&self, _timeout: Duration) -> Result<SpamStatus, TelegramError> {
        Ok(self.with(|id| {
            id.spam_reply
                .as_deref()
                .map_or(SpamStatus::Unknown, SpamStatus::classify)
        }))
    }

    async fn close(self: Box<Self>) {
        self.state.lock().unwrap().closed += 1;
    }
}
