//! Configuration module for the userbot pool.
//!
//! Handles loading of the remote identity, storage locations and
//! campaign provisioning settings.

mod settings;

pub use settings::{ConfigError, IdentityConfig, ProvisionSettings, StorageConfig};

/// Maximum bio length for regular Telegram users.
pub const MAX_BIO_LENGTH_FREE: usize = 70;

/// Shortest accepted profile name.
pub const MIN_BOT_NAME_LENGTH: usize = 3;

/// Longest accepted profile name.
pub const MAX_BOT_NAME_LENGTH: usize = 30;
