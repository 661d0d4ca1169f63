//! Userbot Pool Library
//!
//! Manages a pool of pre-registered Telegram userbot accounts that are rented
//! out to promotional campaigns.
//!
//! This crate provides the core functionality for:
//! - Resolving session credentials from durable storage or local fallbacks
//! - Connecting to Telegram via `MTProto` and mutating account profiles
//! - Tracking which accounts are occupied by a campaign
//! - Driving the step-by-step campaign provisioning flow with compensation

pub mod blob;
pub mod config;
pub mod credentials;
pub mod pool;
pub mod provision;
pub mod store;
pub mod telegram;
pub mod userbot;

#[cfg(test)]
mod testing;
