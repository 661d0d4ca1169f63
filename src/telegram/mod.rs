//! Remote identity layer.
//!
//! [`IdentityConnector`] and [`IdentitySession`] are the ports the pool
//! talks to; [`GrammersConnector`] implements them over MTProto.

mod client;
#[cfg(test)]
pub(crate) mod fake;
mod session;

pub use client::{GrammersConnector, GrammersSession, SPAM_BOT, TelegramError};
pub use session::{IdentityConnector, IdentitySession, Profile, SpamStatus};
