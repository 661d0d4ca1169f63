//! Session credential resolution.
//!
//! Turns the opaque `credential_reference` stored on an account into a
//! session file on local disk that a remote identity can be opened from.

mod name;
mod resolver;

pub use name::{SESSION_EXTENSION, extract_session_name, session_file_name};
pub use resolver::{CredentialError, CredentialHandle, CredentialResolver, Resolution, Source};
