//! Session name normalization.

use url::Url;

/// File extension of stored session material.
pub const SESSION_EXTENSION: &str = ".session";

/// Reduces a credential reference to its canonical session name.
///
/// Accepts a full URL (`https://host/bucket/sessions/alice.session`), a path
/// (`adminbot/sessions/alice.session`), a file name (`alice.session`) or a
/// bare name (`alice`); all of them yield `alice`.
#[must_use]
pub fn extract_session_name(reference: &str) -> String {
    let reference = reference.trim();

    let last = if reference.contains("://") {
        match Url::parse(reference) {
            Ok(url) => url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .unwrap_or_default()
                .to_owned(),
            Err(_) => last_path_part(reference).to_owned(),
        }
    } else {
        last_path_part(reference).to_owned()
    };

    match last.strip_suffix(SESSION_EXTENSION) {
        Some(stem) => stem.to_owned(),
        None => last,
    }
}

fn last_path_part(reference: &str) -> &str {
    reference
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(reference)
}

/// File name of the session material for `name`.
#[must_use]
pub fn session_file_name(name: &str) -> String {
    format!("{name}{SESSION_EXTENSION}")
}
