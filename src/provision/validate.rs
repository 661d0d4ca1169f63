//! Validation of customer input at each provisioning step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{MAX_BIO_LENGTH_FREE, MAX_BOT_NAME_LENGTH, MIN_BOT_NAME_LENGTH};

/// Errors that can occur during input validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Campaign name is empty")]
    EmptyCampaignName,

    #[error("Unknown category: {0}")]
    UnknownCategory(String),

    #[error("Bot name must be {min}..={max} characters, got {length}")]
    BotNameLength {
        length: usize,
        min: usize,
        max: usize,
    },

    #[error("Bio exceeds maximum length: {length} > {max_length}")]
    BioTooLong { length: usize, max_length: usize },

    #[error("Bio must not contain links")]
    BioContainsLink,

    #[error("Channel must be given as @username")]
    ChannelHandle,
}

/// Topic a campaign's bot comments on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Technology,
    Food,
    Fashion,
    Sport,
    Travel,
    Education,
    Finance,
    Entertainment,
}

impl Category {
    pub const ALL: [Self; 8] = [
        Self::Technology,
        Self::Food,
        Self::Fashion,
        Self::Sport,
        Self::Travel,
        Self::Education,
        Self::Finance,
        Self::Entertainment,
    ];

    /// Tag stored on the campaign row.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Technology => "technology",
            Self::Food => "food",
            Self::Fashion => "fashion",
            Self::Sport => "sport",
            Self::Travel => "travel",
            Self::Education => "education",
            Self::Finance => "finance",
            Self::Entertainment => "entertainment",
        }
    }

    /// Label on the Russian-language keyboard.
    #[must_use]
    pub const fn russian_label(self) -> &'static str {
        match self {
            Self::Technology => "Технологии",
            Self::Food => "Еда",
            Self::Fashion => "Мода",
            Self::Sport => "Спорт",
            Self::Travel => "Путешествия",
            Self::Education => "Образование",
            Self::Finance => "Финансы",
            Self::Entertainment => "Развлечения",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ValidationError;

    /// Accepts the tag or the Russian label, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == wanted || c.russian_label().to_lowercase() == wanted)
            .ok_or_else(|| ValidationError::UnknownCategory(s.trim().to_owned()))
    }
}

/// Trims a campaign name and rejects an empty one.
pub fn validate_campaign_name(input: &str) -> Result<String, ValidationError> {
    let name = input.trim();
    if name.is_empty() {
        return Err(ValidationError::EmptyCampaignName);
    }
    Ok(name.to_owned())
}

/// Trims a bot name and checks its length in characters.
pub fn validate_bot_name(input: &str) -> Result<String, ValidationError> {
    let name = input.trim();
    let length = name.chars().count();
    if !(MIN_BOT_NAME_LENGTH..=MAX_BOT_NAME_LENGTH).contains(&length) {
        return Err(ValidationError::BotNameLength {
            length,
            min: MIN_BOT_NAME_LENGTH,
            max: MAX_BOT_NAME_LENGTH,
        });
    }
    Ok(name.to_owned())
}

const LINK_MARKERS: [&str; 4] = ["http://", "https://", "www.", "t.me/"];

/// Trims a bio and rejects links or text over the free-account limit.
///
/// Links are checked first, so a long bio with a link reports the link.
pub fn validate_bio(input: &str) -> Result<String, ValidationError> {
    let bio = input.trim();
    let lower = bio.to_lowercase();
    if LINK_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return Err(ValidationError::BioContainsLink);
    }

    let length = bio.chars().count();
    if length > MAX_BIO_LENGTH_FREE {
        return Err(ValidationError::BioTooLong {
            length,
            max_length: MAX_BIO_LENGTH_FREE,
        });
    }
    Ok(bio.to_owned())
}

/// Accepts `@username` with a non-empty, whitespace-free username.
pub fn validate_channel(input: &str) -> Result<String, ValidationError> {
    let handle = input.trim();
    match handle.strip_prefix('@') {
        Some(username) if !username.is_empty() && !username.contains(char::is_whitespace) => {
            Ok(handle.to_owned())
        }
        _ => Err(ValidationError::ChannelHandle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bio_boundary() {
        assert!(validate_bio(&"a".repeat(70)).is_ok());
        assert_eq!(
            validate_bio(&"a".repeat(71)),
            Err(ValidationError::BioTooLong {
                length: 71,
                max_length: 70
            })
        );
    }

    #[test]
    fn test_bio_counts_characters_not_bytes() {
        assert!(validate_bio(&"я".repeat(70)).is_ok());
    }

    #[test]
    fn test_bio_rejects_links() {
        for bio in [
            "see http://x.io",
            "HTTPS://EXAMPLE.COM",
            "visit WWW.site",
            "join t.me/chan",
        ] {
            assert_eq!(validate_bio(bio), Err(ValidationError::BioContainsLink), "{bio}");
        }
        let long_with_link = format!("{}https://a.b", "a".repeat(80));
        assert_eq!(
            validate_bio(&long_with_link),
            Err(ValidationError::BioContainsLink)
        );
    }

    #[test]
    fn test_bio_trimmed() {
        assert_eq!(validate_bio("  hello  ").unwrap(), "hello");
    }

    #[test]
    fn test_bot_name_bounds() {
        assert!(validate_bot_name("ab").is_err());
        assert_eq!(validate_bot_name("  abc ").unwrap(), "abc");
        assert!(validate_bot_name(&"n".repeat(30)).is_ok());
        assert!(validate_bot_name(&"n".repeat(31)).is_err());
    }

    #[test]
    fn test_channel_handle() {
        assert_eq!(validate_channel(" @news ").unwrap(), "@news");
        assert!(validate_channel("news").is_err());
        assert!(validate_channel("@").is_err());
        assert!(validate_channel("@my news").is_err());
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("Технологии".parse::<Category>().unwrap(), Category::Technology);
        assert_eq!("FINANCE".parse::<Category>().unwrap(), Category::Finance);
        assert!("Gardening".parse::<Category>().is_err());
        assert_eq!(Category::ALL.len(), 8);
    }

    #[test]
    fn test_campaign_name() {
        assert!(validate_campaign_name("   ").is_err());
        assert_eq!(validate_campaign_name(" Spring ").unwrap(), "Spring");
    }
}
