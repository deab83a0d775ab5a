//! Telegram adapter errors.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelegramError {
    #[error("Telegram request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Telegram API error {code}: {description}")]
    Api { code: i64, description: String },

    #[error("Telegram rate limit exceeded after {0} retries")]
    RateLimited(u32),

    #[error("Unexpected Telegram response: {0}")]
    Malformed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TelegramError {
    /// The target message or chat no longer exists or is not reachable.
    pub fn is_gone(&self) -> bool {
        match self {
            Self::Api { code: 403, .. } => true,
            Self::Api { code: 400, description } => {
                let description = description.to_ascii_lowercase();
                description.contains("not found")
                    || description.contains("can't be edited")
                    || description.contains("can't be deleted")
            }
            _ => false,
        }
    }

    /// Edit rejected because the text did not change.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { code: 400, description } if description.contains("message is not modified"))
    }

    /// The Bot API rejected the request itself (as opposed to a transport failure).
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Api { .. })
    }
}
