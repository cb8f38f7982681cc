use thiserror::Error;

use crate::config::ConfigError;
use crate::tasks::SchedulerError;

#[derive(Error, Debug)]
pub enum NewsflowError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Non-2xx, non-304 response. The rendered text always starts with
    /// `HTTP <code>` because stored feed errors are classified from it.
    #[error("HTTP {status}: {reason}")]
    HttpStatus { status: u16, reason: String },

    #[error("Feed parsing error: {0}")]
    FeedParse(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Feed not found: {0}")]
    FeedNotFound(String),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Other(String),
}

impl NewsflowError {
    /// Maps a transport failure, keeping timeouts distinguishable.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            NewsflowError::Timeout(err.to_string())
        } else {
            NewsflowError::Http(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, NewsflowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_message_embeds_code() {
        let err = NewsflowError::HttpStatus {
            status: 500,
            reason: "Internal Server Error".into(),
        };
        assert_eq!(err.to_string(), "HTTP 500: Internal Server Error");
    }

    #[test]
    fn test_timeout_message_mentions_timeout() {
        let err = NewsflowError::Timeout("operation timed out".into());
        assert!(err.to_string().to_lowercase().contains("timeout"));
    }
}
