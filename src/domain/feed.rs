use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_error_time: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    /// Seconds from `last_updated` during which the origin declared the
    /// document fresh.
    pub cache_control_max_age: Option<i64>,
    pub visible: bool,
    pub created_at: DateTime<Utc>,
}

impl Feed {
    pub fn new(url: String) -> Self {
        Self {
            id: 0,
            url,
            title: None,
            description: None,
            last_updated: None,
            last_error: None,
            last_error_time: None,
            etag: None,
            last_modified: None,
            cache_control_max_age: None,
            visible: true,
            created_at: Utc::now(),
        }
    }

    pub fn display_title(&self) -> &str {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => title,
            _ => &self.url,
        }
    }

    /// When the cached copy stops being fresh, if the origin sent `max-age`.
    pub fn cache_expires_at(&self) -> Option<DateTime<Utc>> {
        let max_age = self.cache_control_max_age?;
        let last_updated = self.last_updated?;
        last_updated.checked_add_signed(Duration::seconds(max_age))
    }

    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.cache_expires_at().is_some_and(|expires| now < expires)
    }

    pub fn error_class(&self) -> Option<FeedErrorClass> {
        self.last_error.as_deref().map(FeedErrorClass::from_message)
    }
}

/// Validators and freshness taken from one successful response. They are
/// always written together: a header missing from the response clears the
/// stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheHeaders {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub max_age: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub last_updated: Option<DateTime<Utc>>,
    pub cache: Option<CacheHeaders>,
}

/// Coarse category of a stored refresh error, derived from its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedErrorClass {
    NotFound,
    Forbidden,
    RateLimited,
    ServerError,
    Timeout,
    Other,
}

impl FeedErrorClass {
    pub fn from_message(message: &str) -> Self {
        if let Some(code) = http_status_code(message) {
            return match code {
                404 | 410 => FeedErrorClass::NotFound,
                401 | 403 => FeedErrorClass::Forbidden,
                429 => FeedErrorClass::RateLimited,
                500..=599 => FeedErrorClass::ServerError,
                _ => FeedErrorClass::Other,
            };
        }

        let lower = message.to_lowercase();
        if lower.contains("timeout") || lower.contains("timed out") {
            FeedErrorClass::Timeout
        } else {
            FeedErrorClass::Other
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            FeedErrorClass::NotFound => "?",
            FeedErrorClass::Forbidden => "x",
            FeedErrorClass::RateLimited => "~",
            FeedErrorClass::ServerError => "!",
            FeedErrorClass::Timeout => "t",
            FeedErrorClass::Other => "E",
        }
    }
}

fn http_status_code(message: &str) -> Option<u16> {
    let idx = message.find("HTTP ")?;
    let digits: String = message[idx + 5..]
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if digits.len() != 3 {
        return None;
    }
    digits.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_falls_back_to_url() {
        let mut feed = Feed::new("https://example.com/feed.xml".into());
        assert_eq!(feed.display_title(), "https://example.com/feed.xml");

        feed.title = Some(String::new());
        assert_eq!(feed.display_title(), "https://example.com/feed.xml");

        feed.title = Some("Example".into());
        assert_eq!(feed.display_title(), "Example");
    }

    #[test]
    fn test_fresh_within_max_age() {
        let t0 = Utc::now();
        let mut feed = Feed::new("https://example.com/feed.xml".into());
        feed.last_updated = Some(t0);
        feed.cache_control_max_age = Some(3600);

        assert!(feed.is_fresh_at(t0 + Duration::seconds(1800)));
        assert!(!feed.is_fresh_at(t0 + Duration::seconds(3600)));
        assert!(!feed.is_fresh_at(t0 + Duration::seconds(7200)));
    }

    #[test]
    fn test_not_fresh_without_max_age_or_timestamp() {
        let t0 = Utc::now();
        let mut feed = Feed::new("https://example.com/feed.xml".into());
        feed.last_updated = Some(t0);
        assert!(!feed.is_fresh_at(t0));

        feed.last_updated = None;
        feed.cache_control_max_age = Some(3600);
        assert!(!feed.is_fresh_at(t0));
    }

    #[test]
    fn test_error_class_from_status_text() {
        assert_eq!(
            FeedErrorClass::from_message("HTTP 404: Not Found"),
            FeedErrorClass::NotFound
        );
        assert_eq!(
            FeedErrorClass::from_message("HTTP 403: Forbidden"),
            FeedErrorClass::Forbidden
        );
        assert_eq!(
            FeedErrorClass::from_message("HTTP 429: Too Many Requests"),
            FeedErrorClass::RateLimited
        );
        assert_eq!(
            FeedErrorClass::from_message("HTTP 503: Service Unavailable"),
            FeedErrorClass::ServerError
        );
        assert_eq!(
            FeedErrorClass::from_message("Request timeout: operation timed out"),
            FeedErrorClass::Timeout
        );
        assert_eq!(
            FeedErrorClass::from_message("Feed parsing error: bad xml"),
            FeedErrorClass::Other
        );
    }

    #[test]
    fn test_error_class_on_feed() {
        let mut feed = Feed::new("https://example.com/feed.xml".into());
        assert_eq!(feed.error_class(), None);
        feed.last_error = Some("HTTP 500: Internal Server Error".into());
        assert_eq!(feed.error_class(), Some(FeedErrorClass::ServerError));
    }
}
