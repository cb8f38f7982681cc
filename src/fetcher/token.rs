//! `feed_token` query parameters for private GitHub and GitLab feeds.
//!
//! Tokens are added to the request URL only; the stored feed URL never
//! carries them.

use tracing::warn;
use url::Url;

pub const GITHUB_TOKEN_ENV: &str = "GITHUB_FEED_TOKEN";
pub const GITLAB_TOKEN_ENV: &str = "GITLAB_FEED_TOKEN";
pub const TOKEN_PARAM: &str = "feed_token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedHost {
    GitHub,
    GitLab,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTokens {
    github: Option<String>,
    gitlab: Option<String>,
    /// Self-hosted GitLab instances, matched exactly.
    gitlab_hosts: Vec<String>,
}

impl Default for FeedTokens {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl FeedTokens {
    pub fn new(github: Option<String>, gitlab: Option<String>) -> Self {
        Self {
            github: github.filter(|t| !t.is_empty()),
            gitlab: gitlab.filter(|t| !t.is_empty()),
            gitlab_hosts: Vec::new(),
        }
    }

    /// Reads `GITHUB_FEED_TOKEN` and `GITLAB_FEED_TOKEN`.
    pub fn from_env() -> Self {
        Self::new(
            std::env::var(GITHUB_TOKEN_ENV).ok(),
            std::env::var(GITLAB_TOKEN_ENV).ok(),
        )
    }

    pub fn with_gitlab_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.gitlab_hosts.extend(hosts.into_iter().map(|h| {
            let host: String = h.into();
            host.to_ascii_lowercase()
        }));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.github.is_none() && self.gitlab.is_none()
    }

    pub fn host_of(&self, url: &Url) -> Option<FeedHost> {
        let host = url.host_str()?.to_ascii_lowercase();
        let bare = host.strip_prefix("www.").unwrap_or(&host);

        if bare == "github.com" {
            Some(FeedHost::GitHub)
        } else if bare == "gitlab.com" || self.gitlab_hosts.iter().any(|h| *h == host) {
            Some(FeedHost::GitLab)
        } else {
            None
        }
    }

    fn token_for(&self, host: FeedHost) -> Option<&str> {
        match host {
            FeedHost::GitHub => self.github.as_deref(),
            FeedHost::GitLab => self.gitlab.as_deref(),
        }
    }

    /// The URL to request for `feed_url`: unchanged, or with `feed_token`
    /// set (replacing any existing value) when a token applies.
    pub fn request_url(&self, feed_url: &str) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let mut url = match Url::parse(feed_url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = feed_url, error = %e, "Failed to parse feed URL for token addition");
                return None;
            }
        };
        let token = self.host_of(&url).and_then(|host| self.token_for(host))?;

        let kept: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(key, _)| key != TOKEN_PARAM)
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        url.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(TOKEN_PARAM, token);

        Some(url.into())
    }
}
