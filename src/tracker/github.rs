//! GitHub REST v3 upstream.

use chrono::{DateTime, TimeZone, Utc};
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use crate::config::{GithubSection, DEFAULT_GITHUB_API};

const GITHUB_HOST_PREFIX: &str = "https://github.com/";
const ACCEPT_V3: &str = "application/vnd.github.v3+json";

/// Upstream errors
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("Upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid quota reset timestamp {0}")]
    InvalidReset(i64),
}

/// `owner/repo` on GitHub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse a `https://github.com/<owner>/<repo>` source URL.
    pub fn from_source(url: &str) -> Option<Self> {
        let path = url.strip_prefix(GITHUB_HOST_PREFIX)?.trim_end_matches('/');
        let mut parts = path.split('/');
        let owner = parts.next().filter(|s| !s.is_empty())?;
        let name = parts.next().filter(|s| !s.is_empty())?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            name: name.trim_end_matches(".git").to_string(),
        })
    }
}

impl std::fmt::Display for RepoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Remaining core API quota
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimit {
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}

/// What the release tracker needs from an upstream host.
pub trait Upstream: Send + Sync {
    fn rate_limit(&self) -> Result<RateLimit, UpstreamError>;

    /// Tag name of the most recent release, if any.
    fn latest_release(&self, repo: &RepoRef) -> Result<Option<String>, UpstreamError>;

    /// Sha of the most recent commit, if any.
    fn latest_commit(&self, repo: &RepoRef) -> Result<Option<String>, UpstreamError>;
}

#[derive(Deserialize)]
struct ReleaseEntry {
    tag_name: String,
}

#[derive(Deserialize)]
struct CommitEntry {
    sha: String,
}

#[derive(Deserialize)]
struct RateLimitResponse {
    resources: RateResources,
}

#[derive(Deserialize)]
struct RateResources {
    core: CoreLimit,
}

#[derive(Deserialize)]
struct CoreLimit {
    remaining: u64,
    reset: i64,
}

/// GitHub API client
pub struct GitHubApi {
    client: Client,
    api_url: String,
    token: Option<String>,
}

impl GitHubApi {
    pub fn new(api_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    pub fn from_config(github: &GithubSection) -> Self {
        Self::new(github.api_url.clone(), github.token.clone())
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, UpstreamError> {
        let url = format!("{}{}", self.api_url, path);
        debug!(%url, "querying upstream");

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, ACCEPT_V3)
            .header(USER_AGENT, concat!("spkg-compose/", env!("CARGO_PKG_VERSION")));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send()?;
        if response.status() != StatusCode::OK {
            return Err(UpstreamError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        Ok(response.json()?)
    }
}

impl Default for GitHubApi {
    fn default() -> Self {
        Self::new(DEFAULT_GITHUB_API, None)
    }
}

impl Upstream for GitHubApi {
    fn rate_limit(&self) -> Result<RateLimit, UpstreamError> {
        let body: RateLimitResponse = self.get("/rate_limit")?;
        let core = body.resources.core;
        let reset_at = Utc
            .timestamp_opt(core.reset, 0)
            .single()
            .ok_or(UpstreamError::InvalidReset(core.reset))?;
        Ok(RateLimit {
            remaining: core.remaining,
            reset_at,
        })
    }

    fn latest_release(&self, repo: &RepoRef) -> Result<Option<String>, UpstreamError> {
        let releases: Vec<ReleaseEntry> =
            self.get(&format!("/repos/{}/{}/releases", repo.owner, repo.name))?;
        Ok(releases.into_iter().next().map(|r| r.tag_name))
    }

    fn latest_commit(&self, repo: &RepoRef) -> Result<Option<String>, UpstreamError> {
        let commits: Vec<CommitEntry> =
            self.get(&format!("/repos/{}/{}/commits", repo.owner, repo.name))?;
        Ok(commits.into_iter().next().map(|c| c.sha))
    }
}
