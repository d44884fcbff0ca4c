//! Release tracker
//!
//! Polls the upstream host for each indexed package and decides what to do:
//! - no marker recorded yet: adopt the upstream marker, build nothing
//! - marker unchanged: nothing to do
//! - marker changed: hand off to the update workflow
//!
//! Architectures left stale by an earlier failed attempt are repaired
//! before the comparison. A cycle never starts when the API quota is used up.

pub mod github;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use spkg_protocol::{ComposeError, Descriptor};
use tracing::{debug, error, info, warn};

pub use github::{GitHubApi, RateLimit, RepoRef, Upstream, UpstreamError};

use crate::index::{IndexError, PackageIndex};
use crate::update::{ReleaseKind, RepairOutcome, UpdateError, UpdateOutcome, UpdateRequest, UpdateWorkflow};

/// Length of the commit sha prefix used in commit-derived versions.
pub const SHORT_SHA_LEN: usize = 7;

/// Prefix marking commit-derived versions.
pub const COMMIT_VERSION_PREFIX: &str = "git+";

/// Release tracker errors
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("Upstream API quota exhausted until {reset_at}")]
    QuotaExceeded { reset_at: DateTime<Utc> },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("Package '{0}' is not indexed")]
    UnknownPackage(String),

    #[error(transparent)]
    Compose(#[from] ComposeError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// What one fetch did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Source is not a tracked GitHub repository.
    NotTracked,
    /// Upstream has neither releases nor commits.
    NoUpstreamState,
    /// First marker recorded; no build.
    FirstObservation { marker: String },
    /// Marker unchanged.
    UpToDate,
    /// New upstream state handed to the update workflow.
    Updated(UpdateOutcome),
}

/// Marker and version for the latest upstream state.
pub fn release_request(tag: &str) -> UpdateRequest {
    UpdateRequest {
        marker: tag.to_string(),
        version: tag.strip_prefix('v').unwrap_or(tag).to_string(),
        kind: ReleaseKind::Release,
    }
}

/// Marker and version for a commit, used while a project has no releases.
pub fn commit_request(sha: &str) -> UpdateRequest {
    let short = sha.get(..SHORT_SHA_LEN).unwrap_or(sha);
    UpdateRequest {
        marker: sha.to_string(),
        version: format!("{}{}", COMMIT_VERSION_PREFIX, short),
        kind: ReleaseKind::Commit,
    }
}

pub struct ReleaseTracker {
    upstream: Arc<dyn Upstream>,
    workflow: UpdateWorkflow,
}

impl ReleaseTracker {
    pub fn new(upstream: Arc<dyn Upstream>, workflow: UpdateWorkflow) -> Self {
        Self { upstream, workflow }
    }

    fn index(&self) -> &PackageIndex {
        self.workflow.index()
    }

    /// Fail with [`TrackerError::QuotaExceeded`] when no requests remain.
    pub fn check_quota(&self) -> Result<RateLimit, TrackerError> {
        let limit = self.upstream.rate_limit()?;
        if limit.remaining == 0 {
            return Err(TrackerError::QuotaExceeded {
                reset_at: limit.reset_at,
            });
        }
        debug!(remaining = limit.remaining, "upstream quota");
        Ok(limit)
    }

    /// One checkout cycle over every indexed package, or only `only`.
    ///
    /// Per-package failures are logged and do not stop the cycle.
    pub fn checkout(&self, only: Option<&str>) -> Result<Vec<(String, FetchOutcome)>, TrackerError> {
        let limit = self.check_quota()?;
        info!(remaining = limit.remaining, "starting checkout");

        let ids = match only {
            Some(id) if self.index().contains(id) => vec![id.to_string()],
            Some(id) => return Err(TrackerError::UnknownPackage(id.to_string())),
            None => self.index().ids(),
        };

        let mut outcomes = Vec::new();
        for id in ids {
            match self.fetch_package(&id) {
                Ok(outcome) => outcomes.push((id, outcome)),
                Err(e) => error!(package = %id, error = %e, "checkout failed"),
            }
        }
        info!(checked = outcomes.len(), "finished checkout");
        Ok(outcomes)
    }

    /// Check quota, then fetch a single package.
    pub fn fetch(&self, id: &str) -> Result<FetchOutcome, TrackerError> {
        self.check_quota()?;
        self.fetch_package(id)
    }

    fn fetch_package(&self, id: &str) -> Result<FetchOutcome, TrackerError> {
        let record = self
            .index()
            .get(id)
            .ok_or_else(|| TrackerError::UnknownPackage(id.to_string()))?;

        let (_, descriptor) = Descriptor::load(&record.compose)?;
        let Some(repo) = RepoRef::from_source(&descriptor.meta.source) else {
            debug!(package = %id, source = %descriptor.meta.source, "source is not a GitHub repository");
            return Ok(FetchOutcome::NotTracked);
        };

        for arch in record.stale_architectures() {
            match self.workflow.repair(&record, &arch) {
                Ok(RepairOutcome::Repaired) => info!(package = %id, %arch, "stale architecture repaired"),
                Ok(outcome) => warn!(package = %id, %arch, ?outcome, "stale architecture not repaired"),
                Err(e) => error!(package = %id, %arch, error = %e, "repair failed"),
            }
        }
        let record = self
            .index()
            .get(id)
            .ok_or_else(|| TrackerError::UnknownPackage(id.to_string()))?;

        let request = match self.upstream.latest_release(&repo)? {
            Some(tag) => release_request(&tag),
            None => match self.upstream.latest_commit(&repo)? {
                Some(sha) => commit_request(&sha),
                None => {
                    warn!(package = %id, %repo, "upstream has no releases and no commits");
                    return Ok(FetchOutcome::NoUpstreamState);
                }
            },
        };

        if record.latest.is_empty() {
            info!(package = %id, marker = %request.marker, "first upstream observation");
            self.index().set_marker(id, &request.marker)?;
            return Ok(FetchOutcome::FirstObservation {
                marker: request.marker,
            });
        }

        if record.latest == request.marker {
            debug!(package = %id, marker = %request.marker, "up to date");
            self.index().persist()?;
            return Ok(FetchOutcome::UpToDate);
        }

        info!(
            package = %id,
            previous = %record.latest,
            marker = %request.marker,
            kind = ?request.kind,
            "new upstream state"
        );
        let outcome = self.workflow.run(&record, &request)?;
        Ok(FetchOutcome::Updated(outcome))
    }
}
