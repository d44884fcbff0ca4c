//! Orchestrator wiring
//!
//! Ties the index, the release tracker and the update workflow to one
//! configuration and runs them as routine processes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::{ConfigError, OrchestratorConfig};
use crate::index::{scan, IndexError, PackageIndex, ScanError};
use crate::routines::{ProcessRunner, RoutineProcess, Scheduler};
use crate::tracker::{FetchOutcome, GitHubApi, ReleaseTracker, TrackerError, Upstream};
use crate::update::UpdateWorkflow;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Index(#[from] IndexError),
}

pub struct Orchestrator {
    config: OrchestratorConfig,
    data_dir: PathBuf,
    index: Arc<PackageIndex>,
    tracker: ReleaseTracker,
}

impl Orchestrator {
    /// Orchestrator talking to the configured GitHub API.
    pub fn new(root: &Path, config: OrchestratorConfig) -> Result<Self, OrchestratorError> {
        let upstream = Arc::new(GitHubApi::from_config(&config.github));
        Self::with_upstream(root, config, upstream)
    }

    pub fn with_upstream(
        root: &Path,
        config: OrchestratorConfig,
        upstream: Arc<dyn Upstream>,
    ) -> Result<Self, OrchestratorError> {
        let index = Arc::new(PackageIndex::open(&config.index_path(root))?);
        let workflow = UpdateWorkflow::new(Arc::clone(&index), config.inventory.clone(), config.dispatch());
        Ok(Self {
            data_dir: config.data_dir(root),
            tracker: ReleaseTracker::new(upstream, workflow),
            index,
            config,
        })
    }

    pub fn index(&self) -> &Arc<PackageIndex> {
        &self.index
    }

    /// One indexing pass. Returns the number of new packages.
    pub fn index_packages(&self) -> Result<usize, ScanError> {
        info!(data_dir = %self.data_dir.display(), "starting indexing");
        scan(&self.data_dir, &self.index)
    }

    /// One checkout pass over every package, or only `package`.
    pub fn checkout(&self, package: Option<&str>) -> Result<Vec<(String, FetchOutcome)>, TrackerError> {
        self.tracker.checkout(package)
    }

    /// Scheduler running the configured routines against this orchestrator.
    pub fn scheduler(self: &Arc<Self>) -> Scheduler {
        Scheduler::new(self.config.routines.clone(), Arc::clone(self) as Arc<dyn ProcessRunner>)
    }
}

impl ProcessRunner for Orchestrator {
    fn run(&self, process: RoutineProcess) {
        match process {
            RoutineProcess::Indexing => {
                if let Err(e) = self.index_packages() {
                    error!(error = %e, "indexing failed");
                }
            }
            RoutineProcess::Checkout => match self.checkout(None) {
                Ok(_) => {}
                Err(TrackerError::QuotaExceeded { reset_at }) => {
                    warn!(%reset_at, "upstream quota exhausted, skipping checkout");
                }
                Err(e) => error!(error = %e, "checkout failed"),
            },
        }
    }
}
