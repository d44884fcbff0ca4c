//! Transactional update workflow
//!
//! Rebuilds a package for all of its architectures after a new upstream
//! release or commit was seen:
//! 1. assign one free build server per architecture, or abort untouched
//! 2. snapshot, then rewrite the descriptor and specification file
//! 3. persist the new marker with every required architecture flagged stale
//! 4. dispatch all builds in parallel and wait for every one of them
//! 5. commit, or restore both files and the previous marker
//!
//! A repair rebuilds one stale architecture at the current version without
//! touching any file.

pub mod transaction;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use spkg_protocol::{ComposeData, ComposeError, Descriptor};
use tracing::{error, info, info_span, warn};

pub use transaction::UpdateTransaction;

use crate::host::{BuildServerClient, ClientConfig, ClientError};
use crate::index::{IndexError, PackageIndex, PackageRecord};
use crate::inventory::ExecutorInventory;
use crate::specfile::SpecFileError;

/// Where a new upstream state came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseKind {
    Release,
    Commit,
}

/// New upstream state to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Marker stored in the index (tag name or full commit sha)
    pub marker: String,
    /// Version written into the package files
    pub version: String,
    pub kind: ReleaseKind,
}

/// Result of one update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// Every architecture built; files and index carry the new version.
    Committed { version: String },
    /// At least one architecture failed; files and marker were restored.
    RolledBack { failed: Vec<String> },
    /// Some architectures had no free build server; nothing was changed.
    Aborted { missing: Vec<String> },
    /// The descriptor already carries the target version.
    Skipped,
}

/// Result of a single-architecture repair
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairOutcome {
    Repaired,
    Failed,
    NoBuildServer,
}

/// Errors that stop the workflow itself (not per-architecture build failures)
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Descriptor error: {0}")]
    Compose(#[from] ComposeError),

    #[error("Specification file error: {0}")]
    SpecFile(#[from] SpecFileError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),
}

/// Dispatch settings
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    pub client: ClientConfig,
    /// Bound on one architecture's build; `None` waits forever
    pub build_timeout: Option<Duration>,
    /// Upload endpoint forwarded to build servers; `None` uses their own
    pub repo_url: Option<String>,
}

/// Runs update attempts against the configured build servers.
pub struct UpdateWorkflow {
    index: Arc<PackageIndex>,
    inventory: ExecutorInventory,
    dispatch: DispatchConfig,
}

impl UpdateWorkflow {
    pub fn new(index: Arc<PackageIndex>, inventory: ExecutorInventory, dispatch: DispatchConfig) -> Self {
        Self {
            index,
            inventory,
            dispatch,
        }
    }

    pub fn index(&self) -> &Arc<PackageIndex> {
        &self.index
    }

    /// Rebuild `record` at the version named by `request`.
    pub fn run(&self, record: &PackageRecord, request: &UpdateRequest) -> Result<UpdateOutcome, UpdateError> {
        let (_, descriptor) = Descriptor::load(&record.compose)?;
        let current_version = descriptor.meta.version;
        if current_version == request.version {
            info!(
                package = %record.id,
                version = %request.version,
                "descriptor already at target version, adopting marker"
            );
            self.index.set_marker(&record.id, &request.marker)?;
            return Ok(UpdateOutcome::Skipped);
        }

        let architectures: Vec<String> = record.architectures.keys().cloned().collect();
        let clients = match self.assign(&architectures) {
            Ok(clients) => clients,
            Err(missing) => {
                warn!(
                    package = %record.id,
                    ?missing,
                    "no free build server for every architecture, update aborted"
                );
                return Ok(UpdateOutcome::Aborted { missing });
            }
        };

        let mut tx = UpdateTransaction::begin(record, request)?;
        let data = tx.apply(&current_version)?;
        info!(
            package = %record.id,
            from = %current_version,
            to = %request.version,
            ?architectures,
            "package files updated, dispatching builds"
        );

        let stale: BTreeMap<String, bool> = architectures.iter().map(|a| (a.clone(), false)).collect();
        if let Err(e) = self.index.update(&record.id, Some(&request.marker), &stale) {
            tx.restore()?;
            return Err(e.into());
        }

        for (arch, success) in self.dispatch_all(&record.id, &data, clients) {
            tx.record(&arch, success);
        }

        if tx.all_succeeded() {
            self.index.set_flags(&record.id, &tx.outcomes)?;
            info!(package = %record.id, version = %request.version, "update committed");
            return Ok(UpdateOutcome::Committed {
                version: request.version.clone(),
            });
        }

        let failed = tx.failed();
        error!(package = %record.id, ?failed, "update failed, rolling back");
        let restored = tx.restore();
        self.index
            .update(&record.id, Some(&tx.previous_marker), &tx.outcomes)?;
        restored?;
        info!(package = %record.id, marker = %tx.previous_marker, "rollback complete");

        Ok(UpdateOutcome::RolledBack { failed })
    }

    /// Rebuild one architecture at the descriptor's current version.
    pub fn repair(&self, record: &PackageRecord, arch: &str) -> Result<RepairOutcome, UpdateError> {
        let (data, descriptor) = Descriptor::load(&record.compose)?;

        let clients = match self.assign(&[arch.to_string()]) {
            Ok(clients) => clients,
            Err(_) => {
                warn!(package = %record.id, %arch, "no free build server for repair");
                return Ok(RepairOutcome::NoBuildServer);
            }
        };

        info!(
            package = %record.id,
            %arch,
            version = %descriptor.meta.version,
            "repairing stale architecture"
        );
        let results = self.dispatch_all(&record.id, &data, clients);
        if results.get(arch).copied().unwrap_or(false) {
            self.index
                .set_flags(&record.id, &BTreeMap::from([(arch.to_string(), true)]))?;
            Ok(RepairOutcome::Repaired)
        } else {
            Ok(RepairOutcome::Failed)
        }
    }

    /// Pick one authenticated client with a free slot per architecture.
    ///
    /// Each build server serves at most one architecture. On failure every
    /// opened connection is closed and the uncovered architectures returned.
    fn assign(&self, architectures: &[String]) -> Result<Vec<(String, BuildServerClient)>, Vec<String>> {
        let mut assigned: Vec<(String, BuildServerClient)> = Vec::new();
        let mut missing = Vec::new();

        for arch in architectures {
            let mut chosen = None;
            for executor in self.inventory.candidates_for(arch) {
                if assigned.iter().any(|(_, c)| c.server() == executor.name) {
                    continue;
                }
                match BuildServerClient::open(executor, self.dispatch.client.clone()) {
                    Ok(mut client) => match client.request_slot() {
                        Ok(()) => {
                            chosen = Some(client);
                            break;
                        }
                        Err(e @ ClientError::SlotUnavailable { .. }) => {
                            info!(%arch, "{e}");
                            client.disconnect();
                        }
                        Err(e) => {
                            warn!(server = %executor.name, %arch, error = %e, "slot query failed");
                            client.disconnect();
                        }
                    },
                    Err(e) => warn!(server = %executor.name, %arch, error = %e, "build server unavailable"),
                }
            }

            match chosen {
                Some(client) => assigned.push((arch.clone(), client)),
                None => missing.push(arch.clone()),
            }
        }

        if missing.is_empty() {
            Ok(assigned)
        } else {
            for (_, mut client) in assigned {
                client.disconnect();
            }
            Err(missing)
        }
    }

    /// Submit every build concurrently and wait for all of them.
    fn dispatch_all(
        &self,
        package: &str,
        data: &ComposeData,
        clients: Vec<(String, BuildServerClient)>,
    ) -> BTreeMap<String, bool> {
        let repo_url = &self.dispatch.repo_url;
        let timeout = self.dispatch.build_timeout;

        thread::scope(|scope| {
            let handles: Vec<_> = clients
                .into_iter()
                .map(|(arch, client)| {
                    let span = info_span!("dispatch", %arch, server = %client.server());
                    let handle = scope.spawn(move || {
                        let _enter = span.enter();
                        let server = client.server().to_string();
                        match client.submit_build(data, repo_url.clone(), timeout) {
                            Ok(package_file) => {
                                info!(%package, file = %package_file, "build succeeded");
                                true
                            }
                            Err(e) => {
                                error!(%package, %server, error = %e, "build failed");
                                false
                            }
                        }
                    });
                    (arch, handle)
                })
                .collect();

            handles
                .into_iter()
                .map(|(arch, handle)| {
                    let success = handle.join().unwrap_or_else(|_| {
                        error!(%package, %arch, "dispatch thread panicked");
                        false
                    });
                    (arch, success)
                })
                .collect()
        })
    }
}
