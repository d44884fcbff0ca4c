//! Package index
//!
//! Durable map from package id to its tracking state. One in-memory map is
//! authoritative; every mutation happens under a single mutex and is
//! flushed to disk (write-temp-then-rename) before the lock is released, so
//! concurrent indexing and update workflows never lose each other's writes.

pub mod scan;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use scan::{scan, ScanError};

/// Tracking state of one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Package id, unique
    pub id: String,

    /// Location of `compose.spkg`
    pub compose: PathBuf,

    /// Location of `specfile.yml`
    pub specfile: PathBuf,

    /// Last upstream release tag or commit sha acted on; empty until first observed
    #[serde(default)]
    pub latest: String,

    /// Architecture → up to date
    #[serde(default)]
    pub architectures: BTreeMap<String, bool>,

    /// Deployment path of built artifacts (informational)
    #[serde(default)]
    pub binpkg_path: String,
}

impl PackageRecord {
    /// Architectures whose last build did not succeed.
    pub fn stale_architectures(&self) -> Vec<String> {
        self.architectures
            .iter()
            .filter(|(_, fresh)| !**fresh)
            .map(|(arch, _)| arch.clone())
            .collect()
    }
}

/// Index errors
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Failed to access index file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Index file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Package '{0}' is not indexed")]
    UnknownPackage(String),

    #[error("Package '{id}' has no architecture '{arch}'")]
    UnknownArchitecture { id: String, arch: String },
}

pub type IndexResult<T> = Result<T, IndexError>;

/// The persisted package index
#[derive(Debug)]
pub struct PackageIndex {
    path: PathBuf,
    records: Mutex<BTreeMap<String, PackageRecord>>,
}

impl PackageIndex {
    /// Open the index at `path`; a missing file is an empty index.
    pub fn open(path: &Path) -> IndexResult<Self> {
        let records = if path.exists() {
            let content = fs::read_to_string(path).map_err(|source| IndexError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            if content.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, PackageRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, id: &str) -> Option<PackageRecord> {
        self.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Insert `record` unless its id is already indexed. Returns whether it was inserted.
    pub fn insert_if_absent(&self, record: PackageRecord) -> IndexResult<bool> {
        let mut records = self.lock();
        if records.contains_key(&record.id) {
            return Ok(false);
        }
        let id = record.id.clone();
        records.insert(id.clone(), record);
        if let Err(e) = self.flush(&records) {
            records.remove(&id);
            return Err(e);
        }
        Ok(true)
    }

    /// Set the latest marker.
    pub fn set_marker(&self, id: &str, marker: &str) -> IndexResult<()> {
        self.update(id, Some(marker), &BTreeMap::new())
    }

    /// Set architecture flags. Every key must already exist.
    pub fn set_flags(&self, id: &str, flags: &BTreeMap<String, bool>) -> IndexResult<()> {
        self.update(id, None, flags)
    }

    /// Set the marker and architecture flags in one write.
    pub fn update(
        &self,
        id: &str,
        marker: Option<&str>,
        flags: &BTreeMap<String, bool>,
    ) -> IndexResult<()> {
        let mut records = self.lock();
        let previous = records
            .get(id)
            .cloned()
            .ok_or_else(|| IndexError::UnknownPackage(id.to_string()))?;

        if let Some(arch) = flags.keys().find(|arch| !previous.architectures.contains_key(*arch)) {
            return Err(IndexError::UnknownArchitecture {
                id: id.to_string(),
                arch: arch.clone(),
            });
        }

        let mut updated = previous.clone();
        if let Some(marker) = marker {
            updated.latest = marker.to_string();
        }
        for (arch, fresh) in flags {
            updated.architectures.insert(arch.clone(), *fresh);
        }

        // A failed flush puts the previous record back.
        records.insert(id.to_string(), updated);
        if let Err(e) = self.flush(&records) {
            records.insert(id.to_string(), previous);
            return Err(e);
        }
        Ok(())
    }

    /// Write the current state to disk without changing it.
    pub fn persist(&self) -> IndexResult<()> {
        let records = self.lock();
        self.flush(&records)
    }

    fn flush(&self, records: &BTreeMap<String, PackageRecord>) -> IndexResult<()> {
        let io_error = |source| IndexError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_error)?;
            }
        }

        let json = serde_json::to_string_pretty(records)?;
        let temp_path = self.path.with_extension("json.tmp");
        fs::write(&temp_path, json).map_err(io_error)?;
        fs::rename(&temp_path, &self.path).map_err(io_error)?;

        debug!(path = %self.path.display(), packages = records.len(), "index flushed");
        Ok(())
    }
}
