//! Working state of one update attempt.
//!
//! Holds the verbatim pre-update contents of the descriptor and the
//! specification file so a failed attempt can put both back byte for byte.
//! Never persisted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use spkg_protocol::compose::parse_str;
use spkg_protocol::ComposeData;

use super::{ReleaseKind, UpdateError, UpdateRequest};
use crate::index::PackageRecord;
use crate::specfile::SpecFile;

#[derive(Debug)]
pub struct UpdateTransaction {
    compose_path: PathBuf,
    spec_path: PathBuf,
    previous_compose: String,
    previous_spec: String,
    pub previous_marker: String,
    pub target_version: String,
    pub kind: ReleaseKind,
    /// Architecture → build succeeded
    pub outcomes: BTreeMap<String, bool>,
}

impl UpdateTransaction {
    /// Snapshot the package's files.
    pub fn begin(record: &PackageRecord, request: &UpdateRequest) -> Result<Self, UpdateError> {
        Ok(Self {
            compose_path: record.compose.clone(),
            spec_path: record.specfile.clone(),
            previous_compose: read(&record.compose)?,
            previous_spec: read(&record.specfile)?,
            previous_marker: record.latest.clone(),
            target_version: request.version.clone(),
            kind: request.kind,
            outcomes: BTreeMap::new(),
        })
    }

    /// Write the new version into both files and return the new descriptor payload.
    ///
    /// On a write failure the files are restored before the error is returned.
    pub fn apply(&self, current_version: &str) -> Result<ComposeData, UpdateError> {
        let compose = self
            .previous_compose
            .replace(current_version, &self.target_version);
        let data = parse_str(&compose)?;

        let mut spec = SpecFile::parse(&self.previous_spec)?;
        spec.set_version(&self.target_version);
        let spec = spec.to_yaml()?;

        let written = write(&self.compose_path, &compose).and_then(|()| write(&self.spec_path, &spec));
        if let Err(e) = written {
            self.restore()?;
            return Err(e);
        }
        Ok(data)
    }

    /// Put both files back exactly as they were.
    pub fn restore(&self) -> Result<(), UpdateError> {
        let compose = write(&self.compose_path, &self.previous_compose);
        let spec = write(&self.spec_path, &self.previous_spec);
        compose.and(spec)
    }

    pub fn record(&mut self, arch: &str, success: bool) {
        self.outcomes.insert(arch.to_string(), success);
    }

    pub fn all_succeeded(&self) -> bool {
        !self.outcomes.is_empty() && self.outcomes.values().all(|ok| *ok)
    }

    pub fn failed(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, ok)| !**ok)
            .map(|(arch, _)| arch.clone())
            .collect()
    }
}

fn read(path: &Path) -> Result<String, UpdateError> {
    fs::read_to_string(path).map_err(|source| UpdateError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn write(path: &Path, content: &str) -> Result<(), UpdateError> {
    fs::write(path, content).map_err(|source| UpdateError::Io {
        path: path.to_path_buf(),
        source,
    })
}
