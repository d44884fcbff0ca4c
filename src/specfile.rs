//! Specification file (`specfile.yml`)
//!
//! A YAML mapping next to each `compose.spkg`. The orchestrator reads its
//! `binpkg` table (architecture → artifact URL) and rewrites `version`,
//! leaving every other key as it was.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

/// File name of the specification file inside a package directory.
pub const SPECFILE_NAME: &str = "specfile.yml";

const VERSION_KEY: &str = "version";
const BINPKG_KEY: &str = "binpkg";

#[derive(Debug, thiserror::Error)]
pub enum SpecFileError {
    #[error("Failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Specification file is not a mapping")]
    NotAMapping,

    #[error("Specification file has no 'binpkg' mapping")]
    MissingBinpkg,
}

/// A parsed specification file
#[derive(Debug, Clone, PartialEq)]
pub struct SpecFile {
    root: Mapping,
}

impl SpecFile {
    pub fn parse(content: &str) -> Result<Self, SpecFileError> {
        match serde_yaml::from_str::<Value>(content)? {
            Value::Mapping(root) => Ok(Self { root }),
            _ => Err(SpecFileError::NotAMapping),
        }
    }

    pub fn load(path: &Path) -> Result<Self, SpecFileError> {
        let content = fs::read_to_string(path).map_err(|source| SpecFileError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn version(&self) -> Option<&str> {
        self.root.get(VERSION_KEY).and_then(Value::as_str)
    }

    pub fn set_version(&mut self, version: &str) {
        self.root
            .insert(Value::from(VERSION_KEY), Value::from(version));
    }

    /// `(architecture, artifact URL)` pairs in file order.
    pub fn artifacts(&self) -> Result<Vec<(String, String)>, SpecFileError> {
        let binpkg = self
            .root
            .get(BINPKG_KEY)
            .and_then(Value::as_mapping)
            .ok_or(SpecFileError::MissingBinpkg)?;

        Ok(binpkg
            .iter()
            .filter_map(|(arch, url)| {
                let arch = arch.as_str()?;
                let url = url.as_str().unwrap_or_default();
                Some((arch.to_string(), url.to_string()))
            })
            .collect())
    }

    /// Deployment directory of the first artifact, see [`binpkg_path`].
    pub fn binpkg_path(&self) -> Result<String, SpecFileError> {
        Ok(self
            .artifacts()?
            .first()
            .map(|(_, url)| binpkg_path(url))
            .unwrap_or_default())
    }

    pub fn to_yaml(&self) -> Result<String, SpecFileError> {
        Ok(serde_yaml::to_string(&self.root)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SpecFileError> {
        let content = self.to_yaml()?;
        fs::write(path, content).map_err(|source| SpecFileError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Directory part of an artifact URL after `/packages`.
///
/// `https://repo/main/packages/foo/x86_64/foo.binpkg` → `/foo/x86_64`
pub fn binpkg_path(url: &str) -> String {
    let Some((_, rest)) = url.split_once("/packages") else {
        return String::new();
    };
    match rest.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}
