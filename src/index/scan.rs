//! Indexing pass
//!
//! Walks the package tree for `compose.spkg` files and inserts a record for
//! every package id not yet indexed. Existing records are never touched.

use std::collections::BTreeMap;
use std::path::Path;

use spkg_protocol::Descriptor;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::{IndexError, PackageIndex, PackageRecord};
use crate::specfile::{SpecFile, SPECFILE_NAME};

/// File name of a package descriptor.
pub const COMPOSE_NAME: &str = "compose.spkg";

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Package tree {0} does not exist")]
    MissingTree(String),

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Index every new package under `data_dir`. Returns the number of new packages.
pub fn scan(data_dir: &Path, index: &PackageIndex) -> Result<usize, ScanError> {
    if !data_dir.is_dir() {
        return Err(ScanError::MissingTree(data_dir.display().to_string()));
    }

    let mut found = 0;
    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || entry.file_name() != COMPOSE_NAME {
            continue;
        }

        let Some(record) = read_package(entry.path()) else {
            continue;
        };
        if index.contains(&record.id) {
            continue;
        }

        let id = record.id.clone();
        let architectures: Vec<_> = record.architectures.keys().cloned().collect();
        if index.insert_if_absent(record)? {
            found += 1;
            info!(package = %id, ?architectures, "found new compose package");
        }
    }

    if found == 0 {
        info!("nothing to do, everything up to date");
    }
    info!(new_packages = found, "finished indexing");
    Ok(found)
}

/// Build a fresh record from a descriptor and its specification file.
fn read_package(compose: &Path) -> Option<PackageRecord> {
    let descriptor = match Descriptor::load(compose) {
        Ok((_, descriptor)) => descriptor,
        Err(e) => {
            warn!(path = %compose.display(), error = %e, "skipping unreadable descriptor");
            return None;
        }
    };

    let specfile = compose.with_file_name(SPECFILE_NAME);
    let spec = SpecFile::load(&specfile).and_then(|spec| {
        let artifacts = spec.artifacts()?;
        let binpkg_path = spec.binpkg_path()?;
        Ok((artifacts, binpkg_path))
    });
    let (artifacts, binpkg_path) = match spec {
        Ok(parts) => parts,
        Err(e) => {
            warn!(
                package = %descriptor.meta.id,
                path = %specfile.display(),
                error = %e,
                "skipping package without a usable specification file"
            );
            return None;
        }
    };

    let architectures: BTreeMap<String, bool> =
        artifacts.into_iter().map(|(arch, _)| (arch, true)).collect();

    Some(PackageRecord {
        id: descriptor.meta.id,
        compose: compose.to_path_buf(),
        specfile,
        latest: String::new(),
        architectures,
        binpkg_path,
    })
}
