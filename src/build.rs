//! Local package builds
//!
//! Builds one compose file on this machine with a [`BuildBackend`], the
//! same way a build server would, without the network round trip. The
//! package is built in `<root>/_work` and then moved to `<root>`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use spkg_buildserver::{BuildBackend, BuildError};
use spkg_protocol::{ComposeError, Descriptor};
use tracing::info;

/// Scratch directory for local builds, relative to the root.
pub const LOCAL_WORK_DIR: &str = "_work";

/// Local build errors
#[derive(Debug, thiserror::Error)]
pub enum LocalBuildError {
    #[error("Compose error in {path}: {source}")]
    Compose {
        path: PathBuf,
        #[source]
        source: ComposeError,
    },

    #[error("Build failed: {0}")]
    Build(#[from] BuildError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Build `compose` and return the path of the package file under `root`.
pub fn build_local(root: &Path, compose: &Path, backend: &dyn BuildBackend) -> Result<PathBuf, LocalBuildError> {
    let (_, descriptor) = Descriptor::load(compose).map_err(|source| LocalBuildError::Compose {
        path: compose.to_path_buf(),
        source,
    })?;
    let meta = &descriptor.meta;
    info!(
        id = %meta.id,
        name = %meta.name,
        version = %meta.version,
        architecture = %meta.architecture,
        prepare = ?descriptor.prepare.kind,
        "starting package build"
    );

    let work_dir = root.join(LOCAL_WORK_DIR);
    let artifact = backend.build(&descriptor, &work_dir)?;

    let file_name = artifact
        .file_name()
        .ok_or_else(|| BuildError::Package(format!("no file name in {}", artifact.display())))?;
    let output = root.join(file_name);
    fs::rename(&artifact, &output)?;

    info!(package = %output.display(), "package built");
    Ok(output)
}
