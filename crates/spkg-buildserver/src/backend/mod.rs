//! Build backend.
//!
//! Turns a resolved descriptor into a package file inside a fresh working
//! directory. The shell backend acquires sources, runs the descriptor's
//! build command, and packages the install target:
//! - `git`: clone the URL (optionally a branch)
//! - `archive`: download and extract, then build
//! - `binaryarchive`: download and extract, no build command

pub mod package;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use spkg_protocol::{Descriptor, PrepareKind};
use tracing::{debug, info};

/// Number of trailing output lines kept in a command failure.
const OUTPUT_TAIL_LINES: usize = 20;

/// Errors from preparing, building or packaging.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    #[error("{step} failed to start: {reason}")]
    Spawn { step: &'static str, reason: String },

    #[error("{step} exited with {status}: {output}")]
    CommandFailed {
        step: &'static str,
        status: String,
        output: String,
    },

    #[error("install target not found: {0}")]
    MissingTarget(PathBuf),

    #[error("packaging failed: {0}")]
    Package(String),
}

/// Produces a package file for a descriptor.
pub trait BuildBackend: Send + Sync {
    /// Build inside `work_dir` and return the path of the package file.
    fn build(&self, descriptor: &Descriptor, work_dir: &Path) -> Result<PathBuf, BuildError>;
}

/// Backend that shells out to git, tar, sh and dpkg-deb.
pub struct ShellBackend {
    host_arch: String,
    http: reqwest::blocking::Client,
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellBackend {
    pub fn new() -> Self {
        Self {
            host_arch: std::env::consts::ARCH.to_string(),
            http: reqwest::blocking::Client::new(),
        }
    }

    fn prepare(&self, descriptor: &Descriptor, work_dir: &Path) -> Result<(), BuildError> {
        let prepare = &descriptor.prepare;
        match prepare.kind {
            PrepareKind::Git => {
                info!(url = %prepare.url, branch = ?prepare.branch, "cloning git repository");
                let mut command = Command::new("git");
                command.arg("clone").arg(&prepare.url);
                if let Some(branch) = &prepare.branch {
                    command.arg("-b").arg(branch);
                }
                run_step("git clone", command.current_dir(work_dir))
            }
            PrepareKind::Archive | PrepareKind::BinaryArchive => {
                let filename = archive_file_name(&prepare.url);
                let archive = work_dir.join(&filename);
                info!(url = %prepare.url, "downloading archive");
                self.download(&prepare.url, &archive)?;

                info!(archive = %filename, "extracting archive");
                run_step(
                    "tar extract",
                    Command::new("tar").arg("xf").arg(&filename).current_dir(work_dir),
                )
            }
        }
    }

    fn download(&self, url: &str, dest: &Path) -> Result<(), BuildError> {
        let download_error = |reason: String| BuildError::Download {
            url: url.to_string(),
            reason,
        };

        let mut response = self
            .http
            .get(url)
            .send()
            .map_err(|e| download_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(download_error(format!("HTTP {}", response.status())));
        }

        let mut file = fs::File::create(dest)?;
        response
            .copy_to(&mut file)
            .map_err(|e| download_error(e.to_string()))?;
        Ok(())
    }
}

impl BuildBackend for ShellBackend {
    fn build(&self, descriptor: &Descriptor, work_dir: &Path) -> Result<PathBuf, BuildError> {
        if work_dir.exists() {
            fs::remove_dir_all(work_dir)?;
        }
        fs::create_dir_all(work_dir)?;

        self.prepare(descriptor, work_dir)?;

        let build_dir = work_dir.join(&descriptor.workdir);
        match descriptor.build_system.command() {
            Some(exec) if descriptor.prepare.kind != PrepareKind::BinaryArchive => {
                info!(command = %exec, dir = %build_dir.display(), "running build command");
                run_step(
                    "build command",
                    Command::new("sh").arg("-c").arg(exec).current_dir(&build_dir),
                )?;
            }
            _ => debug!("no build command to run"),
        }

        package::make_package(descriptor, work_dir, &self.host_arch)
    }
}

/// Last path segment of a download URL.
fn archive_file_name(url: &str) -> String {
    url.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("source.tar")
        .to_string()
}

fn run_step(step: &'static str, command: &mut Command) -> Result<(), BuildError> {
    let output = command.output().map_err(|e| BuildError::Spawn {
        step,
        reason: e.to_string(),
    })?;
    check_output(step, output)
}

fn check_output(step: &'static str, output: Output) -> Result<(), BuildError> {
    if output.status.success() {
        return Ok(());
    }

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    let lines: Vec<&str> = combined.lines().collect();
    let tail = lines[lines.len().saturating_sub(OUTPUT_TAIL_LINES)..].join("\n");

    Err(BuildError::CommandFailed {
        step,
        status: output.status.to_string(),
        output: tail,
    })
}
