//! Packaging of a built install target.
//!
//! The target (`Workdir/Target`) is staged under its install prefix and then
//! archived in the format the descriptor selects.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;
use spkg_protocol::{Descriptor, InstallFormat};
use walkdir::WalkDir;

use super::{run_step, BuildError};

/// Staging directory name inside the work dir.
const STAGING_DIR: &str = "_stage";

/// Metadata entry stored at the front of a binpkg archive.
#[derive(Debug, Serialize)]
struct BinpkgMetadata<'a> {
    name: &'a str,
    id: &'a str,
    version: &'a str,
    description: &'a str,
    architecture: &'a str,
    author: &'a str,
}

/// Stage and archive the install target, returning the package path.
pub fn make_package(
    descriptor: &Descriptor,
    work_dir: &Path,
    host_arch: &str,
) -> Result<PathBuf, BuildError> {
    let target = work_dir
        .join(&descriptor.workdir)
        .join(descriptor.install.target());
    if !target.exists() {
        return Err(BuildError::MissingTarget(target));
    }

    let staging = work_dir.join(STAGING_DIR);
    if staging.exists() {
        fs::remove_dir_all(&staging)?;
    }
    let prefix_dir = staging.join(descriptor.install.prefix().trim_start_matches('/'));
    fs::create_dir_all(&prefix_dir)?;
    copy_target(&target, &prefix_dir)?;

    let architecture = descriptor.target_architecture(host_arch);
    match &descriptor.install {
        InstallFormat::Binpkg { .. } => make_binpkg(descriptor, &architecture, &staging, work_dir),
        InstallFormat::Deb { .. } => make_deb(descriptor, &architecture, &staging, work_dir),
    }
}

/// Copy a file or directory into `dest_dir`, keeping its base name.
fn copy_target(target: &Path, dest_dir: &Path) -> Result<(), BuildError> {
    let base = target.parent().unwrap_or(target);
    for entry in WalkDir::new(target) {
        let entry = entry.map_err(|e| BuildError::Package(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(base)
            .map_err(|e| BuildError::Package(e.to_string()))?;
        let dest = dest_dir.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

fn make_binpkg(
    descriptor: &Descriptor,
    architecture: &str,
    staging: &Path,
    work_dir: &Path,
) -> Result<PathBuf, BuildError> {
    let meta = &descriptor.meta;
    let output = work_dir.join(format!("{}-{}-{}.binpkg", meta.id, meta.version, architecture));

    let metadata = serde_json::to_vec_pretty(&BinpkgMetadata {
        name: &meta.name,
        id: &meta.id,
        version: &meta.version,
        description: &meta.description,
        architecture,
        author: &meta.author,
    })
    .map_err(|e| BuildError::Package(e.to_string()))?;

    let file = fs::File::create(&output)?;
    let mut archive = tar::Builder::new(file);

    let mut header = tar::Header::new_gnu();
    header.set_size(metadata.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    archive.append_data(&mut header, "metadata.json", metadata.as_slice())?;
    archive.append_dir_all("root", staging)?;
    archive.finish()?;

    Ok(output)
}

fn make_deb(
    descriptor: &Descriptor,
    architecture: &str,
    staging: &Path,
    work_dir: &Path,
) -> Result<PathBuf, BuildError> {
    let meta = &descriptor.meta;
    let deb_arch = debian_architecture(architecture);

    let control_dir = staging.join("DEBIAN");
    fs::create_dir_all(&control_dir)?;
    let maintainer: &str = if meta.author.is_empty() { "unknown" } else { &meta.author };
    let description: &str = if meta.description.is_empty() { &meta.name } else { &meta.description };
    fs::write(
        control_dir.join("control"),
        format!(
            "Package: {}\nVersion: {}\nArchitecture: {}\nMaintainer: {}\nDescription: {}\n",
            meta.id, meta.version, deb_arch, maintainer, description
        ),
    )?;

    let output = work_dir.join(format!("{}_{}_{}.deb", meta.id, meta.version, deb_arch));
    run_step(
        "dpkg-deb",
        Command::new("dpkg-deb").arg("--build").arg(staging).arg(&output),
    )?;
    Ok(output)
}

/// Map a machine architecture to its Debian name.
fn debian_architecture(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "i686" | "i386" | "x86" => "i386",
        "armv7l" | "arm" => "armhf",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spkg_protocol::compose::parse_str;
    use tempfile::TempDir;

    fn descriptor(install: &str) -> Descriptor {
        let text = format!(
            "[Meta]\nName = Foo\nId = foo\nVersion = 2.0.0\nArchitecture = x86_64\nSource = https://github.com/acme/foo\n\
             [Prepare]\nType = git\n\
             [Build]\nBuildSys = none\nWorkdir = foo\n\
             [Install]\nAs = {install}\n\
             [Install.{install}]\nPrefix = /usr/bin\nTarget = bin/foo\n"
        );
        Descriptor::from_data(&parse_str(&text).unwrap()).unwrap()
    }

    #[test]
    fn test_binpkg_contains_metadata_and_target() {
        let dir = TempDir::new().unwrap();
        let bin = dir.path().join("foo/bin");
        fs::create_dir_all(&bin).unwrap();
        fs::write(bin.join("foo"), b"#!/bin/sh\necho foo\n").unwrap();

        let output = make_package(&descriptor("binpkg"), dir.path(), "aarch64").unwrap();
        assert_eq!(output.file_name().unwrap(), "foo-2.0.0-x86_64.binpkg");

        let mut archive = tar::Archive::new(fs::File::open(&output).unwrap());
        let names: Vec<String> = archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().display().to_string())
            .collect();
        assert_eq!(names[0], "metadata.json");
        assert!(names.iter().any(|n| n == "root/usr/bin/foo"), "entries: {:?}", names);
    }

    #[test]
    fn test_missing_target_reported() {
        let dir = TempDir::new().unwrap();
        let err = make_package(&descriptor("binpkg"), dir.path(), "x86_64").unwrap_err();
        assert!(matches!(err, BuildError::MissingTarget(_)));
    }

    #[test]
    fn test_debian_architecture_names() {
        assert_eq!(debian_architecture("x86_64"), "amd64");
        assert_eq!(debian_architecture("aarch64"), "arm64");
        assert_eq!(debian_architecture("riscv64"), "riscv64");
    }
}
