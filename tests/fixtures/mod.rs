//! Shared test fixtures
//!
//! - Package trees (`compose.spkg` + `specfile.yml`) in a temp dir
//! - In-process build servers on ephemeral ports with scripted backends
//! - A scripted upstream in place of the GitHub API

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use spkg_buildserver::{
    ArtifactUploader, BuildBackend, BuildError, BuildServer, BuildServerConfig, BuildSlot,
    ServerHandle, UploadError,
};
use spkg_compose::index::PackageRecord;
use spkg_compose::tracker::{RateLimit, RepoRef, Upstream, UpstreamError};
use spkg_compose::ExecutorDescriptor;
use spkg_protocol::Descriptor;
use tempfile::TempDir;

pub const TOKEN: &str = "sf_spc_fixture";

/// A package tree rooted in a temp dir.
pub struct PackageTree {
    pub dir: TempDir,
}

impl PackageTree {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn data_dir(&self) -> PathBuf {
        self.root().join("packages")
    }

    pub fn index_path(&self) -> PathBuf {
        self.root().join("data/index.json")
    }

    /// Write `compose.spkg` and `specfile.yml` for `id`.
    pub fn write_package(&self, id: &str, version: &str, arches: &[&str], source: &str) -> PackageRecord {
        let dir = self.data_dir().join(id);
        fs::create_dir_all(&dir).unwrap();

        let compose = dir.join("compose.spkg");
        fs::write(&compose, compose_text(id, version, source)).unwrap();

        let specfile = dir.join("specfile.yml");
        let mut spec = format!("# {id} artifacts\nversion: {version}\nbinpkg:\n");
        for arch in arches {
            spec.push_str(&format!(
                "  {arch}: https://repo.test/main/packages/{id}/{arch}/{id}.binpkg\n"
            ));
        }
        fs::write(&specfile, spec).unwrap();

        PackageRecord {
            id: id.to_string(),
            compose,
            specfile,
            latest: String::new(),
            architectures: arches.iter().map(|a| (a.to_string(), true)).collect(),
            binpkg_path: format!("/{id}/{}", arches.first().copied().unwrap_or_default()),
        }
    }
}

pub fn compose_text(id: &str, version: &str, source: &str) -> String {
    format!(
        "[Meta]\n\
         Name = {id}\n\
         Id = {id}\n\
         Version = {version} // tracked upstream\n\
         Source = {source}\n\
         \n\
         [Prepare]\n\
         Type = git\n\
         URL = %meta.source%\n\
         \n\
         [Build]\n\
         BuildSys = cargo\n\
         \n\
         [Build.cargo]\n\
         Exec = cargo build --release\n\
         \n\
         [Install]\n\
         As = binpkg\n\
         \n\
         [Install.binpkg]\n\
         Prefix = /usr/bin\n\
         Target = target/release/{id}\n"
    )
}

/// Byte contents of a record's two files.
pub fn snapshot(record: &PackageRecord) -> (String, String) {
    (
        fs::read_to_string(&record.compose).unwrap(),
        fs::read_to_string(&record.specfile).unwrap(),
    )
}

/// How a scripted backend answers builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Block until the test releases the build.
    Gated,
}

/// Backend that answers according to a [`Behavior`] and records versions built.
pub struct ScriptedBackend {
    behavior: Behavior,
    release: Mutex<Receiver<()>>,
    pub versions: Mutex<Vec<String>>,
}

impl BuildBackend for ScriptedBackend {
    fn build(&self, descriptor: &Descriptor, work_dir: &Path) -> Result<PathBuf, BuildError> {
        self.versions
            .lock()
            .unwrap()
            .push(descriptor.meta.version.clone());
        match self.behavior {
            Behavior::Succeed => {}
            Behavior::Fail => {
                return Err(BuildError::Package("scripted failure".to_string()));
            }
            Behavior::Gated => {
                let _ = self
                    .release
                    .lock()
                    .unwrap()
                    .recv_timeout(Duration::from_secs(10));
            }
        }
        Ok(work_dir.join(format!(
            "{}-{}.binpkg",
            descriptor.meta.id, descriptor.meta.version
        )))
    }
}

struct NullUploader;

impl ArtifactUploader for NullUploader {
    fn upload(&self, _repo_url: &str, _package_id: &str, _artifact: &Path) -> Result<(), UploadError> {
        Ok(())
    }
}

/// A running in-process build server.
pub struct TestServer {
    pub descriptor: ExecutorDescriptor,
    pub backend: Arc<ScriptedBackend>,
    pub slot: BuildSlot,
    pub release: Sender<()>,
    pub handle: ServerHandle,
    _work: TempDir,
}

impl TestServer {
    pub fn start(name: &str, tags: &[&str], behavior: Behavior) -> Self {
        let work = TempDir::new().unwrap();
        let config = BuildServerConfig {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            port: 0,
            token: TOKEN.to_string(),
            work_dir: work.path().to_path_buf(),
            ..BuildServerConfig::default()
        };

        let (release, rx) = mpsc::channel();
        let backend = Arc::new(ScriptedBackend {
            behavior,
            release: Mutex::new(rx),
            versions: Mutex::new(Vec::new()),
        });
        let server = BuildServer::new(config, backend.clone(), Arc::new(NullUploader));
        let slot = server.slot().clone();
        let listener = server.bind().unwrap();
        let handle = server.spawn(listener).unwrap();

        let descriptor = ExecutorDescriptor {
            name: name.to_string(),
            address: handle.local_addr().to_string(),
            token: TOKEN.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            enabled: true,
        };

        Self {
            descriptor,
            backend,
            slot,
            release,
            handle,
            _work: work,
        }
    }

    pub fn builds(&self) -> Vec<String> {
        self.backend.versions.lock().unwrap().clone()
    }
}

/// Upstream with scripted answers.
pub struct FakeUpstream {
    pub release: Mutex<Option<String>>,
    pub commit: Mutex<Option<String>>,
    pub remaining: AtomicU64,
    pub calls: AtomicUsize,
}

impl FakeUpstream {
    pub fn with_release(tag: &str) -> Self {
        Self {
            release: Mutex::new(Some(tag.to_string())),
            commit: Mutex::new(Some("ffffffffffffffffffffffffffffffffffffffff".to_string())),
            remaining: AtomicU64::new(5000),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_commit(sha: &str) -> Self {
        Self {
            release: Mutex::new(None),
            commit: Mutex::new(Some(sha.to_string())),
            remaining: AtomicU64::new(5000),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_release(&self, tag: &str) {
        *self.release.lock().unwrap() = Some(tag.to_string());
    }

    pub fn repo_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Upstream for FakeUpstream {
    fn rate_limit(&self) -> Result<RateLimit, UpstreamError> {
        Ok(RateLimit {
            remaining: self.remaining.load(Ordering::SeqCst),
            reset_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        })
    }

    fn latest_release(&self, _repo: &RepoRef) -> Result<Option<String>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.release.lock().unwrap().clone())
    }

    fn latest_commit(&self, _repo: &RepoRef) -> Result<Option<String>, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.commit.lock().unwrap().clone())
    }
}

/// Architecture flags of a record as a map.
pub fn flags(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
    pairs.iter().map(|(a, f)| (a.to_string(), *f)).collect()
}
