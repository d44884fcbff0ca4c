//! Orchestrator configuration
//!
//! Loaded from `<root>/data/config.toml`:
//! - `[server]`: package tree, index location and dispatch timeouts
//! - `[github]`: upstream API access
//! - `[[routine]]`: periodic tasks
//! - `[[build_server]]`: the executor inventory
//!
//! Relative paths are resolved against the orchestrator root directory.

pub mod interval;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

pub use interval::{Interval, IntervalError};

use crate::host::ClientConfig;
use crate::inventory::{ExecutorDescriptor, ExecutorInventory, InventoryError};
use crate::routines::RoutineProcess;
use crate::update::DispatchConfig;

/// Default location of the orchestrator config, relative to the root.
pub const DEFAULT_CONFIG_PATH: &str = "data/config.toml";

/// Default location of the build server config, relative to the root.
pub const DEFAULT_BUILD_SERVER_CONFIG_PATH: &str = "data/buildserver.toml";

/// Default GitHub REST endpoint.
pub const DEFAULT_GITHUB_API: &str = "https://api.github.com";

/// Errors that can occur when loading the orchestrator configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("Duplicate routine name: '{0}'")]
    DuplicateRoutine(String),
}

/// `[server]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Root of the package descriptor tree
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Package index file
    #[serde(default = "default_index")]
    pub index: PathBuf,

    /// Upper bound on one architecture's build; unset waits forever
    #[serde(default)]
    pub build_timeout: Option<Interval>,

    /// TCP connect timeout towards build servers
    #[serde(default)]
    pub connect_timeout: Option<Interval>,

    /// Upload endpoint forwarded to build servers; unset uses their own
    #[serde(default)]
    pub repo_url: Option<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("packages")
}

fn default_index() -> PathBuf {
    PathBuf::from("data/index.json")
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index: default_index(),
            build_timeout: None,
            connect_timeout: None,
            repo_url: None,
        }
    }
}

/// `[github]` table
#[derive(Debug, Clone, Deserialize)]
pub struct GithubSection {
    /// Personal access token; anonymous requests when absent
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_api_url() -> String {
    DEFAULT_GITHUB_API.to_string()
}

impl Default for GithubSection {
    fn default() -> Self {
        Self {
            token: None,
            api_url: default_api_url(),
        }
    }
}

/// One `[[routine]]` entry
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutineEntry {
    pub name: String,
    pub process: RoutineProcess,
    pub every: Interval,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    github: GithubSection,
    #[serde(default, rename = "routine")]
    routines: Vec<RoutineEntry>,
    #[serde(default, rename = "build_server")]
    build_servers: Vec<ExecutorDescriptor>,
}

/// Validated orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub server: ServerSection,
    pub github: GithubSection,
    pub routines: Vec<RoutineEntry>,
    pub inventory: ExecutorInventory,
}

impl OrchestratorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;

        let mut names = HashSet::new();
        for routine in &file.routines {
            if !names.insert(routine.name.as_str()) {
                return Err(ConfigError::DuplicateRoutine(routine.name.clone()));
            }
        }

        Ok(Self {
            server: file.server,
            github: file.github,
            routines: file.routines,
            inventory: ExecutorInventory::new(file.build_servers)?,
        })
    }

    /// Package tree location under `root`.
    pub fn data_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.server.data_dir)
    }

    /// Index file location under `root`.
    pub fn index_path(&self, root: &Path) -> PathBuf {
        root.join(&self.server.index)
    }

    pub fn build_timeout(&self) -> Option<Duration> {
        self.server.build_timeout.map(Interval::as_duration)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.server.connect_timeout.map(Interval::as_duration)
    }

    /// Settings for dispatching builds to the inventory.
    pub fn dispatch(&self) -> DispatchConfig {
        let mut client = ClientConfig::default();
        if let Some(timeout) = self.connect_timeout() {
            client.connect_timeout = timeout;
        }
        DispatchConfig {
            client,
            build_timeout: self.build_timeout(),
            repo_url: self.server.repo_url.clone(),
        }
    }
}
