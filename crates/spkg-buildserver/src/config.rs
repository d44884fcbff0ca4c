//! Build server configuration.
//!
//! Read from a TOML file with a single `[server]` table. A missing file is
//! replaced by a default one carrying a freshly generated token so the
//! operator only has to adjust it.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix of generated tokens.
const TOKEN_PREFIX: &str = "sf_spc_";

/// Length of the random part of a generated token.
const TOKEN_LENGTH: usize = 32;

/// Build server configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildServerConfig {
    /// Human-readable server name.
    pub name: String,
    /// Architecture/platform labels this server builds for.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Listen address.
    pub address: String,
    /// Listen port.
    pub port: u16,
    /// Shared token clients must present.
    pub token: String,
    /// Base URL of the repository upload endpoint.
    pub repo_url: String,
    /// Bearer token for uploads (defaults to `token`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_token: Option<String>,
    /// Root for per-build working directories.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("_work")
}

impl Default for BuildServerConfig {
    fn default() -> Self {
        Self {
            name: "Local Computer".to_string(),
            tags: vec!["x86_64".to_string(), "linux".to_string()],
            address: "127.0.0.1".to_string(),
            port: spkg_protocol::DEFAULT_PORT,
            token: String::new(),
            repo_url: "http://localhost:3087".to_string(),
            repo_token: None,
            work_dir: default_work_dir(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    server: BuildServerConfig,
}

/// Errors from loading the build server configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to write default config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: '{field}' {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Result of [`BuildServerConfig::load_or_init`].
#[derive(Debug)]
pub enum LoadOutcome {
    /// An existing file was loaded.
    Loaded(BuildServerConfig),
    /// No file existed; a default one was written at this path.
    Created(PathBuf),
}

impl BuildServerConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content)?;
        file.server.validate()?;
        Ok(file.server)
    }

    /// Load the file at `path`, or write a default one if it does not exist.
    pub fn load_or_init(path: &Path) -> Result<LoadOutcome, ConfigError> {
        if path.exists() {
            return Self::load(path).map(LoadOutcome::Loaded);
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let config = Self {
            token: generate_token(),
            ..Self::default()
        };
        let content = toml::to_string_pretty(&ConfigFile { server: config })?;
        fs::write(path, content)?;
        Ok(LoadOutcome::Created(path.to_path_buf()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_empty() {
            return Err(ConfigError::Invalid {
                field: "token",
                reason: "must not be empty".to_string(),
            });
        }
        if self.address.is_empty() {
            return Err(ConfigError::Invalid {
                field: "address",
                reason: "must not be empty".to_string(),
            });
        }
        if self.repo_url.is_empty() {
            return Err(ConfigError::Invalid {
                field: "repo_url",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// `address:port` to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// Token used for artifact uploads.
    pub fn upload_token(&self) -> &str {
        self.repo_token.as_deref().unwrap_or(&self.token)
    }
}

/// Generate a new `sf_spc_` token with 32 random alphanumerics.
pub fn generate_token() -> String {
    let random: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect();
    format!("{}{}", TOKEN_PREFIX, random)
}
