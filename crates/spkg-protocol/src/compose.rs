//! Compose descriptor model.
//!
//! A compose file (`compose.spkg`) is an INI-like document:
//!
//! ```text
//! [Meta]
//! Id = foo
//! Version = 1.9.0        // trailing comment
//! Source = https://github.com/acme/foo
//! ```
//!
//! The raw section map ([`ComposeData`]) is what travels on the wire; the
//! typed [`Descriptor`] is resolved from it once and selects the build
//! system and install format as closed enums.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// Section name → key → value.
pub type ComposeData = BTreeMap<String, BTreeMap<String, String>>;

/// Values starting with one of these are URLs, so `//` inside them is not a comment.
const URL_SCHEMES: &[&str] = &["http://", "https://", "ftp://", "file://", "ssh://", "sftp://"];

/// Placeholder in `[Prepare] URL` meaning "use `[Meta] Source`".
const SOURCE_PLACEHOLDER: &str = "%meta.source%";

/// Architecture values resolved to the building host's architecture.
const RUNTIME_ARCH: &[&str] = &["%runtime_arch%", "OnBuildSystem"];

/// Errors from reading or resolving a compose descriptor.
#[derive(Debug, thiserror::Error)]
pub enum ComposeError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: expected 'Key = Value', got '{content}'")]
    Syntax { line: usize, content: String },

    #[error("missing section [{0}]")]
    MissingSection(String),

    #[error("missing key '{key}' in section [{section}]")]
    MissingKey { section: String, key: String },

    #[error("key '{key}' in section [{section}] is empty")]
    EmptyValue { section: String, key: String },

    #[error("unsupported {field} '{value}'")]
    Unsupported { field: &'static str, value: String },

    #[error("payload is not a compose descriptor: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Parse compose text into its section map.
///
/// Lines before the first section header are ignored, as are blank lines
/// and lines starting with `//` or `#`.
pub fn parse_str(content: &str) -> Result<ComposeData, ComposeError> {
    let mut data = ComposeData::new();
    let mut section: Option<String> = None;

    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }

        if line.starts_with('[') && line.ends_with(']') {
            let name = line[1..line.len() - 1].trim().to_string();
            data.entry(name.clone()).or_default();
            section = Some(name);
            continue;
        }

        let Some(current) = section.as_ref() else {
            continue;
        };

        let (key, value) = line.split_once('=').ok_or_else(|| ComposeError::Syntax {
            line: index + 1,
            content: line.to_string(),
        })?;

        data.entry(current.clone())
            .or_default()
            .insert(key.trim().to_string(), strip_comment(value.trim()).trim().to_string());
    }

    Ok(data)
}

/// Read and parse a compose file.
pub fn parse_file(path: &Path) -> Result<ComposeData, ComposeError> {
    let content = std::fs::read_to_string(path)?;
    parse_str(&content)
}

fn strip_comment(value: &str) -> &str {
    if URL_SCHEMES.iter().any(|scheme| value.starts_with(scheme)) {
        return value;
    }
    match value.find("//") {
        Some(pos) => &value[..pos],
        None => value,
    }
}

/// Identity of a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub name: String,
    pub id: String,
    pub version: String,
    pub description: String,
    pub architecture: String,
    pub author: String,
    pub source: String,
}

/// How sources are obtained before building.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrepareKind {
    /// `git clone` the URL.
    Git,
    /// Download and extract a source archive.
    Archive,
    /// Download and extract prebuilt binaries; no build command runs.
    #[serde(rename = "binaryarchive")]
    BinaryArchive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub kind: PrepareKind,
    /// Resolved URL (the source placeholder is already substituted).
    pub url: String,
    pub branch: Option<String>,
}

/// Build system selected by `[Build] BuildSys`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "system", rename_all = "lowercase")]
pub enum BuildSystem {
    Cargo { exec: String },
    Any { exec: String },
    None,
}

impl BuildSystem {
    /// Shell command to run, if any.
    pub fn command(&self) -> Option<&str> {
        match self {
            Self::Cargo { exec } | Self::Any { exec } => Some(exec),
            Self::None => None,
        }
    }
}

/// Package format selected by `[Install] As`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum InstallFormat {
    Binpkg { prefix: String, target: String },
    Deb { prefix: String, target: String },
}

impl InstallFormat {
    pub fn prefix(&self) -> &str {
        match self {
            Self::Binpkg { prefix, .. } | Self::Deb { prefix, .. } => prefix,
        }
    }

    pub fn target(&self) -> &str {
        match self {
            Self::Binpkg { target, .. } | Self::Deb { target, .. } => target,
        }
    }
}

/// A fully resolved compose descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    pub meta: Meta,
    pub prepare: Prepare,
    pub build_system: BuildSystem,
    /// Directory (relative to the work dir) the build command runs in.
    pub workdir: String,
    pub install: InstallFormat,
}

impl Descriptor {
    /// Resolve a descriptor from its section map.
    pub fn from_data(data: &ComposeData) -> Result<Self, ComposeError> {
        let section = Sections(data);

        let meta = Meta {
            name: section.required("Meta", "Name")?,
            id: section.non_empty("Meta", "Id")?,
            version: section.non_empty("Meta", "Version")?,
            description: section.optional("Meta", "Description").unwrap_or_default(),
            architecture: section
                .optional("Meta", "Architecture")
                .unwrap_or_else(|| RUNTIME_ARCH[0].to_string()),
            author: section.optional("Meta", "Author").unwrap_or_default(),
            source: section.required("Meta", "Source")?,
        };

        let prepare_type = section.required("Prepare", "Type")?;
        let kind = match prepare_type.to_lowercase().as_str() {
            "git" => PrepareKind::Git,
            "archive" => PrepareKind::Archive,
            "binaryarchive" => PrepareKind::BinaryArchive,
            _ => {
                return Err(ComposeError::Unsupported { field: "prepare type", value: prepare_type })
            }
        };
        let url = match section.optional("Prepare", "URL") {
            Some(url) if url != SOURCE_PLACEHOLDER => url,
            _ => meta.source.clone(),
        };
        let prepare = Prepare {
            kind,
            url,
            branch: section.optional("Prepare", "Branch").filter(|b| !b.is_empty()),
        };

        let build_sys = section.required("Build", "BuildSys")?;
        let build_system = match build_sys.as_str() {
            "cargo" => BuildSystem::Cargo { exec: section.required("Build.cargo", "Exec")? },
            "any" => BuildSystem::Any { exec: section.required("Build.any", "Exec")? },
            "none" => BuildSystem::None,
            _ => {
                return Err(ComposeError::Unsupported { field: "build system", value: build_sys })
            }
        };
        let workdir = section.optional("Build", "Workdir").unwrap_or_else(|| ".".to_string());

        let install_as = section.required("Install", "As")?;
        let install = match install_as.as_str() {
            "binpkg" => InstallFormat::Binpkg {
                prefix: section.required("Install.binpkg", "Prefix")?,
                target: section.required("Install.binpkg", "Target")?,
            },
            "deb" => InstallFormat::Deb {
                prefix: section.required("Install.deb", "Prefix")?,
                target: section.required("Install.deb", "Target")?,
            },
            _ => {
                return Err(ComposeError::Unsupported { field: "install format", value: install_as })
            }
        };

        Ok(Self { meta, prepare, build_system, workdir, install })
    }

    /// Validate an untyped wire payload, returning both representations.
    pub fn from_value(value: &serde_json::Value) -> Result<(ComposeData, Self), ComposeError> {
        let data: ComposeData = serde_json::from_value(value.clone())?;
        let descriptor = Self::from_data(&data)?;
        Ok((data, descriptor))
    }

    /// Read a compose file, returning both representations.
    pub fn load(path: &Path) -> Result<(ComposeData, Self), ComposeError> {
        let data = parse_file(path)?;
        let descriptor = Self::from_data(&data)?;
        Ok((data, descriptor))
    }

    /// Architecture this package is built for on a host of `host_arch`.
    pub fn target_architecture(&self, host_arch: &str) -> String {
        if RUNTIME_ARCH.contains(&self.meta.architecture.as_str()) {
            host_arch.to_string()
        } else {
            self.meta.architecture.clone()
        }
    }
}

struct Sections<'a>(&'a ComposeData);

impl Sections<'_> {
    fn optional(&self, section: &str, key: &str) -> Option<String> {
        self.0.get(section).and_then(|s| s.get(key)).cloned()
    }

    fn required(&self, section: &str, key: &str) -> Result<String, ComposeError> {
        let entries = self
            .0
            .get(section)
            .ok_or_else(|| ComposeError::MissingSection(section.to_string()))?;
        entries.get(key).cloned().ok_or_else(|| ComposeError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        })
    }

    fn non_empty(&self, section: &str, key: &str) -> Result<String, ComposeError> {
        let value = self.required(section, key)?;
        if value.trim().is_empty() {
            return Err(ComposeError::EmptyValue {
                section: section.to_string(),
                key: key.to_string(),
            });
        }
        Ok(value)
    }
}
