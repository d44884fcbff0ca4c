//! Artifact upload to the package repository.
//!
//! `POST {repo_url}/upload` as multipart form data with a single `file`
//! part, authenticated with a bearer token and naming the package in the
//! `Package` header.

use std::path::Path;

use reqwest::blocking::multipart::Form;
use reqwest::StatusCode;

/// Upload errors
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("Upload request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Repository rejected the upload token")]
    Forbidden,

    #[error("Repository does not know package '{0}'")]
    UnknownPackage(String),

    #[error("Repository answered HTTP {0}")]
    Status(u16),
}

/// Delivers a finished package to the repository.
pub trait ArtifactUploader: Send + Sync {
    fn upload(&self, repo_url: &str, package_id: &str, artifact: &Path) -> Result<(), UploadError>;
}

/// Uploader speaking the repository's HTTP API.
pub struct HttpUploader {
    client: reqwest::blocking::Client,
    token: String,
}

impl HttpUploader {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            token: token.into(),
        }
    }
}

impl ArtifactUploader for HttpUploader {
    fn upload(&self, repo_url: &str, package_id: &str, artifact: &Path) -> Result<(), UploadError> {
        let url = format!("{}/upload", repo_url.trim_end_matches('/'));
        let form = Form::new().file("file", artifact)?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.token)
            .header("Package", package_id)
            .multipart(form)
            .send()?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::FORBIDDEN => Err(UploadError::Forbidden),
            StatusCode::NOT_FOUND => Err(UploadError::UnknownPackage(package_id.to_string())),
            other => Err(UploadError::Status(other.as_u16())),
        }
    }
}
