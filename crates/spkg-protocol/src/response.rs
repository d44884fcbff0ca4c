//! Build server → client messages.

use serde::{Deserialize, Serialize};

/// Reply envelope, tagged by its `response` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    /// Token accepted.
    #[serde(rename = "ok")]
    Authenticated { version: String, architecture: String },
    /// Token rejected; the server closes the connection after sending this.
    InvalidToken,
    /// No build in progress.
    Free,
    /// A build is in progress.
    Full,
    /// The descriptor was valid and the build has started.
    Accept,
    /// Build finished and the artifact was uploaded.
    Success { package_file: String },
    /// Build was refused or did not complete.
    Failed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl Response {
    /// A `failed` reply carrying a reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed { reason: Some(reason.into()) }
    }

    /// Wire name of the response, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "ok",
            Self::InvalidToken => "invalid_token",
            Self::Free => "free",
            Self::Full => "full",
            Self::Accept => "accept",
            Self::Success { .. } => "success",
            Self::Failed { .. } => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_authenticated_is_ok_on_the_wire() {
        let value = serde_json::to_value(Response::Authenticated {
            version: "0.1.0".to_string(),
            architecture: "x86_64".to_string(),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({ "response": "ok", "version": "0.1.0", "architecture": "x86_64" })
        );
    }

    #[test]
    fn test_bare_failed_parses() {
        let response: Response = serde_json::from_value(json!({ "response": "failed" })).unwrap();
        assert_eq!(response, Response::Failed { reason: None });
    }

    #[test]
    fn test_success_requires_package_file() {
        let result: Result<Response, _> = serde_json::from_value(json!({ "response": "success" }));
        assert!(result.is_err());
    }
}
