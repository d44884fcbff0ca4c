//! Client → build server messages.

use serde::{Deserialize, Serialize};

use crate::compose::ComposeData;

/// Request envelope, tagged by its `event` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Request {
    /// Present the shared token. Must be the first message of a session.
    Auth { token: String },
    /// Ask whether a build could start right now.
    RequestSlot,
    /// Build the package described by `data`.
    ///
    /// `data` stays untyped on the wire so that a structurally wrong
    /// descriptor can be answered with `failed` instead of tearing down
    /// the session.
    UpdatePkg {
        data: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        repo_url: Option<String>,
    },
    /// End the session. Valid in any state.
    Disconnect,
}

impl Request {
    /// Build an `update_pkg` request from parsed compose data.
    pub fn update_pkg(data: &ComposeData, repo_url: Option<String>) -> Self {
        let data = serde_json::to_value(data).unwrap_or(serde_json::Value::Null);
        Self::UpdatePkg { data, repo_url }
    }

    /// Wire name of the event, for logging.
    pub fn event(&self) -> &'static str {
        match self {
            Self::Auth { .. } => "auth",
            Self::RequestSlot => "request_slot",
            Self::UpdatePkg { .. } => "update_pkg",
            Self::Disconnect => "disconnect",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_wire_shape() {
        let value = serde_json::to_value(Request::Auth { token: "abc".to_string() }).unwrap();
        assert_eq!(value, json!({ "event": "auth", "token": "abc" }));
    }

    #[test]
    fn test_update_pkg_without_repo_url() {
        let request: Request =
            serde_json::from_value(json!({ "event": "update_pkg", "data": { "Meta": {} } })).unwrap();
        match request {
            Request::UpdatePkg { data, repo_url } => {
                assert!(data.get("Meta").is_some());
                assert!(repo_url.is_none());
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_update_pkg_omits_missing_repo_url() {
        let mut data = ComposeData::new();
        data.entry("Meta".to_string())
            .or_default()
            .insert("Id".to_string(), "foo".to_string());

        let value = serde_json::to_value(Request::update_pkg(&data, None)).unwrap();
        assert_eq!(value["data"]["Meta"]["Id"], "foo");
        assert!(value.get("repo_url").is_none());
    }
}
