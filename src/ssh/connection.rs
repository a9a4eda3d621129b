use serde::{Deserialize, Serialize};

/// Connection result with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionResult {
    pub success: bool,
    pub session_id: Option<String>,
    pub host: String,
    pub connected_at: Option<i64>,
    pub error: Option<String>,
    /// Host profile the connection was made from
    pub profile_id: Option<String>,
}

impl ConnectionResult {
    pub fn connected(
        session_id: String,
        host: String,
        connected_at: Option<i64>,
        profile_id: Option<String>,
    ) -> Self {
        Self {
            success: true,
            session_id: Some(session_id),
            host,
            connected_at,
            error: None,
            profile_id,
        }
    }

    pub fn failed(host: String, error: String, profile_id: Option<String>) -> Self {
        Self {
            success: false,
            session_id: None,
            host,
            connected_at: None,
            error: Some(error),
            profile_id,
        }
    }
}

/// One-shot command result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub success: bool,
    pub output: Option<String>,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(output: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn err(error: String) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
        }
    }
}
