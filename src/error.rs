use serde::Serialize;
use thiserror::Error;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// The transport rejected or failed a connect/command/shell call.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The session id is unknown, retired, or in the wrong state for the call.
    #[error("Not connected: {0}")]
    NotConnected(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl AppError {
    /// True for errors caused by calling into a session that cannot take the call.
    pub fn is_not_connected(&self) -> bool {
        matches!(self, AppError::NotConnected(_))
    }

    /// Message without the variant prefix, as shown to UI-level callers.
    pub fn user_message(&self) -> String {
        SerializableError::from(self).message
    }
}

/// Serializable error for UI-level callers
#[derive(Debug, Serialize)]
pub struct SerializableError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<&AppError> for SerializableError {
    fn from(err: &AppError) -> Self {
        let (code, message, details) = match err {
            AppError::Transport(msg) => ("TRANSPORT_ERROR", msg.clone(), None),
            AppError::NotConnected(id) => (
                "NOT_CONNECTED",
                "Session is not connected".to_string(),
                Some(id.clone()),
            ),
            AppError::HostNotFound(id) => ("HOST_NOT_FOUND", format!("Host {} not found", id), None),
            AppError::Config(msg) => ("CONFIG_ERROR", msg.clone(), None),
            AppError::Io(e) => ("IO_ERROR", e.to_string(), None),
            AppError::Serialization(msg) => ("SERIALIZATION_ERROR", msg.clone(), None),
            AppError::Unknown(msg) => ("UNKNOWN_ERROR", msg.clone(), None),
        };

        SerializableError {
            code: code.to_string(),
            message,
            details,
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        SerializableError::from(self).serialize(serializer)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AppError {
    fn from(err: toml::ser::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Unknown(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Unknown(format!("background task failed: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;
