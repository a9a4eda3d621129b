use super::session::ConnectRequest;
use crate::error::AppError;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// The call failed but the connection may still be usable.
    Failed,
    /// The underlying connection is gone.
    ConnectionLost,
}

/// Tagged failure from a transport call
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Failed,
            message: message.into(),
        }
    }

    pub fn connection_lost(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::ConnectionLost,
            message: message.into(),
        }
    }

    pub fn is_connection_lost(&self) -> bool {
        self.kind == TransportErrorKind::ConnectionLost
    }
}

impl From<TransportError> for AppError {
    fn from(err: TransportError) -> Self {
        AppError::Transport(err.message)
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Events pushed by a transport, tagged by session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ShellOutput { session_id: String, output: String },
    ShellClosed { session_id: String },
    ConnectionClosed { session_id: String, reason: String },
}

impl TransportEvent {
    pub fn session_id(&self) -> &str {
        match self {
            TransportEvent::ShellOutput { session_id, .. }
            | TransportEvent::ShellClosed { session_id }
            | TransportEvent::ConnectionClosed { session_id, .. } => session_id,
        }
    }
}

/// Connection capability the session manager drives.
///
/// Session ids are chosen by the caller on `connect`; every other call refers
/// back to one of them. Implementations must be safe to call concurrently for
/// distinct ids.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, session_id: &str, request: &ConnectRequest) -> TransportResult<()>;

    async fn disconnect(&self, session_id: &str) -> TransportResult<()>;

    /// Run one command and return its combined output.
    async fn execute(&self, session_id: &str, command: &str) -> TransportResult<String>;

    /// `Ok(false)` when the peer has gone away cleanly.
    async fn probe(&self, session_id: &str) -> TransportResult<bool>;

    /// Begin streaming shell output as `TransportEvent::ShellOutput`.
    async fn start_shell(&self, session_id: &str) -> TransportResult<()>;

    async fn send_shell_input(&self, session_id: &str, input: &str) -> TransportResult<()>;

    async fn stop_shell(&self, session_id: &str) -> TransportResult<()>;

    /// Event source shared by all sessions of this transport.
    fn events(&self) -> broadcast::Sender<TransportEvent>;
}
