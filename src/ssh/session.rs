use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

fn default_port() -> u16 {
    22
}

/// Authentication method
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuthMethod {
    Password,
    #[default]
    PrivateKey,
    Agent,
}

/// Connect request from UI-level code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    pub auth: AuthRequest,
    #[serde(default)]
    pub compression: bool,
    /// `Some(true)` makes the transport refuse hosts missing from known_hosts.
    #[serde(default)]
    pub strict_host_key_checking: Option<bool>,
    /// Host profile this request was built from, if any
    #[serde(default)]
    pub profile_id: Option<String>,
}

impl ConnectRequest {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>, auth: AuthRequest) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            auth,
            compression: false,
            strict_host_key_checking: None,
            profile_id: None,
        }
    }
}

/// Credential material for a connect request
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum AuthRequest {
    Password {
        password: String,
    },
    PrivateKey {
        #[serde(default)]
        private_key: Option<String>,
        #[serde(default)]
        private_key_path: Option<String>,
        #[serde(default)]
        passphrase: Option<String>,
    },
    Agent,
    /// A hardware-backed key held by the transport, referenced by id
    StoredKey {
        key_id: String,
    },
}

impl AuthRequest {
    pub fn method(&self) -> AuthMethod {
        match self {
            AuthRequest::Password { .. } => AuthMethod::Password,
            AuthRequest::PrivateKey { .. } | AuthRequest::StoredKey { .. } => AuthMethod::PrivateKey,
            AuthRequest::Agent => AuthMethod::Agent,
        }
    }
}

// SECURITY: never print credential material
impl fmt::Debug for AuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthRequest::Password { .. } => f.write_str("Password { .. }"),
            AuthRequest::PrivateKey {
                private_key_path, ..
            } => f
                .debug_struct("PrivateKey")
                .field("private_key_path", private_key_path)
                .finish_non_exhaustive(),
            AuthRequest::Agent => f.write_str("Agent"),
            AuthRequest::StoredKey { key_id } => {
                f.debug_struct("StoredKey").field("key_id", key_id).finish()
            }
        }
    }
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Connecting,
    Connected,
    ShellActive,
    Disconnected,
    Failed,
}

impl SessionState {
    /// States in which the session id is still valid for lookup.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Connected | SessionState::ShellActive
        )
    }

    pub fn accepts_commands(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::ShellActive)
    }
}

/// Session info for listing and diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    pub state: SessionState,
    pub profile_id: Option<String>,
    pub connected_at: Option<i64>,
    pub last_error: Option<String>,
}

/// Where a session points, minus credentials
#[derive(Debug, Clone)]
pub struct SessionTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth_method: AuthMethod,
    pub profile_id: Option<String>,
}

impl From<&ConnectRequest> for SessionTarget {
    fn from(request: &ConnectRequest) -> Self {
        Self {
            host: request.host.clone(),
            port: request.port,
            username: request.username.clone(),
            auth_method: request.auth.method(),
            profile_id: request.profile_id.clone(),
        }
    }
}

/// Internal session handle tracked by the session manager
pub struct SessionHandle {
    pub id: String,
    pub target: SessionTarget,
    state: RwLock<SessionState>,
    last_error: RwLock<Option<String>>,
    connected_at: RwLock<Option<i64>>,
    // Held for the duration of every state-mutating operation on this session
    op_lock: Arc<Mutex<()>>,
}

impl SessionHandle {
    pub fn new(id: String, target: SessionTarget) -> Self {
        Self {
            id,
            target,
            state: RwLock::new(SessionState::Connecting),
            last_error: RwLock::new(None),
            connected_at: RwLock::new(None),
            op_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            host: self.target.host.clone(),
            port: self.target.port,
            username: self.target.username.clone(),
            auth_method: self.target.auth_method,
            state: *self.state.read(),
            profile_id: self.target.profile_id.clone(),
            connected_at: *self.connected_at.read(),
            last_error: self.last_error.read().clone(),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn set_state(&self, state: SessionState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            tracing::debug!("Session {} state {:?} -> {:?}", self.id, previous, state);
        }
    }

    pub fn set_last_error(&self, message: impl Into<String>) {
        *self.last_error.write() = Some(message.into());
    }

    pub fn mark_connected(&self) {
        *self.connected_at.write() = Some(chrono::Utc::now().timestamp());
        self.set_state(SessionState::Connected);
    }

    /// Move to a terminal state, recording why.
    pub fn finish(&self, state: SessionState, error: Option<String>) {
        if let Some(error) = error {
            self.set_last_error(error);
        }
        self.set_state(state);
    }

    /// Serialize against every other state-mutating operation on this session.
    pub async fn lock(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.op_lock).lock_owned().await
    }
}
