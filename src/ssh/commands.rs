use super::{
    AuthMethod, AuthRequest, CommandResult, ConnectRequest, ConnectionResult, SessionInfo,
};
use crate::config::HostProfile;
use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Credentials supplied at connect time, taking precedence over stored ones
#[derive(Debug, Clone, Default)]
pub struct CredentialOverrides {
    pub password: Option<String>,
    pub private_key: Option<String>,
    pub passphrase: Option<String>,
}

/// Connect with a full connection request. Failures are folded into the result.
pub async fn connect(state: &AppState, request: ConnectRequest) -> ConnectionResult {
    tracing::info!(
        "SSH connect request for {}@{}:{}",
        request.username,
        request.host,
        request.port
    );
    let host = request.host.clone();
    let profile_id = request.profile_id.clone();

    match state.sessions.connect(request).await {
        Ok(session_id) => {
            let connected_at = state
                .sessions
                .session_info(&session_id)
                .and_then(|info| info.connected_at);
            ConnectionResult::connected(session_id, host, connected_at, profile_id)
        }
        Err(e) => ConnectionResult::failed(host, e.user_message(), profile_id),
    }
}

/// Connect with a key the transport holds, referenced by id.
pub async fn connect_with_stored_key(
    state: &AppState,
    host: &str,
    port: u16,
    username: &str,
    key_id: &str,
) -> ConnectionResult {
    match state
        .sessions
        .connect_using_stored_key(host, port, username, key_id)
        .await
    {
        Ok(session_id) => {
            let connected_at = state
                .sessions
                .session_info(&session_id)
                .and_then(|info| info.connected_at);
            ConnectionResult::connected(session_id, host.to_string(), connected_at, None)
        }
        Err(e) => ConnectionResult::failed(host.to_string(), e.user_message(), None),
    }
}

/// Connect using a saved host profile, marking it used on success.
pub async fn connect_profile(
    state: &AppState,
    host_id: &str,
    overrides: CredentialOverrides,
) -> AppResult<ConnectionResult> {
    let profile = state
        .hosts
        .read()
        .get(host_id)
        .cloned()
        .ok_or_else(|| AppError::HostNotFound(host_id.to_string()))?;

    tracing::info!(
        "Connecting with saved profile {} ({}@{}:{})",
        profile.name,
        profile.username,
        profile.hostname,
        profile.port
    );

    let result = connect(state, profile_request(&profile, overrides)).await;
    if result.success {
        if let Err(e) = state.hosts.write().mark_used(host_id) {
            tracing::warn!("Failed to record last use of host {}: {}", host_id, e);
        }
    }
    Ok(result)
}

fn profile_request(profile: &HostProfile, overrides: CredentialOverrides) -> ConnectRequest {
    let auth = match profile.auth_method {
        AuthMethod::Password => AuthRequest::Password {
            password: overrides
                .password
                .or_else(|| profile.password.clone())
                .unwrap_or_default(),
        },
        AuthMethod::PrivateKey => AuthRequest::PrivateKey {
            private_key: overrides.private_key.or_else(|| profile.private_key.clone()),
            private_key_path: profile.private_key_path.clone(),
            passphrase: overrides.passphrase.or_else(|| profile.passphrase.clone()),
        },
        AuthMethod::Agent => AuthRequest::Agent,
    };

    ConnectRequest {
        host: profile.hostname.clone(),
        port: profile.port,
        username: profile.username.clone(),
        auth,
        compression: profile.compression.unwrap_or(false),
        strict_host_key_checking: profile.strict_host_key_checking,
        profile_id: Some(profile.id.clone()),
    }
}

/// Run one command. Failures are folded into the result.
pub async fn execute_command(state: &AppState, session_id: &str, command: &str) -> CommandResult {
    match state.sessions.execute_command(session_id, command).await {
        Ok(output) => CommandResult::ok(output),
        Err(e) => CommandResult::err(e.user_message()),
    }
}

pub async fn disconnect(state: &AppState, session_id: &str) -> AppResult<()> {
    state.sessions.disconnect(session_id).await
}

pub async fn is_connected(state: &AppState, session_id: &str) -> bool {
    state.sessions.is_connected(session_id).await
}

pub fn list_sessions(state: &AppState) -> Vec<SessionInfo> {
    state.sessions.list_sessions()
}

pub fn get_session(state: &AppState, session_id: &str) -> AppResult<SessionInfo> {
    state
        .sessions
        .session_info(session_id)
        .ok_or_else(|| AppError::NotConnected(session_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostDraft;
    use chrono::Utc;

    fn profile(auth_method: AuthMethod) -> HostProfile {
        let mut draft = HostDraft::new("box");
        draft.hostname = "10.0.0.5".to_string();
        draft.port = 2222;
        draft.username = "op".to_string();
        draft.auth_method = auth_method;
        draft.password = Some("stored".to_string());
        draft.private_key_path = Some("~/.ssh/id_ed25519".to_string());
        draft.strict_host_key_checking = Some(true);
        HostProfile::from_draft("h-1".to_string(), draft, Utc::now())
    }

    #[test]
    fn test_profile_request_uses_stored_password() {
        let request = profile_request(&profile(AuthMethod::Password), CredentialOverrides::default());
        assert_eq!(request.host, "10.0.0.5");
        assert_eq!(request.port, 2222);
        assert_eq!(request.profile_id.as_deref(), Some("h-1"));
        assert_eq!(request.strict_host_key_checking, Some(true));
        match request.auth {
            AuthRequest::Password { password } => assert_eq!(password, "stored"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_profile_request_overrides_win() {
        let overrides = CredentialOverrides {
            password: Some("typed".to_string()),
            ..Default::default()
        };
        let request = profile_request(&profile(AuthMethod::Password), overrides);
        match request.auth {
            AuthRequest::Password { password } => assert_eq!(password, "typed"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_profile_request_key_path() {
        let request =
            profile_request(&profile(AuthMethod::PrivateKey), CredentialOverrides::default());
        match request.auth {
            AuthRequest::PrivateKey {
                private_key,
                private_key_path,
                ..
            } => {
                assert!(private_key.is_none());
                assert_eq!(private_key_path.as_deref(), Some("~/.ssh/id_ed25519"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
