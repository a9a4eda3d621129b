mod common;

use common::MockTransport;
use sshdeck::config::{self, AppSettings, HostDraft, MemoryStorage};
use sshdeck::ssh::commands::{self as ssh_commands, CredentialOverrides};
use sshdeck::ssh::{AuthMethod, TransportError};
use sshdeck::{AppError, AppState};
use std::sync::Arc;

fn app(transport: Arc<MockTransport>, storage: MemoryStorage) -> AppState {
    AppState::new(AppSettings::default(), transport, Box::new(storage)).unwrap()
}

fn password_host() -> HostDraft {
    let mut draft = HostDraft::new("box");
    draft.hostname = "10.0.0.5".to_string();
    draft.port = 2222;
    draft.username = "op".to_string();
    draft.auth_method = AuthMethod::Password;
    draft
}

#[tokio::test]
async fn test_connect_profile_marks_used() {
    let storage = MemoryStorage::default();
    let state = app(MockTransport::new(), storage.clone());
    let host_id = config::commands::add_host(&state, password_host()).unwrap();
    assert!(config::commands::get_host(&state, &host_id).unwrap().last_used.is_none());

    let overrides = CredentialOverrides {
        password: Some("hunter2".to_string()),
        ..Default::default()
    };
    let result = ssh_commands::connect_profile(&state, &host_id, overrides)
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(result.host, "10.0.0.5");
    assert_eq!(result.profile_id.as_deref(), Some(host_id.as_str()));
    assert!(result.connected_at.is_some());

    assert!(config::commands::get_host(&state, &host_id).unwrap().last_used.is_some());
    assert!(storage.snapshot()[0].last_used.is_some());

    let session_id = result.session_id.unwrap();
    let output = ssh_commands::execute_command(&state, &session_id, "hostname").await;
    assert!(output.success);
    assert_eq!(output.output.as_deref(), Some("ran: hostname"));

    let info = ssh_commands::get_session(&state, &session_id).unwrap();
    assert_eq!(info.profile_id.as_deref(), Some(host_id.as_str()));
    assert_eq!(info.auth_method, AuthMethod::Password);
}

#[tokio::test]
async fn test_connect_profile_unknown_host() {
    let state = app(MockTransport::new(), MemoryStorage::default());
    let err = ssh_commands::connect_profile(&state, "missing", CredentialOverrides::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::HostNotFound(_)));
}

#[tokio::test]
async fn test_failed_connect_is_folded_into_result() {
    let transport = MockTransport::new();
    transport.fail_connect(TransportError::failed("Authentication failed"));
    let storage = MemoryStorage::default();
    let state = app(transport, storage.clone());
    let host_id = config::commands::add_host(&state, password_host()).unwrap();
    let saves = storage.save_count();

    let result = ssh_commands::connect_profile(&state, &host_id, CredentialOverrides::default())
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.session_id.is_none());
    assert_eq!(result.error.as_deref(), Some("Authentication failed"));
    assert!(ssh_commands::list_sessions(&state).is_empty());
    // Failed attempts do not touch lastUsed
    assert_eq!(storage.save_count(), saves);
}

#[tokio::test]
async fn test_execute_on_unknown_session() {
    let state = app(MockTransport::new(), MemoryStorage::default());
    let result = ssh_commands::execute_command(&state, "gone", "ls").await;
    assert!(!result.success);
    assert!(result.output.is_none());
    assert_eq!(result.error.as_deref(), Some("Session is not connected"));
}

#[test]
fn test_import_then_export() {
    let storage = MemoryStorage::default();
    let state = app(MockTransport::new(), storage.clone());

    let imported = config::commands::import_ssh_config(
        &state,
        "Host box\n  HostName 10.0.0.5\n  Port 2222\n  User op\n  ForwardAgent yes\n\nHost jump\n  HostName jump.example.com\n",
    )
    .unwrap();
    assert_eq!(imported, 2);
    assert_eq!(storage.save_count(), 1);
    assert_eq!(storage.snapshot().len(), 2);

    let exported = config::commands::export_ssh_config(&state);
    assert!(exported.contains("Host box\n  HostName 10.0.0.5\n  Port 2222\n  User op"));
    assert!(exported.contains("  ForwardAgent yes"));
    assert!(exported.contains("Host jump\n  HostName jump.example.com"));

    let hosts = config::commands::list_hosts(&state);
    let copy_id = config::commands::duplicate_host(&state, &hosts[0].id).unwrap();
    assert!(config::commands::get_host(&state, &copy_id)
        .unwrap()
        .name
        .ends_with(" (Copy)"));

    config::commands::delete_host(&state, &copy_id).unwrap();
    assert!(matches!(
        config::commands::get_host(&state, &copy_id),
        Err(AppError::HostNotFound(_))
    ));
    assert!(config::commands::export_host(&state, &copy_id).is_empty());
}
