use super::{HostDraft, HostProfile, HostUpdate};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

// Host profile commands

pub fn list_hosts(state: &AppState) -> Vec<HostProfile> {
    state.hosts.read().sorted_hosts().into_iter().cloned().collect()
}

pub fn get_host(state: &AppState, id: &str) -> AppResult<HostProfile> {
    state
        .hosts
        .read()
        .get(id)
        .cloned()
        .ok_or_else(|| AppError::HostNotFound(id.to_string()))
}

pub fn add_host(state: &AppState, draft: HostDraft) -> AppResult<String> {
    state.hosts.write().add(draft)
}

pub fn update_host(state: &AppState, id: &str, update: HostUpdate) -> AppResult<()> {
    state.hosts.write().update(id, update)
}

pub fn delete_host(state: &AppState, id: &str) -> AppResult<()> {
    state.hosts.write().delete(id)
}

pub fn duplicate_host(state: &AppState, id: &str) -> AppResult<String> {
    state
        .hosts
        .write()
        .duplicate(id)?
        .ok_or_else(|| AppError::HostNotFound(id.to_string()))
}

// OpenSSH config commands

pub fn import_ssh_config(state: &AppState, content: &str) -> AppResult<usize> {
    state.hosts.write().import_config(content)
}

pub fn export_ssh_config(state: &AppState) -> String {
    state.hosts.read().export_all()
}

pub fn export_host(state: &AppState, id: &str) -> String {
    state.hosts.read().export_host(id)
}
