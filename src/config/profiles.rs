use super::ssh_config::{decode_hosts, encode_host, encode_hosts};
use super::storage::HostStorage;
use crate::error::AppResult;
use crate::ssh::AuthMethod;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::cmp::Reverse;
use uuid::Uuid;

const RECENT_LIMIT: usize = 5;

fn default_port() -> u16 {
    22
}

/// `LocalForward <local_port> <remote_host>:<remote_port>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalForward {
    pub local_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
}

/// `RemoteForward <remote_port> <local_host>:<local_port>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteForward {
    pub remote_port: u16,
    pub local_host: String,
    pub local_port: u16,
}

/// Saved connection template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostProfile {
    pub id: String,
    pub name: String,
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward_agent: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_host_key_checking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_jump: Option<String>,
    #[serde(default)]
    pub local_forwards: Vec<LocalForward>,
    #[serde(default)]
    pub remote_forwards: Vec<RemoteForward>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HostProfile {
    pub fn from_draft(id: String, draft: HostDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            name: draft.name,
            hostname: draft.hostname,
            port: draft.port,
            username: draft.username,
            auth_method: draft.auth_method,
            password: draft.password,
            private_key: draft.private_key,
            private_key_path: draft.private_key_path,
            passphrase: draft.passphrase,
            description: draft.description,
            tags: draft.tags,
            forward_agent: draft.forward_agent,
            compression: draft.compression,
            keep_alive: draft.keep_alive,
            strict_host_key_checking: draft.strict_host_key_checking,
            proxy_jump: draft.proxy_jump,
            local_forwards: draft.local_forwards,
            remote_forwards: draft.remote_forwards,
            last_used: draft.last_used,
            created_at: now,
            updated_at: now,
        }
    }

    /// Everything except identity and timestamps.
    pub fn to_draft(&self) -> HostDraft {
        HostDraft {
            name: self.name.clone(),
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
            auth_method: self.auth_method,
            password: self.password.clone(),
            private_key: self.private_key.clone(),
            private_key_path: self.private_key_path.clone(),
            passphrase: self.passphrase.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            forward_agent: self.forward_agent,
            compression: self.compression,
            keep_alive: self.keep_alive,
            strict_host_key_checking: self.strict_host_key_checking,
            proxy_jump: self.proxy_jump.clone(),
            local_forwards: self.local_forwards.clone(),
            remote_forwards: self.remote_forwards.clone(),
            last_used: self.last_used,
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// A host profile that has not been added yet (no id, no timestamps)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostDraft {
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub private_key: Option<String>,
    #[serde(default)]
    pub private_key_path: Option<String>,
    #[serde(default)]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub forward_agent: Option<bool>,
    #[serde(default)]
    pub compression: Option<bool>,
    #[serde(default)]
    pub keep_alive: Option<bool>,
    #[serde(default)]
    pub strict_host_key_checking: Option<bool>,
    #[serde(default)]
    pub proxy_jump: Option<String>,
    #[serde(default)]
    pub local_forwards: Vec<LocalForward>,
    #[serde(default)]
    pub remote_forwards: Vec<RemoteForward>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

impl HostDraft {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

impl Default for HostDraft {
    fn default() -> Self {
        Self {
            name: String::new(),
            hostname: String::new(),
            port: default_port(),
            username: String::new(),
            auth_method: AuthMethod::default(),
            password: None,
            private_key: None,
            private_key_path: None,
            passphrase: None,
            description: None,
            tags: vec![],
            forward_agent: None,
            compression: None,
            keep_alive: None,
            strict_host_key_checking: None,
            proxy_jump: None,
            local_forwards: vec![],
            remote_forwards: vec![],
            last_used: None,
        }
    }
}

/// Partial update. Core fields fall back to the current value when omitted;
/// optional fields distinguish omitted (`None`) from explicit null (`Some(None)`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostUpdate {
    pub name: Option<String>,
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub auth_method: Option<AuthMethod>,
    #[serde(default, deserialize_with = "double_option")]
    pub password: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub private_key: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub private_key_path: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub passphrase: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub description: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub forward_agent: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option")]
    pub compression: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option")]
    pub keep_alive: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option")]
    pub strict_host_key_checking: Option<Option<bool>>,
    #[serde(default, deserialize_with = "double_option")]
    pub proxy_jump: Option<Option<String>>,
    pub local_forwards: Option<Vec<LocalForward>>,
    pub remote_forwards: Option<Vec<RemoteForward>>,
    #[serde(default, deserialize_with = "double_option")]
    pub last_used: Option<Option<DateTime<Utc>>>,
}

// A present key (even `null`) becomes `Some(..)`; a missing key stays `None` via `default`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn merge<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

impl HostUpdate {
    fn apply_to(self, host: &mut HostProfile) {
        merge(&mut host.name, self.name);
        merge(&mut host.hostname, self.hostname);
        merge(&mut host.port, self.port);
        merge(&mut host.username, self.username);
        merge(&mut host.auth_method, self.auth_method);
        merge(&mut host.password, self.password);
        merge(&mut host.private_key, self.private_key);
        merge(&mut host.private_key_path, self.private_key_path);
        merge(&mut host.passphrase, self.passphrase);
        merge(&mut host.description, self.description);
        merge(&mut host.tags, self.tags);
        merge(&mut host.forward_agent, self.forward_agent);
        merge(&mut host.compression, self.compression);
        merge(&mut host.keep_alive, self.keep_alive);
        merge(&mut host.strict_host_key_checking, self.strict_host_key_checking);
        merge(&mut host.proxy_jump, self.proxy_jump);
        merge(&mut host.local_forwards, self.local_forwards);
        merge(&mut host.remote_forwards, self.remote_forwards);
        merge(&mut host.last_used, self.last_used);
    }
}

/// Now, or just past `previous` when the clock has not moved.
fn next_timestamp(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + chrono::Duration::microseconds(1)
    }
}

/// Host registry: ordered profile collection persisted as a whole snapshot
pub struct HostRegistry {
    hosts: Vec<HostProfile>,
    storage: Box<dyn HostStorage>,
}

impl HostRegistry {
    pub fn load(storage: Box<dyn HostStorage>) -> AppResult<Self> {
        let hosts = storage.load()?;
        tracing::debug!("Loaded {} host profiles", hosts.len());
        Ok(Self { hosts, storage })
    }

    /// Save the current collection, restoring `previous` if the write fails.
    fn commit(&mut self, previous: Vec<HostProfile>) -> AppResult<()> {
        if let Err(e) = self.storage.save(&self.hosts) {
            tracing::warn!("Host profile save failed, change rolled back: {}", e);
            self.hosts = previous;
            return Err(e);
        }
        Ok(())
    }

    pub fn hosts(&self) -> &[HostProfile] {
        &self.hosts
    }

    pub fn get(&self, id: &str) -> Option<&HostProfile> {
        self.hosts.iter().find(|h| h.id == id)
    }

    fn insert_draft(&mut self, draft: HostDraft) -> String {
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if self.get(&candidate).is_none() {
                break candidate;
            }
        };
        self.hosts
            .push(HostProfile::from_draft(id.clone(), draft, Utc::now()));
        id
    }

    pub fn add(&mut self, draft: HostDraft) -> AppResult<String> {
        let previous = self.hosts.clone();
        let id = self.insert_draft(draft);
        self.commit(previous)?;
        tracing::info!("Added host profile {}", id);
        Ok(id)
    }

    /// Merge `update` into the profile. Unknown ids are a no-op.
    pub fn update(&mut self, id: &str, update: HostUpdate) -> AppResult<()> {
        let Some(index) = self.hosts.iter().position(|h| h.id == id) else {
            return Ok(());
        };
        let previous = self.hosts.clone();
        let host = &mut self.hosts[index];
        update.apply_to(host);
        host.updated_at = next_timestamp(host.updated_at);
        self.commit(previous)
    }

    pub fn delete(&mut self, id: &str) -> AppResult<()> {
        let previous = self.hosts.clone();
        self.hosts.retain(|h| h.id != id);
        if self.hosts.len() == previous.len() {
            return Ok(());
        }
        self.commit(previous)?;
        tracing::info!("Deleted host profile {}", id);
        Ok(())
    }

    pub fn mark_used(&mut self, id: &str) -> AppResult<()> {
        self.update(
            id,
            HostUpdate {
                last_used: Some(Some(Utc::now())),
                ..Default::default()
            },
        )
    }

    /// Copy a profile under `"<name> (Copy)"`. Returns `None` if `id` is unknown.
    pub fn duplicate(&mut self, id: &str) -> AppResult<Option<String>> {
        let Some(source) = self.get(id) else {
            return Ok(None);
        };
        let mut draft = source.to_draft();
        draft.name = format!("{} (Copy)", source.name);
        draft.last_used = None;
        self.add(draft).map(Some)
    }

    /// Used profiles first (most recent first), then the rest by creation, newest first.
    pub fn sorted_hosts(&self) -> Vec<&HostProfile> {
        let mut hosts: Vec<&HostProfile> = self.hosts.iter().collect();
        hosts.sort_by_key(|h| match h.last_used {
            Some(used) => (0, Reverse(used)),
            None => (1, Reverse(h.created_at)),
        });
        hosts
    }

    pub fn recent_hosts(&self) -> Vec<&HostProfile> {
        let mut used: Vec<&HostProfile> =
            self.hosts.iter().filter(|h| h.last_used.is_some()).collect();
        used.sort_by_key(|h| Reverse(h.last_used));
        used.truncate(RECENT_LIMIT);
        used
    }

    pub fn hosts_by_tag(&self, tag: &str) -> Vec<&HostProfile> {
        self.hosts.iter().filter(|h| h.has_tag(tag)).collect()
    }

    /// Add every stanza found in `content`; returns how many were added.
    pub fn import_config(&mut self, content: &str) -> AppResult<usize> {
        let drafts = decode_hosts(content);
        let count = drafts.len();
        if count == 0 {
            return Ok(0);
        }
        let previous = self.hosts.clone();
        for draft in drafts {
            self.insert_draft(draft);
        }
        self.commit(previous)?;
        tracing::info!("Imported {} host profiles", count);
        Ok(count)
    }

    /// Stanza for one profile, or an empty string if `id` is unknown.
    pub fn export_host(&self, id: &str) -> String {
        self.get(id).map(encode_host).unwrap_or_default()
    }

    pub fn export_all(&self) -> String {
        encode_hosts(&self.hosts)
    }
}
