use super::profiles::HostProfile;
use crate::error::AppResult;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const HOSTS_FILE_NAME: &str = "ssh-hosts.toml";

/// Persistence capability for the host registry. `save` always receives the
/// full collection.
pub trait HostStorage: Send + Sync {
    fn load(&self) -> AppResult<Vec<HostProfile>>;
    fn save(&self, hosts: &[HostProfile]) -> AppResult<()>;
}

/// Hosts file format
#[derive(Debug, Default, Serialize, Deserialize)]
struct HostsFile {
    #[serde(default)]
    hosts: Vec<HostProfile>,
}

/// TOML file store
#[derive(Debug, Clone)]
pub struct TomlFileStorage {
    path: PathBuf,
}

impl TomlFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(config_dir: &Path, file_name: &str) -> Self {
        Self::new(config_dir.join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HostStorage for TomlFileStorage {
    fn load(&self) -> AppResult<Vec<HostProfile>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let content = std::fs::read_to_string(&self.path)?;
        let file: HostsFile = toml::from_str(&content)?;
        Ok(file.hosts)
    }

    fn save(&self, hosts: &[HostProfile]) -> AppResult<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = HostsFile {
            hosts: hosts.to_vec(),
        };
        let content = toml::to_string_pretty(&file)?;

        // Write-then-rename so a crash never leaves a truncated snapshot
        let tmp_path = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;
        tracing::debug!("Saved {} host profiles to {:?}", hosts.len(), self.path);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    hosts: Vec<HostProfile>,
    saves: usize,
}

/// In-memory store. Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStorage {
    pub fn with_hosts(hosts: Vec<HostProfile>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryInner { hosts, saves: 0 })),
        }
    }

    pub fn snapshot(&self) -> Vec<HostProfile> {
        self.inner.lock().hosts.clone()
    }

    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.inner.lock().saves
    }
}

impl HostStorage for MemoryStorage {
    fn load(&self) -> AppResult<Vec<HostProfile>> {
        Ok(self.inner.lock().hosts.clone())
    }

    fn save(&self, hosts: &[HostProfile]) -> AppResult<()> {
        let mut inner = self.inner.lock();
        inner.hosts = hosts.to_vec();
        inner.saves += 1;
        Ok(())
    }
}
