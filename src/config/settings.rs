use crate::error::AppResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::storage::HOSTS_FILE_NAME;

const CONFIG_FILE_NAME: &str = "config.toml";

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default)]
    pub ssh: SshSettings,
    #[serde(default)]
    pub sessions: SessionSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Seconds between keepalive probes; 0 disables them
    #[serde(default = "default_keepalive")]
    pub keepalive_interval: u32,
    /// Defaults to `~/.ssh/known_hosts`
    #[serde(default)]
    pub known_hosts_file: Option<PathBuf>,
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_keepalive() -> u32 {
    20
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            keepalive_interval: default_keepalive(),
            known_hosts_file: None,
        }
    }
}

impl SshSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn known_hosts_path(&self) -> Option<PathBuf> {
        self.known_hosts_file
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// How long a retired session stays queryable
    #[serde(default = "default_closed_grace")]
    pub closed_grace_secs: u64,
    /// Capacity of the transport event channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_closed_grace() -> u64 {
    300
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            closed_grace_secs: default_closed_grace(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl SessionSettings {
    pub fn closed_grace(&self) -> Duration {
        Duration::from_secs(self.closed_grace_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_hosts_file")]
    pub hosts_file: String,
}

fn default_hosts_file() -> String {
    HOSTS_FILE_NAME.to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            hosts_file: default_hosts_file(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directives; `RUST_LOG` wins when set
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default = "default_true")]
    pub redact_secrets: bool,
}

fn default_filter() -> String {
    "sshdeck=info,warn".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            redact_secrets: true,
        }
    }
}

impl AppSettings {
    pub fn load(config_dir: &Path) -> AppResult<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: AppSettings = toml::from_str(&content)?;
            Ok(settings)
        } else {
            let settings = AppSettings::default();
            settings.save(config_dir)?;
            Ok(settings)
        }
    }

    pub fn save(&self, config_dir: &Path) -> AppResult<()> {
        std::fs::create_dir_all(config_dir)?;
        let config_path = config_dir.join(CONFIG_FILE_NAME);
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_creates_default_file() {
        let dir = TempDir::new().unwrap();
        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.ssh.keepalive_interval, 20);
        assert_eq!(settings.sessions.closed_grace_secs, 300);
        assert_eq!(settings.storage.hosts_file, "ssh-hosts.toml");
        assert!(dir.path().join("config.toml").exists());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.toml"),
            "[ssh]\nconnect_timeout_secs = 5\n\n[logging]\nfilter = \"debug\"\n",
        )
        .unwrap();

        let settings = AppSettings::load(dir.path()).unwrap();
        assert_eq!(settings.ssh.connect_timeout(), Duration::from_secs(5));
        assert_eq!(settings.ssh.keepalive_interval, 20);
        assert_eq!(settings.logging.filter, "debug");
        assert!(settings.logging.redact_secrets);
        assert_eq!(settings.sessions.event_buffer, 1024);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let mut settings = AppSettings::default();
        settings.sessions.closed_grace_secs = 10;
        settings.ssh.known_hosts_file = Some(PathBuf::from("/tmp/known_hosts"));
        settings.save(dir.path()).unwrap();

        let loaded = AppSettings::load(dir.path()).unwrap();
        assert_eq!(loaded.sessions.closed_grace(), Duration::from_secs(10));
        assert_eq!(
            loaded.ssh.known_hosts_path(),
            Some(PathBuf::from("/tmp/known_hosts"))
        );
    }
}
