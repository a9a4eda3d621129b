use crate::config::{AppSettings, HostRegistry, HostStorage};
use crate::error::AppResult;
use crate::ssh::{SessionManager, Transport};
use parking_lot::RwLock;
use std::sync::Arc;

/// Global application state
pub struct AppState {
    pub settings: AppSettings,
    pub sessions: Arc<SessionManager>,
    pub hosts: Arc<RwLock<HostRegistry>>,
}

impl AppState {
    /// Wire the services together around the given transport and storage.
    pub fn new(
        settings: AppSettings,
        transport: Arc<dyn Transport>,
        storage: Box<dyn HostStorage>,
    ) -> AppResult<Self> {
        let hosts = HostRegistry::load(storage)?;
        let sessions = SessionManager::with_grace(transport, settings.sessions.closed_grace());

        Ok(Self {
            settings,
            sessions: Arc::new(sessions),
            hosts: Arc::new(RwLock::new(hosts)),
        })
    }
}
