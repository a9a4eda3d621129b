pub mod config;
pub mod error;
pub mod logging;
pub mod ssh;
pub mod state;

pub use error::{AppError, AppResult};
pub use state::AppState;

use config::{AppSettings, TomlFileStorage};
use ssh::Ssh2Transport;
use std::path::Path;
use std::sync::Arc;

/// Build the application state on the libssh2 transport, with logging
/// initialised and transport events being applied.
///
/// Must be called from within a Tokio runtime.
pub fn create_app(config_dir: &Path) -> AppResult<AppState> {
    std::fs::create_dir_all(config_dir)?;

    let settings = AppSettings::load(config_dir)?;
    logging::init(&settings.logging);
    tracing::debug!("sshdeck config dir: {:?}", config_dir);

    let transport = Arc::new(Ssh2Transport::new(
        &settings.ssh,
        settings.sessions.event_buffer,
    ));
    let storage = TomlFileStorage::in_dir(config_dir, &settings.storage.hosts_file);
    let state = AppState::new(settings, transport, Box::new(storage))?;
    state.sessions.watch_transport_events();

    tracing::debug!(
        "sshdeck initialized with {} host profiles",
        state.hosts.read().hosts().len()
    );
    Ok(state)
}
