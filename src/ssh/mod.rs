pub mod bridge;
pub mod commands;
pub mod connection;
pub mod libssh2;
pub mod session;
pub mod transport;

pub use bridge::{ShellBridge, ShellOutputCallback, ShellSubscription};
pub use connection::{CommandResult, ConnectionResult};
pub use libssh2::Ssh2Transport;
pub use session::*;
pub use transport::{Transport, TransportError, TransportErrorKind, TransportEvent};

use crate::error::{AppError, AppResult};
use crate::logging::sanitize;
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use uuid::Uuid;

// States in which commands may be issued
const ATTACHED: &[SessionState] = &[SessionState::Connected, SessionState::ShellActive];

const DEFAULT_CLOSED_GRACE: Duration = Duration::from_secs(300);

struct ClosedSession {
    info: SessionInfo,
    closed_at: Instant,
}

struct ManagerInner {
    transport: Arc<dyn Transport>,
    sessions: DashMap<String, Arc<SessionHandle>>,
    closed: DashMap<String, ClosedSession>,
    bridge: ShellBridge,
    closed_grace: Duration,
}

/// Manages all SSH sessions
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_grace(transport, DEFAULT_CLOSED_GRACE)
    }

    /// `closed_grace` bounds how long retired sessions stay visible to `session_info`.
    pub fn with_grace(transport: Arc<dyn Transport>, closed_grace: Duration) -> Self {
        let bridge = ShellBridge::new(transport.events());
        Self {
            inner: Arc::new(ManagerInner {
                transport,
                sessions: DashMap::new(),
                closed: DashMap::new(),
                bridge,
                closed_grace,
            }),
        }
    }

    /// Open a connection. On success the session is Connected and its id is
    /// returned; on failure no session entry remains.
    pub async fn connect(&self, request: ConnectRequest) -> AppResult<String> {
        let session_id = Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(
            session_id.clone(),
            SessionTarget::from(&request),
        ));
        // Uncontended: nobody else can see the handle yet
        let guard = handle.lock().await;
        self.inner
            .sessions
            .insert(handle.id.clone(), Arc::clone(&handle));

        // Log connection attempt (no secrets!)
        tracing::info!(
            "Connecting to {}@{}:{} (session {})",
            request.username,
            request.host,
            request.port,
            handle.id
        );

        let inner = Arc::clone(&self.inner);
        // Driven on its own task so a caller that stops waiting still leaves a
        // consistent entry behind.
        let task = tokio::spawn(async move {
            let _guard = guard;
            match inner.transport.connect(&handle.id, &request).await {
                Ok(()) => {
                    handle.mark_connected();
                    tracing::info!("SSH connected successfully (session {})", handle.id);
                    Ok(handle.id.clone())
                }
                Err(err) => {
                    inner.sessions.remove(&handle.id);
                    handle.finish(SessionState::Failed, Some(err.message.clone()));
                    tracing::warn!(
                        "SSH connect failed (session {}): {}",
                        handle.id,
                        sanitize(&err.message)
                    );
                    Err(AppError::from(err))
                }
            }
        });

        match task.await {
            Ok(result) => result,
            Err(err) => {
                self.inner.sessions.remove(&session_id);
                Err(err.into())
            }
        }
    }

    /// Connect with a hardware-backed key held by the transport.
    pub async fn connect_using_stored_key(
        &self,
        host: &str,
        port: u16,
        username: &str,
        key_id: &str,
    ) -> AppResult<String> {
        let request = ConnectRequest::new(
            host,
            port,
            username,
            AuthRequest::StoredKey {
                key_id: key_id.to_string(),
            },
        );
        self.connect(request).await
    }

    pub async fn disconnect(&self, session_id: &str) -> AppResult<()> {
        let (handle, _guard) = self.inner.acquire(session_id, ATTACHED).await?;

        self.inner.bridge.unsubscribe(session_id);
        if let Err(err) = self.inner.transport.disconnect(session_id).await {
            tracing::warn!(
                "Transport disconnect failed (session {}): {}",
                session_id,
                sanitize(&err.message)
            );
        }
        self.inner.retire(&handle, SessionState::Disconnected, None);

        tracing::info!("Disconnected SSH session: {}", session_id);
        Ok(())
    }

    /// Run one command. Output is returned verbatim.
    pub async fn execute_command(&self, session_id: &str, command: &str) -> AppResult<String> {
        let (handle, _guard) = self.inner.acquire(session_id, ATTACHED).await?;

        tracing::debug!("Executing command (session {})", session_id);
        match self.inner.transport.execute(session_id, command).await {
            Ok(output) => Ok(output),
            Err(err) => Err(self.inner.absorb(&handle, err).await),
        }
    }

    /// Probe the connection, retiring the session if the transport reports it gone.
    pub async fn is_connected(&self, session_id: &str) -> bool {
        let Ok((handle, _guard)) = self.inner.acquire(session_id, ATTACHED).await else {
            return false;
        };

        match self.inner.transport.probe(session_id).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::info!("SSH session {} is no longer connected", session_id);
                self.inner
                    .release(
                        &handle,
                        SessionState::Disconnected,
                        Some("Connection closed by peer".to_string()),
                    )
                    .await;
                false
            }
            Err(err) => {
                tracing::warn!(
                    "Liveness probe failed (session {}): {}",
                    session_id,
                    sanitize(&err.message)
                );
                self.inner
                    .release(&handle, SessionState::Failed, Some(err.message))
                    .await;
                false
            }
        }
    }

    /// Start an interactive shell, routing its output to `callback`.
    pub async fn start_shell_session<F>(&self, session_id: &str, callback: F) -> AppResult<()>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let (handle, _guard) = self
            .inner
            .acquire(session_id, &[SessionState::Connected])
            .await?;

        // Subscribe first so the first chunk the shell prints is not lost
        let subscription = self.inner.bridge.subscribe(session_id, Arc::new(callback));
        if let Err(err) = self.inner.transport.start_shell(session_id).await {
            subscription.cancel();
            return Err(self.inner.absorb(&handle, err).await);
        }

        handle.set_state(SessionState::ShellActive);
        tracing::info!("Shell started (session {})", session_id);
        Ok(())
    }

    pub async fn send_to_shell(&self, session_id: &str, input: &str) -> AppResult<()> {
        let (handle, _guard) = self
            .inner
            .acquire(session_id, &[SessionState::ShellActive])
            .await?;

        match self.inner.transport.send_shell_input(session_id, input).await {
            Ok(()) => Ok(()),
            Err(err) => Err(self.inner.absorb(&handle, err).await),
        }
    }

    /// Stop the shell. The session returns to Connected if the connection is
    /// still live, otherwise it is retired.
    pub async fn stop_shell_session(&self, session_id: &str) -> AppResult<()> {
        let (handle, _guard) = self
            .inner
            .acquire(session_id, &[SessionState::ShellActive])
            .await?;

        if let Err(err) = self.inner.transport.stop_shell(session_id).await {
            return Err(self.inner.absorb(&handle, err).await);
        }
        self.inner.bridge.unsubscribe(session_id);

        match self.inner.transport.probe(session_id).await {
            Ok(true) => {
                handle.set_state(SessionState::Connected);
                tracing::info!("Shell stopped (session {})", session_id);
            }
            Ok(false) => {
                self.inner
                    .release(
                        &handle,
                        SessionState::Disconnected,
                        Some("Connection closed by peer".to_string()),
                    )
                    .await;
            }
            Err(err) => {
                self.inner
                    .release(&handle, SessionState::Disconnected, Some(err.message))
                    .await;
            }
        }
        Ok(())
    }

    /// Snapshots of every session in the active map, including Connecting ones.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.inner
            .sessions
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Snapshot of an active session, or of a retired one within the grace period.
    pub fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        if let Some(entry) = self.inner.sessions.get(session_id) {
            return Some(entry.value().info());
        }
        self.inner
            .closed
            .get(session_id)
            .filter(|closed| closed.closed_at.elapsed() < self.inner.closed_grace)
            .map(|closed| closed.info.clone())
    }

    pub fn active_count(&self) -> usize {
        self.inner.sessions.len()
    }

    /// Apply transport-reported closures in the background.
    ///
    /// Must be called from within a Tokio runtime. The task ends once the
    /// manager is dropped and the transport's event channel closes.
    pub fn watch_transport_events(&self) -> JoinHandle<()> {
        let mut rx = self.inner.transport.events().subscribe();
        let inner: Weak<ManagerInner> = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Session event watcher lagged, {} events dropped", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                match event {
                    TransportEvent::ConnectionClosed { session_id, reason } => {
                        inner.on_connection_closed(&session_id, reason).await
                    }
                    TransportEvent::ShellClosed { session_id } => {
                        inner.on_shell_closed(&session_id).await
                    }
                    TransportEvent::ShellOutput { .. } => {}
                }
            }
            tracing::debug!("Session event watcher stopped");
        })
    }
}

fn ensure_state(handle: &SessionHandle, allowed: &[SessionState]) -> AppResult<()> {
    if allowed.contains(&handle.state()) {
        Ok(())
    } else {
        Err(AppError::NotConnected(handle.id.clone()))
    }
}

impl ManagerInner {
    fn lookup(&self, session_id: &str) -> AppResult<Arc<SessionHandle>> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| AppError::NotConnected(session_id.to_string()))
    }

    /// Look up a session and take its operation lock. The state is checked
    /// before waiting, so a call never blocks behind an in-flight connect, and
    /// again once the lock is held.
    async fn acquire(
        &self,
        session_id: &str,
        allowed: &[SessionState],
    ) -> AppResult<(Arc<SessionHandle>, OwnedMutexGuard<()>)> {
        let handle = self.lookup(session_id)?;
        ensure_state(&handle, allowed)?;
        let guard = handle.lock().await;
        ensure_state(&handle, allowed)?;
        Ok((handle, guard))
    }

    /// Release the shell subscription, drop the entry and keep a tombstone.
    fn retire(&self, handle: &SessionHandle, state: SessionState, error: Option<String>) {
        self.bridge.unsubscribe(&handle.id);
        handle.finish(state, error);
        self.sessions.remove(&handle.id);

        let grace = self.closed_grace;
        self.closed.retain(|_, closed| closed.closed_at.elapsed() < grace);
        self.closed.insert(
            handle.id.clone(),
            ClosedSession {
                info: handle.info(),
                closed_at: Instant::now(),
            },
        );
        tracing::debug!("Retired session {} as {:?}", handle.id, state);
    }

    /// Retire the session and have the transport drop whatever it still holds for it.
    async fn release(&self, handle: &SessionHandle, state: SessionState, error: Option<String>) {
        self.retire(handle, state, error);
        if let Err(err) = self.transport.disconnect(&handle.id).await {
            tracing::warn!(
                "Transport release failed (session {}): {}",
                handle.id,
                sanitize(&err.message)
            );
        }
    }

    /// Record a transport failure; connection-lost failures retire the session.
    async fn absorb(&self, handle: &SessionHandle, err: TransportError) -> AppError {
        let message = sanitize(&err.message);
        if err.is_connection_lost() {
            tracing::error!("Connection lost (session {}): {}", handle.id, message);
            self.release(handle, SessionState::Failed, Some(err.message.clone()))
                .await;
        } else {
            tracing::warn!("Transport call failed (session {}): {}", handle.id, message);
            handle.set_last_error(err.message.clone());
        }
        AppError::from(err)
    }

    async fn on_connection_closed(&self, session_id: &str, reason: String) {
        let Ok(handle) = self.lookup(session_id) else {
            return;
        };
        let _guard = handle.lock().await;
        // A concurrent operation may have retired it while we waited
        if !self.sessions.contains_key(session_id) {
            return;
        }
        tracing::info!(
            "Transport closed session {}: {}",
            session_id,
            sanitize(&reason)
        );
        self.release(&handle, SessionState::Disconnected, Some(reason))
            .await;
    }

    async fn on_shell_closed(&self, session_id: &str) {
        let Ok(handle) = self.lookup(session_id) else {
            return;
        };
        let _guard = handle.lock().await;
        if handle.state() != SessionState::ShellActive {
            return;
        }
        self.bridge.unsubscribe(session_id);
        // Reap the transport's finished shell so a new one can be started
        if let Err(err) = self.transport.stop_shell(session_id).await {
            self.absorb(&handle, err).await;
            if !self.sessions.contains_key(session_id) {
                return;
            }
        }
        handle.set_state(SessionState::Connected);
        tracing::info!("Remote shell exited (session {})", session_id);
    }
}
