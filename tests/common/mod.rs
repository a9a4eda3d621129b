//! In-memory transport for driving the session manager without a network.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use sshdeck::ssh::transport::TransportResult;
use sshdeck::ssh::{AuthRequest, ConnectRequest, Transport, TransportError, TransportEvent};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Notify};

#[derive(Default)]
struct MockState {
    /// Calls seen, as `"<op> <session_id>"`
    calls: Vec<String>,
    /// Sessions the mock considers connected
    live: HashSet<String>,
    shells: HashSet<String>,
    inputs: Vec<(String, String)>,
    connect_error: Option<TransportError>,
    execute_error: Option<TransportError>,
    shell_error: Option<TransportError>,
    disconnect_gate: Option<Arc<Notify>>,
}

pub struct MockTransport {
    state: Mutex<MockState>,
    events: broadcast::Sender<TransportEvent>,
    connect_gate: Option<Arc<Notify>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::build(None))
    }

    /// Connect calls block until the returned gate is notified.
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (Arc::new(Self::build(Some(Arc::clone(&gate)))), gate)
    }

    fn build(connect_gate: Option<Arc<Notify>>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            state: Mutex::new(MockState::default()),
            events,
            connect_gate,
        }
    }

    pub fn fail_connect(&self, err: TransportError) {
        self.state.lock().connect_error = Some(err);
    }

    pub fn fail_execute(&self, err: TransportError) {
        self.state.lock().execute_error = Some(err);
    }

    pub fn fail_shell(&self, err: TransportError) {
        self.state.lock().shell_error = Some(err);
    }

    /// Disconnect calls block until the returned gate is notified.
    pub fn gate_disconnect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().disconnect_gate = Some(Arc::clone(&gate));
        gate
    }

    pub fn count_calls(&self, call: &str) -> usize {
        self.state.lock().calls.iter().filter(|c| *c == call).count()
    }

    /// Make the next probe for `session_id` report the connection gone.
    pub fn drop_connection(&self, session_id: &str) {
        self.state.lock().live.remove(session_id);
    }

    pub fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn inputs(&self) -> Vec<(String, String)> {
        self.state.lock().inputs.clone()
    }

    pub fn is_live(&self, session_id: &str) -> bool {
        self.state.lock().live.contains(session_id)
    }

    fn record(&self, op: &str, session_id: &str) {
        self.state.lock().calls.push(format!("{} {}", op, session_id));
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, session_id: &str, _request: &ConnectRequest) -> TransportResult<()> {
        self.record("connect", session_id);
        if let Some(gate) = &self.connect_gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        if let Some(err) = state.connect_error.take() {
            return Err(err);
        }
        state.live.insert(session_id.to_string());
        Ok(())
    }

    async fn disconnect(&self, session_id: &str) -> TransportResult<()> {
        self.record("disconnect", session_id);
        let gate = self.state.lock().disconnect_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock();
        state.shells.remove(session_id);
        state.live.remove(session_id);
        Ok(())
    }

    async fn execute(&self, session_id: &str, command: &str) -> TransportResult<String> {
        self.record("execute", session_id);
        let mut state = self.state.lock();
        if let Some(err) = state.execute_error.take() {
            return Err(err);
        }
        Ok(format!("ran: {}", command))
    }

    async fn probe(&self, session_id: &str) -> TransportResult<bool> {
        self.record("probe", session_id);
        Ok(self.state.lock().live.contains(session_id))
    }

    async fn start_shell(&self, session_id: &str) -> TransportResult<()> {
        self.record("start_shell", session_id);
        let mut state = self.state.lock();
        if let Some(err) = state.shell_error.take() {
            return Err(err);
        }
        if !state.shells.insert(session_id.to_string()) {
            return Err(TransportError::failed("Shell already running"));
        }
        Ok(())
    }

    async fn send_shell_input(&self, session_id: &str, input: &str) -> TransportResult<()> {
        self.record("send_shell_input", session_id);
        self.state
            .lock()
            .inputs
            .push((session_id.to_string(), input.to_string()));
        Ok(())
    }

    async fn stop_shell(&self, session_id: &str) -> TransportResult<()> {
        self.record("stop_shell", session_id);
        self.state.lock().shells.remove(session_id);
        Ok(())
    }

    fn events(&self) -> broadcast::Sender<TransportEvent> {
        self.events.clone()
    }
}

pub fn password_request() -> ConnectRequest {
    ConnectRequest::new(
        "10.0.0.5",
        2222,
        "op",
        AuthRequest::Password {
            password: "hunter2".to_string(),
        },
    )
}

/// Poll `check` until it holds, failing the test after a second.
pub async fn eventually<F: Fn() -> bool>(check: F) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}
