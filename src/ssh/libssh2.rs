//! Transport backed by libssh2 over a blocking TCP stream.
//!
//! Blocking libssh2 calls run on the blocking pool; each interactive shell
//! gets a dedicated I/O thread that polls the channel in non-blocking mode.

use super::session::{AuthRequest, ConnectRequest};
use super::transport::{Transport, TransportError, TransportEvent, TransportResult};
use crate::config::SshSettings;
use crate::logging::sanitize;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use ssh2::{CheckResult, KnownHostFileKind, Session as Ssh2Session};
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::broadcast;

const READ_BUFFER_BYTES: usize = 32 * 1024;
const IDLE_POLL: Duration = Duration::from_millis(5);

// libssh2 socket-level error codes
const LIBSSH2_ERROR_SOCKET_SEND: i32 = -7;
const LIBSSH2_ERROR_SOCKET_DISCONNECT: i32 = -13;
const LIBSSH2_ERROR_SOCKET_RECV: i32 = -43;

#[derive(Debug, Clone)]
struct ConnectOptions {
    timeout: Duration,
    keepalive_interval: u32,
    known_hosts: Option<PathBuf>,
}

enum ShellCommand {
    Write(Vec<u8>),
    Close,
}

struct ShellWorker {
    input_tx: mpsc::Sender<ShellCommand>,
    thread: thread::JoinHandle<()>,
}

impl ShellWorker {
    fn shutdown(self) {
        let _ = self.input_tx.send(ShellCommand::Close);
        if self.thread.join().is_err() {
            tracing::error!("Shell I/O thread panicked");
        }
    }
}

struct Connection {
    session: Mutex<Ssh2Session>,
    alive: AtomicBool,
    shell: Mutex<Option<ShellWorker>>,
}

/// libssh2-backed transport
pub struct Ssh2Transport {
    connections: DashMap<String, Arc<Connection>>,
    events: broadcast::Sender<TransportEvent>,
    options: ConnectOptions,
}

impl Ssh2Transport {
    pub fn new(settings: &SshSettings, event_buffer: usize) -> Self {
        let (events, _) = broadcast::channel(event_buffer.max(1));
        Self {
            connections: DashMap::new(),
            events,
            options: ConnectOptions {
                timeout: settings.connect_timeout(),
                keepalive_interval: settings.keepalive_interval,
                known_hosts: settings.known_hosts_path(),
            },
        }
    }

    fn connection(&self, session_id: &str) -> TransportResult<Arc<Connection>> {
        self.connections
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| {
                TransportError::connection_lost(format!("No connection for session {}", session_id))
            })
    }
}

async fn run_blocking<T, F>(f: F) -> TransportResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> TransportResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransportError::failed(format!("SSH worker failed: {}", e)))?
}

#[async_trait]
impl Transport for Ssh2Transport {
    async fn connect(&self, session_id: &str, request: &ConnectRequest) -> TransportResult<()> {
        let request = request.clone();
        let options = self.options.clone();
        let session = run_blocking(move || open_session(&request, &options)).await?;

        self.connections.insert(
            session_id.to_string(),
            Arc::new(Connection {
                session: Mutex::new(session),
                alive: AtomicBool::new(true),
                shell: Mutex::new(None),
            }),
        );
        Ok(())
    }

    async fn disconnect(&self, session_id: &str) -> TransportResult<()> {
        let Some((_, conn)) = self.connections.remove(session_id) else {
            return Ok(());
        };
        run_blocking(move || {
            conn.stop_shell();
            conn.alive.store(false, Ordering::SeqCst);
            let session = conn.session.lock();
            session.set_blocking(true);
            let result = session
                .disconnect(None, "Closed by client", None)
                .map_err(|e| TransportError::failed(format!("Disconnect failed: {}", e)));
            result
        })
        .await
    }

    async fn execute(&self, session_id: &str, command: &str) -> TransportResult<String> {
        let conn = self.connection(session_id)?;
        let command = command.to_string();
        run_blocking(move || conn.exec(&command)).await
    }

    async fn probe(&self, session_id: &str) -> TransportResult<bool> {
        let Ok(conn) = self.connection(session_id) else {
            return Ok(false);
        };
        run_blocking(move || Ok(conn.probe())).await
    }

    async fn start_shell(&self, session_id: &str) -> TransportResult<()> {
        let conn = self.connection(session_id)?;
        let session_id = session_id.to_string();
        let events = self.events.clone();
        run_blocking(move || Connection::start_shell(&conn, session_id, events)).await
    }

    async fn send_shell_input(&self, session_id: &str, input: &str) -> TransportResult<()> {
        let conn = self.connection(session_id)?;
        let shell = conn.shell.lock();
        let worker = shell
            .as_ref()
            .ok_or_else(|| TransportError::failed("Shell is not running"))?;
        worker
            .input_tx
            .send(ShellCommand::Write(input.as_bytes().to_vec()))
            .map_err(|_| TransportError::failed("Shell is closed"))
    }

    async fn stop_shell(&self, session_id: &str) -> TransportResult<()> {
        let conn = self.connection(session_id)?;
        run_blocking(move || {
            conn.stop_shell();
            Ok(())
        })
        .await
    }

    fn events(&self) -> broadcast::Sender<TransportEvent> {
        self.events.clone()
    }
}

fn open_session(request: &ConnectRequest, options: &ConnectOptions) -> TransportResult<Ssh2Session> {
    let addr = (request.host.as_str(), request.port)
        .to_socket_addrs()
        .map_err(|e| TransportError::failed(format!("Invalid address: {}", e)))?
        .next()
        .ok_or_else(|| TransportError::failed(format!("Could not resolve {}", request.host)))?;

    let tcp = TcpStream::connect_timeout(&addr, options.timeout)
        .map_err(|e| TransportError::failed(format!("TCP connect failed: {}", e)))?;
    // Disable Nagle's algorithm for better latency
    tcp.set_nodelay(true)
        .map_err(|e| TransportError::failed(format!("Socket setup failed: {}", e)))?;

    let mut session = Ssh2Session::new()
        .map_err(|e| TransportError::failed(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(options.timeout.as_millis().min(u128::from(u32::MAX)) as u32);
    session.set_compress(request.compression);

    session
        .handshake()
        .map_err(|e| TransportError::failed(format!("SSH handshake failed: {}", e)))?;

    if options.keepalive_interval > 0 {
        session.set_keepalive(true, options.keepalive_interval);
    }

    verify_host_key(&session, request, options.known_hosts.as_deref())?;
    authenticate(&session, request)?;

    Ok(session)
}

/// Known-hosts enforcement applies only when strict checking is requested.
fn verify_host_key(
    session: &Ssh2Session,
    request: &ConnectRequest,
    known_hosts_path: Option<&Path>,
) -> TransportResult<()> {
    let (key, _) = session
        .host_key()
        .ok_or_else(|| TransportError::failed("No host key received"))?;
    let fingerprint = compute_sha256_fingerprint(key);

    if request.strict_host_key_checking != Some(true) {
        tracing::debug!(
            "Host key for {}:{} is {} (not verified)",
            request.host,
            request.port,
            fingerprint
        );
        return Ok(());
    }

    let mut known_hosts = session
        .known_hosts()
        .map_err(|e| TransportError::failed(format!("Failed to create known_hosts: {}", e)))?;
    if let Some(path) = known_hosts_path.filter(|p| p.exists()) {
        known_hosts
            .read_file(path, KnownHostFileKind::OpenSSH)
            .map_err(|e| TransportError::failed(format!("Failed to read known_hosts: {}", e)))?;
    }

    match known_hosts.check_port(&request.host, request.port, key) {
        CheckResult::Match => {
            tracing::debug!("Host key matched for {}:{}", request.host, request.port);
            Ok(())
        }
        CheckResult::NotFound => Err(TransportError::failed(format!(
            "Host key for {}:{} ({}) is not in known_hosts",
            request.host, request.port, fingerprint
        ))),
        CheckResult::Mismatch => {
            tracing::error!(
                "HOST KEY MISMATCH for {}:{}! Possible MITM attack!",
                request.host,
                request.port
            );
            Err(TransportError::failed(
                "Host key mismatch - possible security risk",
            ))
        }
        CheckResult::Failure => Err(TransportError::failed("Failed to check known hosts")),
    }
}

fn authenticate(session: &Ssh2Session, request: &ConnectRequest) -> TransportResult<()> {
    let username = request.username.as_str();

    match &request.auth {
        AuthRequest::Password { password } => {
            session
                .userauth_password(username, password)
                .map_err(|_| TransportError::failed("Password authentication failed"))?;
        }
        AuthRequest::PrivateKey {
            private_key,
            private_key_path,
            passphrase,
        } => {
            let inline = private_key.as_deref().filter(|k| !k.trim().is_empty());
            let path = private_key_path.as_deref().filter(|p| !p.trim().is_empty());
            let result = match (inline, path) {
                (Some(key_data), _) => {
                    auth_with_key_data(session, username, key_data, passphrase.as_deref())
                }
                (None, Some(path)) => session
                    .userauth_pubkey_file(username, None, &expand_home(path), passphrase.as_deref())
                    .map_err(|e| e.to_string()),
                (None, None) => {
                    return Err(TransportError::failed("Private key required"));
                }
            };
            result.map_err(|msg| TransportError::failed(describe_key_failure(&msg)))?;
        }
        AuthRequest::Agent => {
            let mut agent = session.agent().map_err(|_| {
                TransportError::failed("SSH agent not available. Make sure ssh-agent is running.")
            })?;
            agent.connect().map_err(|_| {
                TransportError::failed("Failed to connect to SSH agent. Is it running?")
            })?;
            agent
                .list_identities()
                .map_err(|_| TransportError::failed("Failed to list SSH agent identities"))?;

            let identities = agent.identities().unwrap_or_default();
            if identities.is_empty() {
                return Err(TransportError::failed(
                    "No identities found in SSH agent. Add keys with ssh-add.",
                ));
            }
            if !identities
                .iter()
                .any(|identity| agent.userauth(username, identity).is_ok())
            {
                return Err(TransportError::failed(
                    "SSH agent authentication failed. No matching key accepted.",
                ));
            }
        }
        AuthRequest::StoredKey { key_id } => {
            return Err(TransportError::failed(format!(
                "Stored key {} is not available to this transport",
                key_id
            )));
        }
    }

    if !session.authenticated() {
        return Err(TransportError::failed("Authentication failed"));
    }
    tracing::info!("SSH authentication successful for {}@{}", username, request.host);
    Ok(())
}

/// libssh2 only reads keys from disk, so inline material goes through a 0600 temp file.
fn auth_with_key_data(
    session: &Ssh2Session,
    username: &str,
    key_data: &str,
    passphrase: Option<&str>,
) -> Result<(), String> {
    let key_file_path = std::env::temp_dir().join(format!("sshdeck_key_{}", uuid::Uuid::new_v4()));
    std::fs::write(&key_file_path, key_data)
        .map_err(|e| format!("Failed to write temp key file: {}", e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = std::fs::set_permissions(&key_file_path, std::fs::Permissions::from_mode(0o600));
    }

    let result = session.userauth_pubkey_file(username, None, &key_file_path, passphrase);

    // Always delete the temp key file
    let _ = std::fs::remove_file(&key_file_path);

    result.map_err(|e| e.to_string())
}

fn describe_key_failure(msg: &str) -> String {
    let lower = msg.to_lowercase();
    if lower.contains("passphrase") || lower.contains("decrypt") || lower.contains("parse") {
        "Invalid passphrase or key format. Ensure the key is in PEM or OpenSSH format.".to_string()
    } else if lower.contains("denied") || lower.contains("auth") {
        "Private key not accepted by server".to_string()
    } else if lower.contains("temp key file") {
        msg.to_string()
    } else {
        "Private key authentication failed".to_string()
    }
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

fn classify(err: ssh2::Error, context: &str) -> TransportError {
    let message = format!("{}: {}", context, err);
    match err.code() {
        ssh2::ErrorCode::Session(
            LIBSSH2_ERROR_SOCKET_SEND | LIBSSH2_ERROR_SOCKET_DISCONNECT | LIBSSH2_ERROR_SOCKET_RECV,
        ) => TransportError::connection_lost(message),
        _ => TransportError::failed(message),
    }
}

enum ShellExit {
    Requested,
    RemoteClosed,
    Broken(String),
}

impl Connection {
    fn exec(&self, command: &str) -> TransportResult<String> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::connection_lost("Connection closed"));
        }
        let session = self.session.lock();
        session.set_blocking(true);

        let result = (|| -> TransportResult<String> {
            let mut channel = session
                .channel_session()
                .map_err(|e| classify(e, "Failed to open channel"))?;
            channel
                .exec(command)
                .map_err(|e| classify(e, "Failed to execute command"))?;

            let mut stdout = String::new();
            channel
                .read_to_string(&mut stdout)
                .map_err(|e| TransportError::failed(format!("Failed to read output: {}", e)))?;
            let mut stderr = String::new();
            channel
                .stderr()
                .read_to_string(&mut stderr)
                .map_err(|e| TransportError::failed(format!("Failed to read stderr: {}", e)))?;
            let _ = channel.wait_close();

            let mut output = stdout;
            if !stderr.is_empty() {
                output.push_str("\nSTDERR:\n");
                output.push_str(&stderr);
            }
            Ok(output)
        })();

        if matches!(&result, Err(e) if e.is_connection_lost()) {
            self.alive.store(false, Ordering::SeqCst);
        }
        result
    }

    fn probe(&self) -> bool {
        if !self.alive.load(Ordering::SeqCst) {
            return false;
        }
        let session = self.session.lock();
        session.set_blocking(true);
        match session.keepalive_send() {
            Ok(_) => true,
            Err(e) => {
                tracing::debug!("Keepalive failed: {}", e);
                self.alive.store(false, Ordering::SeqCst);
                false
            }
        }
    }

    fn start_shell(
        conn: &Arc<Self>,
        session_id: String,
        events: broadcast::Sender<TransportEvent>,
    ) -> TransportResult<()> {
        let mut shell = conn.shell.lock();
        if shell.as_ref().is_some_and(|worker| worker.thread.is_finished()) {
            if let Some(worker) = shell.take() {
                worker.shutdown();
            }
        }
        if shell.is_some() {
            return Err(TransportError::failed("Shell already running"));
        }

        let channel = {
            let session = conn.session.lock();
            session.set_blocking(true);
            let mut channel = session
                .channel_session()
                .map_err(|e| classify(e, "Failed to open channel"))?;
            channel
                .handle_extended_data(ssh2::ExtendedData::Merge)
                .map_err(|e| classify(e, "Failed to merge stderr"))?;
            channel
                .request_pty("xterm-256color", None, Some((80, 24, 0, 0)))
                .map_err(|e| classify(e, "Failed to request PTY"))?;
            channel
                .shell()
                .map_err(|e| classify(e, "Failed to start shell"))?;
            channel
        };

        let (input_tx, input_rx) = mpsc::channel();
        let worker_conn = Arc::clone(conn);
        let thread = thread::Builder::new()
            .name(format!("ssh-shell-{}", session_id))
            .spawn(move || worker_conn.run_shell_loop(session_id, channel, input_rx, events))
            .map_err(|e| TransportError::failed(format!("Failed to spawn shell thread: {}", e)))?;

        *shell = Some(ShellWorker { input_tx, thread });
        Ok(())
    }

    fn stop_shell(&self) {
        // Take the worker out before joining; the loop itself never locks `shell`
        let worker = self.shell.lock().take();
        if let Some(worker) = worker {
            worker.shutdown();
        }
    }

    fn run_shell_loop(
        &self,
        session_id: String,
        mut channel: ssh2::Channel,
        input_rx: mpsc::Receiver<ShellCommand>,
        events: broadcast::Sender<TransportEvent>,
    ) {
        let mut read_buf = [0u8; READ_BUFFER_BYTES];
        let mut pending: Vec<u8> = Vec::new();
        let mut carry: Vec<u8> = Vec::new();

        let exit = 'io: loop {
            loop {
                match input_rx.try_recv() {
                    Ok(ShellCommand::Write(data)) => pending.extend_from_slice(&data),
                    Ok(ShellCommand::Close) | Err(TryRecvError::Disconnected) => {
                        break 'io ShellExit::Requested
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            let session = self.session.lock();
            if !pending.is_empty() {
                session.set_blocking(true);
                if let Err(e) = channel.write_all(&pending).and_then(|_| channel.flush()) {
                    break 'io ShellExit::Broken(format!("Write failed: {}", e));
                }
                pending.clear();
            }

            session.set_blocking(false);
            let mut received = false;
            loop {
                match channel.read(&mut read_buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        received = true;
                        let output = decode_chunk(&mut carry, &read_buf[..n]);
                        if !output.is_empty() {
                            let _ = events.send(TransportEvent::ShellOutput {
                                session_id: session_id.clone(),
                                output,
                            });
                        }
                    }
                    Err(ref e) if e.kind() == ErrorKind::WouldBlock => break,
                    Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => break 'io ShellExit::Broken(format!("Read failed: {}", e)),
                }
            }
            let eof = channel.eof();
            session.set_blocking(true);
            drop(session);

            if eof {
                break 'io ShellExit::RemoteClosed;
            }
            if !received {
                thread::sleep(IDLE_POLL);
            }
        };

        {
            let session = self.session.lock();
            session.set_blocking(true);
            let _ = channel.close();
            let _ = channel.wait_close();
        }

        match exit {
            ShellExit::Requested => {
                tracing::debug!("Shell loop stopped (session {})", session_id);
            }
            ShellExit::RemoteClosed => {
                tracing::info!("SSH channel closed (session {})", session_id);
                let _ = events.send(TransportEvent::ShellClosed { session_id });
            }
            ShellExit::Broken(reason) => {
                tracing::warn!("Shell I/O failed (session {}): {}", session_id, sanitize(&reason));
                self.alive.store(false, Ordering::SeqCst);
                let _ = events.send(TransportEvent::ConnectionClosed { session_id, reason });
            }
        }
    }
}

/// Decode `bytes` as UTF-8, holding back an incomplete trailing sequence in `carry`.
fn decode_chunk(carry: &mut Vec<u8>, bytes: &[u8]) -> String {
    carry.extend_from_slice(bytes);
    let valid_up_to = match std::str::from_utf8(carry) {
        Ok(_) => carry.len(),
        Err(e) if e.error_len().is_none() => e.valid_up_to(),
        // Genuinely invalid bytes: emit everything lossily
        Err(_) => carry.len(),
    };
    let rest = carry.split_off(valid_up_to);
    let text = String::from_utf8_lossy(carry).into_owned();
    *carry = rest;
    text
}

/// Compute SHA256 fingerprint of a key
fn compute_sha256_fingerprint(key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    let result = hasher.finalize();

    // Format as SHA256:base64
    let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, result);
    format!("SHA256:{}", b64.trim_end_matches('='))
}
