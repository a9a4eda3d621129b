//! Routes transport shell output to at most one callback per session.

use super::transport::TransportEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;

pub type ShellOutputCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct ActiveSubscription {
    token: u64,
    task: JoinHandle<()>,
}

type SubscriptionMap = DashMap<String, ActiveSubscription>;

pub struct ShellBridge {
    events: broadcast::Sender<TransportEvent>,
    subscriptions: Arc<SubscriptionMap>,
    next_token: AtomicU64,
}

impl ShellBridge {
    pub fn new(events: broadcast::Sender<TransportEvent>) -> Self {
        Self {
            events,
            subscriptions: Arc::new(DashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Deliver every output chunk for `session_id` to `callback`, in order.
    /// Replaces any existing subscription for the session.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn subscribe(&self, session_id: &str, callback: ShellOutputCallback) -> ShellSubscription {
        // Receiver is created before returning so no chunk emitted after
        // subscribe() is missed.
        let rx = self.events.subscribe();
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(forward_output(rx, session_id.to_string(), callback));

        if let Some(previous) = self
            .subscriptions
            .insert(session_id.to_string(), ActiveSubscription { token, task })
        {
            previous.task.abort();
            tracing::debug!("Replaced shell subscription for session {}", session_id);
        }

        ShellSubscription {
            session_id: session_id.to_string(),
            token,
            subscriptions: Arc::downgrade(&self.subscriptions),
        }
    }

    /// Detach the session's callback. Returns whether one was attached.
    pub fn unsubscribe(&self, session_id: &str) -> bool {
        match self.subscriptions.remove(session_id) {
            Some((_, active)) => {
                active.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, session_id: &str) -> bool {
        self.subscriptions.contains_key(session_id)
    }
}

impl Drop for ShellBridge {
    fn drop(&mut self) {
        for entry in self.subscriptions.iter() {
            entry.value().task.abort();
        }
    }
}

async fn forward_output(
    mut rx: broadcast::Receiver<TransportEvent>,
    session_id: String,
    callback: ShellOutputCallback,
) {
    loop {
        match rx.recv().await {
            Ok(TransportEvent::ShellOutput {
                session_id: source,
                output,
            }) if source == session_id => callback(&output),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(
                    "Shell output for session {} lagged, {} events dropped",
                    session_id,
                    skipped
                );
            }
            Err(RecvError::Closed) => break,
        }
    }
}

/// Cancellation handle returned by [`ShellBridge::subscribe`]
#[derive(Debug, Clone)]
pub struct ShellSubscription {
    session_id: String,
    token: u64,
    subscriptions: Weak<SubscriptionMap>,
}

impl ShellSubscription {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Detach this subscription. A no-op if it has since been replaced.
    pub fn cancel(&self) {
        let Some(subscriptions) = self.subscriptions.upgrade() else {
            return;
        };
        if let Some((_, active)) = subscriptions.remove_if(&self.session_id, |_, active| {
            active.token == self.token
        }) {
            active.task.abort();
        }
    }
}
