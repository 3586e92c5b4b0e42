// Connection state of the leveling store.
//
// Every public leveling operation checks this before touching storage. A
// background monitor pings the store and flips the state; nothing else writes
// it.

use super::leveling_store::LevelStore;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No successful ping yet.
    Connecting,
    Ready,
    /// Last ping failed.
    Unavailable { reason: String },
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Ready => write!(f, "ready"),
            ConnectionState::Unavailable { reason } => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Shared handle on the connection state. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Readiness {
    tx: Arc<watch::Sender<ConnectionState>>,
    rx: watch::Receiver<ConnectionState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(ConnectionState::Connecting);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    #[cfg(test)]
    pub fn ready() -> Self {
        let readiness = Self::new();
        readiness.set(ConnectionState::Ready);
        readiness
    }

    pub fn state(&self) -> ConnectionState {
        self.rx.borrow().clone()
    }

    pub fn is_ready(&self) -> bool {
        self.rx.borrow().is_ready()
    }

    pub fn set(&self, state: ConnectionState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::info!(from = %current, to = %state, "Leveling store state changed");
            *current = state;
            true
        });
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Ping the store forever, retrying quickly while it is down.
pub async fn monitor_store<S>(store: Arc<S>, readiness: Readiness, retry: Duration, healthy: Duration)
where
    S: LevelStore + ?Sized,
{
    loop {
        check_once(store.as_ref(), &readiness).await;

        let wait = if readiness.is_ready() { healthy } else { retry };
        tokio::time::sleep(wait).await;
    }
}

/// Single health check. Returns the resulting state.
pub async fn check_once<S>(store: &S, readiness: &Readiness) -> ConnectionState
where
    S: LevelStore + ?Sized,
{
    match store.ping().await {
        Ok(()) => readiness.set(ConnectionState::Ready),
        Err(err) => {
            tracing::warn!(error = %err, "Leveling store ping failed");
            readiness.set(ConnectionState::Unavailable {
                reason: err.to_string(),
            });
        }
    }
    readiness.state()
}
