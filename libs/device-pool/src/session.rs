//! Process-wide session state shared by the client, the manager and every
//! device handle.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::task::TaskTracker;

use crate::secrets::SecretStore;
use crate::stub::DeviceStub;

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Built but not started; no operation is allowed yet.
    Idle,
    /// Started; reservations and commands are allowed.
    Running,
    /// Stopped; the connection has been released.
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Running => write!(f, "running"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

pub(crate) struct Session {
    stub: Arc<dyn DeviceStub>,
    secrets: SecretStore,
    state: RwLock<SessionState>,
    // every stub round trip runs inside this tracker so stop can drain them
    inflight: TaskTracker,
}

impl Session {
    pub(crate) fn new(stub: Arc<dyn DeviceStub>) -> Self {
        Self {
            stub,
            secrets: SecretStore::new(),
            state: RwLock::new(SessionState::Idle),
            inflight: TaskTracker::new(),
        }
    }

    pub(crate) fn stub(&self) -> &dyn DeviceStub {
        self.stub.as_ref()
    }

    pub(crate) fn secrets(&self) -> &SecretStore {
        &self.secrets
    }

    pub(crate) fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == SessionState::Running
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    /// Run one stub round trip, counted as in flight until it resolves.
    pub(crate) async fn call<F: Future>(&self, fut: F) -> F::Output {
        self.inflight.track_future(fut).await
    }

    pub(crate) fn inflight(&self) -> usize {
        self.inflight.len()
    }

    /// Stop accepting new tracked calls as "in flight" and wait for the
    /// current ones to resolve.
    pub(crate) async fn drain(&self) {
        self.inflight.close();
        self.inflight.wait().await;
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("stub", &self.stub)
            .field("state", &self.state())
            .field("held", &self.secrets.len())
            .finish_non_exhaustive()
    }
}
