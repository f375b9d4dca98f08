//! Session entry point.
//!
//! A [`DevicePoolClient`] owns one connection to the control plane, the
//! secrets for every lease it holds, and the background task that keeps
//! those leases alive. It moves through `Idle -> Running -> Stopped` exactly
//! once; nothing that talks to the control plane is allowed outside
//! `Running`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::{AuthProvider, Credentials};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::manager::{ReleaseReport, ReservationManager};
use crate::models::{CurrentUser, DeviceRef, ReservationSecret};
use crate::renewal::{DEFAULT_RENEWAL_INTERVAL, RenewalLoop};
use crate::search::Predicate;
use crate::secrets::SecretStore;
use crate::session::{Session, SessionState};
use crate::stub::DeviceStub;

/// How long `stop` waits for each shutdown step.
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct DevicePoolClient {
    session: Arc<Session>,
    manager: Arc<ReservationManager>,
    auth: Arc<dyn AuthProvider>,
    credentials: Credentials,
    renewal_interval: Duration,
    shutdown_timeout: Duration,
    release_on_stop: bool,
    user: RwLock<Option<CurrentUser>>,
    token: CancellationToken,
    // serializes start/stop and owns the renewal task handle
    renewal: Mutex<Option<JoinHandle<()>>>,
}

impl DevicePoolClient {
    pub fn builder() -> DevicePoolClientBuilder {
        DevicePoolClientBuilder::new()
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    /// The user resolved at start; `None` before a successful start.
    pub fn current_user(&self) -> Option<CurrentUser> {
        self.user.read().clone()
    }

    pub fn renewal_interval(&self) -> Duration {
        self.renewal_interval
    }

    /// Resolve the calling user and begin renewing leases.
    ///
    /// Only valid from `Idle`. If the identity lookup fails the session stays
    /// `Idle` and may be started again.
    pub async fn start(&self) -> Result<()> {
        let mut renewal = self.renewal.lock().await;
        if self.session.state() != SessionState::Idle {
            return Err(Error::AlreadyStarted);
        }

        let user = self.auth.current_user(&self.credentials).await?;
        info!(user = %user.id, org = %user.org, "device pool session started");
        *self.user.write() = Some(user);

        self.session.set_state(SessionState::Running);
        let task = RenewalLoop::new(Arc::clone(&self.manager), self.renewal_interval)
            .spawn(self.token.clone());
        *renewal = Some(task);
        Ok(())
    }

    /// Shut the session down. Idempotent.
    ///
    /// Each wait below is bounded by the shutdown timeout: the renewal task
    /// (aborted if it overruns), the optional release of held devices, and
    /// any reserve/release or command call still in flight. The stub is
    /// closed last.
    pub async fn stop(&self) -> Result<()> {
        let mut renewal = self.renewal.lock().await;
        let previous = self.session.state();
        if previous == SessionState::Stopped {
            return Ok(());
        }
        self.session.set_state(SessionState::Stopped);
        self.token.cancel();

        if let Some(mut task) = renewal.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => debug!("renewal task stopped"),
                Ok(Err(err)) => warn!(?err, "renewal task ended abnormally"),
                Err(_) => {
                    warn!(timeout = ?self.shutdown_timeout, "renewal task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        if previous == SessionState::Running && self.release_on_stop {
            match tokio::time::timeout(self.shutdown_timeout, self.manager.release_held()).await {
                Ok(reports) => log_reports(&reports),
                Err(_) => warn!("releasing held devices timed out"),
            }
        }

        let settled = tokio::time::timeout(self.shutdown_timeout, async {
            self.manager.quiesce().await;
            self.session.drain().await;
        })
        .await;
        if settled.is_err() {
            warn!(
                inflight = self.session.inflight(),
                "calls still in flight at shutdown"
            );
        }

        self.session.stub().close().await;
        info!(held = self.session.secrets().len(), "device pool session stopped");
        Ok(())
    }

    fn running_user(&self) -> Result<CurrentUser> {
        if !self.session.is_running() {
            return Err(Error::NotRunning);
        }
        self.user.read().clone().ok_or(Error::NotRunning)
    }

    /// Every device in the caller's organization.
    pub async fn list_devices(&self) -> Result<Vec<Device>> {
        let user = self.running_user()?;
        let records = self
            .session
            .call(self.session.stub().list_devices(&user.org))
            .await
            .map_err(Error::Listing)?;
        debug!(org = %user.org, count = records.len(), "listed devices");
        Ok(records
            .into_iter()
            .map(|record| Device::new(record, Arc::clone(&self.session)))
            .collect())
    }

    /// Devices matching `predicate`, in listing order.
    pub async fn search_devices(&self, predicate: &Predicate) -> Result<Vec<Device>> {
        let mut devices = self.list_devices().await?;
        devices.retain(|device| predicate.matches(device.record()));
        Ok(devices)
    }

    /// Devices owned by the current user.
    pub async fn private_devices(&self) -> Result<Vec<Device>> {
        let user = self.running_user()?;
        let mut devices = self.list_devices().await?;
        devices.retain(|device| device.record().metadata.owner.user == user.id);
        Ok(devices)
    }

    pub async fn reserve(&self, device: &Device) -> Result<ReservationSecret> {
        Ok(self.manager.reserve(device).await?)
    }

    pub async fn reserve_all(&self, devices: &[Device]) -> Result<Vec<ReservationSecret>> {
        Ok(self.manager.reserve_all(devices).await?)
    }

    pub async fn release(&self, device: &Device) -> Result<crate::manager::ReleaseOutcome> {
        Ok(self.manager.release(device).await?)
    }

    pub async fn release_all(&self, devices: &[Device]) -> Result<Vec<ReleaseReport>> {
        Ok(self.manager.release_all(devices).await?)
    }

    pub fn secrets(&self) -> &SecretStore {
        self.session.secrets()
    }

    /// Devices currently under renewal.
    pub async fn held_devices(&self) -> Vec<DeviceRef> {
        self.manager.held().await
    }
}

fn log_reports(reports: &[ReleaseReport]) {
    for report in reports {
        match report.outcome.error() {
            Some(err) => warn!(device = %report.device, %err, "release at shutdown failed"),
            None => debug!(device = %report.device, outcome = ?report.outcome, "released at shutdown"),
        }
    }
}

impl Drop for DevicePoolClient {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl fmt::Debug for DevicePoolClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevicePoolClient")
            .field("session", &self.session)
            .field("renewal_interval", &self.renewal_interval)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("release_on_stop", &self.release_on_stop)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct DevicePoolClientBuilder {
    stub: Option<Arc<dyn DeviceStub>>,
    auth: Option<Arc<dyn AuthProvider>>,
    credentials: Option<Credentials>,
    renewal_interval: Duration,
    shutdown_timeout: Duration,
    release_on_stop: bool,
}

impl DevicePoolClientBuilder {
    fn new() -> Self {
        Self {
            stub: None,
            auth: None,
            credentials: None,
            renewal_interval: DEFAULT_RENEWAL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            release_on_stop: false,
        }
    }

    pub fn stub(mut self, stub: Arc<dyn DeviceStub>) -> Self {
        self.stub = Some(stub);
        self
    }

    pub fn auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = interval;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Release every held device as part of `stop`.
    pub fn release_on_stop(mut self, release: bool) -> Self {
        self.release_on_stop = release;
        self
    }

    pub fn build(self) -> Result<DevicePoolClient> {
        let stub = self
            .stub
            .ok_or_else(|| Error::Config("a device stub is required".into()))?;
        let auth = self
            .auth
            .ok_or_else(|| Error::Config("an auth provider is required".into()))?;
        let credentials = self
            .credentials
            .filter(|c| !c.is_blank())
            .ok_or_else(|| Error::Config("a non-blank credential is required".into()))?;
        if self.renewal_interval.is_zero() {
            return Err(Error::Config("renewal interval must be non-zero".into()));
        }

        let session = Arc::new(Session::new(stub));
        let manager = Arc::new(ReservationManager::new(Arc::clone(&session)));
        Ok(DevicePoolClient {
            session,
            manager,
            auth,
            credentials,
            renewal_interval: self.renewal_interval,
            shutdown_timeout: self.shutdown_timeout,
            release_on_stop: self.release_on_stop,
            user: RwLock::new(None),
            token: CancellationToken::new(),
            renewal: Mutex::new(None),
        })
    }
}
