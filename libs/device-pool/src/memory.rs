//! In-process control plane.
//!
//! `MemoryControlPlane` implements both [`DeviceStub`] and [`AuthProvider`]
//! against in-memory state. It issues unique secrets, enforces lease
//! ownership and expiry, counts every RPC, and can inject failures. The
//! integration tests and the `devpool` binary run against it.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::auth::{AuthProvider, Credentials};
use crate::error::{AuthError, StubError, StubResult};
use crate::models::{
    AliveStatus, CurrentUser, DeviceRecord, DeviceRef, OwnerSpec, RedirectorType,
    ReservationSecret,
};
use crate::stub::{Command, CommandOutput, CommandRequest, DeviceStub, LockRequest, UnlockRequest};

const SCREENSHOT_PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Number of RPCs served, by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RpcCounts {
    pub list: usize,
    pub lock: usize,
    pub unlock: usize,
    pub check_alive: usize,
    pub commands: usize,
    pub auth: usize,
}

impl RpcCounts {
    pub fn total(&self) -> usize {
        self.list + self.lock + self.unlock + self.check_alive + self.commands + self.auth
    }
}

#[derive(Debug, Default)]
struct Faults {
    lock: usize,
    reject_lock: usize,
    unlock: usize,
    check_alive: usize,
    commands: usize,
}

fn take_fault(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[derive(Debug)]
struct SimLease {
    secret: ReservationSecret,
    renewed_at: Instant,
}

#[derive(Debug)]
struct SimDevice {
    record: DeviceRecord,
    lease: Option<SimLease>,
    alive: bool,
    redirector: RedirectorType,
}

impl SimDevice {
    fn expire(&mut self, ttl: Option<Duration>) {
        if let (Some(ttl), Some(lease)) = (ttl, &self.lease)
            && lease.renewed_at + ttl <= Instant::now()
        {
            trace!(device = %self.record.reference, "simulated lease expired");
            self.lease = None;
        }
    }

    fn check_owner(&self, owner: Option<&OwnerSpec>) -> StubResult<()> {
        match OwnerSpec::from_metadata(&self.record.metadata) {
            Some(expected) if Some(&expected) != owner => Err(StubError::Unauthorized(format!(
                "device {} requires owner {expected:?}",
                self.record.reference
            ))),
            _ => Ok(()),
        }
    }

    fn holds(&self, secret: Option<&ReservationSecret>) -> bool {
        matches!((&self.lease, secret), (Some(lease), Some(secret)) if &lease.secret == secret)
    }
}

#[derive(Debug, Default)]
struct PlaneState {
    devices: BTreeMap<DeviceRef, SimDevice>,
    users: HashMap<String, CurrentUser>,
    lease_ttl: Option<Duration>,
    latency: Option<Duration>,
    rotate_secrets: bool,
    calls: RpcCounts,
    faults: Faults,
    lock_log: Vec<LockRequest>,
    command_log: Vec<CommandRequest>,
    closed: bool,
}

impl PlaneState {
    fn device_mut(&mut self, device: &DeviceRef) -> StubResult<&mut SimDevice> {
        let ttl = self.lease_ttl;
        let sim = self
            .devices
            .get_mut(device)
            .ok_or_else(|| StubError::NotFound(device.to_string()))?;
        sim.expire(ttl);
        Ok(sim)
    }

    fn ensure_open(&self) -> StubResult<()> {
        if self.closed {
            Err(StubError::Transport("connection closed".into()))
        } else {
            Ok(())
        }
    }
}

fn new_secret() -> ReservationSecret {
    ReservationSecret::new(uuid::Uuid::new_v4().to_string())
}

/// In-memory implementation of the control plane and identity service.
#[derive(Debug, Clone, Default)]
pub struct MemoryControlPlane {
    inner: Arc<Mutex<PlaneState>>,
}

impl MemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, record: DeviceRecord) {
        let reference = record.reference.clone();
        self.inner.lock().devices.insert(
            reference,
            SimDevice {
                record,
                lease: None,
                alive: true,
                redirector: RedirectorType::None,
            },
        );
    }

    /// Register the user a token resolves to.
    pub fn add_user(&self, token: impl Into<String>, user: CurrentUser) {
        self.inner.lock().users.insert(token.into(), user);
    }

    /// Leases not renewed within `ttl` are reclaimed.
    pub fn set_lease_ttl(&self, ttl: Duration) {
        self.inner.lock().lease_ttl = Some(ttl);
    }

    /// Delay every RPC by `latency` before it is served.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.lock().latency = Some(latency);
    }

    /// Issue a fresh secret on every renewal instead of echoing the old one.
    pub fn set_rotate_secrets(&self, rotate: bool) {
        self.inner.lock().rotate_secrets = rotate;
    }

    pub fn set_alive(&self, device: &DeviceRef, alive: bool) {
        if let Some(sim) = self.inner.lock().devices.get_mut(device) {
            sim.alive = alive;
        }
    }

    /// The next `n` lock calls fail with a transport error.
    pub fn fail_next_locks(&self, n: usize) {
        self.inner.lock().faults.lock = n;
    }

    /// The next `n` lock calls are rejected by the server.
    pub fn reject_next_locks(&self, n: usize) {
        self.inner.lock().faults.reject_lock = n;
    }

    pub fn fail_next_unlocks(&self, n: usize) {
        self.inner.lock().faults.unlock = n;
    }

    pub fn fail_next_check_alive(&self, n: usize) {
        self.inner.lock().faults.check_alive = n;
    }

    pub fn fail_next_commands(&self, n: usize) {
        self.inner.lock().faults.commands = n;
    }

    /// Drop the lease on `device` as if the server reclaimed it.
    pub fn expire_lease(&self, device: &DeviceRef) {
        if let Some(sim) = self.inner.lock().devices.get_mut(device) {
            sim.lease = None;
        }
    }

    /// Hand the lease on `device` to another client.
    pub fn steal_lease(&self, device: &DeviceRef) {
        if let Some(sim) = self.inner.lock().devices.get_mut(device) {
            sim.lease = Some(SimLease {
                secret: new_secret(),
                renewed_at: Instant::now(),
            });
        }
    }

    pub fn is_locked(&self, device: &DeviceRef) -> bool {
        let mut state = self.inner.lock();
        state
            .device_mut(device)
            .map(|sim| sim.lease.is_some())
            .unwrap_or(false)
    }

    /// The secret the server currently accepts for `device`.
    pub fn lease_secret(&self, device: &DeviceRef) -> Option<ReservationSecret> {
        let mut state = self.inner.lock();
        state
            .device_mut(device)
            .ok()
            .and_then(|sim| sim.lease.as_ref().map(|lease| lease.secret.clone()))
    }

    pub fn calls(&self) -> RpcCounts {
        self.inner.lock().calls
    }

    pub fn reset_calls(&self) {
        let mut state = self.inner.lock();
        state.calls = RpcCounts::default();
        state.lock_log.clear();
        state.command_log.clear();
    }

    pub fn lock_requests(&self) -> Vec<LockRequest> {
        self.inner.lock().lock_log.clone()
    }

    pub fn command_requests(&self) -> Vec<CommandRequest> {
        self.inner.lock().command_log.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    async fn delay(&self) {
        let latency = self.inner.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl DeviceStub for MemoryControlPlane {
    async fn list_devices(&self, org: &str) -> StubResult<Vec<DeviceRecord>> {
        self.delay().await;
        let mut state = self.inner.lock();
        state.calls.list += 1;
        state.ensure_open()?;
        Ok(state
            .devices
            .values()
            .filter(|sim| sim.record.reference.org == org)
            .map(|sim| sim.record.clone())
            .collect())
    }

    async fn lock_device(&self, request: LockRequest) -> StubResult<ReservationSecret> {
        self.delay().await;
        let mut state = self.inner.lock();
        state.calls.lock += 1;
        state.lock_log.push(request.clone());
        state.ensure_open()?;
        if take_fault(&mut state.faults.lock) {
            return Err(StubError::Transport("injected lock failure".into()));
        }
        if take_fault(&mut state.faults.reject_lock) {
            return Err(StubError::Rejected {
                code: "lock_denied".into(),
                message: "injected lock rejection".into(),
            });
        }
        let rotate = state.rotate_secrets;
        let sim = state.device_mut(&request.device)?;
        sim.check_owner(request.owner.as_ref())?;

        if sim.holds(request.secret.as_ref()) {
            let secret = if rotate {
                new_secret()
            } else {
                request.secret.clone().unwrap_or_else(new_secret)
            };
            sim.lease = Some(SimLease {
                secret: secret.clone(),
                renewed_at: Instant::now(),
            });
            return Ok(secret);
        }
        if sim.lease.is_some() {
            return Err(StubError::Rejected {
                code: "locked".into(),
                message: format!("{} is reserved by another client", request.device),
            });
        }
        let secret = new_secret();
        sim.lease = Some(SimLease {
            secret: secret.clone(),
            renewed_at: Instant::now(),
        });
        Ok(secret)
    }

    async fn unlock_device(&self, request: UnlockRequest) -> StubResult<()> {
        self.delay().await;
        let mut state = self.inner.lock();
        state.calls.unlock += 1;
        state.ensure_open()?;
        if take_fault(&mut state.faults.unlock) {
            return Err(StubError::Transport("injected unlock failure".into()));
        }
        let sim = state.device_mut(&request.device)?;
        sim.check_owner(request.owner.as_ref())?;
        match &sim.lease {
            Some(lease) if lease.secret == request.secret => {
                sim.lease = None;
                Ok(())
            }
            Some(_) => Err(StubError::Unauthorized(format!(
                "secret does not match lease on {}",
                request.device
            ))),
            None => Err(StubError::Rejected {
                code: "not_locked".into(),
                message: format!("{} is not locked", request.device),
            }),
        }
    }

    async fn check_alive(
        &self,
        device: &DeviceRef,
        _owner: Option<&OwnerSpec>,
    ) -> StubResult<AliveStatus> {
        self.delay().await;
        let mut state = self.inner.lock();
        state.calls.check_alive += 1;
        state.ensure_open()?;
        if take_fault(&mut state.faults.check_alive) {
            return Err(StubError::Timeout("injected check_alive timeout".into()));
        }
        let sim = state.device_mut(device)?;
        Ok(AliveStatus {
            alive: sim.alive,
            locked: sim.lease.is_some(),
        })
    }

    async fn execute(&self, request: CommandRequest) -> StubResult<CommandOutput> {
        self.delay().await;
        let mut state = self.inner.lock();
        state.calls.commands += 1;
        state.command_log.push(request.clone());
        state.ensure_open()?;
        if take_fault(&mut state.faults.commands) {
            return Err(StubError::Transport("injected command failure".into()));
        }
        let sim = state.device_mut(&request.device)?;
        sim.check_owner(request.owner.as_ref())?;
        if request.command.is_privileged() && !sim.holds(request.secret.as_ref()) {
            return Err(StubError::Unauthorized(format!(
                "{} requires the reservation secret for {}",
                request.command.name(),
                request.device
            )));
        }
        if !sim.alive {
            return Err(StubError::Timeout(format!("{} is offline", request.device)));
        }

        Ok(match request.command {
            Command::Deeplink { deeplink } => CommandOutput::Deeplink(deeplink),
            Command::PressKey { .. } | Command::Reboot | Command::SimulateVoice { .. } => {
                CommandOutput::Ack
            }
            Command::Screenshot => CommandOutput::Image(Bytes::from_static(SCREENSHOT_PNG_MAGIC)),
            Command::LaunchApp { app, params } => match params {
                Some(params) => {
                    let mut query: Vec<_> = params
                        .additional_params
                        .iter()
                        .map(|(k, v)| format!("{k}={v}"))
                        .collect();
                    query.sort();
                    CommandOutput::Deeplink(format!("app://{}?{}", app.app_id, query.join("&")))
                }
                None => CommandOutput::Ack,
            },
            Command::Redirect { redirector } => {
                sim.redirector = redirector;
                CommandOutput::Ack
            }
            Command::GetRedirectorType => CommandOutput::Redirector(sim.redirector),
        })
    }

    async fn close(&self) {
        self.inner.lock().closed = true;
    }
}

#[async_trait]
impl AuthProvider for MemoryControlPlane {
    async fn current_user(&self, credentials: &Credentials) -> Result<CurrentUser, AuthError> {
        let mut state = self.inner.lock();
        state.calls.auth += 1;
        if credentials.is_blank() {
            return Err(AuthError::MissingCredential);
        }
        state
            .users
            .get(credentials.token())
            .cloned()
            .ok_or_else(|| AuthError::Rejected("unknown credential".into()))
    }
}
