//! Device handles: one remote device bound to the session's stub and secret
//! store.
//!
//! Commands are single round trips. Privileged commands attach whatever secret
//! is on file for the device; if none is on file the request goes out without
//! one and the server is left to refuse it.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use crate::error::{CommandError, ReservationError, StubError, ValidationError};
use crate::models::{
    AliveStatus, AppConfig, DeeplinkParams, DeviceRecord, DeviceRef, OwnerSpec, RedirectorType,
    ReservationSecret,
};
use crate::session::Session;
use crate::stub::{Command, CommandOutput, CommandRequest, LockRequest, UnlockRequest};

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::blank(field))
    } else {
        Ok(())
    }
}

/// Handle to one remote device.
///
/// Cheap to clone. Many handles may refer to the same lease; equality and
/// hashing use the [`DeviceRef`] only.
#[derive(Clone)]
pub struct Device {
    record: Arc<DeviceRecord>,
    owner: Option<OwnerSpec>,
    session: Arc<Session>,
}

impl Device {
    pub(crate) fn new(record: DeviceRecord, session: Arc<Session>) -> Self {
        let owner = OwnerSpec::from_metadata(&record.metadata);
        Self {
            record: Arc::new(record),
            owner,
            session,
        }
    }

    pub fn reference(&self) -> &DeviceRef {
        &self.record.reference
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    pub fn owner(&self) -> Option<&OwnerSpec> {
        self.owner.as_ref()
    }

    pub fn name(&self) -> &str {
        &self.record.metadata.name
    }

    /// The secret currently on file for this device.
    pub fn secret(&self) -> Option<ReservationSecret> {
        self.session.secrets().get(self.reference())
    }

    /// True if this client currently holds a lease on the device.
    pub fn is_reserved(&self) -> bool {
        self.session.secrets().contains(self.reference())
    }

    pub(crate) fn belongs_to(&self, session: &Arc<Session>) -> bool {
        Arc::ptr_eq(&self.session, session)
    }

    /// An RPC that failed because `stop` ran while it was in flight is
    /// reported as `NotRunning`.
    fn rpc_error(&self, command: &'static str, source: StubError) -> CommandError {
        if !self.session.is_running() {
            return CommandError::NotRunning;
        }
        CommandError::Rpc {
            command,
            device: self.reference().clone(),
            source,
        }
    }

    pub(crate) async fn lock(
        &self,
        secret: Option<&ReservationSecret>,
    ) -> Result<ReservationSecret, ReservationError> {
        if secret.is_some_and(ReservationSecret::is_blank) {
            return Err(ValidationError::blank("reservation secret").into());
        }
        let request = LockRequest {
            device: self.reference().clone(),
            owner: self.owner.clone(),
            secret: secret.cloned(),
        };
        self.session
            .call(self.session.stub().lock_device(request))
            .await
            .map_err(|source| ReservationError::Lock {
                device: self.reference().clone(),
                source,
            })
    }

    pub(crate) async fn unlock(
        &self,
        secret: Option<&ReservationSecret>,
    ) -> Result<(), ReservationError> {
        let secret = secret
            .filter(|secret| !secret.is_blank())
            .ok_or_else(|| ValidationError::blank("reservation secret"))?;
        let request = UnlockRequest {
            device: self.reference().clone(),
            owner: self.owner.clone(),
            secret: secret.clone(),
        };
        self.session
            .call(self.session.stub().unlock_device(request))
            .await
            .map_err(|source| ReservationError::Unlock {
                device: self.reference().clone(),
                source,
            })
    }

    pub(crate) async fn probe(&self) -> Result<AliveStatus, StubError> {
        self.session
            .call(
                self.session
                    .stub()
                    .check_alive(self.reference(), self.owner.as_ref()),
            )
            .await
    }

    /// Query liveness and lock status. Never needs a secret.
    pub async fn check_alive(&self) -> Result<AliveStatus, CommandError> {
        if !self.session.is_running() {
            return Err(CommandError::NotRunning);
        }
        self.probe()
            .await
            .map_err(|source| self.rpc_error("check_alive", source))
    }

    async fn send(&self, command: Command) -> Result<CommandOutput, CommandError> {
        if !self.session.is_running() {
            return Err(CommandError::NotRunning);
        }
        let name = command.name();
        let secret = if command.is_privileged() {
            let secret = self.secret();
            if secret.is_none() {
                debug!(device = %self.reference(), command = name, "no reservation secret on file");
            }
            secret
        } else {
            None
        };
        let request = CommandRequest {
            device: self.reference().clone(),
            owner: self.owner.clone(),
            secret,
            command,
        };
        let output = self
            .session
            .call(self.session.stub().execute(request))
            .await
            .map_err(|source| self.rpc_error(name, source))?;
        trace!(device = %self.reference(), command = name, ?output, "command completed");
        Ok(output)
    }

    fn unexpected(&self, command: &'static str) -> CommandError {
        CommandError::UnexpectedResponse {
            command,
            device: self.reference().clone(),
        }
    }

    async fn send_ack(&self, command: Command) -> Result<(), CommandError> {
        let name = command.name();
        match self.send(command).await? {
            CommandOutput::Ack => Ok(()),
            _ => Err(self.unexpected(name)),
        }
    }

    /// Open a deeplink, returning the link the device resolved.
    pub async fn deeplink(&self, deeplink: &str) -> Result<String, CommandError> {
        require(deeplink, "deeplink")?;
        match self
            .send(Command::Deeplink {
                deeplink: deeplink.to_owned(),
            })
            .await?
        {
            CommandOutput::Deeplink(resolved) => Ok(resolved),
            _ => Err(self.unexpected("deeplink")),
        }
    }

    pub async fn press_key(&self, key: &str) -> Result<(), CommandError> {
        require(key, "key")?;
        self.send_ack(Command::PressKey {
            key: key.to_owned(),
        })
        .await
    }

    pub async fn screenshot(&self) -> Result<Bytes, CommandError> {
        match self.send(Command::Screenshot).await? {
            CommandOutput::Image(image) => Ok(image),
            _ => Err(self.unexpected("screenshot")),
        }
    }

    pub async fn reboot(&self) -> Result<(), CommandError> {
        self.send_ack(Command::Reboot).await
    }

    /// Launch an app. With deeplink params the server resolves and returns
    /// the deeplink it used.
    pub async fn launch_app(
        &self,
        app: AppConfig,
        params: Option<DeeplinkParams>,
    ) -> Result<Option<String>, CommandError> {
        require(&app.app_id, "app id")?;
        match self.send(Command::LaunchApp { app, params }).await? {
            CommandOutput::Ack => Ok(None),
            CommandOutput::Deeplink(resolved) => Ok(Some(resolved)),
            _ => Err(self.unexpected("launch_app")),
        }
    }

    /// Inject a voice utterance as if spoken into the remote.
    pub async fn simulate_voice(&self, utterance: &str) -> Result<(), CommandError> {
        require(utterance, "utterance")?;
        self.send_ack(Command::SimulateVoice {
            utterance: utterance.to_owned(),
        })
        .await
    }

    pub async fn redirect(&self, redirector: RedirectorType) -> Result<(), CommandError> {
        self.send_ack(Command::Redirect { redirector }).await
    }

    pub async fn redirector_type(&self) -> Result<RedirectorType, CommandError> {
        match self.send(Command::GetRedirectorType).await? {
            CommandOutput::Redirector(redirector) => Ok(redirector),
            _ => Err(self.unexpected("get_redirector_type")),
        }
    }
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        self.reference() == other.reference()
    }
}

impl Eq for Device {}

impl Hash for Device {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference().hash(state);
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("reference", self.reference())
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryControlPlane;
    use crate::models::Owner;
    use crate::session::SessionState;

    fn setup() -> (MemoryControlPlane, Arc<Session>, Device) {
        let plane = MemoryControlPlane::new();
        let mut record = DeviceRecord::new(DeviceRef::new("acme", "stb-1"));
        record.metadata.owner = Owner {
            user: "alice".into(),
            group: String::new(),
        };
        plane.add_device(record.clone());
        let session = Arc::new(Session::new(Arc::new(plane.clone())));
        session.set_state(SessionState::Running);
        let device = Device::new(record, Arc::clone(&session));
        (plane, session, device)
    }

    #[tokio::test]
    async fn test_owner_derived_from_metadata() {
        let (_plane, _session, device) = setup();
        assert_eq!(device.owner(), Some(&OwnerSpec::User("alice".into())));
    }

    #[tokio::test]
    async fn test_blank_arguments_rejected_before_rpc() {
        let (plane, _session, device) = setup();
        assert!(matches!(
            device.deeplink("  ").await,
            Err(CommandError::Validation(_))
        ));
        assert!(matches!(
            device.press_key("").await,
            Err(CommandError::Validation(_))
        ));
        assert!(matches!(
            device.simulate_voice("").await,
            Err(CommandError::Validation(_))
        ));
        assert!(matches!(
            device.lock(Some(&ReservationSecret::new(" "))).await,
            Err(ReservationError::Validation(_))
        ));
        assert!(matches!(
            device.unlock(None).await,
            Err(ReservationError::Validation(_))
        ));
        assert_eq!(plane.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_privileged_command_without_secret_is_refused_by_server() {
        let (plane, _session, device) = setup();
        let err = device.reboot().await.unwrap_err();
        match err {
            CommandError::Rpc { command, source, .. } => {
                assert_eq!(command, "reboot");
                assert!(source.is_unauthorized());
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(plane.calls().commands, 1);
        assert_eq!(plane.command_requests()[0].secret, None);
    }

    #[tokio::test]
    async fn test_privileged_command_carries_secret_on_file() {
        let (plane, session, device) = setup();
        let secret = device.lock(None).await.unwrap();
        session
            .secrets()
            .insert(device.reference().clone(), secret.clone());

        let resolved = device.deeplink("xre:///guide").await.unwrap();
        assert_eq!(resolved, "xre:///guide");
        device.press_key("OK").await.unwrap();

        let requests = plane.command_requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.secret.as_ref() == Some(&secret)));
        assert!(
            requests
                .iter()
                .all(|r| r.owner == Some(OwnerSpec::User("alice".into())))
        );
    }

    #[tokio::test]
    async fn test_unprivileged_commands_never_send_secret() {
        let (plane, session, device) = setup();
        let secret = device.lock(None).await.unwrap();
        session.secrets().insert(device.reference().clone(), secret);

        assert_eq!(device.redirector_type().await.unwrap(), RedirectorType::None);
        let status = device.check_alive().await.unwrap();
        assert!(status.locked);
        assert_eq!(plane.command_requests()[0].secret, None);
    }

    #[tokio::test]
    async fn test_redirect_and_launch_app() {
        let (_plane, session, device) = setup();
        let secret = device.lock(None).await.unwrap();
        session.secrets().insert(device.reference().clone(), secret);

        device.redirect(RedirectorType::Bigsur).await.unwrap();
        assert_eq!(
            device.redirector_type().await.unwrap(),
            RedirectorType::Bigsur
        );

        assert_eq!(
            device
                .launch_app(AppConfig::new("netflix"), None)
                .await
                .unwrap(),
            None
        );
        let params = DeeplinkParams::builder().dry_run(true).build();
        let link = device
            .launch_app(AppConfig::new("netflix"), Some(params))
            .await
            .unwrap();
        assert!(link.is_some_and(|link| link.contains("netflix")));
        assert!(!device.screenshot().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_surfaces_immediately() {
        let (plane, session, device) = setup();
        let secret = device.lock(None).await.unwrap();
        session.secrets().insert(device.reference().clone(), secret);
        plane.fail_next_commands(1);

        let before = plane.calls().commands;
        assert!(matches!(
            device.press_key("UP").await,
            Err(CommandError::Rpc { .. })
        ));
        // no retry at this layer
        assert_eq!(plane.calls().commands, before + 1);
        device.press_key("UP").await.unwrap();
    }

    #[tokio::test]
    async fn test_commands_rejected_when_not_running() {
        let (plane, session, device) = setup();
        session.set_state(SessionState::Stopped);
        assert!(matches!(device.reboot().await, Err(CommandError::NotRunning)));
        assert!(matches!(
            device.check_alive().await,
            Err(CommandError::NotRunning)
        ));
        assert_eq!(plane.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_equality_by_reference() {
        let (_plane, session, device) = setup();
        let other = Device::new(
            DeviceRecord::new(DeviceRef::new("acme", "stb-1")),
            Arc::clone(&session),
        );
        assert_eq!(device, other);
        let set: std::collections::HashSet<_> = [device, other].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_command_interrupted_by_stop_reports_not_running() {
        use std::time::Duration;

        use crate::stub::DeviceStub;

        let (plane, session, device) = setup();
        plane.set_latency(Duration::from_millis(500));
        let pressing = {
            let device = device.clone();
            tokio::spawn(async move { device.press_key("OK").await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        session.set_state(SessionState::Stopped);
        plane.close().await;
        assert!(matches!(
            pressing.await.unwrap(),
            Err(CommandError::NotRunning)
        ));
        assert_eq!(plane.calls().commands, 1);
    }
}
