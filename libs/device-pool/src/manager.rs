//! The reserve/release protocol.
//!
//! Every mutation of the secret store and the renewal set happens while the
//! manager's critical section (`renewing`) is held, so the two never disagree
//! at an observable point: a device is under renewal iff a secret is on file
//! for it.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::ReservationError;
use crate::metrics;
use crate::models::{DeviceRef, ReservationSecret};
use crate::secrets::SecretStore;
use crate::session::Session;

/// Result of releasing one device. Release is best-effort, so RPC failures
/// are reported here instead of being returned as errors.
#[derive(Debug)]
pub enum ReleaseOutcome {
    /// Unlocked on the server and forgotten locally.
    Released,
    /// The server reported the device unlocked; nothing was sent or changed.
    NotLocked,
    /// The liveness check or unlock failed; local state was left as is.
    Failed(ReservationError),
}

impl ReleaseOutcome {
    pub fn is_released(&self) -> bool {
        matches!(self, ReleaseOutcome::Released)
    }

    pub fn error(&self) -> Option<&ReservationError> {
        match self {
            ReleaseOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// Per-device entry of a bulk release.
#[derive(Debug)]
pub struct ReleaseReport {
    pub device: DeviceRef,
    pub outcome: ReleaseOutcome,
}

/// Devices the renewal loop is responsible for.
type RenewalSet = BTreeMap<DeviceRef, Device>;

/// Owns the lease bookkeeping for one session.
#[derive(Debug)]
pub struct ReservationManager {
    session: Arc<Session>,
    renewing: Mutex<RenewalSet>,
}

impl ReservationManager {
    pub(crate) fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            renewing: Mutex::new(RenewalSet::new()),
        }
    }

    pub fn secrets(&self) -> &SecretStore {
        self.session.secrets()
    }

    /// Devices currently under renewal, in sorted order.
    pub async fn held(&self) -> Vec<DeviceRef> {
        self.renewing.lock().await.keys().cloned().collect()
    }

    /// Lock `device`, or renew the lease if a secret is already on file.
    ///
    /// On failure nothing local changes.
    pub async fn reserve(&self, device: &Device) -> Result<ReservationSecret, ReservationError> {
        let mut renewing = self.renewing.lock().await;
        self.admit(device)?;
        self.reserve_locked(&mut renewing, device).await
    }

    fn admit(&self, device: &Device) -> Result<(), ReservationError> {
        if !self.session.is_running() {
            return Err(ReservationError::NotRunning);
        }
        if !device.belongs_to(&self.session) {
            return Err(ReservationError::ForeignDevice(device.reference().clone()));
        }
        Ok(())
    }

    async fn reserve_locked(
        &self,
        renewing: &mut RenewalSet,
        device: &Device,
    ) -> Result<ReservationSecret, ReservationError> {
        let reference = device.reference();
        let current = self.secrets().get(reference);
        let renew = current.is_some();

        match device.lock(current.as_ref()).await {
            Ok(secret) => {
                if self.secrets().insert(reference.clone(), secret.clone()).is_none() {
                    metrics::LEASES_HELD.inc();
                }
                renewing.insert(reference.clone(), device.clone());
                metrics::RESERVATIONS_GRANTED.inc();
                debug!(device = %reference, renew, "device reserved");
                Ok(secret)
            }
            Err(err) => {
                metrics::RESERVATIONS_FAILED.inc();
                debug!(device = %reference, renew, %err, "reserve failed");
                Err(err)
            }
        }
    }

    /// Reserve each device in order. The first failure aborts the call;
    /// devices reserved before it stay reserved.
    pub async fn reserve_all(
        &self,
        devices: &[Device],
    ) -> Result<Vec<ReservationSecret>, ReservationError> {
        let mut secrets = Vec::with_capacity(devices.len());
        for device in devices {
            secrets.push(self.reserve(device).await?);
        }
        Ok(secrets)
    }

    /// Release `device` if the server still reports it locked.
    ///
    /// RPC failures are logged and reported in the outcome. The errors
    /// returned are [`ReservationError::NotRunning`] and
    /// [`ReservationError::ForeignDevice`] for a handle from another session.
    pub async fn release(&self, device: &Device) -> Result<ReleaseOutcome, ReservationError> {
        let mut renewing = self.renewing.lock().await;
        self.admit(device)?;
        Ok(self.release_locked(&mut renewing, device).await)
    }

    async fn release_locked(&self, renewing: &mut RenewalSet, device: &Device) -> ReleaseOutcome {
        let reference = device.reference();
        let outcome = match device.probe().await {
            Err(source) => ReleaseOutcome::Failed(ReservationError::CheckAlive {
                device: reference.clone(),
                source,
            }),
            Ok(status) if !status.locked => ReleaseOutcome::NotLocked,
            Ok(_) => {
                let secret = self.secrets().get(reference);
                match device.unlock(secret.as_ref()).await {
                    Ok(()) => {
                        self.forget(renewing, reference);
                        ReleaseOutcome::Released
                    }
                    Err(err) => ReleaseOutcome::Failed(err),
                }
            }
        };

        match &outcome {
            ReleaseOutcome::Released => {
                metrics::RELEASES_COMPLETED.inc();
                debug!(device = %reference, "device released");
            }
            ReleaseOutcome::NotLocked => {
                metrics::RELEASES_SKIPPED.inc();
                debug!(device = %reference, "device not locked, nothing to release");
            }
            ReleaseOutcome::Failed(err) => {
                metrics::RELEASES_FAILED.inc();
                warn!(device = %reference, %err, "release failed, continuing");
            }
        }
        outcome
    }

    fn forget(&self, renewing: &mut RenewalSet, reference: &DeviceRef) {
        if self.secrets().remove(reference).is_some() {
            metrics::LEASES_HELD.dec();
        }
        renewing.remove(reference);
    }

    /// Release every device, continuing past failures.
    pub async fn release_all(
        &self,
        devices: &[Device],
    ) -> Result<Vec<ReleaseReport>, ReservationError> {
        if !self.session.is_running() {
            return Err(ReservationError::NotRunning);
        }
        let mut reports = Vec::with_capacity(devices.len());
        for device in devices {
            let outcome = self
                .release(device)
                .await
                .unwrap_or_else(ReleaseOutcome::Failed);
            reports.push(ReleaseReport {
                device: device.reference().clone(),
                outcome,
            });
        }
        Ok(reports)
    }

    /// Wait until no reserve, release or renewal holds the critical section.
    pub(crate) async fn quiesce(&self) {
        drop(self.renewing.lock().await);
    }

    pub(crate) async fn renewal_snapshot(&self) -> Vec<DeviceRef> {
        self.held().await
    }

    /// Renew one lease on behalf of the renewal loop.
    ///
    /// Returns `None` when the device left the renewal set since the
    /// snapshot was taken, or the session is no longer running. A renewal
    /// the server refuses outright (not a transient failure) means the lease
    /// is gone, so the device is forgotten.
    pub(crate) async fn renew(
        &self,
        reference: &DeviceRef,
    ) -> Option<Result<ReservationSecret, ReservationError>> {
        let mut renewing = self.renewing.lock().await;
        if !self.session.is_running() {
            return None;
        }
        let device = renewing.get(reference)?.clone();
        let result = self.reserve_locked(&mut renewing, &device).await;

        if let Err(err) = &result
            && err.stub_error().is_some_and(|source| !source.is_retryable())
        {
            self.forget(&mut renewing, reference);
            metrics::LEASES_LOST.inc();
            warn!(device = %reference, %err, "server refused renewal, lease forgotten");
        }
        Some(result)
    }

    /// Best-effort release of every held device, regardless of session state.
    pub(crate) async fn release_held(&self) -> Vec<ReleaseReport> {
        let mut renewing = self.renewing.lock().await;
        let devices: Vec<Device> = renewing.values().cloned().collect();
        let mut reports = Vec::with_capacity(devices.len());
        for device in devices {
            let outcome = self.release_locked(&mut renewing, &device).await;
            reports.push(ReleaseReport {
                device: device.reference().clone(),
                outcome,
            });
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StubError;
    use crate::memory::MemoryControlPlane;
    use crate::models::DeviceRecord;
    use crate::session::SessionState;
    use tracing_test::traced_test;

    struct Fixture {
        plane: MemoryControlPlane,
        session: Arc<Session>,
        manager: ReservationManager,
    }

    impl Fixture {
        fn new() -> Self {
            let plane = MemoryControlPlane::new();
            let session = Arc::new(Session::new(Arc::new(plane.clone())));
            session.set_state(SessionState::Running);
            let manager = ReservationManager::new(Arc::clone(&session));
            Self {
                plane,
                session,
                manager,
            }
        }

        fn device(&self, id: &str) -> Device {
            let record = DeviceRecord::new(DeviceRef::new("acme", id));
            self.plane.add_device(record.clone());
            Device::new(record, Arc::clone(&self.session))
        }

        async fn assert_consistent(&self) {
            let held = self.manager.held().await;
            assert_eq!(held, self.manager.secrets().devices());
        }
    }

    #[tokio::test]
    async fn test_reserve_then_release_leaves_nothing() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");

        fx.manager.reserve(&dev).await.unwrap();
        assert!(dev.is_reserved());
        assert_eq!(fx.manager.held().await, vec![dev.reference().clone()]);

        let outcome = fx.manager.release(&dev).await.unwrap();
        assert!(outcome.is_released());
        assert!(fx.manager.secrets().is_empty());
        assert!(fx.manager.held().await.is_empty());
        assert!(!fx.plane.is_locked(dev.reference()));
    }

    #[tokio::test]
    async fn test_reserve_twice_keeps_one_entry() {
        let fx = Fixture::new();
        fx.plane.set_rotate_secrets(true);
        let dev = fx.device("stb-1");

        let first = fx.manager.reserve(&dev).await.unwrap();
        let second = fx.manager.reserve(&dev).await.unwrap();
        assert_ne!(first, second);
        assert_eq!(fx.manager.secrets().len(), 1);
        assert_eq!(fx.manager.secrets().get(dev.reference()), Some(second));

        let requests = fx.plane.lock_requests();
        assert_eq!(requests[0].secret, None);
        assert_eq!(requests[1].secret, Some(first));
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_failed_reserve_leaves_state_unchanged() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        let secret = fx.manager.reserve(&dev).await.unwrap();

        fx.plane.fail_next_locks(1);
        let err = fx.manager.reserve(&dev).await.unwrap_err();
        assert!(matches!(err, ReservationError::Lock { .. }));
        assert_eq!(fx.manager.secrets().get(dev.reference()), Some(secret));

        let other = fx.device("stb-2");
        fx.plane.fail_next_locks(1);
        assert!(fx.manager.reserve(&other).await.is_err());
        assert!(!other.is_reserved());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_reserve_all_aborts_without_rollback() {
        let fx = Fixture::new();
        let devices = vec![fx.device("a"), fx.device("b"), fx.device("c")];
        fx.plane.steal_lease(devices[1].reference());

        let err = fx.manager.reserve_all(&devices).await.unwrap_err();
        assert_eq!(err.device(), Some(devices[1].reference()));
        assert!(devices[0].is_reserved());
        assert!(!devices[1].is_reserved());
        assert!(!devices[2].is_reserved());
        // c was never attempted
        assert_eq!(fx.plane.calls().lock, 2);
    }

    #[tokio::test]
    async fn test_release_skips_unlocked_device() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.manager.reserve(&dev).await.unwrap();
        fx.plane.expire_lease(dev.reference());

        let outcome = fx.manager.release(&dev).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::NotLocked));
        assert_eq!(fx.plane.calls().unlock, 0);
        assert!(dev.is_reserved());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    #[traced_test]
    async fn test_release_failure_is_suppressed() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.manager.reserve(&dev).await.unwrap();

        fx.plane.fail_next_unlocks(1);
        let outcome = fx.manager.release(&dev).await.unwrap();
        assert!(matches!(
            outcome.error(),
            Some(ReservationError::Unlock { .. })
        ));
        assert!(dev.is_reserved());
        assert!(logs_contain("release failed"));

        fx.plane.fail_next_check_alive(1);
        let outcome = fx.manager.release(&dev).await.unwrap();
        assert!(matches!(
            outcome.error(),
            Some(ReservationError::CheckAlive { .. })
        ));
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_release_all_attempts_every_device() {
        let fx = Fixture::new();
        let devices = vec![fx.device("a"), fx.device("b"), fx.device("c")];
        fx.manager.reserve_all(&devices).await.unwrap();

        fx.plane.fail_next_check_alive(1);
        let reports = fx.manager.release_all(&devices).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert!(matches!(reports[0].outcome, ReleaseOutcome::Failed(_)));
        assert!(reports[1].outcome.is_released());
        assert!(reports[2].outcome.is_released());
        assert_eq!(fx.manager.held().await, vec![devices[0].reference().clone()]);
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_release_of_unreserved_locked_device_fails_validation() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.plane.steal_lease(dev.reference());

        let outcome = fx.manager.release(&dev).await.unwrap();
        assert!(matches!(
            outcome.error(),
            Some(ReservationError::Validation(_))
        ));
        assert_eq!(fx.plane.calls().unlock, 0);
    }

    #[tokio::test]
    async fn test_renew_skips_released_device() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.manager.reserve(&dev).await.unwrap();
        let snapshot = fx.manager.renewal_snapshot().await;
        fx.manager.release(&dev).await.unwrap();

        fx.plane.reset_calls();
        assert!(fx.manager.renew(&snapshot[0]).await.is_none());
        assert_eq!(fx.plane.calls().lock, 0);
        assert!(!fx.plane.is_locked(dev.reference()));
    }

    #[tokio::test]
    async fn test_renew_forgets_refused_lease() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.manager.reserve(&dev).await.unwrap();
        fx.plane.steal_lease(dev.reference());

        let result = fx.manager.renew(dev.reference()).await.unwrap();
        assert!(result.is_err());
        assert!(!dev.is_reserved());
        assert!(fx.manager.held().await.is_empty());
    }

    #[tokio::test]
    async fn test_renew_keeps_lease_on_transient_failure() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.manager.reserve(&dev).await.unwrap();
        fx.plane.fail_next_locks(1);

        let err = fx.manager.renew(dev.reference()).await.unwrap().unwrap_err();
        assert!(matches!(
            err.stub_error(),
            Some(StubError::Transport(_))
        ));
        assert!(dev.is_reserved());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_operations_rejected_when_not_running() {
        let fx = Fixture::new();
        let dev = fx.device("stb-1");
        fx.session.set_state(SessionState::Stopped);

        assert!(matches!(
            fx.manager.reserve(&dev).await,
            Err(ReservationError::NotRunning)
        ));
        assert!(matches!(
            fx.manager.release(&dev).await,
            Err(ReservationError::NotRunning)
        ));
        assert!(matches!(
            fx.manager.release_all(std::slice::from_ref(&dev)).await,
            Err(ReservationError::NotRunning)
        ));
        assert_eq!(fx.plane.calls().total(), 0);
    }

    #[tokio::test]
    async fn test_device_from_another_session_rejected() {
        let fx = Fixture::new();
        let other = Fixture::new();
        let dev = other.device("stb-1");

        let err = fx.manager.reserve(&dev).await.unwrap_err();
        assert!(matches!(err, ReservationError::ForeignDevice(_)));
        assert_eq!(err.device(), Some(dev.reference()));
        assert!(matches!(
            fx.manager.release(&dev).await,
            Err(ReservationError::ForeignDevice(_))
        ));
        let reports = fx.manager.release_all(std::slice::from_ref(&dev)).await.unwrap();
        assert!(matches!(
            reports[0].outcome.error(),
            Some(ReservationError::ForeignDevice(_))
        ));

        assert_eq!(other.plane.calls().total(), 0);
        assert!(!dev.is_reserved());
        assert!(fx.manager.held().await.is_empty());
        fx.assert_consistent().await;
    }

    #[tokio::test]
    async fn test_release_held_ignores_session_state() {
        let fx = Fixture::new();
        let devices = vec![fx.device("a"), fx.device("b")];
        fx.manager.reserve_all(&devices).await.unwrap();
        fx.session.set_state(SessionState::Stopped);

        let reports = fx.manager.release_held().await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.outcome.is_released()));
        assert!(fx.manager.secrets().is_empty());
    }
}
