//! The control-plane capability consumed by the reservation manager.
//!
//! `DeviceStub` abstracts the wire protocol: every method is one
//! request/response round trip and failures surface as [`StubError`].
//! Nothing here retries.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StubResult;
use crate::models::{
    AliveStatus, AppConfig, DeeplinkParams, DeviceRecord, DeviceRef, OwnerSpec, RedirectorType,
    ReservationSecret,
};

/// Lock request. Carrying a secret turns it into a renew/extend of an
/// existing lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockRequest {
    pub device: DeviceRef,
    pub owner: Option<OwnerSpec>,
    pub secret: Option<ReservationSecret>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlockRequest {
    pub device: DeviceRef,
    pub owner: Option<OwnerSpec>,
    pub secret: ReservationSecret,
}

/// Per-command payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Deeplink {
        deeplink: String,
    },
    PressKey {
        key: String,
    },
    Screenshot,
    Reboot,
    LaunchApp {
        app: AppConfig,
        params: Option<DeeplinkParams>,
    },
    SimulateVoice {
        utterance: String,
    },
    Redirect {
        redirector: RedirectorType,
    },
    GetRedirectorType,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Deeplink { .. } => "deeplink",
            Command::PressKey { .. } => "press_key",
            Command::Screenshot => "screenshot",
            Command::Reboot => "reboot",
            Command::LaunchApp { .. } => "launch_app",
            Command::SimulateVoice { .. } => "simulate_voice",
            Command::Redirect { .. } => "redirect",
            Command::GetRedirectorType => "get_redirector_type",
        }
    }

    /// Privileged commands carry the reservation secret on file.
    pub fn is_privileged(&self) -> bool {
        !matches!(self, Command::GetRedirectorType)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    pub device: DeviceRef,
    pub owner: Option<OwnerSpec>,
    /// Absent when nothing is on file; the server is expected to refuse
    /// privileged commands in that case.
    pub secret: Option<ReservationSecret>,
    pub command: Command,
}

/// Command-specific results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutput {
    Ack,
    Deeplink(String),
    Image(Bytes),
    Redirector(RedirectorType),
}

/// Synchronous-RPC capability against the remote control plane.
#[async_trait]
pub trait DeviceStub: Send + Sync + std::fmt::Debug + 'static {
    /// List every device visible to `org`.
    async fn list_devices(&self, org: &str) -> StubResult<Vec<DeviceRecord>>;

    /// Acquire or renew a lease, returning the secret now in force.
    async fn lock_device(&self, request: LockRequest) -> StubResult<ReservationSecret>;

    async fn unlock_device(&self, request: UnlockRequest) -> StubResult<()>;

    async fn check_alive(
        &self,
        device: &DeviceRef,
        owner: Option<&OwnerSpec>,
    ) -> StubResult<AliveStatus>;

    async fn execute(&self, request: CommandRequest) -> StubResult<CommandOutput>;

    /// Release the underlying connection. Called once by session stop.
    async fn close(&self) {}
}
