//! Error types for device pool operations.
//!
//! Capabilities consumed by this crate (the device stub and the identity
//! service) report [`StubError`] / [`AuthError`]. The reservation manager and
//! device handles wrap those into [`ReservationError`] and [`CommandError`] so
//! callers can tell which step failed without depending on transport details.

use thiserror::Error;

use crate::models::DeviceRef;

/// Failure reported by a [`DeviceStub`](crate::stub::DeviceStub) call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StubError {
    /// Connection or transport-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within its deadline.
    #[error("timeout: {0}")]
    Timeout(String),

    /// The server refused the call for lack of a valid secret or owner.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The server answered with an error payload.
    #[error("rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    /// The addressed device does not exist.
    #[error("device not found: {0}")]
    NotFound(String),
}

impl StubError {
    /// Returns true if this error indicates a transient failure that may
    /// succeed when the same call is issued again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StubError::Transport(_) | StubError::Timeout(_))
    }

    /// Returns true if the server refused the caller's credentials or secret.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, StubError::Unauthorized(_))
    }
}

/// Shorthand result alias for stub calls.
pub type StubResult<T> = Result<T, StubError>;

/// Identity resolution failed. Fatal to session start.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no credential configured")]
    MissingCredential,

    #[error("identity service unreachable: {0}")]
    Transport(String),

    #[error("identity service rejected credential: {0}")]
    Rejected(String),

    #[error("malformed identity response: {0}")]
    Malformed(String),
}

/// A required argument was blank or missing. Raised before any network call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be provided")]
    Blank { field: &'static str },
}

impl ValidationError {
    pub(crate) fn blank(field: &'static str) -> Self {
        ValidationError::Blank { field }
    }
}

/// Lock, unlock or liveness RPC failure during reserve/release.
#[derive(Debug, Error)]
pub enum ReservationError {
    #[error("unable to lock {device}: {source}")]
    Lock {
        device: DeviceRef,
        #[source]
        source: StubError,
    },

    #[error("unable to unlock {device}: {source}")]
    Unlock {
        device: DeviceRef,
        #[source]
        source: StubError,
    },

    #[error("liveness check failed for {device}: {source}")]
    CheckAlive {
        device: DeviceRef,
        #[source]
        source: StubError,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0} belongs to another device pool session")]
    ForeignDevice(DeviceRef),

    #[error("device pool session is not running")]
    NotRunning,
}

impl ReservationError {
    /// The device the failed RPC was addressed to, if any.
    pub fn device(&self) -> Option<&DeviceRef> {
        match self {
            ReservationError::Lock { device, .. }
            | ReservationError::Unlock { device, .. }
            | ReservationError::CheckAlive { device, .. }
            | ReservationError::ForeignDevice(device) => Some(device),
            ReservationError::Validation(_) | ReservationError::NotRunning => None,
        }
    }

    /// The underlying stub failure, if the error came from an RPC.
    pub fn stub_error(&self) -> Option<&StubError> {
        match self {
            ReservationError::Lock { source, .. }
            | ReservationError::Unlock { source, .. }
            | ReservationError::CheckAlive { source, .. } => Some(source),
            ReservationError::Validation(_)
            | ReservationError::ForeignDevice(_)
            | ReservationError::NotRunning => None,
        }
    }
}

/// A device command failed. Never retried at this layer.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("{command} failed on {device}: {source}")]
    Rpc {
        command: &'static str,
        device: DeviceRef,
        #[source]
        source: StubError,
    },

    #[error("{command} on {device} returned an unexpected response")]
    UnexpectedResponse {
        command: &'static str,
        device: DeviceRef,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("device pool session is not running")]
    NotRunning,
}

/// Top-level error type for the device-pool crate.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("device listing failed: {0}")]
    Listing(#[source] StubError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("device pool session already started")]
    AlreadyStarted,

    #[error("device pool session is not running")]
    NotRunning,
}

/// Shorthand result alias for device-pool operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
