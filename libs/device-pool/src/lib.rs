//! # device-pool
//!
//! Client-side lease manager for a shared pool of remote test devices.
//!
//! This library provides:
//! - **Session lifecycle** via [`DevicePoolClient`]: identity lookup at start,
//!   bounded shutdown at stop, and an explicit `Idle -> Running -> Stopped`
//!   state check on every operation.
//! - **Reservation protocol** ([`ReservationManager`]): reserve, renew and
//!   release leases, keeping the per-device secrets in a [`SecretStore`].
//! - **Background renewal** ([`RenewalLoop`]) so held leases never lapse.
//! - **Device handles** ([`Device`]) that attach the stored secret to
//!   privileged remote commands.
//! - **Search predicates** ([`search`]) over device listings.
//! - An in-memory control plane ([`MemoryControlPlane`]) for tests and
//!   local simulation.
//!
//! The control-plane RPC layer and the identity service are injected through
//! the [`DeviceStub`] and [`AuthProvider`] traits.

pub mod auth;
pub mod client;
pub mod device;
pub mod error;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod models;
pub mod renewal;
pub mod search;
pub mod secrets;
mod session;
pub mod stub;

pub use auth::{AuthProvider, Credentials, HttpAuthProvider, TokenType};
pub use client::{DEFAULT_SHUTDOWN_TIMEOUT, DevicePoolClient, DevicePoolClientBuilder};
pub use device::Device;
pub use error::{
    AuthError, CommandError, Error, ReservationError, Result, StubError, StubResult,
    ValidationError,
};
pub use manager::{ReleaseOutcome, ReleaseReport, ReservationManager};
pub use memory::{MemoryControlPlane, RpcCounts};
pub use models::{
    AliveStatus, AppConfig, CurrentUser, DeeplinkParams, DeviceRecord, DeviceRef, OwnerSpec,
    RedirectorType, ReservationSecret,
};
pub use renewal::{DEFAULT_RENEWAL_INTERVAL, RenewalLoop, RenewalStats};
pub use search::Predicate;
pub use secrets::SecretStore;
pub use session::SessionState;
pub use stub::{Command, CommandOutput, DeviceStub};
