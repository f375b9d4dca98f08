//! Reservation lifecycle metrics.
//!
//! Metrics are lazily initialized on first access via `lazy_static!`.
//!
//! # Note
//! Metric registration failures are fatal (using `.unwrap()`).

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, register_int_counter, register_int_gauge};

lazy_static! {
    /// Count of successful lock calls issued by `reserve` (fresh or renew).
    pub static ref RESERVATIONS_GRANTED: IntCounter = register_int_counter!(
        "devpool_reservations_granted",
        "count of lock calls that returned a reservation secret"
    ).unwrap();

    /// Count of `reserve` calls that failed.
    pub static ref RESERVATIONS_FAILED: IntCounter = register_int_counter!(
        "devpool_reservations_failed",
        "count of reserve calls that failed"
    ).unwrap();

    /// Count of devices unlocked and forgotten by `release`.
    pub static ref RELEASES_COMPLETED: IntCounter = register_int_counter!(
        "devpool_releases_completed",
        "count of devices released"
    ).unwrap();

    /// Count of releases skipped because the server reported the device unlocked.
    pub static ref RELEASES_SKIPPED: IntCounter = register_int_counter!(
        "devpool_releases_skipped",
        "count of releases skipped because the device was not locked"
    ).unwrap();

    /// Count of releases that failed and were suppressed.
    pub static ref RELEASES_FAILED: IntCounter = register_int_counter!(
        "devpool_releases_failed",
        "count of best-effort releases that failed"
    ).unwrap();

    /// Count of renewal attempts made by the renewal loop.
    pub static ref RENEWALS_ATTEMPTED: IntCounter = register_int_counter!(
        "devpool_renewals_attempted",
        "count of lease renewals attempted by the renewal loop"
    ).unwrap();

    /// Count of renewal attempts that failed.
    pub static ref RENEWALS_FAILED: IntCounter = register_int_counter!(
        "devpool_renewals_failed",
        "count of lease renewals that failed"
    ).unwrap();

    /// Count of leases dropped after a non-retryable renewal failure.
    pub static ref LEASES_LOST: IntCounter = register_int_counter!(
        "devpool_leases_lost",
        "count of leases forgotten after the server refused renewal"
    ).unwrap();

    /// Number of leases currently held by every client in the process.
    pub static ref LEASES_HELD: IntGauge = register_int_gauge!(
        "devpool_leases_held",
        "number of leases currently held"
    ).unwrap();
}
