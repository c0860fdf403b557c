//! Error taxonomy for the session clock.

use thiserror::Error;

use crate::store::StoreError;

/// Failures surfaced by the clock and its driver.
#[derive(Debug, Error)]
pub enum ClockError {
    /// The backing store could not be reached. Transient: retried on the
    /// next tick or the next explicit user action. Callers must present
    /// this as "loading", never as a zero remaining time.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] StoreError),

    /// A caller drove the state machine against its contract. Surfaced, but
    /// never fatal to the scheduler.
    #[error("invalid transition: cannot {action} while {current}")]
    InvalidTransition {
        action: &'static str,
        current: &'static str,
    },

    /// No user is signed in, so no session state is addressable.
    #[error("no user is signed in")]
    SignedOut,

    /// The session document could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for ClockError.
pub type Result<T, E = ClockError> = std::result::Result<T, E>;
