//! Persisted session state and the pure reconciliation rules.
//!
//! Everything here is wall-clock arithmetic over a snapshot of the persisted
//! document -- no I/O, no side effects. The clock survives reloads and
//! suspensions because the absolute `endTimestamp` is ground truth while
//! running, not any interval counter.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Document;

use super::mode::{Durations, Mode};

/// The persisted countdown document. Exactly one exists per user, stored at
/// `session/{userId}`.
///
/// `end_timestamp` is interpreted only while `running` is true; a paused
/// document's truth is the frozen `remaining_seconds` value. Fields default
/// individually so documents written by older clients still decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default)]
    pub mode: Mode,
    /// Epoch milliseconds at which a running session completes. Zeroed
    /// whenever the clock is not running.
    #[serde(default)]
    pub end_timestamp: i64,
    /// Frozen remaining value, authoritative while paused.
    #[serde(default)]
    pub remaining_seconds: u64,
    #[serde(default)]
    pub running: bool,
    /// Finished Focus sessions. Never decremented by the clock.
    #[serde(default)]
    pub sessions_completed: u64,
    /// Whether controls are inert while running. Presentation concern,
    /// persisted for continuity across reloads.
    #[serde(default)]
    pub focus_lock_enabled: bool,
}

impl SessionState {
    /// The state created on first observation of a user: paused Focus at the
    /// nominal duration, zero completions.
    pub fn initial(durations: &Durations) -> Self {
        Self {
            mode: Mode::Focus,
            end_timestamp: 0,
            remaining_seconds: durations.nominal(Mode::Focus),
            running: false,
            sessions_completed: 0,
            focus_lock_enabled: false,
        }
    }

    /// Remaining whole seconds at `now_ms`: derived from the deadline while
    /// running, the frozen value otherwise.
    pub fn remaining_at(&self, now_ms: i64) -> u64 {
        if self.running {
            remaining_from_deadline(self.end_timestamp, now_ms)
        } else {
            self.remaining_seconds
        }
    }

    /// Full document form, including the focus-lock flag.
    pub fn to_document(&self) -> Result<Document, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(serde::ser::Error::custom(format!(
                "session state serialized to non-object: {other}"
            ))),
        }
    }

    /// The countdown fields for a merge write. `focusLockEnabled` is
    /// deliberately absent so partial writes preserve it.
    pub fn timer_fields(&self) -> Result<Document, serde_json::Error> {
        let mut doc = self.to_document()?;
        doc.remove("focusLockEnabled");
        Ok(doc)
    }

    pub fn from_document(doc: &Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc.clone()))
    }
}

/// `max(0, floor((end - now) / 1000))`.
fn remaining_from_deadline(end_ms: i64, now_ms: i64) -> u64 {
    let delta = end_ms.saturating_sub(now_ms);
    if delta <= 0 {
        0
    } else {
        (delta / 1000) as u64
    }
}

/// Outcome of replaying a persisted document against the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciled {
    pub mode: Mode,
    pub remaining_seconds: u64,
    pub running: bool,
    /// The deadline passed while nobody was watching. The caller must
    /// finalize the session immediately instead of displaying 00:00.
    pub needs_completion: bool,
}

/// Recompute true state from a persisted document and the current wall
/// clock. A running document whose deadline has already passed -- device
/// slept, tab closed, clock jumped -- reconciles straight to "finished"
/// rather than to a negative or stalled value. A paused document reads its
/// frozen value with no recomputation.
pub fn reconcile(persisted: &SessionState, now_ms: i64) -> Reconciled {
    if persisted.running {
        let remaining = remaining_from_deadline(persisted.end_timestamp, now_ms);
        Reconciled {
            mode: persisted.mode,
            remaining_seconds: remaining,
            running: remaining > 0,
            needs_completion: remaining == 0,
        }
    } else {
        Reconciled {
            mode: persisted.mode,
            remaining_seconds: persisted.remaining_seconds,
            running: false,
            needs_completion: false,
        }
    }
}

/// Result of one scheduler firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickResult {
    pub remaining_seconds: u64,
    pub completed: bool,
}

/// One tick. Only a running state can complete; a paused state reports its
/// frozen value.
pub fn tick(state: &SessionState, now_ms: i64) -> TickResult {
    if !state.running {
        return TickResult {
            remaining_seconds: state.remaining_seconds,
            completed: false,
        };
    }
    let remaining = remaining_from_deadline(state.end_timestamp, now_ms);
    TickResult {
        remaining_seconds: remaining,
        completed: remaining == 0,
    }
}
