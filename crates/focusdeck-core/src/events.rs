use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Mode;

/// Every state change in the clock produces an event. The presentation
/// layer subscribes to the driver's event stream; `SessionCompleted` is the
/// one-shot notification cue, emitted exactly once per elapsed session --
/// it is an event, never a polled field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClockEvent {
    SessionStarted {
        mode: Mode,
        remaining_seconds: u64,
        at: DateTime<Utc>,
    },
    SessionPaused {
        remaining_seconds: u64,
        at: DateTime<Utc>,
    },
    ModeChanged {
        mode: Mode,
        remaining_seconds: u64,
        at: DateTime<Utc>,
    },
    SessionCompleted {
        mode: Mode,
        sessions_completed: u64,
        at: DateTime<Utc>,
    },
    StateSnapshot {
        mode: Mode,
        remaining_seconds: u64,
        remaining_display: String,
        running: bool,
        sessions_completed: u64,
        focus_lock_enabled: bool,
        at: DateTime<Utc>,
    },
}
