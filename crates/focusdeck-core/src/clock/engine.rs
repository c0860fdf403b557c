//! The session clock: one user's countdown, fronted by write-through
//! persistence.
//!
//! Every transition is durable before it is confirmed locally, so
//! `self.state` always holds the last state the store acknowledged. Ticks
//! and commands derive from that confirmed state -- never from a fresh read
//! that could resurrect a deadline a pending write has already superseded.
//!
//! ## State transitions
//!
//! ```text
//! Idle(paused) -> Running -> { Running       (tick, remaining > 0)
//!                            | Idle(paused)  (tick, remaining == 0, counter+1) }
//! ```
//!
//! `change_mode` returns to `Idle(paused)` from any state. The machine has
//! no terminal state.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ClockError;
use crate::events::ClockEvent;
use crate::store::{session_key, Document, StateStore, StoreError};

use super::mode::{Durations, Mode};
use super::state::{self, Reconciled, SessionState};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Zero-padded `mm:ss`. Minutes grow past 99 rather than wrapping.
pub fn format_remaining(total_secs: u64) -> String {
    format!("{:02}:{:02}", total_secs / 60, total_secs % 60)
}

/// Read model recomputed on every tick and exposed to the presentation
/// layer. Presentation code renders this; it holds no mutable copy of the
/// clock's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub mode: Mode,
    pub remaining_seconds: u64,
    pub remaining_display: String,
    pub running: bool,
    pub sessions_completed: u64,
    pub focus_lock_enabled: bool,
}

/// One user's session clock.
pub struct SessionClock {
    user_id: String,
    durations: Durations,
    store: Arc<dyn StateStore>,
    /// Last state confirmed by the store.
    state: SessionState,
}

impl std::fmt::Debug for SessionClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClock")
            .field("user_id", &self.user_id)
            .field("durations", &self.durations)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl SessionClock {
    /// Fetch the user's persisted state, creating the initial Focus document
    /// on first observation.
    ///
    /// # Errors
    ///
    /// `PersistenceUnavailable` if the store cannot be reached; the caller
    /// must treat that as "loading", never as a zero remaining time.
    pub async fn load_or_init(
        store: Arc<dyn StateStore>,
        user_id: &str,
        durations: Durations,
    ) -> Result<Self, ClockError> {
        let key = session_key(user_id);
        let state = match store.get(&key).await? {
            Some(doc) => SessionState::from_document(&doc)?,
            None => {
                let state = SessionState::initial(&durations);
                store.set(&key, state.to_document()?, true).await?;
                state
            }
        };
        Ok(Self {
            user_id: user_id.to_string(),
            durations,
            store,
            state,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Replay the confirmed state against the wall clock. A caller seeing
    /// `needs_completion` must invoke [`Self::complete_session`] (or just
    /// [`Self::tick`]) before rendering anything.
    pub fn reconcile(&self, now_ms: i64) -> Reconciled {
        state::reconcile(&self.state, now_ms)
    }

    pub fn snapshot(&self, now_ms: i64) -> ClockSnapshot {
        let remaining = self.state.remaining_at(now_ms);
        ClockSnapshot {
            mode: self.state.mode,
            remaining_seconds: remaining,
            remaining_display: format_remaining(remaining),
            running: self.state.running,
            sessions_completed: self.state.sessions_completed,
            focus_lock_enabled: self.state.focus_lock_enabled,
        }
    }

    /// Start (or resume) the countdown. Recomputes the absolute deadline
    /// from the frozen remaining value; a zero-remaining state begins a
    /// fresh session at the mode's nominal duration.
    pub async fn start(&mut self, now_ms: i64) -> Result<ClockEvent, ClockError> {
        if self.state.running {
            return Err(ClockError::InvalidTransition {
                action: "start",
                current: "running",
            });
        }

        let mut next = self.state.clone();
        if next.remaining_seconds == 0 {
            next.remaining_seconds = self.durations.nominal(next.mode);
        }
        next.end_timestamp = now_ms.saturating_add((next.remaining_seconds as i64) * 1000);
        next.running = true;
        self.persist_timer_fields(&next).await?;
        self.state = next;

        Ok(ClockEvent::SessionStarted {
            mode: self.state.mode,
            remaining_seconds: self.state.remaining_seconds,
            at: Utc::now(),
        })
    }

    /// Pause the countdown, persisting the frozen remaining value rather
    /// than the stale deadline.
    pub async fn pause(&mut self, now_ms: i64) -> Result<ClockEvent, ClockError> {
        if !self.state.running {
            return Err(ClockError::InvalidTransition {
                action: "pause",
                current: "paused",
            });
        }

        let mut next = self.state.clone();
        next.remaining_seconds = next.remaining_at(now_ms);
        next.running = false;
        next.end_timestamp = 0;
        self.persist_timer_fields(&next).await?;
        self.state = next;

        Ok(ClockEvent::SessionPaused {
            remaining_seconds: self.state.remaining_seconds,
            at: Utc::now(),
        })
    }

    /// Switch mode. Unconditional: preempts any in-progress session without
    /// touching the completion counter -- an explicit abandon, not a
    /// completion.
    pub async fn change_mode(&mut self, new_mode: Mode) -> Result<ClockEvent, ClockError> {
        let mut next = self.state.clone();
        next.mode = new_mode;
        next.remaining_seconds = self.durations.nominal(new_mode);
        next.running = false;
        next.end_timestamp = 0;
        self.persist_timer_fields(&next).await?;
        self.state = next;

        Ok(ClockEvent::ModeChanged {
            mode: self.state.mode,
            remaining_seconds: self.state.remaining_seconds,
            at: Utc::now(),
        })
    }

    /// One scheduler firing. Returns the completion event when the deadline
    /// has elapsed -- exactly once per session; later ticks see a paused
    /// clock and return `None`.
    pub async fn tick(&mut self, now_ms: i64) -> Result<Option<ClockEvent>, ClockError> {
        let result = state::tick(&self.state, now_ms);
        if result.completed {
            return self.complete_session().await;
        }
        Ok(None)
    }

    /// Finalize an elapsed session.
    ///
    /// Idempotent: `running = false` and the counter increment travel in one
    /// persisted update, and a clock that already observes `running = false`
    /// treats the session as finished and returns `None` without touching
    /// the counter. Only Focus sessions count.
    pub async fn complete_session(&mut self) -> Result<Option<ClockEvent>, ClockError> {
        if !self.state.running {
            return Ok(None);
        }

        let mut next = self.state.clone();
        next.running = false;
        next.end_timestamp = 0;
        next.remaining_seconds = 0;
        if next.mode == Mode::Focus {
            next.sessions_completed += 1;
        }

        let key = session_key(&self.user_id);
        match self.store.update(&key, next.timer_fields()?).await {
            Ok(()) => {}
            Err(StoreError::NotFound(_)) => {
                // The document vanished underneath us; re-create it whole.
                debug!(user = %self.user_id, "session document missing on completion, re-creating");
                self.store.set(&key, next.to_document()?, true).await?;
            }
            Err(err) => return Err(err.into()),
        }
        self.state = next;

        Ok(Some(ClockEvent::SessionCompleted {
            mode: self.state.mode,
            sessions_completed: self.state.sessions_completed,
            at: Utc::now(),
        }))
    }

    /// Persist the focus-lock flag alone; the merge write touches nothing
    /// else.
    pub async fn set_focus_lock(&mut self, enabled: bool) -> Result<(), ClockError> {
        let mut doc = Document::new();
        doc.insert("focusLockEnabled".into(), Value::Bool(enabled));
        self.store
            .set(&session_key(&self.user_id), doc, true)
            .await?;
        self.state.focus_lock_enabled = enabled;
        Ok(())
    }

    /// Write-through of the countdown fields with merge semantics, so
    /// `focusLockEnabled` and anything else in the document survives.
    async fn persist_timer_fields(&self, next: &SessionState) -> Result<(), ClockError> {
        self.store
            .set(&session_key(&self.user_id), next.timer_fields()?, true)
            .await?;
        Ok(())
    }
}

/// Account-management reset of the completion counter -- the one write that
/// happens outside the state machine; the clock core itself never
/// decrements. Merge write: the countdown fields and the focus-lock flag
/// are untouched.
pub async fn reset_sessions(store: &dyn StateStore, user_id: &str) -> Result<(), ClockError> {
    let mut doc = Document::new();
    doc.insert("sessionsCompleted".into(), Value::from(0u64));
    store.set(&session_key(user_id), doc, true).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    const NOW: i64 = 1_700_000_000_000;

    async fn clock_with(durations: Durations) -> (Arc<MemoryStore>, SessionClock) {
        let store = Arc::new(MemoryStore::new());
        let clock = SessionClock::load_or_init(store.clone(), "u1", durations)
            .await
            .unwrap();
        (store, clock)
    }

    async fn clock() -> (Arc<MemoryStore>, SessionClock) {
        clock_with(Durations::default()).await
    }

    #[tokio::test]
    async fn load_or_init_creates_and_persists_initial_state() {
        let (store, clock) = clock().await;
        assert_eq!(clock.state().remaining_seconds, 25 * 60);
        assert!(!clock.state().running);

        let doc = store.get("session/u1").await.unwrap().unwrap();
        assert_eq!(doc["sessionsCompleted"], 0);
        assert_eq!(doc["mode"], "focus");
    }

    #[tokio::test]
    async fn load_or_init_reads_existing_document() {
        let (store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();

        let again = SessionClock::load_or_init(store, "u1", Durations::default())
            .await
            .unwrap();
        assert!(again.state().running);
        assert_eq!(again.state().end_timestamp, clock.state().end_timestamp);
    }

    #[tokio::test]
    async fn load_or_init_surfaces_unavailable_store() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let err = SessionClock::load_or_init(store, "u1", Durations::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ClockError::PersistenceUnavailable(_)));
    }

    #[tokio::test]
    async fn start_then_reconcile_preserves_remaining() {
        let (_store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();
        let r = clock.reconcile(NOW);
        assert_eq!(r.remaining_seconds, 25 * 60);
        assert!(r.running);
    }

    #[tokio::test]
    async fn start_while_running_is_invalid() {
        let (_store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();
        let err = clock.start(NOW + 1000).await.unwrap_err();
        assert!(matches!(err, ClockError::InvalidTransition { action: "start", .. }));
    }

    #[tokio::test]
    async fn pause_while_paused_is_invalid() {
        let (_store, mut clock) = clock().await;
        let err = clock.pause(NOW).await.unwrap_err();
        assert!(matches!(err, ClockError::InvalidTransition { action: "pause", .. }));
    }

    #[tokio::test]
    async fn pause_start_pause_roundtrip_is_exact() {
        let (_store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();
        clock.pause(NOW).await.unwrap();
        let frozen = clock.state().remaining_seconds;

        clock.start(NOW).await.unwrap();
        clock.pause(NOW).await.unwrap();
        assert_eq!(clock.state().remaining_seconds, frozen);
    }

    #[tokio::test]
    async fn pause_freezes_elapsed_remaining_and_clears_deadline() {
        let (store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();
        clock.pause(NOW + 10_000).await.unwrap();

        assert_eq!(clock.state().remaining_seconds, 25 * 60 - 10);
        assert_eq!(clock.state().end_timestamp, 0);

        let doc = store.get("session/u1").await.unwrap().unwrap();
        assert_eq!(doc["remainingSeconds"], 25 * 60 - 10);
        assert_eq!(doc["running"], false);
    }

    #[tokio::test]
    async fn change_mode_abandons_without_counting() {
        let (_store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();

        let event = clock.change_mode(Mode::ShortBreak).await.unwrap();
        match event {
            ClockEvent::ModeChanged { mode, remaining_seconds, .. } => {
                assert_eq!(mode, Mode::ShortBreak);
                assert_eq!(remaining_seconds, 300);
            }
            other => panic!("expected ModeChanged, got {other:?}"),
        }
        assert!(!clock.state().running);
        assert_eq!(clock.state().sessions_completed, 0);
    }

    #[tokio::test]
    async fn completion_is_idempotent() {
        let (_store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();

        let first = clock.complete_session().await.unwrap();
        assert!(first.is_some());
        assert_eq!(clock.state().sessions_completed, 1);

        let second = clock.complete_session().await.unwrap();
        assert!(second.is_none());
        assert_eq!(clock.state().sessions_completed, 1);
    }

    #[tokio::test]
    async fn completion_persists_flag_and_counter_together() {
        let (store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();
        clock.complete_session().await.unwrap();

        let doc = store.get("session/u1").await.unwrap().unwrap();
        assert_eq!(doc["running"], false);
        assert_eq!(doc["sessionsCompleted"], 1);
        assert_eq!(doc["remainingSeconds"], 0);
    }

    #[tokio::test]
    async fn break_completion_does_not_count() {
        let (_store, mut clock) = clock().await;
        clock.change_mode(Mode::ShortBreak).await.unwrap();
        clock.start(NOW).await.unwrap();

        let event = clock.complete_session().await.unwrap();
        assert!(event.is_some());
        assert_eq!(clock.state().sessions_completed, 0);
    }

    #[tokio::test]
    async fn completion_falls_back_to_create_when_document_vanished() {
        let (_store, clock) = clock().await;

        // Same running state, but the backing document never existed --
        // e.g. wiped by account management outside the core.
        let empty = Arc::new(MemoryStore::new());
        let mut orphaned = SessionClock {
            user_id: clock.user_id().to_string(),
            durations: Durations::default(),
            store: empty.clone(),
            state: SessionState {
                running: true,
                end_timestamp: NOW,
                ..clock.state().clone()
            },
        };

        let event = orphaned.complete_session().await.unwrap();
        assert!(event.is_some());
        let doc = empty.get("session/u1").await.unwrap().unwrap();
        assert_eq!(doc["sessionsCompleted"], 1);
        assert_eq!(doc["running"], false);
    }

    #[tokio::test]
    async fn failed_completion_retries_on_next_tick() {
        let (store, mut clock) = clock_with(Durations {
            focus_secs: 2,
            short_break_secs: 300,
            long_break_secs: 900,
        })
        .await;
        clock.start(NOW).await.unwrap();

        store.set_offline(true);
        let err = clock.tick(NOW + 2000).await.unwrap_err();
        assert!(matches!(err, ClockError::PersistenceUnavailable(_)));
        // Local state unchanged: still running, still due for completion.
        assert!(clock.state().running);
        assert_eq!(clock.state().sessions_completed, 0);

        store.set_offline(false);
        let event = clock.tick(NOW + 3000).await.unwrap();
        assert!(matches!(event, Some(ClockEvent::SessionCompleted { .. })));
        assert_eq!(clock.state().sessions_completed, 1);
    }

    #[tokio::test]
    async fn ticks_after_completion_return_none() {
        let (_store, mut clock) = clock_with(Durations {
            focus_secs: 2,
            short_break_secs: 300,
            long_break_secs: 900,
        })
        .await;
        clock.start(NOW).await.unwrap();

        assert!(clock.tick(NOW + 1000).await.unwrap().is_none());
        assert!(clock.tick(NOW + 2000).await.unwrap().is_some());
        assert!(clock.tick(NOW + 3000).await.unwrap().is_none());
        assert_eq!(clock.snapshot(NOW + 3000).remaining_seconds, 0);
    }

    #[tokio::test]
    async fn start_after_completion_begins_fresh_nominal_session() {
        let (_store, mut clock) = clock().await;
        clock.start(NOW).await.unwrap();
        clock.complete_session().await.unwrap();

        clock.start(NOW + 5000).await.unwrap();
        assert_eq!(clock.state().remaining_seconds, 25 * 60);
        assert!(clock.state().running);
    }

    #[tokio::test]
    async fn focus_lock_survives_timer_writes() {
        let (store, mut clock) = clock().await;
        clock.set_focus_lock(true).await.unwrap();
        clock.start(NOW).await.unwrap();
        clock.pause(NOW + 1000).await.unwrap();
        clock.change_mode(Mode::LongBreak).await.unwrap();

        let doc = store.get("session/u1").await.unwrap().unwrap();
        assert_eq!(doc["focusLockEnabled"], true);

        let reloaded = SessionClock::load_or_init(store, "u1", Durations::default())
            .await
            .unwrap();
        assert!(reloaded.state().focus_lock_enabled);
    }

    #[tokio::test]
    async fn reset_sessions_zeroes_counter_only() {
        let (store, mut clock) = clock().await;
        clock.set_focus_lock(true).await.unwrap();
        clock.start(NOW).await.unwrap();
        clock.complete_session().await.unwrap();
        assert_eq!(clock.state().sessions_completed, 1);

        reset_sessions(store.as_ref(), "u1").await.unwrap();
        let doc = store.get("session/u1").await.unwrap().unwrap();
        assert_eq!(doc["sessionsCompleted"], 0);
        assert_eq!(doc["focusLockEnabled"], true);
        assert_eq!(doc["mode"], "focus");
    }

    #[test]
    fn format_remaining_pads_and_grows() {
        assert_eq!(format_remaining(0), "00:00");
        assert_eq!(format_remaining(65), "01:05");
        assert_eq!(format_remaining(25 * 60), "25:00");
        assert_eq!(format_remaining(125 * 60), "125:00");
    }
}
