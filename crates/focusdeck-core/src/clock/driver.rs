//! Tick scheduler and command surface for one user's clock.
//!
//! A cooperative single-owner loop: the 1 s interval task is the only
//! writer of derived state, persistence writes are serialized behind the
//! clock mutex, and a tick that fires while a write is still in flight
//! skips rather than overlaps it. The identity watch halts the scheduler
//! while signed out; cancellation aborts the task and leaves persisted
//! state untouched.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::error::ClockError;
use crate::events::ClockEvent;
use crate::identity::UserId;
use crate::store::StateStore;

use super::engine::{now_ms, ClockSnapshot, SessionClock};
use super::mode::{Durations, Mode};

/// Owns the ticker task for one user's clock and exposes the command
/// surface the presentation layer calls.
pub struct ClockDriver {
    store: Arc<dyn StateStore>,
    durations: Durations,
    identity: watch::Receiver<Option<UserId>>,
    clock: Arc<Mutex<Option<SessionClock>>>,
    events: mpsc::UnboundedSender<ClockEvent>,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ClockDriver {
    /// Spawn the scheduler. Returns the driver and the event stream the
    /// presentation layer consumes.
    pub fn spawn(
        store: Arc<dyn StateStore>,
        durations: Durations,
        identity: watch::Receiver<Option<UserId>>,
        tick_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<ClockEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let clock: Arc<Mutex<Option<SessionClock>>> = Arc::new(Mutex::new(None));

        let task_store = store.clone();
        let task_clock = clock.clone();
        let task_events = events_tx.clone();
        let mut task_identity = identity.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick_interval);
            let mut current_user = task_identity.borrow_and_update().clone();
            loop {
                tokio::select! {
                    changed = task_identity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        current_user = task_identity.borrow_and_update().clone();
                        // Signed out or re-keyed: drop the in-memory clock.
                        // Persisted state is untouched either way.
                        *task_clock.lock().await = None;
                    }
                    _ = interval.tick() => {
                        let Some(user_id) = current_user.clone() else {
                            continue;
                        };
                        // Serialize writes per user: if a command or an
                        // earlier tick still holds the clock, a persistence
                        // call is in flight -- skip this firing rather than
                        // overlap it.
                        let Ok(mut guard) = task_clock.try_lock() else {
                            continue;
                        };
                        if guard.is_none() {
                            match SessionClock::load_or_init(
                                task_store.clone(),
                                &user_id,
                                durations,
                            )
                            .await
                            {
                                Ok(loaded) => *guard = Some(loaded),
                                Err(err) => {
                                    warn!(%err, "session state still loading, retrying next tick");
                                    continue;
                                }
                            }
                        }
                        if let Some(clock) = guard.as_mut() {
                            let now = now_ms();
                            match clock.tick(now).await {
                                Ok(Some(event)) => {
                                    let _ = task_events.send(event);
                                }
                                Ok(None) => {}
                                Err(err) => {
                                    warn!(%err, "tick persistence failed, continuing from last known state");
                                }
                            }
                            let _ = task_events.send(snapshot_event(clock.snapshot(now)));
                        }
                    }
                }
            }
        });

        (
            Self {
                store,
                durations,
                identity,
                clock,
                events: events_tx,
                ticker: std::sync::Mutex::new(Some(handle)),
            },
            events_rx,
        )
    }

    /// Start or resume the countdown.
    pub async fn start(&self) -> Result<ClockEvent, ClockError> {
        let mut guard = self.loaded().await?;
        let clock = guard.as_mut().ok_or(ClockError::SignedOut)?;
        let event = clock.start(now_ms()).await?;
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    /// Pause the countdown. Refused while focus lock is engaged.
    pub async fn pause(&self) -> Result<ClockEvent, ClockError> {
        let mut guard = self.loaded().await?;
        let clock = guard.as_mut().ok_or(ClockError::SignedOut)?;
        Self::check_focus_lock(clock, "pause")?;
        let event = clock.pause(now_ms()).await?;
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    /// Switch mode. Refused while focus lock is engaged.
    pub async fn change_mode(&self, mode: Mode) -> Result<ClockEvent, ClockError> {
        let mut guard = self.loaded().await?;
        let clock = guard.as_mut().ok_or(ClockError::SignedOut)?;
        Self::check_focus_lock(clock, "change mode")?;
        let event = clock.change_mode(mode).await?;
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    /// Toggle the focus lock. Always allowed, otherwise a lock could never
    /// be released.
    pub async fn set_focus_lock(&self, enabled: bool) -> Result<(), ClockError> {
        let mut guard = self.loaded().await?;
        let clock = guard.as_mut().ok_or(ClockError::SignedOut)?;
        clock.set_focus_lock(enabled).await
    }

    /// Current read model.
    pub async fn snapshot(&self) -> Result<ClockSnapshot, ClockError> {
        let mut guard = self.loaded().await?;
        let clock = guard.as_mut().ok_or(ClockError::SignedOut)?;
        Ok(clock.snapshot(now_ms()))
    }

    /// Stop the scheduler. Persisted state is untouched; the next
    /// `load_or_init` reconciles from whatever was last durably written.
    pub fn cancel(&self) {
        let mut guard = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = guard.take() {
            handle.abort();
        }
    }

    /// Lock the clock, loading it first if the ticker has not yet.
    async fn loaded(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, Option<SessionClock>>, ClockError> {
        let user_id = self
            .identity
            .borrow()
            .clone()
            .ok_or(ClockError::SignedOut)?;
        let mut guard = self.clock.lock().await;
        if guard.is_none() {
            *guard =
                Some(SessionClock::load_or_init(self.store.clone(), &user_id, self.durations).await?);
        }
        Ok(guard)
    }

    fn check_focus_lock(clock: &SessionClock, action: &'static str) -> Result<(), ClockError> {
        if clock.state().focus_lock_enabled && clock.state().running {
            return Err(ClockError::InvalidTransition {
                action,
                current: "focus-locked",
            });
        }
        Ok(())
    }
}

impl Drop for ClockDriver {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn snapshot_event(snapshot: ClockSnapshot) -> ClockEvent {
    ClockEvent::StateSnapshot {
        mode: snapshot.mode,
        remaining_seconds: snapshot.remaining_seconds,
        remaining_display: snapshot.remaining_display,
        running: snapshot.running,
        sessions_completed: snapshot.sessions_completed,
        focus_lock_enabled: snapshot.focus_lock_enabled,
        at: Utc::now(),
    }
}
