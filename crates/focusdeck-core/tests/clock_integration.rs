//! End-to-end tests for the session clock.
//!
//! These drive the full load -> start -> tick -> complete lifecycle over
//! both stores, including reloads (simulated restarts), suspension past the
//! deadline, and two clocks racing on the same document.

use std::sync::Arc;

use focusdeck_core::clock::{self, reset_sessions};
use focusdeck_core::{
    ClockError, ClockEvent, Durations, MemoryStore, Mode, SessionClock, SqliteStore, StateStore,
};

const T0: i64 = 1_700_000_000_000;

fn two_second_focus() -> Durations {
    Durations {
        focus_secs: 2,
        short_break_secs: 300,
        long_break_secs: 900,
    }
}

#[tokio::test]
async fn focus_session_completes_exactly_once() {
    let store = Arc::new(MemoryStore::new());
    let mut clock = SessionClock::load_or_init(store.clone(), "u1", two_second_focus())
        .await
        .unwrap();

    clock.start(T0).await.unwrap();

    // 1 s cadence. The deadline elapses on the second tick.
    let mut completions = 0;
    for step in 1..=5i64 {
        if let Some(event) = clock.tick(T0 + step * 1000).await.unwrap() {
            assert!(matches!(event, ClockEvent::SessionCompleted { .. }));
            assert_eq!(step, 2);
            completions += 1;
        }
    }
    assert_eq!(completions, 1);
    assert_eq!(clock.state().sessions_completed, 1);
    assert_eq!(clock.snapshot(T0 + 5000).remaining_seconds, 0);
    assert!(!clock.state().running);
}

#[tokio::test]
async fn reload_resumes_running_session_from_deadline() {
    let store = Arc::new(MemoryStore::new());
    let mut clock = SessionClock::load_or_init(store.clone(), "u1", Durations::default())
        .await
        .unwrap();
    clock.start(T0).await.unwrap();
    drop(clock);

    // A fresh process 40 seconds later: remaining comes from the absolute
    // deadline, not from any counter the dead process held.
    let reloaded = SessionClock::load_or_init(store, "u1", Durations::default())
        .await
        .unwrap();
    let r = reloaded.reconcile(T0 + 40_000);
    assert!(r.running);
    assert_eq!(r.remaining_seconds, 25 * 60 - 40);
    assert!(!r.needs_completion);
}

#[tokio::test]
async fn suspension_past_deadline_finalizes_on_reload() {
    let store = Arc::new(MemoryStore::new());
    let mut clock = SessionClock::load_or_init(store.clone(), "u1", two_second_focus())
        .await
        .unwrap();
    clock.start(T0).await.unwrap();
    drop(clock);

    // The device slept far past the end: no phantom countdown, the session
    // is finished the moment it is observed.
    let mut reloaded = SessionClock::load_or_init(store, "u1", two_second_focus())
        .await
        .unwrap();
    let r = reloaded.reconcile(T0 + 3_600_000);
    assert!(r.needs_completion);
    assert_eq!(r.remaining_seconds, 0);

    let event = reloaded.tick(T0 + 3_600_000).await.unwrap();
    assert!(matches!(event, Some(ClockEvent::SessionCompleted { .. })));
    assert_eq!(reloaded.state().sessions_completed, 1);

    // Already handled: later ticks are quiet.
    assert!(reloaded.tick(T0 + 3_601_000).await.unwrap().is_none());
}

#[tokio::test]
async fn racing_completions_count_once() {
    let store = Arc::new(MemoryStore::new());
    let mut tab_a = SessionClock::load_or_init(store.clone(), "u1", two_second_focus())
        .await
        .unwrap();
    tab_a.start(T0).await.unwrap();

    // Second tab loads the running document before either finishes.
    let mut tab_b = SessionClock::load_or_init(store.clone(), "u1", two_second_focus())
        .await
        .unwrap();

    assert!(tab_a.tick(T0 + 2000).await.unwrap().is_some());
    // Tab B still believes the session is running and completes it again;
    // its update carries the same folded counter value, not an increment
    // on top of tab A's.
    assert!(tab_b.tick(T0 + 2500).await.unwrap().is_some());

    let doc = store.get("session/u1").await.unwrap().unwrap();
    assert_eq!(doc["sessionsCompleted"], 1);
    assert_eq!(doc["running"], false);
}

#[tokio::test]
async fn last_writer_wins_across_tabs() {
    let store = Arc::new(MemoryStore::new());
    let mut tab_a = SessionClock::load_or_init(store.clone(), "u1", Durations::default())
        .await
        .unwrap();
    let mut tab_b = SessionClock::load_or_init(store.clone(), "u1", Durations::default())
        .await
        .unwrap();

    tab_a.start(T0).await.unwrap();
    tab_b.change_mode(Mode::ShortBreak).await.unwrap();

    // No merge of countdown state: tab B's abandon supersedes tab A's start.
    let fresh = SessionClock::load_or_init(store, "u1", Durations::default())
        .await
        .unwrap();
    assert_eq!(fresh.state().mode, Mode::ShortBreak);
    assert!(!fresh.state().running);
    assert_eq!(fresh.state().remaining_seconds, 300);
}

#[tokio::test]
async fn store_outage_never_fabricates_zero_time() {
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);
    let err = SessionClock::load_or_init(store.clone(), "u1", Durations::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClockError::PersistenceUnavailable(_)));

    // Back online, the next attempt initializes normally.
    store.set_offline(false);
    let clock = SessionClock::load_or_init(store, "u1", Durations::default())
        .await
        .unwrap();
    assert_eq!(clock.state().remaining_seconds, 25 * 60);
}

#[tokio::test]
async fn sqlite_lifecycle_survives_process_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("focusdeck.db");

    {
        let store = Arc::new(SqliteStore::open(&path).unwrap());
        let mut clock = SessionClock::load_or_init(store.clone(), "u1", two_second_focus())
            .await
            .unwrap();
        clock.set_focus_lock(true).await.unwrap();
        clock.start(T0).await.unwrap();
    }

    // "Restart": a new store over the same file.
    let store = Arc::new(SqliteStore::open(&path).unwrap());
    let mut clock = SessionClock::load_or_init(store.clone(), "u1", two_second_focus())
        .await
        .unwrap();
    assert!(clock.state().running);
    assert!(clock.state().focus_lock_enabled);

    let event = clock.tick(T0 + 10_000).await.unwrap();
    assert!(matches!(event, Some(ClockEvent::SessionCompleted { .. })));

    reset_sessions(store.as_ref(), "u1").await.unwrap();
    let doc = store.get("session/u1").await.unwrap().unwrap();
    assert_eq!(doc["sessionsCompleted"], 0);
    assert_eq!(doc["focusLockEnabled"], true);
}

#[tokio::test]
async fn separate_users_never_interfere() {
    let store = Arc::new(MemoryStore::new());
    let mut alice = SessionClock::load_or_init(store.clone(), "alice", two_second_focus())
        .await
        .unwrap();
    let mut bob = SessionClock::load_or_init(store.clone(), "bob", two_second_focus())
        .await
        .unwrap();

    alice.start(T0).await.unwrap();
    alice.tick(T0 + 2000).await.unwrap();
    bob.change_mode(Mode::LongBreak).await.unwrap();

    assert_eq!(alice.state().sessions_completed, 1);
    assert_eq!(bob.state().sessions_completed, 0);
    let bob_doc = store.get("session/bob").await.unwrap().unwrap();
    assert_eq!(bob_doc["mode"], "longBreak");
    let alice_doc = store.get("session/alice").await.unwrap().unwrap();
    assert_eq!(alice_doc["sessionsCompleted"], 1);
}

#[tokio::test]
async fn start_reconcile_tolerance_against_real_clock() {
    // Property 8.1 against the real wall clock: start then immediately
    // reconcile must agree within one second of jitter.
    let store = Arc::new(MemoryStore::new());
    let mut clock = SessionClock::load_or_init(store, "u1", Durations::default())
        .await
        .unwrap();
    clock.start(clock::now_ms()).await.unwrap();
    let r = clock.reconcile(clock::now_ms());
    let nominal = 25 * 60;
    assert!(r.remaining_seconds >= nominal - 1 && r.remaining_seconds <= nominal);
}
