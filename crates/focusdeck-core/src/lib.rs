//! # Focusdeck Core Library
//!
//! Session-clock core for the Focusdeck productivity app. It owns the
//! countdown state machine for one user's focus/break session and persists
//! it as a per-user document; the presentation layer (the CLI, or any GUI
//! shell) is a thin consumer of the read model and the event stream.
//!
//! ## Architecture
//!
//! - **Session Clock**: a wall-clock-based state machine. Remaining time is
//!   always reconstructed from the persisted absolute deadline, so the
//!   countdown survives restarts, suspensions, and multi-device drift.
//! - **Store port**: persistence is an injected [`StateStore`]
//!   (get/set/update by key with merge semantics); SQLite-backed in
//!   production, in-memory for tests.
//! - **Driver**: a cooperative 1 s tick scheduler that is the single writer
//!   of derived state and serializes persistence writes per user.
//! - **Identity**: a watch channel of the current user id; the scheduler
//!   halts while signed out.
//!
//! ## Key Components
//!
//! - [`SessionClock`]: state machine with write-through persistence
//! - [`ClockDriver`]: tick scheduler and command surface
//! - [`StateStore`]: persistence port ([`SqliteStore`], [`MemoryStore`])
//! - [`Config`]: TOML configuration (nominal durations, cadence)

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod identity;
pub mod store;

pub use clock::{
    ClockDriver, ClockSnapshot, Durations, Mode, SessionClock, SessionState,
};
pub use config::Config;
pub use error::ClockError;
pub use events::ClockEvent;
pub use identity::{identity_channel, IdentityHandle, UserId};
pub use store::{Document, MemoryStore, SqliteStore, StateStore, StoreError};
