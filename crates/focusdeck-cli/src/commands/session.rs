use std::sync::Arc;

use clap::{Subcommand, ValueEnum};
use focusdeck_core::clock::{self, now_ms};
use focusdeck_core::{
    identity_channel, ClockDriver, ClockEvent, Config, Mode, SessionClock, SqliteStore, StateStore,
};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Start or resume the countdown
    Start,
    /// Pause the countdown
    Pause,
    /// Switch mode (abandons any in-progress session)
    Mode {
        /// Target mode
        mode: ModeArg,
    },
    /// Enable or disable the focus lock
    Lock {
        /// on = controls are inert while running
        state: LockState,
    },
    /// Print the current read model as JSON
    Status,
    /// Run the tick scheduler in the foreground, printing each event
    Watch,
    /// Reset the completed-sessions counter to zero
    Reset,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Focus,
    ShortBreak,
    LongBreak,
}

impl From<ModeArg> for Mode {
    fn from(arg: ModeArg) -> Self {
        match arg {
            ModeArg::Focus => Mode::Focus,
            ModeArg::ShortBreak => Mode::ShortBreak,
            ModeArg::LongBreak => Mode::LongBreak,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
pub enum LockState {
    On,
    Off,
}

fn open_store() -> Result<Arc<SqliteStore>, Box<dyn std::error::Error>> {
    let path = focusdeck_core::config::data_dir()?.join("focusdeck.db");
    Ok(Arc::new(SqliteStore::open(path)?))
}

fn local_user() -> Result<String, Box<dyn std::error::Error>> {
    Ok(focusdeck_core::identity::local_user_id_at(
        &focusdeck_core::config::data_dir()?,
    )?)
}

/// Load the clock and settle any session that elapsed while no process was
/// watching, printing its completion event.
async fn load_settled(
    store: Arc<dyn StateStore>,
    user_id: &str,
    config: &Config,
) -> Result<SessionClock, Box<dyn std::error::Error>> {
    let mut clock = SessionClock::load_or_init(store, user_id, config.durations()?).await?;
    if let Some(event) = clock.tick(now_ms()).await? {
        print_event(&event, config)?;
    }
    Ok(clock)
}

fn print_event(event: &ClockEvent, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(event)?);
    if config.notifications.enabled {
        if let ClockEvent::SessionCompleted { .. } = event {
            // Terminal bell as the audio cue.
            print!("\x07");
        }
    }
    Ok(())
}

pub async fn run(action: SessionAction) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load_or_default();
    let store = open_store()?;
    let user_id = local_user()?;

    match action {
        SessionAction::Start => {
            let mut clock = load_settled(store, &user_id, &config).await?;
            let event = clock.start(now_ms()).await?;
            print_event(&event, &config)?;
        }
        SessionAction::Pause => {
            let mut clock = load_settled(store, &user_id, &config).await?;
            if clock.state().focus_lock_enabled && clock.state().running {
                return Err("focus lock is enabled; controls are inert while running".into());
            }
            let event = clock.pause(now_ms()).await?;
            print_event(&event, &config)?;
        }
        SessionAction::Mode { mode } => {
            let mut clock = load_settled(store, &user_id, &config).await?;
            if clock.state().focus_lock_enabled && clock.state().running {
                return Err("focus lock is enabled; controls are inert while running".into());
            }
            let event = clock.change_mode(mode.into()).await?;
            print_event(&event, &config)?;
        }
        SessionAction::Lock { state } => {
            let mut clock = load_settled(store, &user_id, &config).await?;
            let enabled = matches!(state, LockState::On);
            clock.set_focus_lock(enabled).await?;
            println!("focus lock {}", if enabled { "on" } else { "off" });
        }
        SessionAction::Status => {
            let clock = load_settled(store, &user_id, &config).await?;
            let snapshot = clock.snapshot(now_ms());
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        SessionAction::Watch => {
            let (identity, identity_rx) = identity_channel();
            identity.sign_in(user_id);

            let (driver, mut events) = ClockDriver::spawn(
                store,
                config.durations()?,
                identity_rx,
                config.tick_interval(),
            );

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {
                        driver.cancel();
                        break;
                    }
                    event = events.recv() => {
                        match event {
                            Some(event) => print_event(&event, &config)?,
                            None => break,
                        }
                    }
                }
            }
        }
        SessionAction::Reset => {
            clock::reset_sessions(store.as_ref(), &user_id).await?;
            println!("sessions counter reset");
        }
    }

    Ok(())
}
