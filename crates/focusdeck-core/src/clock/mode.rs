use serde::{Deserialize, Serialize};

/// Session mode. Determines the nominal duration the countdown resets to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Mode {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Focus
    }
}

impl Mode {
    /// Human-readable label, as shown by the presentation layer.
    pub fn label(&self) -> &'static str {
        match self {
            Mode::Focus => "Focus",
            Mode::ShortBreak => "Short Break",
            Mode::LongBreak => "Long Break",
        }
    }
}

/// Nominal session lengths per mode, in seconds.
///
/// The clock treats this as constant input; zero durations are invalid
/// configuration and are rejected before a `Durations` is ever built
/// (see `Config::durations`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Durations {
    pub focus_secs: u64,
    pub short_break_secs: u64,
    pub long_break_secs: u64,
}

impl Durations {
    /// Build from whole minutes, saturating rather than overflowing.
    pub fn from_minutes(focus_min: u64, short_break_min: u64, long_break_min: u64) -> Self {
        Self {
            focus_secs: focus_min.saturating_mul(60),
            short_break_secs: short_break_min.saturating_mul(60),
            long_break_secs: long_break_min.saturating_mul(60),
        }
    }

    /// Fixed lookup of the nominal duration for `mode`.
    pub fn nominal(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Focus => self.focus_secs,
            Mode::ShortBreak => self.short_break_secs,
            Mode::LongBreak => self.long_break_secs,
        }
    }
}

impl Default for Durations {
    /// 25 / 5 / 15 minutes.
    fn default() -> Self {
        Self::from_minutes(25, 5, 15)
    }
}
