use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::SensorSnapshot;

/// Operational mode gating what the agent may do.
///
/// The mode is a single process-wide value owned by the mode manager; every
/// other component reads it through a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    Normal,
    Alert,
    Degraded,
    Lockdown,
    Recovery,
}

impl Mode {
    pub const ALL: [Mode; 5] = [
        Mode::Normal,
        Mode::Alert,
        Mode::Degraded,
        Mode::Lockdown,
        Mode::Recovery,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "NORMAL",
            Mode::Alert => "ALERT",
            Mode::Degraded => "DEGRADED",
            Mode::Lockdown => "LOCKDOWN",
            Mode::Recovery => "RECOVERY",
        }
    }

    /// The fixed transition table. Any pair not listed here is rejected.
    pub fn allowed_targets(&self) -> &'static [Mode] {
        match self {
            Mode::Normal => &[Mode::Alert, Mode::Degraded],
            Mode::Alert => &[Mode::Normal, Mode::Degraded, Mode::Lockdown],
            Mode::Degraded => &[Mode::Lockdown],
            Mode::Lockdown => &[Mode::Recovery],
            Mode::Recovery => &[Mode::Normal],
        }
    }

    pub fn can_transition_to(&self, target: Mode) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NORMAL" => Ok(Mode::Normal),
            "ALERT" => Ok(Mode::Alert),
            "DEGRADED" => Ok(Mode::Degraded),
            "LOCKDOWN" => Ok(Mode::Lockdown),
            "RECOVERY" => Ok(Mode::Recovery),
            other => Err(crate::Error::Config(format!("unknown mode \"{other}\""))),
        }
    }
}

/// One entry in the mode manager's append-only transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub timestamp: DateTime<Utc>,
    pub from_mode: Mode,
    pub to_mode: Mode,
    pub reason: String,
    #[serde(default)]
    pub sensor_snapshot: SensorSnapshot,
}
