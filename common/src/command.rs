use serde::{Deserialize, Serialize};

use crate::schedule::SlotKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetTime {
        timestamp: u32,
    },
    SetTimezoneOffset {
        hours: i8,
    },
    SetAutoDst {
        enabled: bool,
    },
    SetTimerSlot {
        pair: usize,
        kind: SlotKind,
        hour: u8,
        minute: u8,
    },
    SetPairEnabled {
        pair: usize,
        enabled: bool,
    },
    SetBrightness {
        level: u8,
    },
    SetColor {
        red: Option<u8>,
        green: Option<u8>,
        blue: Option<u8>,
    },
    /// Restores lighting and timezone defaults. Clock and timers are kept.
    ResetDefaults,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetTime { .. } => "set_time",
            Self::SetTimezoneOffset { .. } => "set_timezone_offset",
            Self::SetAutoDst { .. } => "set_auto_dst",
            Self::SetTimerSlot { .. } => "set_timer_slot",
            Self::SetPairEnabled { .. } => "set_pair_enabled",
            Self::SetBrightness { .. } => "set_brightness",
            Self::SetColor { .. } => "set_color",
            Self::ResetDefaults => "reset_defaults",
        }
    }
}
