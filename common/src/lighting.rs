use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const MAX_BRIGHTNESS: u8 = 100;

/// Receives the lighting state; applies it uniformly to every pixel.
///
/// Implementations must be idempotent: the same state may be applied repeatedly.
pub trait LightingSink {
    fn apply(&mut self, lighting: &LightingState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightingState {
    pub brightness: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Default for LightingState {
    fn default() -> Self {
        Self {
            brightness: MAX_BRIGHTNESS,
            red: 0,
            green: 0,
            blue: 0,
        }
    }
}

impl LightingState {
    pub fn factory() -> Self {
        Self {
            brightness: MAX_BRIGHTNESS,
            red: 255,
            green: 255,
            blue: 255,
        }
    }

    pub fn set_brightness(&mut self, level: u8) -> Result<bool, CoreError> {
        if level > MAX_BRIGHTNESS {
            return Err(CoreError::invalid(format!(
                "brightness {level} outside 0..={MAX_BRIGHTNESS}"
            )));
        }
        let changed = self.brightness != level;
        self.brightness = level;
        Ok(changed)
    }

    pub fn set_color(&mut self, red: Option<u8>, green: Option<u8>, blue: Option<u8>) -> bool {
        let before = *self;
        self.red = red.unwrap_or(self.red);
        self.green = green.unwrap_or(self.green);
        self.blue = blue.unwrap_or(self.blue);
        before != *self
    }

    pub fn is_on(&self) -> bool {
        self.brightness > 0
    }

    pub fn scaled_rgb(&self) -> (u8, u8, u8) {
        let scale = |channel: u8| {
            (u16::from(channel) * u16::from(self.brightness) / u16::from(MAX_BRIGHTNESS)) as u8
        };
        (scale(self.red), scale(self.green), scale(self.blue))
    }

    pub fn sanitize(&mut self) {
        self.brightness = self.brightness.min(MAX_BRIGHTNESS);
    }
}
