use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    dst::TimeZoneConfig,
    error::StoreError,
    lighting::LightingState,
    schedule::{TimerPair, TimerTable},
    store::SettingsStore,
};

pub const KEY_TIMESTAMP: &str = "timestamp";
pub const KEY_TZ_OFFSET: &str = "tz";
pub const KEY_AUTO_DST: &str = "auto_dst";
pub const KEY_BRIGHTNESS: &str = "brightness";
pub const KEY_RED: &str = "red";
pub const KEY_GREEN: &str = "green";
pub const KEY_BLUE: &str = "blue";

fn timer_key(index: usize, field: &str) -> String {
    format!("t{index}_{field}")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub tick_interval_ms: u64,
    pub max_plausible_elapsed_ms: u64,
    pub clock_checkpoint_secs: u32,
    pub pixel_count: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 200,
            max_plausible_elapsed_ms: 86_400_000,
            clock_checkpoint_secs: 900,
            pixel_count: 15,
        }
    }
}

impl DeviceConfig {
    pub fn sanitize(&mut self) {
        self.tick_interval_ms = self.tick_interval_ms.clamp(10, 1_000);
        self.max_plausible_elapsed_ms = self.max_plausible_elapsed_ms.max(60_000);
        self.pixel_count = self.pixel_count.clamp(1, 1_024);
    }
}

// A missing, unreadable or mistyped key falls back to its own default.
fn read_u8<S: SettingsStore + ?Sized>(store: &S, key: &str, default: u8) -> u8 {
    store.get_u8(key, default).unwrap_or_else(|err| {
        warn!("settings key `{key}` unreadable, using {default}: {err}");
        default
    })
}

fn read_i8<S: SettingsStore + ?Sized>(store: &S, key: &str, default: i8) -> i8 {
    store.get_i8(key, default).unwrap_or_else(|err| {
        warn!("settings key `{key}` unreadable, using {default}: {err}");
        default
    })
}

fn read_u32<S: SettingsStore + ?Sized>(store: &S, key: &str, default: u32) -> u32 {
    store.get_u32(key, default).unwrap_or_else(|err| {
        warn!("settings key `{key}` unreadable, using {default}: {err}");
        default
    })
}

pub fn load_epoch<S: SettingsStore + ?Sized>(store: &S) -> u32 {
    read_u32(store, KEY_TIMESTAMP, 0)
}

pub fn save_epoch<S: SettingsStore + ?Sized>(store: &mut S, epoch: u32) -> Result<(), StoreError> {
    store.put_u32(KEY_TIMESTAMP, epoch)
}

pub fn load_timezone<S: SettingsStore + ?Sized>(store: &S) -> TimeZoneConfig {
    let defaults = TimeZoneConfig::default();
    TimeZoneConfig {
        utc_offset_hours: read_i8(store, KEY_TZ_OFFSET, defaults.utc_offset_hours),
        auto_dst_enabled: read_u8(store, KEY_AUTO_DST, u8::from(defaults.auto_dst_enabled)) != 0,
    }
}

pub fn save_timezone<S: SettingsStore + ?Sized>(
    store: &mut S,
    timezone: &TimeZoneConfig,
) -> Result<(), StoreError> {
    store.put_i8(KEY_TZ_OFFSET, timezone.utc_offset_hours)?;
    store.put_u8(KEY_AUTO_DST, u8::from(timezone.auto_dst_enabled))
}

pub fn load_lighting<S: SettingsStore + ?Sized>(store: &S) -> LightingState {
    let defaults = LightingState::default();
    LightingState {
        brightness: read_u8(store, KEY_BRIGHTNESS, defaults.brightness),
        red: read_u8(store, KEY_RED, defaults.red),
        green: read_u8(store, KEY_GREEN, defaults.green),
        blue: read_u8(store, KEY_BLUE, defaults.blue),
    }
}

pub fn save_lighting<S: SettingsStore + ?Sized>(
    store: &mut S,
    lighting: &LightingState,
) -> Result<(), StoreError> {
    store.put_u8(KEY_BRIGHTNESS, lighting.brightness)?;
    store.put_u8(KEY_RED, lighting.red)?;
    store.put_u8(KEY_GREEN, lighting.green)?;
    store.put_u8(KEY_BLUE, lighting.blue)
}

/// Loads both pairs. Stored hours and minutes are clamped into range.
pub fn load_timers<S: SettingsStore + ?Sized>(store: &S) -> TimerTable {
    let defaults = TimerTable::default();
    let mut pairs = *defaults.pairs();

    for (index, pair) in pairs.iter_mut().enumerate() {
        let on = (
            read_u8(store, &timer_key(index, "on_h"), pair.on().hour),
            read_u8(store, &timer_key(index, "on_m"), pair.on().minute),
        );
        let off = (
            read_u8(store, &timer_key(index, "off_h"), pair.off().hour),
            read_u8(store, &timer_key(index, "off_m"), pair.off().minute),
        );
        let enabled = read_u8(store, &timer_key(index, "en"), u8::from(pair.is_enabled())) != 0;
        *pair = TimerPair::from_parts(on, off, enabled);
    }

    TimerTable::new(pairs)
}

pub fn save_timers<S: SettingsStore + ?Sized>(
    store: &mut S,
    timers: &TimerTable,
) -> Result<(), StoreError> {
    for (index, pair) in timers.pairs().iter().enumerate() {
        store.put_u8(&timer_key(index, "on_h"), pair.on().hour)?;
        store.put_u8(&timer_key(index, "on_m"), pair.on().minute)?;
        store.put_u8(&timer_key(index, "off_h"), pair.off().hour)?;
        store.put_u8(&timer_key(index, "off_m"), pair.off().minute)?;
        store.put_u8(&timer_key(index, "en"), u8::from(pair.is_enabled()))?;
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersistedSettings {
    pub epoch_seconds: u32,
    pub timezone: TimeZoneConfig,
    pub lighting: LightingState,
    pub timers: TimerTable,
}

impl PersistedSettings {
    pub fn load<S: SettingsStore + ?Sized>(store: &S) -> Self {
        let mut settings = Self {
            epoch_seconds: load_epoch(store),
            timezone: load_timezone(store),
            lighting: load_lighting(store),
            timers: load_timers(store),
        };
        settings.sanitize();
        debug!("settings loaded: {settings:?}");
        settings
    }

    pub fn save<S: SettingsStore + ?Sized>(&self, store: &mut S) -> Result<(), StoreError> {
        save_epoch(store, self.epoch_seconds)?;
        save_timezone(store, &self.timezone)?;
        save_lighting(store, &self.lighting)?;
        save_timers(store, &self.timers)
    }

    pub fn sanitize(&mut self) {
        self.timezone.sanitize();
        self.lighting.sanitize();
    }
}
