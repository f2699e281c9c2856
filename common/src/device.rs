use log::{info, warn};

use crate::{
    clock::SoftwareRtc,
    command::Command,
    dst::{CivilDateTime, TimeZoneConfig},
    error::{CoreError, StoreError},
    lighting::{LightingSink, LightingState},
    schedule::{ScheduleEngine, TimerFired, TimerTable},
    settings::{self, DeviceConfig, PersistedSettings},
    store::SettingsStore,
    types::DeviceStatus,
};

/// Single owner of the clock, timezone, timer table and lighting state.
///
/// Every mutation goes through [`DeviceState::tick`] or [`DeviceState::handle`];
/// both persist synchronously before returning.
#[derive(Debug, Clone)]
pub struct DeviceState {
    config: DeviceConfig,
    rtc: SoftwareRtc,
    timezone: TimeZoneConfig,
    timers: TimerTable,
    lighting: LightingState,
    schedule: ScheduleEngine,
    last_persist_error: Option<String>,
}

impl DeviceState {
    /// Restores persisted settings; unreadable keys fall back to their defaults one by one.
    pub fn boot<S: SettingsStore + ?Sized>(config: DeviceConfig, store: &S, now_ms: u64) -> Self {
        Self::from_settings(config, PersistedSettings::load(store), now_ms)
    }

    pub fn from_settings(
        mut config: DeviceConfig,
        mut settings: PersistedSettings,
        now_ms: u64,
    ) -> Self {
        config.sanitize();
        settings.sanitize();

        let device = Self {
            rtc: SoftwareRtc::new(
                settings.epoch_seconds,
                now_ms,
                config.max_plausible_elapsed_ms,
            ),
            config,
            timezone: settings.timezone,
            timers: settings.timers,
            lighting: settings.lighting,
            schedule: ScheduleEngine::new(),
            last_persist_error: None,
        };

        info!(
            "device restored: local time {}, offset {:+}h, auto dst {}",
            device.local_time(),
            device.timezone.utc_offset_hours,
            device.timezone.auto_dst_enabled
        );
        device.warn_on_eu_rule_mismatch();
        device
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn rtc(&self) -> &SoftwareRtc {
        &self.rtc
    }

    pub fn timezone(&self) -> &TimeZoneConfig {
        &self.timezone
    }

    pub fn timers(&self) -> &TimerTable {
        &self.timers
    }

    pub fn lighting(&self) -> &LightingState {
        &self.lighting
    }

    pub fn last_persist_error(&self) -> Option<&str> {
        self.last_persist_error.as_deref()
    }

    pub fn local_time(&self) -> CivilDateTime {
        self.timezone.localize(self.rtc.now())
    }

    pub fn apply_lighting<L: LightingSink + ?Sized>(&self, sink: &mut L) {
        sink.apply(&self.lighting);
    }

    /// One control-loop pass: advance the clock, then fire due timer slots.
    ///
    /// Nobody waits on the result, so persistence failures are logged and kept
    /// in [`DeviceState::last_persist_error`].
    pub fn tick<S, L>(&mut self, now_ms: u64, store: &mut S, sink: &mut L) -> Vec<TimerFired>
    where
        S: SettingsStore + ?Sized,
        L: LightingSink + ?Sized,
    {
        self.rtc.advance(now_ms);
        let local = self.local_time();
        let fired = self.schedule.tick(&self.timers, &local);

        if !fired.is_empty() {
            for event in &fired {
                self.lighting.brightness = event.kind.brightness();
            }
            sink.apply(&self.lighting);

            let result = settings::save_lighting(store, &self.lighting)
                .and_then(|()| self.rtc.persist(store));
            let _ = self.record_persist("timer fire", result);
        } else if self.rtc.checkpoint_due(self.config.clock_checkpoint_secs) {
            let result = self.rtc.persist(store);
            let _ = self.record_persist("clock checkpoint", result);
        }

        fired
    }

    /// Validates, applies in memory, then persists.
    ///
    /// On `CoreError::Persistence` the in-memory change has already taken effect.
    pub fn handle<S, L>(
        &mut self,
        command: Command,
        now_ms: u64,
        store: &mut S,
        sink: &mut L,
    ) -> Result<DeviceStatus, CoreError>
    where
        S: SettingsStore + ?Sized,
        L: LightingSink + ?Sized,
    {
        let result = match command {
            Command::SetTime { timestamp } => {
                self.schedule.reset();
                self.rtc.set(timestamp, now_ms, store)
            }
            Command::SetTimezoneOffset { hours } => {
                self.timezone.utc_offset_hours = TimeZoneConfig::validate_offset(hours)?;
                info!("utc offset set to {hours:+}h");
                self.warn_on_eu_rule_mismatch();
                settings::save_timezone(store, &self.timezone)
            }
            Command::SetAutoDst { enabled } => {
                self.timezone.auto_dst_enabled = enabled;
                info!("auto dst {}", if enabled { "enabled" } else { "disabled" });
                self.warn_on_eu_rule_mismatch();
                settings::save_timezone(store, &self.timezone)
            }
            Command::SetTimerSlot {
                pair,
                kind,
                hour,
                minute,
            } => {
                self.timers.set_slot(pair, kind, hour, minute)?;
                info!("timer {pair} {} set to {hour:02}:{minute:02}", kind.as_str());
                settings::save_timers(store, &self.timers)
            }
            Command::SetPairEnabled { pair, enabled } => {
                self.timers.set_enabled(pair, enabled)?;
                info!("timer {pair} enabled={enabled}");
                settings::save_timers(store, &self.timers)
            }
            Command::SetBrightness { level } => {
                self.lighting.set_brightness(level)?;
                sink.apply(&self.lighting);
                settings::save_lighting(store, &self.lighting)
            }
            Command::SetColor { red, green, blue } => {
                self.lighting.set_color(red, green, blue);
                sink.apply(&self.lighting);
                settings::save_lighting(store, &self.lighting)
            }
            Command::ResetDefaults => {
                self.lighting = LightingState::factory();
                self.timezone = TimeZoneConfig::default();
                info!("lighting and timezone reset to defaults");
                sink.apply(&self.lighting);
                settings::save_lighting(store, &self.lighting)
                    .and_then(|()| settings::save_timezone(store, &self.timezone))
            }
        };

        self.record_persist(command.name(), result)?;
        Ok(self.status())
    }

    pub fn status(&self) -> DeviceStatus {
        let local = self.local_time();
        DeviceStatus {
            epoch_seconds: self.rtc.now(),
            local_time: local.to_string(),
            tz_offset_hours: self.timezone.utc_offset_hours,
            auto_dst: self.timezone.auto_dst_enabled,
            dst_active: local.dst_active,
            eu_rule_mismatch: self.timezone.eu_rule_mismatch(),
            brightness: self.lighting.brightness,
            red: self.lighting.red,
            green: self.lighting.green,
            blue: self.lighting.blue,
            timers: self.timers.pairs().to_vec(),
            next_event: self.timers.next_event(&local),
            last_persist_error: self.last_persist_error.clone(),
            clock_anomalies: self.rtc.anomaly_count(),
        }
    }

    fn record_persist(
        &mut self,
        context: &str,
        result: Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        match &result {
            Ok(()) => self.last_persist_error = None,
            Err(err) => {
                warn!("{context}: change kept in memory but not persisted: {err}");
                self.last_persist_error = Some(format!("{context}: {err}"));
            }
        }
        result
    }

    fn warn_on_eu_rule_mismatch(&self) {
        if self.timezone.eu_rule_mismatch() {
            warn!(
                "auto dst uses the EU rule, which does not apply at utc offset {:+}h",
                self.timezone.utc_offset_hours
            );
        }
    }
}
