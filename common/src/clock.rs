use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::{error::StoreError, settings, store::SettingsStore};

/// Free-running millisecond counter, unaffected by wall-clock changes.
pub trait MonotonicClock {
    fn monotonic_millis(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockState {
    #[serde(rename = "epochSeconds")]
    pub epoch_seconds: u32,
    #[serde(rename = "lastSyncMonotonicMs")]
    pub last_sync_monotonic_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockAnomaly {
    /// Reading went backwards: the underlying counter wrapped or was reset.
    Wrapped { last_sync_ms: u64, now_ms: u64 },
    /// Forward jump longer than the configured plausibility window.
    Implausible { elapsed_ms: u64 },
}

#[derive(Debug, Clone)]
pub struct SoftwareRtc {
    state: ClockState,
    max_plausible_elapsed_ms: u64,
    last_checkpoint_attempt: u32,
    anomaly_count: u32,
    last_anomaly: Option<ClockAnomaly>,
}

impl SoftwareRtc {
    pub fn new(epoch_seconds: u32, now_ms: u64, max_plausible_elapsed_ms: u64) -> Self {
        Self {
            state: ClockState {
                epoch_seconds,
                last_sync_monotonic_ms: now_ms,
            },
            max_plausible_elapsed_ms,
            last_checkpoint_attempt: epoch_seconds,
            anomaly_count: 0,
            last_anomaly: None,
        }
    }

    pub fn now(&self) -> u32 {
        self.state.epoch_seconds
    }

    pub fn state(&self) -> ClockState {
        self.state
    }

    pub fn anomaly_count(&self) -> u32 {
        self.anomaly_count
    }

    pub fn last_anomaly(&self) -> Option<ClockAnomaly> {
        self.last_anomaly
    }

    /// Adds the whole seconds elapsed since the last sync point and returns them.
    ///
    /// The sync point moves by exactly the consumed seconds, so the sub-second
    /// remainder carries into the next call. A backwards or implausibly large
    /// delta counts as zero progress and rebases the sync point to `now_ms`.
    pub fn advance(&mut self, now_ms: u64) -> u32 {
        let last_sync_ms = self.state.last_sync_monotonic_ms;
        let Some(elapsed_ms) = now_ms.checked_sub(last_sync_ms) else {
            self.record_anomaly(ClockAnomaly::Wrapped {
                last_sync_ms,
                now_ms,
            });
            self.state.last_sync_monotonic_ms = now_ms;
            return 0;
        };

        if elapsed_ms > self.max_plausible_elapsed_ms {
            self.record_anomaly(ClockAnomaly::Implausible { elapsed_ms });
            self.state.last_sync_monotonic_ms = now_ms;
            return 0;
        }

        let elapsed_seconds = elapsed_ms / 1_000;
        if elapsed_seconds == 0 {
            return 0;
        }

        let elapsed_seconds = u32::try_from(elapsed_seconds).unwrap_or(u32::MAX);
        let epoch = self.state.epoch_seconds.saturating_add(elapsed_seconds);
        if epoch == u32::MAX && self.state.epoch_seconds != u32::MAX {
            warn!("rtc epoch saturated at u32::MAX");
        }
        self.state.epoch_seconds = epoch;
        self.state.last_sync_monotonic_ms = last_sync_ms + u64::from(elapsed_seconds) * 1_000;
        elapsed_seconds
    }

    /// Overwrites the wall clock and persists it before returning.
    ///
    /// The in-memory clock keeps the new value even when the write fails.
    pub fn set<S: SettingsStore + ?Sized>(
        &mut self,
        epoch_seconds: u32,
        now_ms: u64,
        store: &mut S,
    ) -> Result<(), StoreError> {
        self.state = ClockState {
            epoch_seconds,
            last_sync_monotonic_ms: now_ms,
        };
        info!("rtc set to epoch {epoch_seconds}");
        self.persist(store)
    }

    // The next checkpoint counts from this attempt, failed or not.
    pub fn persist<S: SettingsStore + ?Sized>(&mut self, store: &mut S) -> Result<(), StoreError> {
        self.last_checkpoint_attempt = self.state.epoch_seconds;
        settings::save_epoch(store, self.state.epoch_seconds)
    }

    pub fn checkpoint_due(&self, interval_secs: u32) -> bool {
        interval_secs > 0
            && self.state.epoch_seconds.abs_diff(self.last_checkpoint_attempt) >= interval_secs
    }

    fn record_anomaly(&mut self, anomaly: ClockAnomaly) {
        warn!("monotonic clock anomaly, holding rtc for this tick: {anomaly:?}");
        self.anomaly_count = self.anomaly_count.saturating_add(1);
        self.last_anomaly = Some(anomaly);
    }
}
