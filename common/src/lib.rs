pub mod clock;
pub mod command;
pub mod device;
pub mod dst;
pub mod error;
pub mod lighting;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod types;

pub use clock::{ClockAnomaly, ClockState, MonotonicClock, SoftwareRtc};
pub use command::Command;
pub use device::DeviceState;
pub use dst::{localize, CivilDateTime, TimeZoneConfig};
pub use error::{CoreError, StoreError};
pub use lighting::{LightingSink, LightingState, MAX_BRIGHTNESS};
pub use schedule::{
    NextEvent, ScheduleEngine, SlotKind, TimerFired, TimerPair, TimerSlot, TimerTable,
    TIMER_PAIR_COUNT,
};
pub use settings::{DeviceConfig, PersistedSettings};
pub use store::{MemoryStore, SettingsStore, StoredValue};
pub use types::DeviceStatus;
