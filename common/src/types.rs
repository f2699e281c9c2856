use serde::Serialize;

use crate::schedule::{NextEvent, TimerPair};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceStatus {
    #[serde(rename = "epochSeconds")]
    pub epoch_seconds: u32,
    #[serde(rename = "localTime")]
    pub local_time: String,
    #[serde(rename = "tzOffsetHours")]
    pub tz_offset_hours: i8,
    #[serde(rename = "autoDst")]
    pub auto_dst: bool,
    #[serde(rename = "dstActive")]
    pub dst_active: bool,
    #[serde(rename = "euRuleMismatch")]
    pub eu_rule_mismatch: bool,
    pub brightness: u8,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub timers: Vec<TimerPair>,
    #[serde(rename = "nextEvent")]
    pub next_event: Option<NextEvent>,
    #[serde(rename = "lastPersistError")]
    pub last_persist_error: Option<String>,
    #[serde(rename = "clockAnomalies")]
    pub clock_anomalies: u32,
}
