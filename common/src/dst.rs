//! Fixed-offset local time with the European daylight-saving rule.
//!
//! The rule is evaluated on the *standard* local time (UTC plus the configured
//! offset): DST runs from the last Sunday of March, 01:00 standard time, to the
//! last Sunday of October, 01:00 standard time. It is applied as-is whatever
//! offset is configured; see [`TimeZoneConfig::eu_rule_mismatch`].

use std::fmt;

use chrono::{DateTime, Datelike, Timelike};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

pub const MIN_UTC_OFFSET_HOURS: i8 = -12;
pub const MAX_UTC_OFFSET_HOURS: i8 = 14;

const SECONDS_PER_HOUR: i64 = 3_600;
const DST_SHIFT_SECONDS: i64 = SECONDS_PER_HOUR;
const DST_SWITCH_HOUR: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeZoneConfig {
    #[serde(rename = "utcOffsetHours")]
    pub utc_offset_hours: i8,
    #[serde(rename = "autoDst")]
    pub auto_dst_enabled: bool,
}

impl Default for TimeZoneConfig {
    fn default() -> Self {
        Self {
            utc_offset_hours: 1,
            auto_dst_enabled: true,
        }
    }
}

impl TimeZoneConfig {
    pub fn new(utc_offset_hours: i8, auto_dst_enabled: bool) -> Result<Self, CoreError> {
        Ok(Self {
            utc_offset_hours: Self::validate_offset(utc_offset_hours)?,
            auto_dst_enabled,
        })
    }

    pub fn validate_offset(hours: i8) -> Result<i8, CoreError> {
        if (MIN_UTC_OFFSET_HOURS..=MAX_UTC_OFFSET_HOURS).contains(&hours) {
            Ok(hours)
        } else {
            Err(CoreError::invalid(format!(
                "utc offset {hours} outside {MIN_UTC_OFFSET_HOURS}..={MAX_UTC_OFFSET_HOURS}"
            )))
        }
    }

    pub fn sanitize(&mut self) {
        self.utc_offset_hours = self
            .utc_offset_hours
            .clamp(MIN_UTC_OFFSET_HOURS, MAX_UTC_OFFSET_HOURS);
    }

    pub fn localize(&self, epoch_seconds: u32) -> CivilDateTime {
        localize(epoch_seconds, self.utc_offset_hours, self.auto_dst_enabled)
    }

    /// True when auto-DST is on for an offset no EU zone uses (WET..MSK, 0..=3).
    /// The EU rule still applies in that case.
    pub fn eu_rule_mismatch(&self) -> bool {
        self.auto_dst_enabled && !(0..=3).contains(&self.utc_offset_hours)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CivilDateTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub dst_active: bool,
    local_seconds: i64,
    utc_offset_seconds: i32,
}

impl CivilDateTime {
    fn decompose(local_seconds: i64, utc_offset_seconds: i32, dst_active: bool) -> Self {
        let naive = DateTime::from_timestamp(local_seconds, 0)
            .unwrap_or_default()
            .naive_utc();

        Self {
            year: naive.year(),
            month: naive.month() as u8,
            day: naive.day() as u8,
            hour: naive.hour() as u8,
            minute: naive.minute() as u8,
            second: naive.second() as u8,
            dst_active,
            local_seconds,
            utc_offset_seconds,
        }
    }

    /// Seconds since 1970-01-01T00:00:00 on the local wall clock.
    pub fn local_seconds(&self) -> i64 {
        self.local_seconds
    }

    /// Local minus UTC, DST hour included.
    pub fn utc_offset_seconds(&self) -> i32 {
        self.utc_offset_seconds
    }

    /// Identifies the local wall-clock minute; repeats when the clock falls back.
    pub fn minute_index(&self) -> i64 {
        self.local_seconds.div_euclid(60)
    }

    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }
}

impl fmt::Display for CivilDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

pub fn localize(epoch_seconds: u32, tz_offset_hours: i8, auto_dst_enabled: bool) -> CivilDateTime {
    let offset = i64::from(tz_offset_hours) * SECONDS_PER_HOUR;
    let adjusted = i64::from(epoch_seconds) + offset;
    let standard = CivilDateTime::decompose(adjusted, offset as i32, false);

    if !auto_dst_enabled || !eu_dst_active(&standard) {
        return standard;
    }

    CivilDateTime::decompose(
        adjusted + DST_SHIFT_SECONDS,
        (offset + DST_SHIFT_SECONDS) as i32,
        true,
    )
}

/// EU rule, evaluated on standard (non-DST) local time.
pub fn eu_dst_active(standard: &CivilDateTime) -> bool {
    match standard.month {
        4..=9 => true,
        3 => {
            let switch_day = last_sunday(standard.year, 3);
            standard.day > switch_day
                || (standard.day == switch_day && standard.hour >= DST_SWITCH_HOUR)
        }
        10 => {
            let switch_day = last_sunday(standard.year, 10);
            standard.day < switch_day
                || (standard.day == switch_day && standard.hour < DST_SWITCH_HOUR)
        }
        _ => false,
    }
}

pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

pub fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

/// Day of week via Zeller's congruence, 0 = Sunday.
pub fn weekday(year: i32, month: u8, day: u8) -> u8 {
    let (mut y, mut m) = (year, i32::from(month));
    if m < 3 {
        m += 12;
        y -= 1;
    }
    let k = y.rem_euclid(100);
    let j = y.div_euclid(100);

    // Raw Zeller result: 0 = Saturday.
    let h = (i32::from(day) + (13 * (m + 1)) / 5 + k + k / 4 + j / 4 + 5 * j).rem_euclid(7);
    ((h + 6) % 7) as u8
}

pub fn last_sunday(year: i32, month: u8) -> u8 {
    let last_day = days_in_month(year, month);
    last_day - weekday(year, month, last_day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Offset, TimeZone};
    use chrono_tz::Europe::Berlin;

    const MARCH_31_2024_0000_UTC: u32 = 1_711_843_200;
    const OCTOBER_27_2024_0000_UTC: u32 = 1_729_987_200;

    fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> u32 {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
            .and_utc()
            .timestamp() as u32
    }

    #[test]
    fn leap_years_follow_gregorian_rule() {
        assert!(is_leap_year(2000));
        assert!(is_leap_year(2024));
        assert!(!is_leap_year(1900));
        assert!(!is_leap_year(2023));
        assert!(!is_leap_year(2100));
        assert_eq!(days_in_month(2024, 2), 29);
        assert_eq!(days_in_month(2023, 2), 28);
    }

    #[test]
    fn zeller_weekday_matches_chrono() {
        let mut date = NaiveDate::from_ymd_opt(1999, 12, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2101, 3, 1).unwrap();
        while date < end {
            assert_eq!(
                u32::from(weekday(date.year(), date.month() as u8, date.day() as u8)),
                date.weekday().num_days_from_sunday(),
                "weekday mismatch on {date}"
            );
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn last_sundays_of_switch_months() {
        assert_eq!(last_sunday(2023, 3), 26);
        assert_eq!(last_sunday(2023, 10), 29);
        assert_eq!(last_sunday(2024, 3), 31);
        assert_eq!(last_sunday(2024, 10), 27);
        assert_eq!(last_sunday(2025, 3), 30);
        assert_eq!(last_sunday(2025, 10), 26);
    }

    #[test]
    fn winter_months_ignore_auto_dst() {
        for epoch in [
            utc(2024, 12, 1, 0, 0),
            utc(2024, 12, 24, 18, 30),
            utc(2025, 1, 1, 0, 0),
            utc(2025, 1, 31, 23, 59),
        ] {
            assert_eq!(localize(epoch, 1, false), localize(epoch, 1, true));
        }
    }

    #[test]
    fn june_differs_by_exactly_one_hour() {
        let start = utc(2024, 6, 1, 0, 0);
        let end = utc(2024, 7, 1, 0, 0);
        for epoch in (start..end).step_by(3_607) {
            let standard = localize(epoch, 1, false);
            let summer = localize(epoch, 1, true);
            assert!(summer.dst_active);
            assert_eq!(summer.local_seconds() - standard.local_seconds(), 3_600);
        }
    }

    #[test]
    fn march_2024_switches_at_one_standard() {
        let before = localize(MARCH_31_2024_0000_UTC - 60, 1, true);
        assert!(!before.dst_active);
        assert_eq!(before.to_string(), "2024-03-31 00:59:00");

        let after = localize(MARCH_31_2024_0000_UTC, 1, true);
        assert!(after.dst_active);
        assert_eq!(after.to_string(), "2024-03-31 02:00:00");
    }

    #[test]
    fn october_2024_switches_back_at_one_standard() {
        let before = localize(OCTOBER_27_2024_0000_UTC - 1, 1, true);
        assert!(before.dst_active);
        assert_eq!(before.to_string(), "2024-10-27 01:59:59");

        let after = localize(OCTOBER_27_2024_0000_UTC, 1, true);
        assert!(!after.dst_active);
        assert_eq!(after.to_string(), "2024-10-27 01:00:00");
    }

    #[test]
    fn negative_offset_before_epoch() {
        let civil = localize(0, -5, false);
        assert_eq!(civil.to_string(), "1969-12-31 19:00:00");
        assert_eq!(civil.utc_offset_seconds(), -18_000);
    }

    #[test]
    fn agrees_with_berlin_outside_switch_hour() {
        let start = utc(2020, 1, 1, 0, 0);
        let end = utc(2031, 1, 1, 0, 0);

        for epoch in (start..end).step_by(3_600) {
            let instant = Berlin.timestamp_opt(i64::from(epoch), 0).unwrap();
            let utc_time = instant.naive_utc();
            let month = utc_time.month() as u8;
            let in_switch_hour = (month == 3 || month == 10)
                && utc_time.day() as u8 == last_sunday(utc_time.year(), month)
                && utc_time.hour() == 0;
            if in_switch_hour {
                continue;
            }

            let civil = localize(epoch, 1, true);
            assert_eq!(
                civil.utc_offset_seconds(),
                instant.offset().fix().local_minus_utc(),
                "offset mismatch at {utc_time}"
            );
            assert_eq!(
                civil.to_string(),
                instant.format("%Y-%m-%d %H:%M:%S").to_string()
            );
        }
    }

    #[test]
    fn flags_non_european_offsets() {
        assert!(!TimeZoneConfig::default().eu_rule_mismatch());
        assert!(TimeZoneConfig::new(-5, true).unwrap().eu_rule_mismatch());
        assert!(!TimeZoneConfig::new(-5, false).unwrap().eu_rule_mismatch());
        assert!(TimeZoneConfig::new(15, true).is_err());
        assert!(TimeZoneConfig::new(-13, false).is_err());
    }
}
