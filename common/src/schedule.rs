use log::info;
use serde::{Deserialize, Serialize};

use crate::{dst::CivilDateTime, error::CoreError, lighting::MAX_BRIGHTNESS};

pub const TIMER_PAIR_COUNT: usize = 2;

const MINUTES_PER_DAY: i32 = 24 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKind {
    On,
    Off,
}

impl SlotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Off => "off",
        }
    }

    /// Brightness the strip takes when a slot of this kind fires.
    pub fn brightness(self) -> u8 {
        match self {
            Self::On => MAX_BRIGHTNESS,
            Self::Off => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerSlot {
    pub hour: u8,
    pub minute: u8,
    pub kind: SlotKind,
}

impl TimerSlot {
    pub fn new(kind: SlotKind, hour: u8, minute: u8) -> Result<Self, CoreError> {
        if hour > 23 {
            return Err(CoreError::invalid(format!("hour {hour} outside 0..=23")));
        }
        if minute > 59 {
            return Err(CoreError::invalid(format!("minute {minute} outside 0..=59")));
        }
        Ok(Self { hour, minute, kind })
    }

    pub fn matches(&self, now: &CivilDateTime) -> bool {
        self.hour == now.hour && self.minute == now.minute
    }

    pub fn minute_of_day(&self) -> u16 {
        u16::from(self.hour) * 60 + u16::from(self.minute)
    }

    fn clamped(kind: SlotKind, hour: u8, minute: u8) -> Self {
        Self {
            hour: hour.min(23),
            minute: minute.min(59),
            kind,
        }
    }
}

/// One on/off schedule unit. The slot kinds are fixed by position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerPair {
    on: TimerSlot,
    off: TimerSlot,
    enabled: bool,
}

impl TimerPair {
    /// Out-of-range hours and minutes are clamped; used when loading stored values.
    pub fn from_parts(on: (u8, u8), off: (u8, u8), enabled: bool) -> Self {
        Self {
            on: TimerSlot::clamped(SlotKind::On, on.0, on.1),
            off: TimerSlot::clamped(SlotKind::Off, off.0, off.1),
            enabled,
        }
    }

    pub fn on(&self) -> &TimerSlot {
        &self.on
    }

    pub fn off(&self) -> &TimerSlot {
        &self.off
    }

    pub fn slot(&self, kind: SlotKind) -> &TimerSlot {
        match kind {
            SlotKind::On => &self.on,
            SlotKind::Off => &self.off,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct NextEvent {
    pub pair: usize,
    pub kind: SlotKind,
    pub hour: u8,
    pub minute: u8,
    #[serde(rename = "minutesUntil")]
    pub minutes_until: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TimerTable {
    pairs: [TimerPair; TIMER_PAIR_COUNT],
}

impl Default for TimerTable {
    fn default() -> Self {
        Self {
            pairs: [
                TimerPair::from_parts((8, 0), (22, 0), true),
                TimerPair::from_parts((8, 0), (22, 0), false),
            ],
        }
    }
}

impl TimerTable {
    pub fn new(pairs: [TimerPair; TIMER_PAIR_COUNT]) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[TimerPair; TIMER_PAIR_COUNT] {
        &self.pairs
    }

    pub fn get(&self, index: usize) -> Result<&TimerPair, CoreError> {
        self.pairs
            .get(index)
            .ok_or_else(|| pair_index_error(index))
    }

    /// Returns whether anything changed. Invalid input leaves the table untouched.
    pub fn set_slot(
        &mut self,
        index: usize,
        kind: SlotKind,
        hour: u8,
        minute: u8,
    ) -> Result<bool, CoreError> {
        let slot = TimerSlot::new(kind, hour, minute)?;
        let pair = self
            .pairs
            .get_mut(index)
            .ok_or_else(|| pair_index_error(index))?;

        let target = match kind {
            SlotKind::On => &mut pair.on,
            SlotKind::Off => &mut pair.off,
        };
        let changed = *target != slot;
        *target = slot;
        Ok(changed)
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> Result<bool, CoreError> {
        let pair = self
            .pairs
            .get_mut(index)
            .ok_or_else(|| pair_index_error(index))?;
        let changed = pair.enabled != enabled;
        pair.enabled = enabled;
        Ok(changed)
    }

    /// Soonest slot of an enabled pair strictly after the current minute.
    pub fn next_event(&self, now: &CivilDateTime) -> Option<NextEvent> {
        let now_minute = i32::from(now.minute_of_day());

        self.pairs
            .iter()
            .enumerate()
            .filter(|(_, pair)| pair.enabled)
            .flat_map(|(index, pair)| [(index, pair.on), (index, pair.off)])
            .map(|(index, slot)| {
                let delta = (i32::from(slot.minute_of_day()) - now_minute - 1)
                    .rem_euclid(MINUTES_PER_DAY)
                    + 1;
                NextEvent {
                    pair: index,
                    kind: slot.kind,
                    hour: slot.hour,
                    minute: slot.minute,
                    minutes_until: delta as u16,
                }
            })
            .min_by_key(|event| (event.minutes_until, event.pair))
    }
}

fn pair_index_error(index: usize) -> CoreError {
    CoreError::invalid(format!(
        "timer pair {index} does not exist (0..{TIMER_PAIR_COUNT})"
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    FiredThisMinute,
}

/// Remembers the local minute each slot of a pair last fired in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FireGuard {
    last_on_minute: Option<i64>,
    last_off_minute: Option<i64>,
}

impl FireGuard {
    pub fn state(&self, kind: SlotKind, minute_index: i64) -> SlotState {
        let last = match kind {
            SlotKind::On => self.last_on_minute,
            SlotKind::Off => self.last_off_minute,
        };
        if last == Some(minute_index) {
            SlotState::FiredThisMinute
        } else {
            SlotState::Idle
        }
    }

    fn mark_fired(&mut self, kind: SlotKind, minute_index: i64) {
        match kind {
            SlotKind::On => self.last_on_minute = Some(minute_index),
            SlotKind::Off => self.last_off_minute = Some(minute_index),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub pair: usize,
    pub kind: SlotKind,
}

#[derive(Debug, Clone, Default)]
pub struct ScheduleEngine {
    guards: [FireGuard; TIMER_PAIR_COUNT],
}

impl ScheduleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn guard(&self, index: usize) -> Option<&FireGuard> {
        self.guards.get(index)
    }

    /// Forgets every fired minute, so a slot can fire again after the clock is set.
    pub fn reset(&mut self) {
        self.guards = Default::default();
    }

    pub fn tick(&mut self, table: &TimerTable, now: &CivilDateTime) -> Vec<TimerFired> {
        let minute_index = now.minute_index();
        let mut fired = Vec::new();

        for (index, (pair, guard)) in table.pairs.iter().zip(self.guards.iter_mut()).enumerate() {
            if !pair.enabled {
                continue;
            }

            for slot in [pair.on, pair.off] {
                if !slot.matches(now) || guard.state(slot.kind, minute_index) != SlotState::Idle
                {
                    continue;
                }
                guard.mark_fired(slot.kind, minute_index);
                info!("timer {index} {} triggered at {now}", slot.kind.as_str());
                fired.push(TimerFired {
                    pair: index,
                    kind: slot.kind,
                });
            }
        }

        fired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dst::localize;

    // 2024-01-15 07:59:00 UTC; offset 0 and no DST keep local == UTC.
    const JAN_15_2024_0759: u32 = 1_705_305_540;

    fn at(epoch: u32) -> CivilDateTime {
        localize(epoch, 0, false)
    }

    fn table_with_pair0(on: (u8, u8), off: (u8, u8)) -> TimerTable {
        TimerTable::new([
            TimerPair::from_parts(on, off, true),
            TimerPair::from_parts((8, 0), (22, 0), false),
        ])
    }

    #[test]
    fn fires_once_across_the_matching_minute() {
        let table = table_with_pair0((8, 0), (22, 0));
        let mut engine = ScheduleEngine::new();
        let mut events = Vec::new();

        // 07:59:00 through 08:01:59, ticking every 200 ms worth of seconds.
        for second in 0..180 {
            for _ in 0..5 {
                events.extend(engine.tick(&table, &at(JAN_15_2024_0759 + second)));
            }
        }

        assert_eq!(
            events,
            vec![TimerFired {
                pair: 0,
                kind: SlotKind::On
            }]
        );
    }

    #[test]
    fn refires_on_the_next_day() {
        let table = table_with_pair0((8, 0), (22, 0));
        let mut engine = ScheduleEngine::new();
        let start = JAN_15_2024_0759 + 60;

        assert_eq!(engine.tick(&table, &at(start)).len(), 1);
        assert!(engine.tick(&table, &at(start + 30)).is_empty());
        assert_eq!(engine.tick(&table, &at(start + 86_400)).len(), 1);
    }

    #[test]
    fn repeated_hour_after_fall_back_does_not_refire() {
        let table = table_with_pair0((1, 30), (22, 0));
        let mut engine = ScheduleEngine::new();

        // 2024-10-27: 01:30 CEST, then 01:30 CET one hour later.
        let summer = localize(1_729_985_400, 1, true);
        let winter = localize(1_729_989_000, 1, true);
        assert_eq!(summer.to_string(), winter.to_string());

        assert_eq!(engine.tick(&table, &summer).len(), 1);
        assert!(engine.tick(&table, &winter).is_empty());
    }

    #[test]
    fn disabled_pair_never_fires() {
        let table = TimerTable::new([
            TimerPair::from_parts((8, 0), (22, 0), false),
            TimerPair::from_parts((9, 0), (22, 0), false),
        ]);
        let mut engine = ScheduleEngine::new();
        assert!(engine.tick(&table, &at(JAN_15_2024_0759 + 60)).is_empty());
    }

    #[test]
    fn on_and_off_in_same_minute_both_fire_once() {
        let table = table_with_pair0((8, 0), (8, 0));
        let mut engine = ScheduleEngine::new();
        let now = at(JAN_15_2024_0759 + 60);

        assert_eq!(
            engine.tick(&table, &now),
            vec![
                TimerFired {
                    pair: 0,
                    kind: SlotKind::On
                },
                TimerFired {
                    pair: 0,
                    kind: SlotKind::Off
                },
            ]
        );
        assert!(engine.tick(&table, &now).is_empty());
        assert_eq!(
            engine.guard(0).unwrap().state(SlotKind::Off, now.minute_index()),
            SlotState::FiredThisMinute
        );
    }

    #[test]
    fn rejects_out_of_range_input() {
        let mut table = TimerTable::default();
        let before = table.clone();

        assert!(matches!(
            table.set_slot(2, SlotKind::On, 7, 30),
            Err(CoreError::InvalidArgument(_))
        ));
        assert!(table.set_slot(0, SlotKind::On, 24, 0).is_err());
        assert!(table.set_slot(0, SlotKind::Off, 7, 60).is_err());
        assert!(table.set_enabled(5, true).is_err());
        assert_eq!(table, before);
    }

    #[test]
    fn slot_kinds_stay_in_place() {
        let mut table = TimerTable::default();
        assert_eq!(table.set_slot(1, SlotKind::Off, 23, 15), Ok(true));
        assert_eq!(table.set_slot(1, SlotKind::Off, 23, 15), Ok(false));

        let pair = table.get(1).unwrap();
        assert_eq!(pair.on().kind, SlotKind::On);
        assert_eq!(pair.off().kind, SlotKind::Off);
        assert_eq!((pair.off().hour, pair.off().minute), (23, 15));
    }

    #[test]
    fn next_event_wraps_past_midnight() {
        let table = table_with_pair0((8, 0), (22, 0));

        // 22:30 local: next is 08:00 tomorrow.
        let late = at(1_705_357_800);
        assert_eq!(late.to_string(), "2024-01-15 22:30:00");
        let next = table.next_event(&late).unwrap();
        assert_eq!((next.pair, next.kind, next.minutes_until), (0, SlotKind::On, 570));

        // Inside the on minute itself, the off slot is next.
        let next = table.next_event(&at(JAN_15_2024_0759 + 60)).unwrap();
        assert_eq!(next.kind, SlotKind::Off);
        assert_eq!(next.minutes_until, 14 * 60);
    }
}
