//! Query-string decoding shared by the host and esp32 HTTP servers.

use std::{collections::HashMap, str::FromStr};

use ledstrip_common::{Command, CoreError, SlotKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Time,
    Timezone,
    Dst,
    Timer,
    TimerEnabled,
    Brightness,
    Color,
    Reset,
}

impl Route {
    pub const ALL: [Route; 8] = [
        Route::Time,
        Route::Timezone,
        Route::Dst,
        Route::Timer,
        Route::TimerEnabled,
        Route::Brightness,
        Route::Color,
        Route::Reset,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Self::Time => "/api/time",
            Self::Timezone => "/api/timezone",
            Self::Dst => "/api/dst",
            Self::Timer => "/api/timer",
            Self::TimerEnabled => "/api/timer/enabled",
            Self::Brightness => "/api/brightness",
            Self::Color => "/api/color",
            Self::Reset => "/api/reset",
        }
    }

    pub fn decode(self, params: &HashMap<String, String>) -> Result<Command, CoreError> {
        match self {
            Self::Time => Ok(Command::SetTime {
                timestamp: number(params, "value")?,
            }),
            Self::Timezone => Ok(Command::SetTimezoneOffset {
                hours: number(params, "value")?,
            }),
            Self::Dst => Ok(Command::SetAutoDst {
                enabled: flag(params, "value")?,
            }),
            Self::Timer => {
                let raw_kind = required(params, "kind")?;
                let kind = parse_kind(raw_kind).ok_or_else(|| {
                    CoreError::invalid(format!("invalid 'kind' parameter `{raw_kind}`"))
                })?;
                Ok(Command::SetTimerSlot {
                    pair: number(params, "pair")?,
                    kind,
                    hour: number(params, "hour")?,
                    minute: number(params, "minute")?,
                })
            }
            Self::TimerEnabled => Ok(Command::SetPairEnabled {
                pair: number(params, "pair")?,
                enabled: flag(params, "value")?,
            }),
            Self::Brightness => Ok(Command::SetBrightness {
                level: number(params, "value")?,
            }),
            Self::Color => {
                let red = optional_number(params, "red")?;
                let green = optional_number(params, "green")?;
                let blue = optional_number(params, "blue")?;
                if red.is_none() && green.is_none() && blue.is_none() {
                    return Err(CoreError::invalid(
                        "at least one of 'red', 'green', 'blue' is required",
                    ));
                }
                Ok(Command::SetColor { red, green, blue })
            }
            Self::Reset => Ok(Command::ResetDefaults),
        }
    }
}

/// Splits the query part of a request URI into percent-decoded key/value pairs.
/// Later keys win.
pub fn query_params(uri: &str) -> HashMap<String, String> {
    let Some((_, query)) = uri.split_once('?') else {
        return HashMap::new();
    };

    form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

fn parse_kind(value: &str) -> Option<SlotKind> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "1" => Some(SlotKind::On),
        "off" | "0" => Some(SlotKind::Off),
        _ => None,
    }
}

fn required<'a>(params: &'a HashMap<String, String>, key: &str) -> Result<&'a str, CoreError> {
    params
        .get(key)
        .map(String::as_str)
        .ok_or_else(|| CoreError::invalid(format!("missing '{key}' parameter")))
}

fn number<T: FromStr>(params: &HashMap<String, String>, key: &str) -> Result<T, CoreError> {
    let raw = required(params, key)?;
    raw.trim()
        .parse::<T>()
        .map_err(|_| CoreError::invalid(format!("invalid '{key}' parameter `{raw}`")))
}

fn optional_number<T: FromStr>(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, CoreError> {
    match params.get(key) {
        None => Ok(None),
        Some(_) => number(params, key).map(Some),
    }
}

fn flag(params: &HashMap<String, String>, key: &str) -> Result<bool, CoreError> {
    let raw = required(params, key)?;
    parse_flag(raw).ok_or_else(|| CoreError::invalid(format!("invalid '{key}' parameter `{raw}`")))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn decode(route: Route, uri: &str) -> Result<Command, CoreError> {
        route.decode(&query_params(uri))
    }

    #[test]
    fn query_params_split_pairs() {
        let params = query_params("/api/timer?pair=1&kind=off&hour=22&minute=5&flag");

        assert_eq!(params.get("pair").map(String::as_str), Some("1"));
        assert_eq!(params.get("minute").map(String::as_str), Some("5"));
        assert_eq!(params.get("flag").map(String::as_str), Some(""));
        assert!(query_params("/api/reset").is_empty());
    }

    #[test]
    fn query_params_are_percent_decoded() {
        let params = query_params("/api/color?red=%32%35%35&note=warm+white%21");

        assert_eq!(params.get("red").map(String::as_str), Some("255"));
        assert_eq!(params.get("note").map(String::as_str), Some("warm white!"));
        assert_eq!(
            decode(Route::Timezone, "/api/timezone?value=%2D5").unwrap(),
            Command::SetTimezoneOffset { hours: -5 }
        );
        assert_eq!(
            decode(Route::Timer, "/api/timer?pair=0&kind=%6Fn&hour=7&minute=0").unwrap(),
            Command::SetTimerSlot {
                pair: 0,
                kind: SlotKind::On,
                hour: 7,
                minute: 0
            }
        );
    }

    #[test]
    fn decodes_timer_slot() {
        assert_eq!(
            decode(Route::Timer, "/api/timer?pair=1&kind=0&hour=22&minute=30").unwrap(),
            Command::SetTimerSlot {
                pair: 1,
                kind: SlotKind::Off,
                hour: 22,
                minute: 30
            }
        );
        assert!(decode(Route::Timer, "/api/timer?pair=1&kind=maybe&hour=22&minute=30").is_err());
        assert!(decode(Route::Timer, "/api/timer?pair=1&kind=on&hour=22").is_err());
    }

    #[test]
    fn decodes_flags_and_numbers() {
        assert_eq!(
            decode(Route::Dst, "/api/dst?value=off").unwrap(),
            Command::SetAutoDst { enabled: false }
        );
        assert_eq!(
            decode(Route::Timezone, "/api/timezone?value=-5").unwrap(),
            Command::SetTimezoneOffset { hours: -5 }
        );
        assert_eq!(
            decode(Route::Time, "/api/time?value=1711843200").unwrap(),
            Command::SetTime {
                timestamp: 1_711_843_200
            }
        );
        assert!(decode(Route::Time, "/api/time?value=-1").is_err());
        assert!(decode(Route::Brightness, "/api/brightness?value=300").is_err());
        assert!(decode(Route::TimerEnabled, "/api/timer/enabled?pair=0&value=yes").is_err());
    }

    #[test]
    fn color_accepts_any_subset() {
        assert_eq!(
            decode(Route::Color, "/api/color?green=128").unwrap(),
            Command::SetColor {
                red: None,
                green: Some(128),
                blue: None
            }
        );
        assert!(decode(Route::Color, "/api/color").is_err());
        assert!(decode(Route::Color, "/api/color?red=256").is_err());
    }

    #[test]
    fn every_route_has_a_distinct_path() {
        let mut paths: Vec<_> = Route::ALL.iter().map(|route| route.path()).collect();
        paths.sort_unstable();
        paths.dedup();
        assert_eq!(paths.len(), Route::ALL.len());
    }
}
