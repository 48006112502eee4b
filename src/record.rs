//! Time record keys and the `timeData` map.
//!
//! Accumulated time lives in a single flat map keyed by `"<site>_<day>"`,
//! where the day is a calendar-day string. Values are whole seconds and
//! represent accumulated totals, never deltas.

use std::collections::BTreeMap;

use chrono::{Local, NaiveDate};
use serde_json::Value;

/// Per-site accumulated seconds, keyed by `"<site>_<day>"`.
pub type TimeData = BTreeMap<String, u64>;

const DAY_FORMAT: &str = "%Y-%m-%d";

/// Render a calendar day as the string used inside record keys.
pub fn day_string(day: NaiveDate) -> String {
    day.format(DAY_FORMAT).to_string()
}

pub fn parse_day(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s, DAY_FORMAT).ok()
}

/// The local calendar day right now.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn record_key(site: &str, day: NaiveDate) -> String {
    format!("{site}_{}", day.format(DAY_FORMAT))
}

/// Split a `timeData` key back into `(site, day)`.
///
/// The day sits after the last underscore, so hostnames containing `_` still
/// round-trip. Returns `None` for keys that do not split or whose day part
/// does not parse; aggregation skips those entries.
pub fn split_key(key: &str) -> Option<(&str, NaiveDate)> {
    let (site, day) = key.rsplit_once('_')?;
    if site.is_empty() {
        return None;
    }
    Some((site, parse_day(day)?))
}

/// Decode the stored `timeData` value. Missing or non-object values yield an
/// empty map; entries whose value is not a non-negative integer are dropped.
pub fn time_data_from_value(value: Option<&Value>) -> TimeData {
    let mut data = TimeData::new();
    if let Some(Value::Object(map)) = value {
        for (key, value) in map {
            if let Some(seconds) = value.as_u64() {
                data.insert(key.clone(), seconds);
            }
        }
    }
    data
}

pub fn time_data_to_value(data: &TimeData) -> Value {
    Value::Object(
        data.iter()
            .map(|(key, seconds)| (key.clone(), Value::from(*seconds)))
            .collect(),
    )
}
