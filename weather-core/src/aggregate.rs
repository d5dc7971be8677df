//! Pure transformations from raw forecast entries to the bounded series the
//! widget shows. Nothing in here touches the network or the clock.
//!
//! Rounding differs on purpose: the "now" and hourly temperatures round to the
//! nearest degree, while daily averages are truncated toward zero.

use chrono::{NaiveDate, NaiveDateTime};

use crate::model::{DailySummary, ForecastEntry, HourlySummary};

pub const MAX_HOURLY: usize = 5;
pub const MAX_DAILY: usize = 5;

/// Round a temperature to the nearest whole degree (halves away from zero).
pub fn round_temperature(celsius: f64) -> i32 {
    celsius.round() as i32
}

/// The next (at most five) entries strictly after `now`, in feed order.
pub fn build_hourly(entries: &[ForecastEntry], now: NaiveDateTime) -> Vec<HourlySummary> {
    entries
        .iter()
        .filter(|entry| entry.timestamp > now)
        .take(MAX_HOURLY)
        .map(|entry| HourlySummary {
            timestamp: entry.timestamp,
            time_of_day: entry.timestamp.format("%H:%M").to_string(),
            temperature_c: round_temperature(entry.temperature_c),
            icon_code: entry.condition_code.clone(),
        })
        .collect()
}

struct DayGroup<'a> {
    date: NaiveDate,
    first: &'a ForecastEntry,
    sum: f64,
    count: u32,
}

/// One summary per distinct calendar date, in first-seen order, capped at five.
///
/// Icon and description come from the first entry of each date.
pub fn build_daily(entries: &[ForecastEntry]) -> Vec<DailySummary> {
    let mut groups: Vec<DayGroup<'_>> = Vec::new();

    for entry in entries {
        let date = entry.timestamp.date();
        match groups.iter_mut().find(|g| g.date == date) {
            Some(group) => {
                group.sum += entry.temperature_c;
                group.count += 1;
            }
            None => groups.push(DayGroup {
                date,
                first: entry,
                sum: entry.temperature_c,
                count: 1,
            }),
        }
    }

    groups
        .into_iter()
        .take(MAX_DAILY)
        .map(|group| DailySummary {
            calendar_date: group.date,
            day_name: group.date.format("%A").to_string(),
            average_temperature_c: (group.sum / f64::from(group.count)).trunc() as i32,
            icon_code: group.first.condition_code.clone(),
            condition_text: group.first.condition_text.clone(),
        })
        .collect()
}
