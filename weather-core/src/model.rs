use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WeatherError;

/// A resolved place. Produced once per resolution and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

/// One 3-hour record from the upstream forecast feed.
///
/// `timestamp` is the literal `dt_txt` value; no timezone conversion is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastEntry {
    pub timestamp: NaiveDateTime,
    pub temperature_c: f64,
    pub condition_code: String,
    pub condition_text: String,
    pub humidity_pct: u8,
    pub wind_speed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentConditions {
    /// Rounded to the nearest degree.
    pub temperature_c: i32,
    pub condition_text: String,
    pub humidity_pct: u8,
    pub wind_speed: f64,
    pub icon_code: String,
    pub location_label: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySummary {
    pub timestamp: NaiveDateTime,
    /// `HH:MM`
    pub time_of_day: String,
    pub temperature_c: i32,
    pub icon_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub calendar_date: NaiveDate,
    pub day_name: String,
    /// Mean of the day's raw temperatures, truncated toward zero.
    pub average_temperature_c: i32,
    pub icon_code: String,
    pub condition_text: String,
}

/// The half of a refresh cycle that failed while the other half succeeded.
#[derive(Debug, Clone, PartialEq)]
pub enum PartialFailure {
    Current(WeatherError),
    Forecast(WeatherError),
}

impl PartialFailure {
    pub fn error(&self) -> &WeatherError {
        match self {
            PartialFailure::Current(e) | PartialFailure::Forecast(e) => e,
        }
    }

    pub fn status_message(&self) -> String {
        self.error().status_message()
    }
}

/// Everything the presentation layer needs after a successful cycle.
///
/// Built from scratch on every cycle; the previous report is replaced wholesale.
#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub place_name: String,
    pub coordinate: Coordinate,
    pub current: Option<CurrentConditions>,
    pub hourly: Vec<HourlySummary>,
    pub daily: Vec<DailySummary>,
    pub partial: Option<PartialFailure>,
    pub fetched_at: DateTime<Utc>,
}

impl WeatherReport {
    pub fn is_complete(&self) -> bool {
        self.partial.is_none()
    }
}

/// Icon resolution; the widget uses the large variant for current conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IconSize {
    #[default]
    Small,
    Large,
}

impl IconSize {
    pub fn file_name(&self, code: &str) -> String {
        match self {
            IconSize::Small => format!("{code}.png"),
            IconSize::Large => format!("{code}@2x.png"),
        }
    }
}

/// Title-case a condition description, e.g. `light rain` -> `Light Rain`.
pub fn title_case(text: &str) -> String {
    text.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icon_file_names() {
        assert_eq!(IconSize::Small.file_name("10d"), "10d.png");
        assert_eq!(IconSize::Large.file_name("10d"), "10d@2x.png");
    }

    #[test]
    fn title_case_capitalizes_each_word() {
        assert_eq!(title_case("light rain"), "Light Rain");
        assert_eq!(title_case("OVERCAST clouds"), "Overcast Clouds");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn partial_failure_exposes_status() {
        let partial = PartialFailure::Forecast(WeatherError::upstream(
            crate::error::UpstreamCall::Forecast,
            "city not found",
        ));
        assert_eq!(partial.status_message(), "Error fetching forecast data: city not found");
    }
}
