use std::fmt;

use weather_core::{WeatherError, WeatherReport, model::title_case};

const STAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Text rendition of a report, laid out like the widget.
pub fn render_report(report: &WeatherReport) -> String {
    ReportView(report).to_string()
}

pub fn render_failure(error: &WeatherError) -> String {
    error.status_message()
}

struct ReportView<'a>(&'a WeatherReport);

impl fmt::Display for ReportView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let report = self.0;

        writeln!(
            f,
            "{} ({:.4}, {:.4})",
            report.place_name, report.coordinate.latitude, report.coordinate.longitude
        )?;

        if let Some(current) = &report.current {
            let station = if current.location_label.is_empty() {
                &report.place_name
            } else {
                &current.location_label
            };
            writeln!(
                f,
                "Observed: {} at {} UTC",
                station,
                current.observed_at.format(STAMP_FORMAT)
            )?;
            writeln!(f, "Temperature: {}°C", current.temperature_c)?;
            writeln!(f, "Description: {}", title_case(&current.condition_text))?;
            writeln!(f, "Humidity: {}%", current.humidity_pct)?;
            writeln!(f, "Wind Speed: {} m/s", current.wind_speed)?;
        }

        if !report.hourly.is_empty() {
            writeln!(f, "\nNext 5 Hours:")?;
            for hour in &report.hourly {
                writeln!(
                    f,
                    "  {}  {:>4}°C  {}",
                    hour.time_of_day, hour.temperature_c, hour.icon_code
                )?;
            }
        }

        if !report.daily.is_empty() {
            writeln!(f, "\nNext 5 Days:")?;
            for day in &report.daily {
                writeln!(
                    f,
                    "  {:<9}  {:>4}°C  {}",
                    day.day_name,
                    day.average_temperature_c,
                    title_case(&day.condition_text)
                )?;
            }
        }

        if let Some(partial) = &report.partial {
            writeln!(f, "\n{}", partial.status_message())?;
        }

        writeln!(f, "\nUpdated {} UTC", report.fetched_at.format(STAMP_FORMAT))
    }
}
