//! One refresh cycle: resolve the place, fetch current conditions and the
//! forecast side by side, and aggregate whatever came back.

use chrono::{NaiveDateTime, Utc};

use crate::{
    aggregate::{build_daily, build_hourly},
    error::WeatherError,
    model::{Coordinate, PartialFailure, WeatherReport},
    provider::WeatherProvider,
};

/// Reject blank input before anything goes over the network.
pub fn validate_place_name(input: &str) -> Result<&str, WeatherError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        Err(WeatherError::MissingInput)
    } else {
        Ok(trimmed)
    }
}

/// Fetch both halves for an already-resolved place and build the report.
///
/// Succeeds if at least one half succeeded; the failed half, if any, is
/// recorded as a [`PartialFailure`]. When both fail the current-conditions
/// error is returned.
pub async fn fetch_and_aggregate(
    provider: &dyn WeatherProvider,
    place_name: &str,
    coordinate: Coordinate,
    now: NaiveDateTime,
) -> Result<WeatherReport, WeatherError> {
    let (current, forecast) = tokio::join!(
        provider.fetch_current(coordinate),
        provider.fetch_forecast(coordinate)
    );

    let (current, entries, partial) = match (current, forecast) {
        (Ok(current), Ok(entries)) => (Some(current), entries, None),
        (Ok(current), Err(e)) => {
            tracing::warn!("Forecast for '{}' failed: {}", place_name, e);
            (Some(current), Vec::new(), Some(PartialFailure::Forecast(e)))
        }
        (Err(e), Ok(entries)) => {
            tracing::warn!("Current conditions for '{}' failed: {}", place_name, e);
            (None, entries, Some(PartialFailure::Current(e)))
        }
        (Err(current_err), Err(forecast_err)) => {
            tracing::warn!(
                "Both fetches for '{}' failed: {}; {}",
                place_name,
                current_err,
                forecast_err
            );
            return Err(current_err);
        }
    };

    Ok(WeatherReport {
        place_name: place_name.to_string(),
        coordinate,
        current,
        hourly: build_hourly(&entries, now),
        daily: build_daily(&entries),
        partial,
        fetched_at: Utc::now(),
    })
}

/// Resolve `place_name` and run [`fetch_and_aggregate`] on the result.
pub async fn fetch_report(
    provider: &dyn WeatherProvider,
    place_name: &str,
    now: NaiveDateTime,
) -> Result<WeatherReport, WeatherError> {
    let place_name = validate_place_name(place_name)?;
    let coordinate = provider.resolve(place_name).await?;
    fetch_and_aggregate(provider, place_name, coordinate, now).await
}
