use crate::{
    Config,
    error::WeatherError,
    model::{Coordinate, CurrentConditions, ForecastEntry, IconSize},
    provider::openweather::OpenWeatherProvider,
};
use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

pub mod openweather;

/// Turns a free-text place name into a coordinate.
#[async_trait]
pub trait GeoResolver: Send + Sync + Debug {
    /// Resolve `place_name` to the first (highest-confidence) candidate.
    ///
    /// Callers reject blank names before getting here.
    async fn resolve(&self, place_name: &str) -> Result<Coordinate, WeatherError>;
}

/// Current conditions, the 5-day/3-hour feed and condition icons for a coordinate.
#[async_trait]
pub trait ForecastFetcher: Send + Sync + Debug {
    async fn fetch_current(&self, coord: Coordinate) -> Result<CurrentConditions, WeatherError>;

    /// Raw entries in feed (chronological) order.
    async fn fetch_forecast(&self, coord: Coordinate) -> Result<Vec<ForecastEntry>, WeatherError>;

    /// Opaque image bytes for a condition icon code.
    async fn fetch_icon(&self, code: &str, size: IconSize) -> Result<Vec<u8>, WeatherError>;
}

/// Everything a refresh cycle needs from upstream.
pub trait WeatherProvider: GeoResolver + ForecastFetcher {}

impl<T: GeoResolver + ForecastFetcher + ?Sized> WeatherProvider for T {}

/// Construct the OpenWeather provider from config.
pub fn provider_from_config(config: &Config) -> anyhow::Result<Arc<dyn WeatherProvider>> {
    let api_key = config.api_key().ok_or_else(|| {
        anyhow::anyhow!(
            "No OpenWeather API key configured.\n\
             Hint: run `weather configure` and enter your API key."
        )
    })?;

    Ok(Arc::new(OpenWeatherProvider::new(api_key.to_owned())?))
}
