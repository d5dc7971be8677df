//! Core library for the `weather` widget.
//!
//! This crate defines:
//! - Configuration loading and persistence
//! - Abstraction over the geocoding and forecast upstreams (OpenWeather)
//! - Aggregation of the 3-hour feed into "next 5 hours" / "next 5 days" series
//! - The refresh scheduler that keeps the data fresh on a timer
//!
//! It is used by `weather-cli`, but any front end can drive the scheduler and
//! render its [`RefreshEvent`]s.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod retry;
pub mod scheduler;

pub use aggregate::{build_daily, build_hourly};
pub use config::{Config, RefreshSettings};
pub use error::{UpstreamCall, WeatherError};
pub use model::{
    Coordinate, CurrentConditions, DailySummary, ForecastEntry, HourlySummary, IconSize,
    PartialFailure, WeatherReport,
};
pub use pipeline::fetch_report;
pub use provider::{ForecastFetcher, GeoResolver, WeatherProvider, provider_from_config};
pub use scheduler::{
    RefreshEvent, RefreshPhase, RefreshScheduler, RefreshState, SchedulerHandle,
};
