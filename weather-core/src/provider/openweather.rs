use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, de::DeserializeOwned};
use std::time::Duration;

use crate::{
    aggregate::round_temperature,
    error::{UpstreamCall, WeatherError},
    model::{Coordinate, CurrentConditions, ForecastEntry, IconSize},
    retry::{RetryDecision, RetryPolicy, decision_for_status, decision_for_transport, retry_async},
};

use super::{ForecastFetcher, GeoResolver};

const API_BASE: &str = "https://api.openweathermap.org";
const ICON_BASE: &str = "https://openweathermap.org";
const REQUEST_TIMEOUT_SECS: u64 = 10;
const FORECAST_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone)]
pub struct OpenWeatherProvider {
    api_key: String,
    http: Client,
    api_base: String,
    icon_base: String,
    retry: RetryPolicy,
}

impl OpenWeatherProvider {
    pub fn new(api_key: String) -> anyhow::Result<Self> {
        Self::with_base_urls(api_key, API_BASE, ICON_BASE)
    }

    /// Point every call at `api_base` (geocoding, data) and `icon_base` (images).
    pub fn with_base_urls(api_key: String, api_base: &str, icon_base: &str) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to build HTTP client for OpenWeather")?;

        Ok(Self {
            api_key,
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            icon_base: icon_base.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get(
        &self,
        call: UpstreamCall,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, HttpFailure> {
        retry_async(&self.retry, call.as_str(), || self.get_once(url, query)).await
    }

    async fn get_once(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<u8>, (HttpFailure, RetryDecision)> {
        let res = self.http.get(url).query(query).send().await.map_err(|e| {
            let decision = decision_for_transport(&e);
            (HttpFailure::Transport(e), decision)
        })?;

        let status = res.status();
        let body = res.bytes().await.map_err(|e| {
            let decision = decision_for_transport(&e);
            (HttpFailure::Transport(e), decision)
        })?;

        if !status.is_success() {
            let detail = error_detail(status, &body);
            return Err((HttpFailure::Status { status, detail }, decision_for_status(status)));
        }

        Ok(body.to_vec())
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        call: UpstreamCall,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, WeatherError> {
        let body = self
            .get(call, url, query)
            .await
            .map_err(|e| WeatherError::upstream(call, e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| {
            WeatherError::upstream(call, format!("invalid {call} response: {e}"))
        })
    }

    fn coord_query(&self, coord: Coordinate) -> Vec<(&'static str, String)> {
        vec![
            ("lat", coord.latitude.to_string()),
            ("lon", coord.longitude.to_string()),
            ("appid", self.api_key.clone()),
            ("units", "metric".to_string()),
        ]
    }
}

#[derive(Debug, thiserror::Error)]
enum HttpFailure {
    #[error("{0}")]
    Transport(reqwest::Error),
    #[error("{detail}")]
    Status { status: StatusCode, detail: String },
}

#[derive(Debug, Deserialize)]
struct OwGeoResult {
    lat: f64,
    lon: f64,
}

#[derive(Debug, Deserialize)]
struct OwMain {
    temp: f64,
    humidity: u8,
}

#[derive(Debug, Deserialize)]
struct OwWeather {
    icon: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
struct OwWind {
    speed: f64,
}

#[derive(Debug, Deserialize)]
struct OwCurrentResponse {
    #[serde(default)]
    name: String,
    dt: i64,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwForecastEntry {
    dt_txt: String,
    main: OwMain,
    #[serde(default)]
    weather: Vec<OwWeather>,
    #[serde(default)]
    wind: OwWind,
}

#[derive(Debug, Deserialize)]
struct OwForecastResponse {
    #[serde(default)]
    list: Vec<OwForecastEntry>,
}

#[derive(Debug, Deserialize)]
struct OwErrorBody {
    message: Option<String>,
}

/// Icon code and description of the first condition, if any.
fn primary_condition(weather: &[OwWeather]) -> (String, String) {
    weather
        .first()
        .map(|w| (w.icon.clone(), w.description.clone()))
        .unwrap_or_else(|| (String::new(), "Unknown".to_string()))
}

#[async_trait]
impl GeoResolver for OpenWeatherProvider {
    async fn resolve(&self, place_name: &str) -> Result<Coordinate, WeatherError> {
        let url = format!("{}/geo/1.0/direct", self.api_base);
        let query = [
            ("q", place_name.to_string()),
            ("limit", "1".to_string()),
            ("appid", self.api_key.clone()),
        ];

        let body = match self.get(UpstreamCall::Geocoding, &url, &query).await {
            Ok(body) => body,
            Err(HttpFailure::Status { status, detail }) => {
                tracing::debug!("Geocoding '{}' returned {}: {}", place_name, status, detail);
                return Err(WeatherError::NotFound(place_name.to_string()));
            }
            Err(e) => return Err(WeatherError::upstream(UpstreamCall::Geocoding, e.to_string())),
        };

        let candidates: Vec<OwGeoResult> = serde_json::from_slice(&body).map_err(|e| {
            WeatherError::upstream(UpstreamCall::Geocoding, format!("invalid geocoding response: {e}"))
        })?;

        let first = candidates
            .into_iter()
            .next()
            .ok_or_else(|| WeatherError::NotFound(place_name.to_string()))?;

        tracing::debug!("Resolved '{}' to {}, {}", place_name, first.lat, first.lon);
        Ok(Coordinate {
            latitude: first.lat,
            longitude: first.lon,
        })
    }
}

#[async_trait]
impl ForecastFetcher for OpenWeatherProvider {
    async fn fetch_current(&self, coord: Coordinate) -> Result<CurrentConditions, WeatherError> {
        let url = format!("{}/data/2.5/weather", self.api_base);
        let parsed: OwCurrentResponse = self
            .get_json(UpstreamCall::Current, &url, &self.coord_query(coord))
            .await?;

        let (icon_code, condition_text) = primary_condition(&parsed.weather);

        Ok(CurrentConditions {
            temperature_c: round_temperature(parsed.main.temp),
            condition_text,
            humidity_pct: parsed.main.humidity,
            wind_speed: parsed.wind.speed,
            icon_code,
            location_label: parsed.name,
            observed_at: unix_to_utc(parsed.dt).unwrap_or_else(Utc::now),
        })
    }

    async fn fetch_forecast(&self, coord: Coordinate) -> Result<Vec<ForecastEntry>, WeatherError> {
        let url = format!("{}/data/2.5/forecast", self.api_base);
        let parsed: OwForecastResponse = self
            .get_json(UpstreamCall::Forecast, &url, &self.coord_query(coord))
            .await?;

        parsed
            .list
            .into_iter()
            .map(|entry| {
                let timestamp = NaiveDateTime::parse_from_str(&entry.dt_txt, FORECAST_TIME_FORMAT)
                    .map_err(|e| {
                        WeatherError::upstream(
                            UpstreamCall::Forecast,
                            format!("invalid timestamp '{}': {e}", entry.dt_txt),
                        )
                    })?;
                let (condition_code, condition_text) = primary_condition(&entry.weather);

                Ok(ForecastEntry {
                    timestamp,
                    temperature_c: entry.main.temp,
                    condition_code,
                    condition_text,
                    humidity_pct: entry.main.humidity,
                    wind_speed: entry.wind.speed,
                })
            })
            .collect()
    }

    async fn fetch_icon(&self, code: &str, size: IconSize) -> Result<Vec<u8>, WeatherError> {
        let url = format!("{}/img/wn/{}", self.icon_base, size.file_name(code));
        self.get(UpstreamCall::Icon, &url, &[])
            .await
            .map_err(|e| WeatherError::upstream(UpstreamCall::Icon, e.to_string()))
    }
}

fn unix_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0)
}

/// The upstream `message` field if present, else the status reason.
fn error_detail(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<OwErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .filter(|m| !m.trim().is_empty())
        .map(|m| truncate_body(&m))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string())
}

fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    if body.chars().count() > MAX {
        format!("{}...", body.chars().take(MAX).collect::<String>())
    } else {
        body.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> OpenWeatherProvider {
        OpenWeatherProvider::with_base_urls("test_key".into(), &server.uri(), &server.uri())
            .unwrap()
            .with_retry_policy(RetryPolicy::none())
    }

    const LONDON: Coordinate = Coordinate {
        latitude: 51.5073,
        longitude: -0.1276,
    };

    #[tokio::test]
    async fn resolve_takes_first_candidate() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .and(query_param("q", "London, UK"))
            .and(query_param("limit", "1"))
            .and(query_param("appid", "test_key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "London", "lat": 51.5073, "lon": -0.1276, "country": "GB"},
                {"name": "London", "lat": 42.9834, "lon": -81.233, "country": "CA"}
            ])))
            .mount(&server)
            .await;

        let coord = provider(&server).resolve("London, UK").await.unwrap();

        assert_eq!(coord, LONDON);
    }

    #[tokio::test]
    async fn resolve_empty_result_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let err = provider(&server).resolve("Atlantis").await.unwrap_err();

        assert_eq!(err, WeatherError::NotFound("Atlantis".into()));
    }

    #[tokio::test]
    async fn resolve_error_status_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/geo/1.0/direct"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "cod": 401, "message": "Invalid API key."
            })))
            .mount(&server)
            .await;

        let err = provider(&server).resolve("London").await.unwrap_err();

        assert!(matches!(err, WeatherError::NotFound(_)));
    }

    #[tokio::test]
    async fn resolve_transport_failure_is_upstream_unavailable() {
        // nothing listens on port 1
        let uri = "http://127.0.0.1:1";
        let provider = OpenWeatherProvider::with_base_urls("k".into(), uri, uri)
            .unwrap()
            .with_retry_policy(RetryPolicy::none());
        let err = provider.resolve("London").await.unwrap_err();

        assert!(matches!(
            err,
            WeatherError::UpstreamUnavailable { call: UpstreamCall::Geocoding, .. }
        ));
    }

    #[tokio::test]
    async fn fetch_current_maps_fields_and_rounds() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .and(query_param("units", "metric"))
            .and(query_param("lat", "51.5073"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "name": "London",
                "dt": 1704103200,
                "main": {"temp": 7.6, "feels_like": 5.0, "humidity": 81},
                "weather": [{"id": 500, "main": "Rain", "description": "light rain", "icon": "10d"}],
                "wind": {"speed": 4.12}
            })))
            .mount(&server)
            .await;

        let current = provider(&server).fetch_current(LONDON).await.unwrap();

        assert_eq!(current.temperature_c, 8);
        assert_eq!(current.condition_text, "light rain");
        assert_eq!(current.icon_code, "10d");
        assert_eq!(current.humidity_pct, 81);
        assert_eq!(current.wind_speed, 4.12);
        assert_eq!(current.location_label, "London");
        assert_eq!(current.observed_at.timestamp(), 1704103200);
    }

    #[tokio::test]
    async fn fetch_forecast_keeps_feed_order() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cod": "200",
                "list": [
                    {
                        "dt": 1704099600,
                        "dt_txt": "2024-01-01 09:00:00",
                        "main": {"temp": 6.2, "humidity": 90},
                        "weather": [{"description": "overcast clouds", "icon": "04d"}],
                        "wind": {"speed": 3.1}
                    },
                    {
                        "dt": 1704110400,
                        "dt_txt": "2024-01-01 12:00:00",
                        "main": {"temp": 8.9, "humidity": 75},
                        "weather": [{"description": "light rain", "icon": "10d"}],
                        "wind": {"speed": 5.0}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let entries = provider(&server).fetch_forecast(LONDON).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp.to_string(), "2024-01-01 09:00:00");
        assert_eq!(entries[0].condition_code, "04d");
        assert_eq!(entries[1].temperature_c, 8.9);
        assert_eq!(entries[1].condition_text, "light rain");
    }

    #[tokio::test]
    async fn fetch_forecast_error_carries_upstream_message() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/forecast"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "cod": "400", "message": "wrong latitude"
            })))
            .mount(&server)
            .await;

        let err = provider(&server).fetch_forecast(LONDON).await.unwrap_err();

        assert_eq!(err.status_message(), "Error fetching forecast data: wrong latitude");
    }

    #[tokio::test]
    async fn server_errors_are_retried() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/data/2.5/weather"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let provider = provider(&server).with_retry_policy(RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        });
        let err = provider.fetch_current(LONDON).await.unwrap_err();

        assert_eq!(
            err,
            WeatherError::upstream(UpstreamCall::Current, "Service Unavailable")
        );
    }

    #[tokio::test]
    async fn fetch_icon_returns_bytes() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/img/wn/10d@2x.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server)
            .await;

        let bytes = provider(&server).fetch_icon("10d", IconSize::Large).await.unwrap();

        assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(250);
        let truncated = truncate_body(&long);
        assert_eq!(truncated.chars().count(), 203);
        assert!(truncated.ends_with("..."));
    }
}
