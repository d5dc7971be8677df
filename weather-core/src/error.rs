use std::fmt;

/// Which upstream round trip an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpstreamCall {
    Geocoding,
    Current,
    Forecast,
    Icon,
}

impl UpstreamCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpstreamCall::Geocoding => "geocoding",
            UpstreamCall::Current => "current weather",
            UpstreamCall::Forecast => "forecast",
            UpstreamCall::Icon => "icon",
        }
    }
}

impl fmt::Display for UpstreamCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors a refresh cycle can end with.
///
/// None of these are fatal: the scheduler turns each one into a status line
/// and waits for the next trigger.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WeatherError {
    /// Blank place name; never dispatched to the network.
    #[error("no place name given")]
    MissingInput,

    /// Geocoding returned no candidate (or a non-success status).
    #[error("place '{0}' not found")]
    NotFound(String),

    /// Transport failure, non-success status or unreadable body.
    #[error("{call} request failed: {detail}")]
    UpstreamUnavailable { call: UpstreamCall, detail: String },
}

impl WeatherError {
    pub fn upstream(call: UpstreamCall, detail: impl Into<String>) -> Self {
        WeatherError::UpstreamUnavailable {
            call,
            detail: detail.into(),
        }
    }

    /// Text shown to the user in place of the weather details.
    pub fn status_message(&self) -> String {
        match self {
            WeatherError::MissingInput => "Please enter a city name.".to_string(),
            WeatherError::NotFound(_) => "City not found. Please try again.".to_string(),
            WeatherError::UpstreamUnavailable { call, detail } => match call {
                UpstreamCall::Current => "Error fetching weather data.".to_string(),
                UpstreamCall::Forecast => format!("Error fetching forecast data: {detail}"),
                UpstreamCall::Geocoding | UpstreamCall::Icon => {
                    format!("Weather service unavailable: {detail}")
                }
            },
        }
    }
}
