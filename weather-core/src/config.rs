use anyhow::{Context, Result, anyhow, bail};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf, time::Duration};

pub const DEFAULT_CITY: &str = "London, UK";
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 600;
pub const MIN_UPDATE_INTERVAL_SECS: u64 = 60;
pub const MAX_UPDATE_INTERVAL_SECS: u64 = 86_400;

/// OpenWeather credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenWeatherConfig {
    #[serde(default)]
    pub api_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultCityConfig {
    #[serde(default = "default_city")]
    pub city_location: String,
}

impl Default for DefaultCityConfig {
    fn default() -> Self {
        Self { city_location: default_city() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Seconds between timer-driven refreshes.
    #[serde(default = "default_update_interval")]
    pub update_interval: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self { update_interval: DEFAULT_UPDATE_INTERVAL_SECS }
    }
}

fn default_city() -> String {
    DEFAULT_CITY.to_string()
}

fn default_update_interval() -> u64 {
    DEFAULT_UPDATE_INTERVAL_SECS
}

/// Top-level configuration stored on disk.
///
/// Example TOML:
/// ```toml
/// [openweathermap]
/// api_key = "..."
///
/// [default_city]
/// city_location = "London, UK"
///
/// [refresh]
/// update_interval = 600
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub openweathermap: OpenWeatherConfig,
    #[serde(default)]
    pub default_city: DefaultCityConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// The part of the configuration the refresh scheduler consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshSettings {
    pub default_place_name: String,
    pub update_interval: Duration,
}

impl Config {
    pub fn api_key(&self) -> Option<&str> {
        let key = self.openweathermap.api_key.trim();
        (!key.is_empty()).then_some(key)
    }

    pub fn set_api_key(&mut self, api_key: impl Into<String>) {
        self.openweathermap.api_key = api_key.into().trim().to_string();
    }

    pub fn default_place_name(&self) -> &str {
        &self.default_city.city_location
    }

    pub fn set_default_place_name(&mut self, place: impl Into<String>) {
        self.default_city.city_location = place.into().trim().to_string();
    }

    pub fn update_interval_secs(&self) -> u64 {
        self.refresh.update_interval
    }

    /// Set the refresh interval, rejecting values outside 60..=86400 seconds.
    pub fn set_update_interval_secs(&mut self, secs: u64) -> Result<()> {
        if !(MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(&secs) {
            bail!(
                "Update interval must be between {MIN_UPDATE_INTERVAL_SECS} and \
                 {MAX_UPDATE_INTERVAL_SECS} seconds, got {secs}."
            );
        }
        self.refresh.update_interval = secs;
        Ok(())
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            default_place_name: self.default_place_name().to_string(),
            update_interval: Duration::from_secs(self.update_interval_secs()),
        }
    }

    /// Clamp hand-edited values into their allowed ranges.
    fn normalize(&mut self) {
        let secs = self.refresh.update_interval;
        let clamped = secs.clamp(MIN_UPDATE_INTERVAL_SECS, MAX_UPDATE_INTERVAL_SECS);
        if clamped != secs {
            tracing::warn!(
                "update_interval {} is out of range, using {} seconds instead",
                secs,
                clamped
            );
            self.refresh.update_interval = clamped;
        }
    }

    /// Load config from the platform location, or defaults if it doesn't exist yet.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_file_path()?)
    }

    /// Load config from `path`, or defaults if the file doesn't exist yet.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            // First run: no config file, return defaults.
            tracing::debug!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut cfg: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        cfg.normalize();
        Ok(cfg)
    }

    /// Save config to the platform location.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_file_path()?)
    }

    /// Save config to `path`, creating parent directories as needed.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let toml =
            toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")?;

        fs::write(path, toml)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Path to the config file.
    pub fn config_file_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("dev", "weather-widget", "weather")
            .ok_or_else(|| anyhow!("Could not determine platform config directory"))?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_widget_fallbacks() {
        let cfg = Config::default();

        assert_eq!(cfg.api_key(), None);
        assert_eq!(cfg.default_place_name(), "London, UK");
        assert_eq!(cfg.update_interval_secs(), 600);
    }

    #[test]
    fn update_interval_bounds_are_inclusive() {
        let mut cfg = Config::default();

        cfg.set_update_interval_secs(60).expect("lower bound is allowed");
        cfg.set_update_interval_secs(86_400).expect("upper bound is allowed");

        let err = cfg.set_update_interval_secs(59).unwrap_err();
        assert!(err.to_string().contains("between 60 and 86400"));
        assert!(cfg.set_update_interval_secs(86_401).is_err());
        assert_eq!(cfg.update_interval_secs(), 86_400);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let mut cfg = Config::default();
        cfg.set_api_key("   ");
        assert_eq!(cfg.api_key(), None);

        cfg.set_api_key(" KEY ");
        assert_eq!(cfg.api_key(), Some("KEY"));
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_then_load_preserves_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut cfg = Config::default();
        cfg.set_api_key("OPEN_KEY");
        cfg.set_default_place_name("Lisbon, PT");
        cfg.set_update_interval_secs(900).unwrap();
        cfg.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, cfg);

        let settings = loaded.refresh_settings();
        assert_eq!(settings.default_place_name, "Lisbon, PT");
        assert_eq!(settings.update_interval, Duration::from_secs(900));
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[openweathermap]\napi_key = \"abc\"\n").unwrap();

        let cfg = Config::load_from(&path).unwrap();

        assert_eq!(cfg.api_key(), Some("abc"));
        assert_eq!(cfg.default_place_name(), DEFAULT_CITY);
        assert_eq!(cfg.update_interval_secs(), DEFAULT_UPDATE_INTERVAL_SECS);
    }

    #[test]
    fn out_of_range_interval_is_clamped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[refresh]\nupdate_interval = 5\n").unwrap();

        let cfg = Config::load_from(&path).unwrap();

        assert_eq!(cfg.update_interval_secs(), MIN_UPDATE_INTERVAL_SECS);
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[refresh\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
