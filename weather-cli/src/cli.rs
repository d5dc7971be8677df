use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use inquire::{CustomType, Text, validator::Validation};
use tokio::io::{AsyncBufReadExt, BufReader};
use weather_core::{
    Config, IconSize, RefreshEvent, RefreshScheduler, WeatherProvider,
    config::{MAX_UPDATE_INTERVAL_SECS, MIN_UPDATE_INTERVAL_SECS},
    fetch_report, provider_from_config,
};

use crate::render::{render_failure, render_report};

/// Top-level CLI struct.
#[derive(Debug, Parser)]
#[command(name = "weather", version, about = "Weather widget CLI")]
pub struct Cli {
    /// Path to the configuration file (defaults to the platform config dir).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Edit API key, default city and refresh interval.
    Configure,

    /// Fetch and print the weather once.
    Show {
        /// Place name; the configured default city if absent.
        place: Option<String>,
    },

    /// Keep the weather fresh on a timer. Each stdin line is a search;
    /// an empty line refreshes, `:reload` re-reads the config, `:quit` exits.
    Watch {
        /// Place name to start with instead of the configured default city.
        place: Option<String>,
    },

    /// Download a condition icon.
    Icon {
        /// Icon code, e.g. "10d".
        code: String,

        /// Where to write the PNG.
        #[arg(long)]
        out: PathBuf,

        /// Fetch the double-resolution variant.
        #[arg(long)]
        large: bool,
    },
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        let config_path = self.config;
        let config = load_config(config_path.as_deref())?;

        match self.command {
            Command::Configure => configure(config, config_path.as_deref()),
            Command::Show { place } => show(&config, place).await,
            Command::Watch { place } => watch(config, config_path, place).await,
            Command::Icon { code, out, large } => {
                let provider = provider_from_config(&config)?;
                let size = if large { IconSize::Large } else { IconSize::Small };
                let bytes = provider
                    .fetch_icon(&code, size)
                    .await
                    .map_err(|e| anyhow::anyhow!(render_failure(&e)))?;
                tokio::fs::write(&out, bytes)
                    .await
                    .with_context(|| format!("Failed to write icon to {}", out.display()))?;
                println!("Saved {} to {}", size.file_name(&code), out.display());
                Ok(())
            }
        }
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn save_config(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    match path {
        Some(path) => config.save_to(path),
        None => config.save(),
    }
}

fn configure(mut config: Config, path: Option<&Path>) -> anyhow::Result<()> {
    let api_key = Text::new("API Key:")
        .with_initial_value(&config.openweathermap.api_key)
        .prompt()?;
    config.set_api_key(api_key);

    let city = Text::new("Default City:")
        .with_initial_value(config.default_place_name())
        .prompt()?;
    config.set_default_place_name(city);

    let interval = CustomType::<u64>::new("Update Interval (seconds):")
        .with_default(config.update_interval_secs())
        .with_error_message("Please type a whole number of seconds")
        .with_validator(|secs: &u64| {
            if (MIN_UPDATE_INTERVAL_SECS..=MAX_UPDATE_INTERVAL_SECS).contains(secs) {
                Ok(Validation::Valid)
            } else {
                Ok(Validation::Invalid(
                    format!(
                        "Must be between {MIN_UPDATE_INTERVAL_SECS} and {MAX_UPDATE_INTERVAL_SECS}"
                    )
                    .into(),
                ))
            }
        })
        .prompt()?;
    config.set_update_interval_secs(interval)?;

    save_config(&config, path)?;
    println!("Settings have been saved.");
    Ok(())
}

async fn show(config: &Config, place: Option<String>) -> anyhow::Result<()> {
    let provider = provider_from_config(config)?;
    let place = place.unwrap_or_else(|| config.default_place_name().to_string());

    match fetch_report(&*provider, &place, Utc::now().naive_utc()).await {
        Ok(report) => print!("{}", render_report(&report)),
        Err(e) => println!("{}", render_failure(&e)),
    }
    Ok(())
}

async fn watch(
    config: Config,
    config_path: Option<PathBuf>,
    place: Option<String>,
) -> anyhow::Result<()> {
    let provider = provider_from_config(&config)?;
    let mut settings = config.refresh_settings();
    if let Some(place) = place {
        settings.default_place_name = place;
    }

    let (handle, mut events) = RefreshScheduler::spawn(provider, settings);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                RefreshEvent::Phase(phase) => tracing::debug!("phase: {:?}", phase),
                RefreshEvent::Report(report) => println!("{}", render_report(&report)),
                RefreshEvent::Failed { error, .. } => println!("{}\n", render_failure(&error)),
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        match line.trim() {
            ":quit" | ":q" => break,
            ":state" => println!("{:?}", handle.state()),
            ":reload" => match reload(config_path.as_deref()) {
                Ok((config, provider)) => {
                    handle.reconfigure(config.refresh_settings(), Some(provider)).await?;
                }
                Err(e) => eprintln!("Settings not applied: {e:#}"),
            },
            input => handle.refresh(input).await?,
        }
    }

    handle.shutdown().await;
    printer.await.context("Event printer panicked")?;
    Ok(())
}

fn reload(path: Option<&Path>) -> anyhow::Result<(Config, Arc<dyn WeatherProvider>)> {
    let config = load_config(path)?;
    let provider = provider_from_config(&config)?;
    Ok((config, provider))
}
