//! Periodic refresh engine.
//!
//! A single task owns [`RefreshState`] and reacts to three kinds of trigger:
//! user refreshes, timer ticks and configuration saves. Each cycle runs in its
//! own task and reports back tagged with a generation number; only the most
//! recently started cycle is allowed to touch the state or reach the
//! presentation layer.
//!
//! ```text
//! Idle -> Resolving -> Fetching -> Ready -> Idle
//!             |            |
//!             +----> Error <+ -> Idle
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    config::{MAX_UPDATE_INTERVAL_SECS, MIN_UPDATE_INTERVAL_SECS, RefreshSettings},
    error::WeatherError,
    model::WeatherReport,
    pipeline,
    provider::WeatherProvider,
};

const COMMAND_BUFFER: usize = 16;

/// Source of "now" for the hourly cut-off.
pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Forecast timestamps are UTC, so the default clock is too.
pub fn system_clock() -> Clock {
    Arc::new(|| Utc::now().naive_utc())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshPhase {
    #[default]
    Idle,
    Resolving,
    Fetching,
    Ready,
    Error,
}

/// What the presentation layer may read about the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshState {
    pub phase: RefreshPhase,
    /// Last place name that resolved successfully.
    pub active_place_name: Option<String>,
    pub is_first_load: bool,
    /// Status line of the last failed (or partially failed) cycle.
    pub last_error: Option<String>,
}

impl Default for RefreshState {
    fn default() -> Self {
        Self {
            phase: RefreshPhase::Idle,
            active_place_name: None,
            is_first_load: true,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    User,
    Timer,
    Config,
}

/// Delivered to the presentation layer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshEvent {
    Phase(RefreshPhase),
    Report(WeatherReport),
    Failed {
        place_name: Option<String>,
        error: WeatherError,
    },
}

impl RefreshEvent {
    pub fn is_outcome(&self) -> bool {
        !matches!(self, RefreshEvent::Phase(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("refresh scheduler has stopped")]
pub struct SchedulerClosed;

enum Command {
    Refresh {
        input: String,
    },
    Reconfigure {
        settings: RefreshSettings,
        provider: Option<Arc<dyn WeatherProvider>>,
    },
    Shutdown,
}

enum CycleUpdate {
    Resolved {
        generation: u64,
        place_name: String,
    },
    Finished {
        generation: u64,
        place_name: String,
        outcome: Result<WeatherReport, WeatherError>,
    },
}

/// Cheap, cloneable front door to a running scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<RefreshState>,
}

impl SchedulerHandle {
    /// User-initiated refresh with the current contents of the place-name input.
    /// A blank input refreshes the active place.
    pub async fn refresh(&self, input: impl Into<String>) -> Result<(), SchedulerClosed> {
        self.send(Command::Refresh { input: input.into() }).await
    }

    /// Apply saved settings: restart the timer, reload the default place and
    /// refresh immediately. Pass a provider when the API key changed.
    pub async fn reconfigure(
        &self,
        settings: RefreshSettings,
        provider: Option<Arc<dyn WeatherProvider>>,
    ) -> Result<(), SchedulerClosed> {
        self.send(Command::Reconfigure { settings, provider }).await
    }

    pub async fn shutdown(&self) {
        let _ = self.send(Command::Shutdown).await;
    }

    pub fn state(&self) -> RefreshState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RefreshState> {
        self.state.clone()
    }

    async fn send(&self, command: Command) -> Result<(), SchedulerClosed> {
        self.commands.send(command).await.map_err(|_| SchedulerClosed)
    }
}

pub struct RefreshScheduler {
    provider: Arc<dyn WeatherProvider>,
    settings: RefreshSettings,
    clock: Clock,
    state: RefreshState,
    /// Generation of the most recently started cycle.
    generation: u64,
    in_flight: bool,
    /// Last place a cycle was started for, resolved or not.
    requested_place_name: Option<String>,
    state_tx: watch::Sender<RefreshState>,
    events_tx: mpsc::UnboundedSender<RefreshEvent>,
    updates_tx: mpsc::UnboundedSender<CycleUpdate>,
}

impl RefreshScheduler {
    /// Start the engine on the current tokio runtime. The default place is
    /// loaded right away.
    pub fn spawn(
        provider: Arc<dyn WeatherProvider>,
        settings: RefreshSettings,
    ) -> (SchedulerHandle, mpsc::UnboundedReceiver<RefreshEvent>) {
        Self::spawn_with_clock(provider, settings, system_clock())
    }

    pub fn spawn_with_clock(
        provider: Arc<dyn WeatherProvider>,
        settings: RefreshSettings,
        clock: Clock,
    ) -> (SchedulerHandle, mpsc::UnboundedReceiver<RefreshEvent>) {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(RefreshState::default());

        let scheduler = Self {
            provider,
            settings,
            clock,
            state: RefreshState::default(),
            generation: 0,
            in_flight: false,
            requested_place_name: None,
            state_tx,
            events_tx,
            updates_tx,
        };
        tokio::spawn(scheduler.run(commands_rx, updates_rx));

        let handle = SchedulerHandle {
            commands: commands_tx,
            state: state_rx,
        };
        (handle, events_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut updates: mpsc::UnboundedReceiver<CycleUpdate>,
    ) {
        let mut timer = new_timer(self.settings.update_interval);
        info!(
            "Refresh scheduler started (default '{}', every {}s)",
            self.settings.default_place_name,
            timer.period().as_secs()
        );

        self.trigger(Trigger::Startup, "");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Refresh { input }) => self.trigger(Trigger::User, &input),
                    Some(Command::Reconfigure { settings, provider }) => {
                        timer = new_timer(settings.update_interval);
                        info!(
                            "Settings applied (default '{}', every {}s)",
                            settings.default_place_name,
                            timer.period().as_secs()
                        );
                        self.settings = settings;
                        if let Some(provider) = provider {
                            self.provider = provider;
                        }
                        self.state.is_first_load = true;
                        self.trigger(Trigger::Config, "");
                    }
                    Some(Command::Shutdown) | None => break,
                },
                _ = timer.tick() => self.on_tick(),
                Some(update) = updates.recv() => self.on_update(update),
            }
        }

        info!("Refresh scheduler stopped");
    }

    fn on_tick(&mut self) {
        if self.in_flight {
            debug!("Timer fired while a refresh is in flight, skipping");
            return;
        }
        match self
            .state
            .active_place_name
            .clone()
            .or_else(|| self.requested_place_name.clone())
        {
            Some(place_name) => self.start_cycle(Trigger::Timer, place_name),
            None => debug!("Timer fired with no place to refresh"),
        }
    }

    fn trigger(&mut self, trigger: Trigger, input: &str) {
        match self.select_place(input) {
            Ok(place_name) => self.start_cycle(trigger, place_name),
            Err(error) => {
                debug!("{:?} refresh rejected: {}", trigger, error);
                // a rejected input starts nothing, so any cycle in flight keeps its phase
                self.state.last_error = Some(error.status_message());
                self.publish_state();
                self.emit(RefreshEvent::Failed {
                    place_name: None,
                    error,
                });
            }
        }
    }

    /// The default place on first load, otherwise the input, falling back to
    /// the active place when the input is blank.
    fn select_place(&mut self, input: &str) -> Result<String, WeatherError> {
        if self.state.is_first_load {
            self.state.is_first_load = false;
            return pipeline::validate_place_name(&self.settings.default_place_name)
                .map(str::to_string);
        }

        match pipeline::validate_place_name(input) {
            Ok(place) => Ok(place.to_string()),
            Err(WeatherError::MissingInput) => self
                .state
                .active_place_name
                .clone()
                .ok_or(WeatherError::MissingInput),
            Err(e) => Err(e),
        }
    }

    fn start_cycle(&mut self, trigger: Trigger, place_name: String) {
        self.generation += 1;
        let generation = self.generation;
        if self.in_flight {
            debug!("Cycle {} supersedes the one in flight", generation);
        }
        self.in_flight = true;
        self.requested_place_name = Some(place_name.clone());
        self.set_phase(RefreshPhase::Resolving);

        info!("Refreshing '{}' ({:?}, cycle {})", place_name, trigger, generation);

        let provider = Arc::clone(&self.provider);
        let clock = Arc::clone(&self.clock);
        let updates = self.updates_tx.clone();
        tokio::spawn(async move {
            let outcome = match provider.resolve(&place_name).await {
                Ok(coordinate) => {
                    let _ = updates.send(CycleUpdate::Resolved {
                        generation,
                        place_name: place_name.clone(),
                    });
                    let now = clock();
                    pipeline::fetch_and_aggregate(&*provider, &place_name, coordinate, now)
                        .await
                }
                Err(e) => Err(e),
            };
            let _ = updates.send(CycleUpdate::Finished {
                generation,
                place_name,
                outcome,
            });
        });
    }

    fn on_update(&mut self, update: CycleUpdate) {
        match update {
            CycleUpdate::Resolved {
                generation,
                place_name,
            } => {
                if generation != self.generation {
                    return;
                }
                if self.state.active_place_name.as_deref() != Some(place_name.as_str()) {
                    self.state.last_error = None;
                }
                self.state.active_place_name = Some(place_name);
                self.set_phase(RefreshPhase::Fetching);
            }
            CycleUpdate::Finished {
                generation,
                place_name,
                outcome,
            } => {
                if generation != self.generation {
                    debug!(
                        "Discarding stale result for '{}' (cycle {}, latest {})",
                        place_name, generation, self.generation
                    );
                    return;
                }
                self.in_flight = false;
                match outcome {
                    Ok(report) => {
                        self.state.last_error = report.partial.as_ref().map(|p| p.status_message());
                        self.set_phase(RefreshPhase::Ready);
                        self.emit(RefreshEvent::Report(report));
                    }
                    Err(error) => {
                        warn!("Refresh of '{}' failed: {}", place_name, error);
                        self.state.last_error = Some(error.status_message());
                        self.set_phase(RefreshPhase::Error);
                        self.emit(RefreshEvent::Failed {
                            place_name: Some(place_name),
                            error,
                        });
                    }
                }
                self.set_phase(RefreshPhase::Idle);
            }
        }
    }

    fn set_phase(&mut self, phase: RefreshPhase) {
        self.state.phase = phase;
        self.publish_state();
        self.emit(RefreshEvent::Phase(phase));
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.state.clone());
    }

    fn emit(&self, event: RefreshEvent) {
        // the presentation layer may have gone away; the engine keeps running
        let _ = self.events_tx.send(event);
    }
}

fn new_timer(period: Duration) -> Interval {
    let period = period.clamp(
        Duration::from_secs(MIN_UPDATE_INTERVAL_SECS),
        Duration::from_secs(MAX_UPDATE_INTERVAL_SECS),
    );
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}
