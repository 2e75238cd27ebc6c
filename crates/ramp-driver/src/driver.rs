//! The ramp driver.
//!
//! Connects to the configuration service, waits out the warm-up delay,
//! then on every tick writes `(now - zero) * speedup_factor` to a single
//! remote field until shutdown is requested:
//!
//! 1. Connect (failure is fatal, nothing is written)
//! 2. Warm up (unconditional, shutdown is not checked)
//! 3. Capture the zero point
//! 4. Per tick: poll shutdown, compute, write, sleep to the next tick
//!
//! Lost connections always end the run. A write the service rejects
//! ends the run or is skipped depending on [`UpdateFailurePolicy`].

use crate::ticker::{RateTicker, Ticker};
use ramp_client::{single_change, ConfigClient};
use ramp_common::config::{period_from_rate, RampConfig, UpdateFailurePolicy};
use ramp_common::metrics::UpdateMetrics;
use ramp_common::state::{RampState, StateMachine};
use ramp_common::{Clock, RampError, RampResult, ShutdownSignal};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Updates between periodic progress log lines.
const STATUS_INTERVAL: u64 = 100;

/// Compute the value pushed for a tick at `now` on a ramp that started at `start`.
///
/// Negative if `now` is before `start`, which happens when a wall clock is
/// adjusted backwards. The result is not clamped.
#[must_use]
pub fn elapsed_value(start: Duration, now: Duration, speedup_factor: f64) -> f64 {
    (now.as_secs_f64() - start.as_secs_f64()) * speedup_factor
}

/// Ramp parameters, independent of how the client and clock are built.
#[derive(Debug, Clone, PartialEq)]
pub struct RampSettings {
    /// Remote field that receives the ramp value.
    pub field: String,
    /// Unconditional pause before the first update.
    pub warmup: Duration,
    /// Target update rate in Hz.
    pub rate_hz: f64,
    /// Multiplier applied to elapsed seconds.
    pub speedup_factor: f64,
    /// Stop after this many updates (0 = until shutdown).
    pub max_updates: u64,
    /// Handling of writes the service rejects.
    pub on_update_failure: UpdateFailurePolicy,
}

impl RampSettings {
    /// Extract the ramp parameters from a full configuration.
    #[must_use]
    pub fn from_config(config: &RampConfig) -> Self {
        Self {
            field: config.field.clone(),
            warmup: config.warmup,
            rate_hz: config.rate_hz,
            speedup_factor: config.speedup_factor,
            max_updates: config.max_updates,
            on_update_failure: config.on_update_failure,
        }
    }

    /// Interval between updates, `None` if the rate has no usable period.
    #[must_use]
    pub fn tick_period(&self) -> Option<Duration> {
        period_from_rate(self.rate_hz)
    }

    fn validate(&self) -> RampResult<()> {
        if self.field.trim().is_empty() {
            return Err(RampError::Config("field name must not be empty".into()));
        }
        if self.tick_period().is_none() {
            return Err(RampError::Config(format!(
                "rate must be a positive number of Hz with a representable period, got {}",
                self.rate_hz
            )));
        }
        if !self.speedup_factor.is_finite() {
            return Err(RampError::Config(format!(
                "speedup factor must be finite, got {}",
                self.speedup_factor
            )));
        }
        Ok(())
    }
}

impl Default for RampSettings {
    fn default() -> Self {
        Self::from_config(&RampConfig::default())
    }
}

/// Outcome of a ramp that ended on shutdown or on its update limit.
#[derive(Debug, Clone, PartialEq)]
pub struct RampSummary {
    /// Updates the service acknowledged.
    pub updates_sent: u64,
    /// Updates the service rejected (only non-zero under the skip policy).
    pub updates_failed: u64,
    /// Ticks dropped because an iteration overran.
    pub missed_ticks: u64,
    /// Last value the service acknowledged.
    pub last_value: Option<f64>,
    /// Clock time between the zero point and the end of the ramp.
    pub ramp_duration: Duration,
    /// State the driver finished in.
    pub final_state: RampState,
}

/// Drives one remote field along a time ramp.
///
/// Generic over the service client and the clock so tests can run the
/// whole lifecycle against a simulated service in virtual time.
pub struct RampDriver<C: ConfigClient, K: Clock> {
    client: C,
    clock: K,
    settings: RampSettings,
    period: Duration,
    state: StateMachine,
    metrics: UpdateMetrics,
}

impl<C: ConfigClient, K: Clock> RampDriver<C, K> {
    /// Create a driver.
    ///
    /// # Errors
    ///
    /// Returns [`RampError::Config`] if the settings are unusable.
    pub fn new(client: C, clock: K, settings: RampSettings) -> RampResult<Self> {
        settings.validate()?;
        let period = settings
            .tick_period()
            .ok_or_else(|| RampError::Config("rate has no representable tick period".into()))?;
        Ok(Self {
            client,
            clock,
            settings,
            period,
            state: StateMachine::new(),
            metrics: UpdateMetrics::default(),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RampState {
        self.state.state()
    }

    /// Update counters collected so far.
    pub fn metrics(&self) -> &UpdateMetrics {
        &self.metrics
    }

    /// Ramp parameters.
    pub fn settings(&self) -> &RampSettings {
        &self.settings
    }

    /// The service client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Run the full lifecycle. Blocks the calling thread.
    ///
    /// Returns once `shutdown` is observed between ticks or the update
    /// limit is reached. The connection is released on every exit path.
    ///
    /// # Errors
    ///
    /// - connection failure at startup (before warm-up, nothing written)
    /// - connection loss mid-ramp
    /// - a rejected write under [`UpdateFailurePolicy::Fatal`]
    /// - running a driver that already ran
    pub fn run<S: ShutdownSignal + ?Sized>(&mut self, shutdown: &S) -> RampResult<RampSummary> {
        if self.state.state() != RampState::Connecting {
            return Err(RampError::InvalidStateTransition {
                from: self.state.state().to_string(),
                to: RampState::WarmingUp.to_string(),
            });
        }

        let service = self.client.service_name().to_string();
        info!(%service, "Connecting to configuration service");

        match self.client.connect() {
            Ok(config) => {
                debug!(%service, fields = config.len(), "Configuration service reachable");
            }
            Err(e) => {
                error!(%service, error = %e, "Configuration service unreachable");
                self.state.enter_fault();
                return Err(e);
            }
        }

        self.state.transition(RampState::WarmingUp)?;
        info!(
            warmup_ms = self.settings.warmup.as_millis(),
            state = %self.state.state(),
            "Waiting for target node to settle"
        );
        self.clock.sleep(self.settings.warmup);

        self.state.transition(RampState::Ramping)?;
        let zero = self.clock.now();
        info!(
            field = %self.settings.field,
            rate_hz = self.settings.rate_hz,
            speedup = self.settings.speedup_factor,
            clock = self.clock.name(),
            "Starting {} expansion",
            self.settings.field
        );

        let outcome = self.ramp(zero, shutdown);
        let ramp_duration = self.clock.now().checked_sub(zero).unwrap_or_default();

        match outcome {
            Ok(()) => {
                self.state.transition(RampState::Stopped)?;
                self.release();
                let summary = self.summary(ramp_duration);
                info!(
                    updates = summary.updates_sent,
                    failed = summary.updates_failed,
                    missed_ticks = summary.missed_ticks,
                    last_value = summary.last_value.unwrap_or_default(),
                    "Ramp stopped"
                );
                Ok(summary)
            }
            Err(e) => {
                error!(
                    error = %e,
                    updates = self.metrics.updates_sent(),
                    last_value = self.metrics.last_value().unwrap_or_default(),
                    "Ramp aborted; remote field keeps its last value"
                );
                self.state.enter_fault();
                self.release();
                Err(e)
            }
        }
    }

    /// The tick loop. Returns `Ok` on shutdown or update limit.
    fn ramp<S: ShutdownSignal + ?Sized>(&mut self, zero: Duration, shutdown: &S) -> RampResult<()> {
        let mut ticker = RateTicker::new(&self.clock, self.period);
        ticker.start();

        let mut iteration: u64 = 0;
        loop {
            if shutdown.shutdown_requested() {
                info!(iteration, "Shutdown requested, stopping ramp");
                return Ok(());
            }

            let now = self.clock.now();
            let value = elapsed_value(zero, now, self.settings.speedup_factor);
            let changes = single_change(&self.settings.field, value);

            match self.client.update_configuration(&changes) {
                Ok(_) => {
                    let latency = self.clock.now().checked_sub(now).unwrap_or_default();
                    self.metrics.record_update(value, latency);
                    trace!(iteration, value, latency_us = latency.as_micros(), "Update sent");
                }
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => match self.settings.on_update_failure {
                    UpdateFailurePolicy::Fatal => return Err(e),
                    UpdateFailurePolicy::Skip => {
                        self.metrics.record_failure();
                        warn!(
                            iteration,
                            value,
                            error = %e,
                            failed = self.metrics.updates_failed(),
                            "Update rejected, continuing"
                        );
                    }
                },
            }

            iteration += 1;
            if self.settings.max_updates > 0 && iteration >= self.settings.max_updates {
                info!(updates = iteration, "Maximum update count reached");
                return Ok(());
            }

            if iteration % STATUS_INTERVAL == 0 {
                info!(
                    updates = self.metrics.updates_sent(),
                    value,
                    mean_latency_us = self.metrics.mean_latency().map_or(0, |d| d.as_micros()),
                    missed_ticks = self.metrics.missed_ticks(),
                    "Ramp progress"
                );
            }

            let tick = ticker.wait();
            if tick.missed > 0 {
                self.metrics.record_missed_ticks(tick.missed);
                debug!(iteration, missed = tick.missed, "Update overran tick period");
            }
        }
    }

    fn release(&mut self) {
        if let Err(e) = self.client.shutdown() {
            warn!(error = %e, "Failed to release configuration service connection");
        }
    }

    fn summary(&self, ramp_duration: Duration) -> RampSummary {
        RampSummary {
            updates_sent: self.metrics.updates_sent(),
            updates_failed: self.metrics.updates_failed(),
            missed_ticks: self.metrics.missed_ticks(),
            last_value: self.metrics.last_value(),
            ramp_duration,
            final_state: self.state.state(),
        }
    }
}

/// Builder for configuring the driver.
pub struct RampDriverBuilder<C: ConfigClient, K: Clock> {
    client: C,
    clock: K,
    settings: RampSettings,
}

impl<C: ConfigClient, K: Clock> RampDriverBuilder<C, K> {
    /// Start from default settings.
    pub fn new(client: C, clock: K) -> Self {
        Self {
            client,
            clock,
            settings: RampSettings::default(),
        }
    }

    /// Replace all settings.
    #[must_use]
    pub fn settings(mut self, settings: RampSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Set the remote field.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.settings.field = field.into();
        self
    }

    /// Set the warm-up delay.
    #[must_use]
    pub fn warmup(mut self, warmup: Duration) -> Self {
        self.settings.warmup = warmup;
        self
    }

    /// Set the update rate.
    #[must_use]
    pub fn rate_hz(mut self, rate_hz: f64) -> Self {
        self.settings.rate_hz = rate_hz;
        self
    }

    /// Set the speedup factor.
    #[must_use]
    pub fn speedup_factor(mut self, speedup_factor: f64) -> Self {
        self.settings.speedup_factor = speedup_factor;
        self
    }

    /// Set the update limit (0 = unlimited).
    #[must_use]
    pub fn max_updates(mut self, max_updates: u64) -> Self {
        self.settings.max_updates = max_updates;
        self
    }

    /// Set the rejected-write policy.
    #[must_use]
    pub fn on_update_failure(mut self, policy: UpdateFailurePolicy) -> Self {
        self.settings.on_update_failure = policy;
        self
    }

    /// Build the driver.
    ///
    /// # Errors
    ///
    /// Returns [`RampError::Config`] if the settings are unusable.
    pub fn build(self) -> RampResult<RampDriver<C, K>> {
        RampDriver::new(self.client, self.clock, self.settings)
    }
}
