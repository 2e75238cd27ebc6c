//! Fixed-rate tick scheduling.
//!
//! A [`RateTicker`] keeps an absolute deadline and sleeps on its clock
//! until that deadline each tick:
//!
//! - on time: sleep the remainder, advance the deadline by one period
//! - late: return immediately, re-arm one period from now (missed
//!   ticks are counted, never replayed)
//! - clock moved backwards past a full period: re-arm from now

use ramp_common::Clock;
use std::time::Duration;
use tracing::{trace, warn};

/// What happened during one [`Ticker::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickOutcome {
    /// Time spent sleeping.
    pub slept: Duration,
    /// True if the deadline had already passed when `wait` was called.
    pub overrun: bool,
    /// Whole periods that elapsed past the deadline and were dropped.
    pub missed: u64,
}

/// Source of evenly spaced ticks.
pub trait Ticker {
    /// Arm the first deadline one period from now.
    fn start(&mut self);

    /// Block until the next tick boundary.
    ///
    /// Starts the ticker if [`start`](Self::start) was not called.
    fn wait(&mut self) -> TickOutcome;

    /// Interval between ticks.
    fn period(&self) -> Duration;
}

/// Fixed-rate ticker driven by an injected [`Clock`].
#[derive(Debug)]
pub struct RateTicker<K: Clock> {
    clock: K,
    period: Duration,
    next_deadline: Option<Duration>,
    ticks: u64,
}

impl<K: Clock> RateTicker<K> {
    /// Create a ticker firing every `period`.
    ///
    /// A zero period is raised to one nanosecond.
    pub fn new(clock: K, period: Duration) -> Self {
        Self {
            clock,
            period: period.max(Duration::from_nanos(1)),
            next_deadline: None,
            ticks: 0,
        }
    }

    /// Create a ticker firing `rate_hz` times per second.
    ///
    /// Returns `None` unless `rate_hz` is finite and positive.
    pub fn from_rate(clock: K, rate_hz: f64) -> Option<Self> {
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return None;
        }
        Duration::try_from_secs_f64(1.0 / rate_hz)
            .ok()
            .map(|period| Self::new(clock, period))
    }

    /// Ticks delivered so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Deadline of the next tick, if started.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.next_deadline
    }
}

impl<K: Clock> Ticker for RateTicker<K> {
    fn start(&mut self) {
        self.next_deadline = Some(self.clock.now() + self.period);
    }

    fn wait(&mut self) -> TickOutcome {
        let Some(deadline) = self.next_deadline else {
            self.start();
            return self.wait();
        };

        let now = self.clock.now();
        self.ticks += 1;

        if now < deadline {
            let remaining = deadline - now;
            if remaining > self.period {
                warn!(
                    jump_ms = (remaining - self.period).as_millis(),
                    "Clock moved backwards, re-arming ticker"
                );
                self.clock.sleep(self.period);
                self.next_deadline = Some(now + self.period + self.period);
                return TickOutcome {
                    slept: self.period,
                    overrun: false,
                    missed: 0,
                };
            }

            self.clock.sleep(remaining);
            self.next_deadline = Some(deadline + self.period);
            return TickOutcome {
                slept: remaining,
                overrun: false,
                missed: 0,
            };
        }

        let late = now - deadline;
        let missed = u64::try_from(late.as_nanos() / self.period.as_nanos()).unwrap_or(u64::MAX);
        self.next_deadline = Some(now + self.period);

        if !late.is_zero() {
            trace!(late_us = late.as_micros(), missed, "Tick deadline passed");
        }

        TickOutcome {
            slept: Duration::ZERO,
            overrun: !late.is_zero(),
            missed,
        }
    }

    fn period(&self) -> Duration {
        self.period
    }
}
