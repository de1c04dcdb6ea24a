//! When to poll next, and how long the watchdog may wait for it.

use std::time::Duration;

use chrono::DateTime;
use chrono_tz::Tz;
use croner::Cron;
use rand::Rng;
use tgbridge_core::ScheduleSource;

use crate::error::ScheduleError;

/// Fire times closer than this are skipped in favour of the following one.
const MIN_DELAY_SECS: i64 = 30;

/// Upper bound of the random offset added when jitter is enabled.
const MAX_JITTER_SECS: i64 = 20;

/// The next scheduled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextRun {
    /// Wall-clock time of the run, jitter included.
    pub at: DateTime<Tz>,
    /// How long to sleep from `now`.
    pub delay: Duration,
}

/// A parsed polling schedule.
pub struct ScheduleSpec {
    expression: String,
    cron: Cron,
    jitter: bool,
}

impl std::fmt::Debug for ScheduleSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduleSpec")
            .field("expression", &self.expression)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl ScheduleSpec {
    /// Parses a five-field cron expression.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::InvalidExpression`] if `expression` does not parse.
    pub fn parse(expression: &str, jitter: bool) -> Result<Self, ScheduleError> {
        let cron = Cron::new(expression)
            .parse()
            .map_err(|e| ScheduleError::InvalidExpression {
                expression: expression.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            expression: expression.to_owned(),
            cron,
            jitter,
        })
    }

    /// Builds the schedule from configuration, warning about the legacy
    /// fixed-interval setting.
    ///
    /// # Errors
    ///
    /// Same as [`ScheduleSpec::parse`].
    pub fn from_source(source: &ScheduleSource, jitter: bool) -> Result<Self, ScheduleError> {
        if source.is_legacy() {
            tracing::warn!(
                expression = %source.expression(),
                "TGTG_EVERY_N_MINUTES is deprecated, set TGTG_POLLING_SCHEDULE to a cron expression instead"
            );
        }
        Self::parse(&source.expression(), jitter)
    }

    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Next run after `now` using the thread-local RNG for jitter.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NoUpcomingFire`] if the expression never fires again.
    pub fn next_run(&self, now: DateTime<Tz>) -> Result<NextRun, ScheduleError> {
        self.next_run_with(now, &mut rand::rng())
    }

    /// Next run after `now`.
    ///
    /// A fire time less than 30 s away is skipped for the one after it. With
    /// jitter enabled and at least 30 s to go, 1 to 20 s are added to both the
    /// delay and the reported time. One extra second lands the wake-up safely
    /// past the fire instant.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NoUpcomingFire`] if the expression never fires again.
    pub fn next_run_with<R: Rng + ?Sized>(
        &self,
        now: DateTime<Tz>,
        rng: &mut R,
    ) -> Result<NextRun, ScheduleError> {
        let mut at = self.fire_after(&now)?;
        if seconds_between(&now, &at) < MIN_DELAY_SECS {
            at = self.fire_after(&at)?;
        }
        if self.jitter && seconds_between(&now, &at) >= MIN_DELAY_SECS {
            at += chrono::Duration::seconds(rng.random_range(1..=MAX_JITTER_SECS));
        }
        let delay = seconds_between(&now, &at).max(0).unsigned_abs() + 1;
        Ok(NextRun {
            at,
            delay: Duration::from_secs(delay),
        })
    }

    /// How long the watchdog may go without a reset: up to the second fire
    /// time after the upcoming one, plus the request timeout, so one whole
    /// missed cycle is tolerated.
    ///
    /// # Errors
    ///
    /// [`ScheduleError::NoUpcomingFire`] if the expression never fires again.
    pub fn watchdog_timeout(
        &self,
        now: DateTime<Tz>,
        request_timeout: Duration,
    ) -> Result<Duration, ScheduleError> {
        let mut fire = self.fire_after(&now)?;
        for _ in 0..2 {
            fire = self.fire_after(&fire)?;
        }
        let secs = seconds_between(&now, &fire).max(0).unsigned_abs();
        Ok(Duration::from_secs(secs) + request_timeout)
    }

    fn fire_after(&self, after: &DateTime<Tz>) -> Result<DateTime<Tz>, ScheduleError> {
        self.cron
            .find_next_occurrence(after, false)
            .map_err(|_| ScheduleError::NoUpcomingFire {
                expression: self.expression.clone(),
            })
    }
}

fn seconds_between(from: &DateTime<Tz>, to: &DateTime<Tz>) -> i64 {
    to.signed_duration_since(from).num_seconds()
}
