//! Intense fetch: poll at a short interval for a bounded period, e.g. right
//! before a store releases its bags.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tgbridge_core::IntenseFetchConfig;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::discovery::Topics;
use crate::poll::PollEngine;
use crate::transport::Transport;

pub const MAX_PERIOD_MINUTES: u64 = 60;
pub const MIN_INTERVAL_SECS: u64 = 10;

const ON: &str = "ON";
const OFF: &str = "OFF";

/// Result of a start request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(Uuid),
    /// Another run is active; it is left untouched.
    AlreadyRunning(Uuid),
    Rejected(Rejection),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotConfigured,
    PeriodTooLong,
    IntervalTooShort,
}

struct RunHandle {
    id: Uuid,
    cancel: CancellationToken,
}

/// Starts and stops intense-fetch runs. At most one run is active.
#[derive(Clone)]
pub struct IntenseFetchController {
    engine: Arc<AsyncMutex<PollEngine>>,
    transport: Arc<dyn Transport>,
    topics: Topics,
    config: Option<IntenseFetchConfig>,
    running: Arc<Mutex<Option<RunHandle>>>,
}

impl IntenseFetchController {
    pub fn new(
        engine: Arc<AsyncMutex<PollEngine>>,
        transport: Arc<dyn Transport>,
        topics: Topics,
        config: Option<IntenseFetchConfig>,
    ) -> Self {
        Self {
            engine,
            transport,
            topics,
            config,
            running: Arc::new(Mutex::new(None)),
        }
    }

    /// Spawns a run unless the settings are out of range or a run is active.
    pub fn start(&self) -> StartOutcome {
        let config = match validate(self.config) {
            Ok(config) => config,
            Err(rejection) => {
                match rejection {
                    Rejection::NotConfigured => {
                        tracing::error!("intense fetch requested but not configured");
                    }
                    Rejection::PeriodTooLong => tracing::warn!(
                        max_minutes = MAX_PERIOD_MINUTES,
                        "intense fetch not started, period of time is too long"
                    ),
                    Rejection::IntervalTooShort => tracing::warn!(
                        min_secs = MIN_INTERVAL_SECS,
                        "intense fetch not started, interval is too short"
                    ),
                }
                return StartOutcome::Rejected(rejection);
            }
        };

        let mut running = self.lock_running();
        if let Some(handle) = running.as_ref() {
            tracing::error!(run_id = %handle.id, "intense fetch already running, doing nothing");
            return StartOutcome::AlreadyRunning(handle.id);
        }

        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        *running = Some(RunHandle {
            id,
            cancel: cancel.clone(),
        });
        drop(running);

        tokio::spawn(self.clone().run(id, config, cancel));
        StartOutcome::Started(id)
    }

    /// Asks the active run to stop after its current iteration and reports
    /// `OFF` right away. Returns `false` when nothing is running.
    pub async fn stop(&self) -> bool {
        let cancelled = self.lock_running().as_ref().map(|handle| {
            handle.cancel.cancel();
            handle.id
        });
        match cancelled {
            Some(id) => {
                tracing::info!(run_id = %id, "intense fetch is stopped in the next cycle");
                self.publish_state(OFF).await;
                true
            }
            None => {
                tracing::info!("no intense fetch running, doing nothing");
                false
            }
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_running().is_some()
    }

    #[must_use]
    pub fn current_run_id(&self) -> Option<Uuid> {
        self.lock_running().as_ref().map(|handle| handle.id)
    }

    async fn run(self, id: Uuid, config: IntenseFetchConfig, cancel: CancellationToken) {
        self.publish_state(ON).await;

        let interval = Duration::from_secs(config.interval_secs);
        let deadline = Instant::now() + Duration::from_secs(config.period_of_time_minutes * 60);
        tracing::info!(run_id = %id, minutes = config.period_of_time_minutes, interval_secs = config.interval_secs, "intense fetch started");

        while Instant::now() < deadline && !cancel.is_cancelled() {
            let ok = self.engine.lock().await.run_cycle().await;
            if ok {
                tracing::info!(run_id = %id, "intense fetch cycle finished");
            } else {
                tracing::error!(run_id = %id, "intense fetch cycle was not successful");
            }
            tokio::time::sleep(interval).await;
        }

        {
            let mut running = self.lock_running();
            if running.as_ref().is_some_and(|handle| handle.id == id) {
                *running = None;
            }
        }
        self.publish_state(OFF).await;
        tracing::info!(run_id = %id, "intense fetch stopped");
    }

    async fn publish_state(&self, state: &str) {
        if let Err(e) = self
            .transport
            .publish(&self.topics.intense_state(), state.to_string(), false)
            .await
        {
            tracing::warn!(state, error = %e, "failed to publish intense fetch state");
        }
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<RunHandle>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn validate(config: Option<IntenseFetchConfig>) -> Result<IntenseFetchConfig, Rejection> {
    let config = config.ok_or(Rejection::NotConfigured)?;
    if config.period_of_time_minutes > MAX_PERIOD_MINUTES {
        return Err(Rejection::PeriodTooLong);
    }
    if config.interval_secs < MIN_INTERVAL_SECS {
        return Err(Rejection::IntervalTooShort);
    }
    Ok(config)
}
