//! Dead man's switch for the polling loop.
//!
//! The main loop resets the watchdog after every cycle. If it stops doing so
//! (a hung request, a deadlock), the timer runs out and the handler ends the
//! process so the container supervisor restarts it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Invoked once when the watchdog expires, with the timeout that elapsed.
pub type FatalHandler = Arc<dyn Fn(Duration) + Send + Sync>;

struct State {
    timeout: Duration,
    /// Bumped on every arm so a timer that lost the race with `reset` stands down.
    generation: u64,
    timer: Option<JoinHandle<()>>,
    fired: bool,
}

pub struct Watchdog {
    state: Arc<Mutex<State>>,
    handler: FatalHandler,
}

impl Watchdog {
    /// Creates an armed watchdog. Must be called inside a Tokio runtime.
    pub fn start(timeout: Duration, handler: FatalHandler) -> Self {
        let watchdog = Self {
            state: Arc::new(Mutex::new(State {
                timeout,
                generation: 0,
                timer: None,
                fired: false,
            })),
            handler,
        };
        watchdog.reset(None);
        watchdog
    }

    /// Cancels the pending timer and arms a new one, optionally with a new
    /// timeout. Does nothing once the watchdog has fired.
    pub fn reset(&self, timeout: Option<Duration>) {
        let mut state = lock(&self.state);
        if state.fired {
            return;
        }
        if let Some(timeout) = timeout {
            state.timeout = timeout;
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.generation += 1;

        let generation = state.generation;
        let timeout = state.timeout;
        let shared = Arc::clone(&self.state);
        let handler = Arc::clone(&self.handler);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            {
                let mut state = lock(&shared);
                if state.fired || state.generation != generation {
                    return;
                }
                state.fired = true;
                state.timer = None;
            }
            handler(timeout);
        }));
        tracing::debug!(timeout_secs = timeout.as_secs(), "watchdog armed");
    }

    /// Disarms the watchdog for shutdown.
    pub fn stop(&self) {
        let mut state = lock(&self.state);
        state.generation += 1;
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        lock(&self.state).timeout
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        lock(&self.state).fired
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Production handler: log and exit non-zero.
pub fn exit_process() -> FatalHandler {
    Arc::new(|timeout: Duration| {
        tracing::error!(
            minutes = timeout.as_secs() / 60,
            "watchdog fired, no successful poll loop iteration within the timeout; exiting"
        );
        std::process::exit(1);
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use super::*;

    fn counting_handler() -> (FatalHandler, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let handler: FatalHandler = Arc::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (handler, count)
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_when_not_reset() {
        let (handler, count) = counting_handler();
        let watchdog = Watchdog::start(Duration::from_secs(60), handler);

        sleep(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(watchdog.has_fired());

        sleep(Duration::from_secs(600)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_expiry() {
        let (handler, count) = counting_handler();
        let watchdog = Watchdog::start(Duration::from_secs(60), handler);

        for _ in 0..5 {
            sleep(Duration::from_secs(45)).await;
            watchdog.reset(None);
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(61)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_applies_new_timeout() {
        let (handler, count) = counting_handler();
        let watchdog = Watchdog::start(Duration::from_secs(60), handler);

        watchdog.reset(Some(Duration::from_secs(300)));
        assert_eq!(watchdog.timeout(), Duration::from_secs(300));

        sleep(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);

        sleep(Duration::from_secs(181)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_after_firing_is_ignored() {
        let (handler, count) = counting_handler();
        let watchdog = Watchdog::start(Duration::from_secs(10), handler);

        sleep(Duration::from_secs(11)).await;
        watchdog.reset(None);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_watchdog_never_fires() {
        let (handler, count) = counting_handler();
        let watchdog = Watchdog::start(Duration::from_secs(10), handler);

        watchdog.stop();
        sleep(Duration::from_secs(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!watchdog.has_fired());
    }
}
