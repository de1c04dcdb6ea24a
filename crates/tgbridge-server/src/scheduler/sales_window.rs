//! Automatic intense fetch around predicted sales windows.
//!
//! A few times a day every favourite is looked up individually. Items that
//! announce a future `next_sales_window_purchase_start` get a one-shot job
//! one minute before the window that asks for an intense fetch.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use tgbridge_tgtg::ItemRecord;
use tokio::sync::mpsc;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use uuid::Uuid;

use crate::marketplace::Marketplace;
use crate::poll::FavouriteSet;
use crate::transport::IntenseCommand;

/// Check cadence (seconds field first), evaluated in the configured zone.
pub const CHECK_CRON: &str = "0 0 8,11,14,17,20 * * *";

/// A trigger derived from one item's announced sales window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTrigger {
    /// Display name and local `HH:MM` of the window; unique per window.
    pub name: String,
    pub fire_at: DateTime<Utc>,
}

/// Plans a trigger for `item` if it announces a window strictly after `now`.
#[must_use]
pub fn plan_trigger(item: &ItemRecord, now: DateTime<Utc>, timezone: Tz) -> Option<PlannedTrigger> {
    let window = item.next_sales_window_purchase_start?;
    if window <= now {
        return None;
    }
    let local = window.with_timezone(&timezone);
    Some(PlannedTrigger {
        name: format!("{} {}", item.display_name, local.format("%H:%M")),
        fire_at: window - TimeDelta::minutes(1),
    })
}

/// A registered trigger. It stays registered until its window has opened,
/// so a check in the minute between firing and the window finds it.
#[derive(Debug, Clone, Copy)]
struct Registered {
    job: Uuid,
    window: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<String, Registered>>>;

#[derive(Clone)]
pub struct SalesWindowScheduler {
    marketplace: Arc<dyn Marketplace>,
    favourites: FavouriteSet,
    commands: mpsc::Sender<IntenseCommand>,
    scheduler: JobScheduler,
    timezone: Tz,
    registry: Registry,
}

impl SalesWindowScheduler {
    pub fn new(
        marketplace: Arc<dyn Marketplace>,
        favourites: FavouriteSet,
        commands: mpsc::Sender<IntenseCommand>,
        scheduler: JobScheduler,
        timezone: Tz,
    ) -> Self {
        Self {
            marketplace,
            favourites,
            commands,
            scheduler,
            timezone,
            registry: Arc::default(),
        }
    }

    /// Runs a check right away and registers the recurring check job.
    ///
    /// # Errors
    ///
    /// Returns [`JobSchedulerError`] if the recurring job cannot be added.
    pub async fn start(&self) -> Result<(), JobSchedulerError> {
        self.check(Utc::now()).await;

        let this = self.clone();
        let job = Job::new_async_tz(CHECK_CRON, self.timezone, move |_uuid, _lock| {
            let this = this.clone();
            Box::pin(async move {
                this.check(Utc::now()).await;
            })
        })?;
        self.scheduler.add(job).await?;
        tracing::info!(cron = CHECK_CRON, "scheduler: registered sales window job");
        Ok(())
    }

    /// Looks up every favourite and registers triggers for new windows.
    /// Returns the number of triggers added.
    pub async fn check(&self, now: DateTime<Utc>) -> usize {
        self.prune(now);
        let mut added = 0;
        for item_id in self.favourites.snapshot() {
            let item = match self.marketplace.get_item(&item_id).await {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!(item_id = %item_id, error = %e, "scheduler: sales window lookup failed");
                    continue;
                }
            };
            let Some(trigger) = plan_trigger(&item, now, self.timezone) else {
                continue;
            };
            match self.register(trigger, now).await {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(item_id = %item_id, error = %e, "scheduler: failed to add intense fetch trigger");
                }
            }
        }
        tracing::debug!(scheduled = ?self.scheduled(), "scheduler: automatic intense fetch triggers");
        added
    }

    /// Forgets triggers whose window has opened.
    fn prune(&self, now: DateTime<Utc>) {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.retain(|name, registered| {
            let keep = registered.window > now;
            if !keep {
                tracing::debug!(trigger = %name, job = %registered.job, "scheduler: sales window passed");
            }
            keep
        });
    }

    /// Names of the triggers whose window has not been seen to pass yet.
    #[must_use]
    pub fn scheduled(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    async fn register(
        &self,
        trigger: PlannedTrigger,
        now: DateTime<Utc>,
    ) -> Result<bool, JobSchedulerError> {
        // Triggers whose lead time has already passed fire right away.
        let delay = (trigger.fire_at - now).to_std().unwrap_or(Duration::ZERO);
        let name = trigger.name;
        let window = trigger.fire_at + TimeDelta::minutes(1);

        let commands = self.commands.clone();
        let job_name = name.clone();
        let job = Job::new_one_shot_async(delay, move |_uuid, _lock| {
            let commands = commands.clone();
            let name = job_name.clone();
            Box::pin(async move {
                tracing::info!(trigger = %name, "scheduler: starting automatic intense fetch");
                if commands.send(IntenseCommand::On).await.is_err() {
                    tracing::warn!(trigger = %name, "scheduler: command channel closed");
                }
            })
        })?;

        {
            let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            if registry.contains_key(&name) {
                return Ok(false);
            }
            registry.insert(
                name.clone(),
                Registered {
                    job: job.guid(),
                    window,
                },
            );
        }

        if let Err(e) = self.scheduler.add(job).await {
            self.registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&name);
            return Err(e);
        }
        tracing::info!(trigger = %name, fire_in_secs = delay.as_secs(), "scheduler: added automatic intense fetch run");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{item_from, FakeMarketplace};

    fn windowed(id: &str, name: &str, window: &str) -> ItemRecord {
        item_from(json!({
            "items_available": 0,
            "display_name": name,
            "item": { "item_id": id },
            "next_sales_window_purchase_start": window
        }))
    }

    fn at(raw: &str) -> DateTime<Utc> {
        raw.parse().unwrap()
    }

    async fn fixture(
        items: Vec<ItemRecord>,
        favourites: &[&str],
    ) -> (SalesWindowScheduler, Arc<FakeMarketplace>, mpsc::Receiver<IntenseCommand>) {
        let marketplace = Arc::new(FakeMarketplace::default());
        {
            let mut details = marketplace.details.lock().unwrap();
            for item in items {
                details.insert(item.item_id().to_owned(), item);
            }
        }
        let set = FavouriteSet::default();
        set.replace(favourites.iter().map(|s| (*s).to_string()).collect());
        let (tx, rx) = mpsc::channel(4);
        let scheduler = JobScheduler::new().await.unwrap();
        let sales = SalesWindowScheduler::new(
            Arc::clone(&marketplace) as Arc<dyn Marketplace>,
            set,
            tx,
            scheduler,
            chrono_tz::Europe::Berlin,
        );
        (sales, marketplace, rx)
    }

    #[test]
    fn trigger_is_named_by_local_time_and_fires_a_minute_early() {
        let item = windowed("1", "Bakery", "2023-03-10T16:30:00Z");
        let trigger = plan_trigger(&item, at("2023-03-10T12:00:00Z"), chrono_tz::Europe::Berlin).unwrap();
        assert_eq!(trigger.name, "Bakery 17:30");
        assert_eq!(trigger.fire_at, at("2023-03-10T16:29:00Z"));
    }

    #[test]
    fn past_or_missing_window_plans_nothing() {
        let now = at("2023-03-10T12:00:00Z");
        let past = windowed("1", "Bakery", "2023-03-10T11:59:59Z");
        assert!(plan_trigger(&past, now, chrono_tz::UTC).is_none());
        let exact = windowed("1", "Bakery", "2023-03-10T12:00:00Z");
        assert!(plan_trigger(&exact, now, chrono_tz::UTC).is_none());
        let none = item_from(json!({ "display_name": "Bakery", "item": { "item_id": "1" } }));
        assert!(plan_trigger(&none, now, chrono_tz::UTC).is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn same_window_detected_twice_registers_one_job() {
        let (sales, marketplace, _rx) =
            fixture(vec![windowed("1", "Bakery", "2023-03-10T16:30:00Z")], &["1"]).await;
        let now = at("2023-03-10T12:00:00Z");

        assert_eq!(sales.check(now).await, 1);
        assert_eq!(sales.check(now).await, 0);
        assert_eq!(sales.scheduled(), vec!["Bakery 17:30".to_string()]);
        assert_eq!(
            marketplace.detail_calls.load(std::sync::atomic::Ordering::SeqCst),
            2
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn lookup_failures_are_skipped() {
        let (sales, _marketplace, _rx) = fixture(
            vec![
                windowed("2", "Sushi", "2023-03-10T18:00:00Z"),
                windowed("3", "Deli", "2023-03-09T18:00:00Z"),
            ],
            &["missing", "2", "3"],
        )
        .await;

        assert_eq!(sales.check(at("2023-03-10T12:00:00Z")).await, 1);
        assert_eq!(sales.scheduled(), vec!["Sushi 19:00".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn due_trigger_requests_intense_fetch_once_per_window() {
        let (sales, _marketplace, mut rx) =
            fixture(vec![windowed("1", "Bakery", "2023-03-10T16:30:00Z")], &["1"]).await;
        sales.scheduler.start().await.unwrap();

        // One second before the trigger time.
        assert_eq!(sales.check(at("2023-03-10T16:28:59Z")).await, 1);

        let command = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("trigger should fire");
        assert_eq!(command, Some(IntenseCommand::On));

        // Fired, but the window is still ahead: a check now must not re-arm it.
        assert_eq!(sales.check(at("2023-03-10T16:29:30Z")).await, 0);
        assert_eq!(sales.scheduled(), vec!["Bakery 17:30".to_string()]);
        assert!(
            tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .is_err(),
            "no second trigger expected"
        );

        // Once the window has opened the entry is dropped.
        assert_eq!(sales.check(at("2023-03-10T16:30:00Z")).await, 0);
        assert!(sales.scheduled().is_empty());

        sales.scheduler.clone().shutdown().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn later_window_for_same_item_is_scheduled_after_earlier_one_passed() {
        let (sales, marketplace, _rx) =
            fixture(vec![windowed("1", "Bakery", "2023-03-10T16:30:00Z")], &["1"]).await;
        assert_eq!(sales.check(at("2023-03-10T12:00:00Z")).await, 1);

        marketplace
            .details
            .lock()
            .unwrap()
            .insert("1".to_string(), windowed("1", "Bakery", "2023-03-11T16:30:00Z"));
        assert_eq!(sales.check(at("2023-03-10T17:00:00Z")).await, 1);
        assert_eq!(sales.scheduled(), vec!["Bakery 17:30".to_string()]);
    }
}
