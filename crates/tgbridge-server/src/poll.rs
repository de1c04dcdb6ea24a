//! One fetch-and-publish cycle over the favourite stores.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rust_decimal::Decimal;
use serde::Serialize;
use tgbridge_tgtg::{ItemRecord, Money, Order, PickupInterval};

use crate::discovery::{
    ItemAttributes, ItemState, OrderSummary, SensorConfig, Topics, UpcomingOrdersAttributes,
    UpcomingOrdersState, NEXT_COLLECTION, UPCOMING_ORDERS,
};
use crate::error::{CycleError, TransportError};
use crate::humanize::{humanize, Locale};
use crate::known_shops::{removed_ids, KnownShops};
use crate::marketplace::Marketplace;
use crate::token_store::TokenStore;
use crate::transport::Transport;

/// Favourites requested per cycle.
pub const PAGE_SIZE: u32 = 400;

const UNKNOWN: &str = "Unknown";

/// Item ids seen by the latest successful fetch. Written by the poll
/// engine, read by the sales-window checker.
#[derive(Debug, Clone, Default)]
pub struct FavouriteSet(Arc<RwLock<Vec<String>>>);

impl FavouriteSet {
    pub fn replace(&self, ids: Vec<String>) {
        *self.0.write().unwrap_or_else(PoisonError::into_inner) = ids;
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<String> {
        self.0.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PollOptions {
    pub cleanup: bool,
    pub publish_orders: bool,
    pub timezone: Tz,
    pub locale: Locale,
}

type FirstSuccessHook = Box<dyn FnOnce() + Send + Sync>;

pub struct PollEngine {
    marketplace: Arc<dyn Marketplace>,
    transport: Arc<dyn Transport>,
    tokens: Arc<TokenStore>,
    known_shops: KnownShops,
    topics: Topics,
    favourites: FavouriteSet,
    options: PollOptions,
    first_run: bool,
    on_first_success: Option<FirstSuccessHook>,
}

impl PollEngine {
    pub fn new(
        marketplace: Arc<dyn Marketplace>,
        transport: Arc<dyn Transport>,
        tokens: Arc<TokenStore>,
        known_shops: KnownShops,
        topics: Topics,
        favourites: FavouriteSet,
        options: PollOptions,
    ) -> Self {
        Self {
            marketplace,
            transport,
            tokens,
            known_shops,
            topics,
            favourites,
            options,
            first_run: true,
            on_first_success: None,
        }
    }

    /// Runs `hook` once, after the first cycle that succeeds.
    #[must_use]
    pub fn on_first_success(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_first_success = Some(Box::new(hook));
        self
    }

    /// Runs one cycle. Failures are logged and reported as `false`; the
    /// caller carries on with the next scheduled cycle.
    pub async fn run_cycle(&mut self) -> bool {
        match self.cycle().await {
            Ok(items) => {
                tracing::debug!(items, "poll cycle finished");
                self.first_run = false;
                if let Some(hook) = self.on_first_success.take() {
                    hook();
                }
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "poll cycle failed");
                false
            }
        }
    }

    async fn cycle(&mut self) -> Result<usize, CycleError> {
        if !self.first_run {
            self.marketplace.login().await?;
            self.persist_tokens();
        }

        let items = self.marketplace.get_favourite_items(PAGE_SIZE).await?;
        let ids: Vec<String> = items.iter().map(|i| i.item_id().to_owned()).collect();
        self.favourites.replace(ids.clone());

        let now = Utc::now().with_timezone(&self.options.timezone);
        for item in &items {
            self.publish_item(item, now).await?;
        }

        if self.options.cleanup {
            self.retract_removed(&ids).await;
        }

        if self.options.publish_orders {
            self.publish_orders(now).await?;
        }

        Ok(items.len())
    }

    async fn publish_item(&self, item: &ItemRecord, now: DateTime<Tz>) -> Result<(), CycleError> {
        let id = item.item_id();
        let stock = item.items_available;
        tracing::debug!(item_id = id, name = %item.display_name, stock, "publishing item");

        let config = SensorConfig::item(&self.topics, id, &item.display_name, stock > 0);
        self.publish_json(&self.topics.item_config(id), &config, true)
            .await?;
        self.publish_json(&self.topics.item_state(id), &ItemState { stock }, false)
            .await?;
        let attributes = self.item_attributes(item, now);
        self.publish_json(&self.topics.item_attributes(id), &attributes, false)
            .await
    }

    fn item_attributes(&self, item: &ItemRecord, now: DateTime<Tz>) -> ItemAttributes {
        let price = item.effective_price().and_then(Money::to_decimal).unwrap_or_else(|| {
            tracing::error!(item_id = item.item_id(), "can't find price");
            Decimal::ZERO
        });

        let in_stock = item.items_available > 0;
        let pickup = item.pickup_interval.as_ref().filter(|_| in_stock);
        let (pickup_start, pickup_start_human) = self.describe(pickup.map(|p| p.start), now);
        let (pickup_end, pickup_end_human) = self.describe(pickup.map(|p| p.end), now);

        ItemAttributes {
            price,
            stock_available: in_stock,
            url: item.share_url(),
            pickup_start,
            pickup_start_human,
            pickup_end,
            pickup_end_human,
            picture: item.picture_url().to_owned(),
        }
    }

    /// Machine and human-readable renderings of a timestamp, or `Unknown` twice.
    fn describe(&self, at: Option<DateTime<Utc>>, now: DateTime<Tz>) -> (String, String) {
        match at {
            Some(at) => {
                let local = at.with_timezone(&self.options.timezone);
                (format_timestamp(local), humanize(local, now, self.options.locale))
            }
            None => (UNKNOWN.to_string(), UNKNOWN.to_string()),
        }
    }

    async fn retract_removed(&self, current: &[String]) {
        let previous = match self.known_shops.load() {
            Ok(previous) => previous,
            Err(e) => {
                tracing::error!(error = %e, "failed to read known shops, skipping removal detection this cycle");
                None
            }
        };

        if let Some(previous) = previous {
            for id in removed_ids(&previous, current) {
                tracing::info!(item_id = id, "store is no longer a favourite, removing its sensor");
                if let Err(e) = self
                    .transport
                    .publish(&self.topics.item_config(id), String::new(), true)
                    .await
                {
                    tracing::warn!(item_id = id, error = %e, "failed to publish sensor removal");
                }
            }
        }

        if let Err(e) = self.known_shops.save(current) {
            tracing::error!(error = %e, "failed to write known shops");
        }
    }

    async fn publish_orders(&self, now: DateTime<Tz>) -> Result<(), CycleError> {
        let mut orders = self.marketplace.get_active_orders().await?;
        // Orders without a pickup window go last.
        orders.sort_by_key(|o| {
            (
                o.pickup_interval.is_none(),
                o.pickup_interval.as_ref().map(|p| p.start),
            )
        });
        let summaries: Vec<OrderSummary> = orders.iter().map(|o| self.summarize(o, now)).collect();
        let next = orders
            .iter()
            .zip(&summaries)
            .find_map(|(order, summary)| order.pickup_interval.as_ref().map(|p| (p, summary)));

        self.publish_json(
            &self.topics.order_config(NEXT_COLLECTION),
            &SensorConfig::next_collection(&self.topics),
            true,
        )
        .await?;
        let state = next.map_or_else(
            || "unknown".to_string(),
            |(pickup, _)| pickup.start.with_timezone(&self.options.timezone).to_rfc3339(),
        );
        self.publish_raw(&self.topics.order_state(NEXT_COLLECTION), state, false)
            .await?;
        match next {
            Some((_, summary)) => {
                self.publish_json(&self.topics.order_attributes(NEXT_COLLECTION), summary, false)
                    .await?;
            }
            None => {
                self.publish_raw(
                    &self.topics.order_attributes(NEXT_COLLECTION),
                    "{}".to_string(),
                    false,
                )
                .await?;
            }
        }

        self.publish_json(
            &self.topics.order_config(UPCOMING_ORDERS),
            &SensorConfig::upcoming_orders(&self.topics),
            true,
        )
        .await?;
        self.publish_json(
            &self.topics.order_state(UPCOMING_ORDERS),
            &UpcomingOrdersState {
                count: summaries.len(),
            },
            false,
        )
        .await?;
        self.publish_json(
            &self.topics.order_attributes(UPCOMING_ORDERS),
            &UpcomingOrdersAttributes { orders: summaries },
            false,
        )
        .await
    }

    fn summarize(&self, order: &Order, now: DateTime<Tz>) -> OrderSummary {
        let pickup: Option<&PickupInterval> = order.pickup_interval.as_ref();
        let (pickup_start, pickup_start_human) = self.describe(pickup.map(|p| p.start), now);
        let (pickup_end, _) = self.describe(pickup.map(|p| p.end), now);
        OrderSummary {
            order_id: order.order_id.clone(),
            item_name: order.item_name.clone(),
            store_name: order.store_name.clone(),
            quantity: order.quantity,
            state: order.state.clone(),
            pickup_start,
            pickup_start_human,
            pickup_end,
            price: order.total_price.as_ref().and_then(Money::to_decimal),
        }
    }

    async fn publish_json<T: Serialize>(
        &self,
        topic: &str,
        payload: &T,
        retain: bool,
    ) -> Result<(), CycleError> {
        let json = serde_json::to_string(payload).map_err(|source| CycleError::Publish {
            topic: topic.to_owned(),
            source: TransportError::Encode {
                topic: topic.to_owned(),
                source,
            },
        })?;
        self.publish_raw(topic, json, retain).await
    }

    async fn publish_raw(&self, topic: &str, payload: String, retain: bool) -> Result<(), CycleError> {
        self.transport
            .publish(topic, payload, retain)
            .await
            .map_err(|source| CycleError::Publish {
                topic: topic.to_owned(),
                source,
            })
    }

    /// A failed write only costs a re-login after restart, so it does not
    /// fail the cycle.
    fn persist_tokens(&self) {
        if let Err(e) = self.tokens.save_session(&self.marketplace.session()) {
            tracing::warn!(error = %e, "failed to persist refreshed tokens");
        }
    }
}

fn format_timestamp(at: DateTime<Tz>) -> String {
    at.format("%Y-%m-%d %H:%M:%S%:z").to_string()
}

#[cfg(test)]
#[path = "poll_test.rs"]
mod tests;
