//! In-memory fakes shared by the unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tgbridge_tgtg::{ItemRecord, Order, Session, TgtgError};

use crate::error::TransportError;
use crate::marketplace::Marketplace;
use crate::transport::Transport;

pub(crate) const TEST_UA: &str = "TGTG/24.3.1 Dalvik/2.1.0 (Linux; U; Android 13; Pixel 7)";

pub(crate) fn item(id: &str, name: &str, stock: i64) -> ItemRecord {
    serde_json::from_value(json!({
        "items_available": stock,
        "display_name": name,
        "item": {
            "item_id": id,
            "price": { "code": "EUR", "minor_units": 350, "decimals": 2 }
        },
        "pickup_interval": {
            "start": "2022-01-01T18:00:00Z",
            "end": "2022-01-01T18:30:00Z"
        }
    }))
    .expect("item fixture should deserialize")
}

pub(crate) fn item_from(value: serde_json::Value) -> ItemRecord {
    serde_json::from_value(value).expect("item fixture should deserialize")
}

pub(crate) fn order_from(value: serde_json::Value) -> Order {
    serde_json::from_value(value).expect("order fixture should deserialize")
}

#[derive(Default)]
pub(crate) struct FakeMarketplace {
    pub items: Mutex<Vec<ItemRecord>>,
    pub details: Mutex<HashMap<String, ItemRecord>>,
    pub orders: Mutex<Vec<Order>>,
    pub fail_fetch: AtomicBool,
    pub login_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub detail_calls: AtomicUsize,
    pub session: Mutex<Option<Session>>,
}

impl FakeMarketplace {
    pub fn with_items(items: Vec<ItemRecord>) -> Self {
        let fake = Self::default();
        *fake.items.lock().unwrap() = items;
        fake
    }
}

#[async_trait]
impl Marketplace for FakeMarketplace {
    async fn login(&self) -> Result<(), TgtgError> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get_favourite_items(&self, _page_size: u32) -> Result<Vec<ItemRecord>, TgtgError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(TgtgError::TooManyRequests);
        }
        Ok(self.items.lock().unwrap().clone())
    }

    async fn get_item(&self, item_id: &str) -> Result<ItemRecord, TgtgError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        self.details
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| TgtgError::Api {
                status: 404,
                endpoint: format!("item/v8/{item_id}"),
                body: String::new(),
            })
    }

    async fn get_active_orders(&self) -> Result<Vec<Order>, TgtgError> {
        Ok(self.orders.lock().unwrap().clone())
    }

    fn session(&self) -> Session {
        self.session
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Session::anonymous(TEST_UA))
    }

    fn restore_session(&self, session: Session) {
        *self.session.lock().unwrap() = Some(session);
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Published {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

/// Records every publish. Publishing to a topic containing `fail_on` fails.
#[derive(Default)]
pub(crate) struct RecordingTransport {
    pub published: Mutex<Vec<Published>>,
    pub subscriptions: Mutex<Vec<String>>,
    pub fail_on: Mutex<Option<String>>,
}

impl RecordingTransport {
    pub fn published(&self) -> Vec<Published> {
        self.published.lock().unwrap().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.published().into_iter().map(|p| p.topic).collect()
    }

    pub fn payloads_for(&self, topic: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|p| p.topic == topic)
            .map(|p| p.payload)
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn publish(&self, topic: &str, payload: String, retain: bool) -> Result<(), TransportError> {
        let fail = self
            .fail_on
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|needle| topic.contains(needle));
        if fail {
            return Err(TransportError::Encode {
                topic: topic.to_owned(),
                source: serde_json::from_str::<u8>("not json").unwrap_err(),
            });
        }
        self.published.lock().unwrap().push(Published {
            topic: topic.to_owned(),
            payload,
            retain,
        });
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.subscriptions.lock().unwrap().push(topic.to_owned());
        Ok(())
    }
}
