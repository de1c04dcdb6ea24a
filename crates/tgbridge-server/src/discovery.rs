//! Topic layout and payloads for home-automation MQTT discovery.
//!
//! Every entity has a retained `…/config` descriptor pointing at its state
//! and attribute topics; publishing an empty retained `…/config` removes it.

use rust_decimal::Decimal;
use serde::Serialize;

const DEVICE_ID: &str = "toogoodtogo_bridge";

/// Topic names under a discovery prefix (usually `homeassistant`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    prefix: String,
}

impl Topics {
    pub fn new(prefix: impl Into<String>) -> Self {
        let prefix: String = prefix.into();
        Self {
            prefix: prefix.trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn item_config(&self, item_id: &str) -> String {
        format!("{}/sensor/{DEVICE_ID}/{item_id}/config", self.prefix)
    }

    #[must_use]
    pub fn item_state(&self, item_id: &str) -> String {
        format!("{}/sensor/toogoodtogo_{item_id}/state", self.prefix)
    }

    #[must_use]
    pub fn item_attributes(&self, item_id: &str) -> String {
        format!("{}/sensor/toogoodtogo_{item_id}/attr", self.prefix)
    }

    #[must_use]
    pub fn intense_config(&self) -> String {
        format!("{}/switch/{DEVICE_ID}/intense_fetch/config", self.prefix)
    }

    #[must_use]
    pub fn intense_state(&self) -> String {
        format!("{}/switch/toogoodtogo_intense_fetch/state", self.prefix)
    }

    #[must_use]
    pub fn intense_command(&self) -> String {
        format!("{}/switch/toogoodtogo_intense_fetch/set", self.prefix)
    }

    /// `sensor` is `next_collection` or `upcoming_orders`.
    #[must_use]
    pub fn order_config(&self, sensor: &str) -> String {
        format!("{}/sensor/{DEVICE_ID}/{sensor}/config", self.prefix)
    }

    #[must_use]
    pub fn order_state(&self, sensor: &str) -> String {
        format!("{}/sensor/toogoodtogo_{sensor}/state", self.prefix)
    }

    #[must_use]
    pub fn order_attributes(&self, sensor: &str) -> String {
        format!("{}/sensor/toogoodtogo_{sensor}/attr", self.prefix)
    }
}

/// Groups every entity under one device in the UI.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub identifiers: Vec<&'static str>,
    pub manufacturer: &'static str,
    pub model: &'static str,
    pub name: &'static str,
}

impl DeviceInfo {
    #[must_use]
    pub fn bridge() -> Self {
        Self {
            identifiers: vec![DEVICE_ID],
            manufacturer: "toogoodtogo-ha-mqtt-bridge",
            model: "TooGoodToGo favorites",
            name: "Too Good To Go",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SensorConfig {
    pub name: String,
    pub icon: &'static str,
    pub state_topic: String,
    pub json_attributes_topic: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_template: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<&'static str>,
    pub device: DeviceInfo,
    pub unique_id: String,
}

impl SensorConfig {
    /// Descriptor for a favourite store's stock sensor.
    #[must_use]
    pub fn item(topics: &Topics, item_id: &str, display_name: &str, in_stock: bool) -> Self {
        Self {
            name: format!("TooGoodToGo - {display_name}"),
            icon: if in_stock { "mdi:food" } else { "mdi:food-off" },
            state_topic: topics.item_state(item_id),
            json_attributes_topic: topics.item_attributes(item_id),
            unit_of_measurement: Some("portions"),
            value_template: Some("{{ value_json.stock }}"),
            device_class: None,
            device: DeviceInfo::bridge(),
            unique_id: format!("toogoodtogo_{item_id}"),
        }
    }

    #[must_use]
    pub fn next_collection(topics: &Topics) -> Self {
        Self {
            name: "TooGoodToGo - Next collection".to_string(),
            icon: "mdi:basket-clock",
            state_topic: topics.order_state(NEXT_COLLECTION),
            json_attributes_topic: topics.order_attributes(NEXT_COLLECTION),
            unit_of_measurement: None,
            value_template: None,
            device_class: Some("timestamp"),
            device: DeviceInfo::bridge(),
            unique_id: format!("toogoodtogo_{NEXT_COLLECTION}"),
        }
    }

    #[must_use]
    pub fn upcoming_orders(topics: &Topics) -> Self {
        Self {
            name: "TooGoodToGo - Upcoming orders".to_string(),
            icon: "mdi:basket",
            state_topic: topics.order_state(UPCOMING_ORDERS),
            json_attributes_topic: topics.order_attributes(UPCOMING_ORDERS),
            unit_of_measurement: Some("orders"),
            value_template: Some("{{ value_json.count }}"),
            device_class: None,
            device: DeviceInfo::bridge(),
            unique_id: format!("toogoodtogo_{UPCOMING_ORDERS}"),
        }
    }
}

pub const NEXT_COLLECTION: &str = "next_collection";
pub const UPCOMING_ORDERS: &str = "upcoming_orders";

#[derive(Debug, Clone, Serialize)]
pub struct SwitchConfig {
    pub name: &'static str,
    pub icon: &'static str,
    pub state_topic: String,
    pub command_topic: String,
    pub device: DeviceInfo,
    pub unique_id: &'static str,
}

impl SwitchConfig {
    #[must_use]
    pub fn intense_fetch(topics: &Topics) -> Self {
        Self {
            name: "Intense fetch",
            icon: "mdi:fast-forward",
            state_topic: topics.intense_state(),
            command_topic: topics.intense_command(),
            device: DeviceInfo::bridge(),
            unique_id: "toogoodtogo_intense_fetch_switch",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ItemState {
    pub stock: i64,
}

/// Attributes of a favourite store's sensor.
#[derive(Debug, Clone, Serialize)]
pub struct ItemAttributes {
    #[serde(with = "rust_decimal::serde::float")]
    pub price: Decimal,
    pub stock_available: bool,
    pub url: String,
    pub pickup_start: String,
    pub pickup_start_human: String,
    pub pickup_end: String,
    pub pickup_end_human: String,
    pub picture: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub item_name: Option<String>,
    pub store_name: Option<String>,
    pub quantity: u32,
    pub state: Option<String>,
    pub pickup_start: String,
    pub pickup_start_human: String,
    pub pickup_end: String,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub price: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct UpcomingOrdersState {
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpcomingOrdersAttributes {
    pub orders: Vec<OrderSummary>,
}
