//! Marketplace API response types.
//!
//! The API is loosely shaped: older favourites carry their logo on the item
//! rather than the store, some regions only send `price_including_taxes`, and
//! pickup intervals are omitted entirely for sold-out items. Every field that
//! has been observed missing is modelled as `Option` (or defaulted) so one
//! odd record never fails a whole page.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

/// Brand logo used when neither the store nor the item carries a picture.
pub const DEFAULT_PICTURE_URL: &str = "https://toogoodtogo.com/images/logo/econ-textless.svg";

/// Public share link prefix for an item.
pub const SHARE_URL_PREFIX: &str = "https://share.toogoodtogo.com/item/";

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// Wrapper for the item list response: `{ "items": [ ... ] }`.
#[derive(Debug, Deserialize)]
pub struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<ItemRecord>,
}

/// One favourite store offer, as returned by the list and detail endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemRecord {
    #[serde(default)]
    pub items_available: i64,
    #[serde(default)]
    pub display_name: String,
    pub item: ItemDetail,
    #[serde(default)]
    pub store: Option<StoreDetail>,
    #[serde(default)]
    pub pickup_interval: Option<PickupInterval>,
    /// Predicted start of the next sales window. Only the detail endpoint
    /// sends it, and only for items that are currently sold out.
    #[serde(default)]
    pub next_sales_window_purchase_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ItemDetail {
    pub item_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<Money>,
    #[serde(default)]
    pub price_including_taxes: Option<Money>,
    #[serde(default)]
    pub logo_picture: Option<Picture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreDetail {
    #[serde(default)]
    pub store_id: Option<String>,
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub logo_picture: Option<Picture>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Picture {
    #[serde(default)]
    pub current_url: Option<String>,
}

/// A price as sent by the API: an integer amount of minor units plus the
/// number of decimals to shift by.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Money {
    #[serde(default)]
    pub code: Option<String>,
    pub minor_units: i64,
    pub decimals: u32,
}

impl Money {
    /// Exact decimal value. Returns `None` if `decimals` exceeds the 28
    /// digits of scale `Decimal` supports.
    #[must_use]
    pub fn to_decimal(&self) -> Option<Decimal> {
        Decimal::try_new(self.minor_units, self.decimals).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PickupInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ItemRecord {
    #[must_use]
    pub fn item_id(&self) -> &str {
        &self.item.item_id
    }

    /// The direct price, falling back to the tax-inclusive price.
    #[must_use]
    pub fn effective_price(&self) -> Option<&Money> {
        self.item
            .price
            .as_ref()
            .or(self.item.price_including_taxes.as_ref())
    }

    /// Store logo, then item logo, then the brand default.
    #[must_use]
    pub fn picture_url(&self) -> &str {
        let store_logo = self
            .store
            .as_ref()
            .and_then(|s| s.logo_picture.as_ref())
            .and_then(|p| p.current_url.as_deref());
        let item_logo = self
            .item
            .logo_picture
            .as_ref()
            .and_then(|p| p.current_url.as_deref());
        store_logo.or(item_logo).unwrap_or(DEFAULT_PICTURE_URL)
    }

    #[must_use]
    pub fn share_url(&self) -> String {
        format!("{SHARE_URL_PREFIX}{}", self.item.item_id)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

/// Wrapper for the active orders response: `{ "orders": [ ... ] }`.
#[derive(Debug, Deserialize)]
pub struct ActiveOrdersResponse {
    #[serde(default)]
    pub orders: Vec<Order>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Order {
    pub order_id: String,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub item_name: Option<String>,
    #[serde(default)]
    pub store_name: Option<String>,
    #[serde(default)]
    pub quantity: u32,
    #[serde(default)]
    pub pickup_interval: Option<PickupInterval>,
    #[serde(default)]
    pub total_price: Option<Money>,
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

/// Response of the e-mail login step: `state` is `WAIT` with a polling id,
/// or `TERMS` when the address has no account yet.
#[derive(Debug, Deserialize)]
pub(crate) struct AuthByEmailResponse {
    pub state: String,
    #[serde(default)]
    pub polling_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub access_token_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub startup_data: Option<StartupData>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartupData {
    pub user: StartupUser,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartupUser {
    pub user_id: String,
}
