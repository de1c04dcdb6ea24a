//! The marketplace operations the bridge depends on.
//!
//! Poll, intense-fetch and sales-window code is written against this trait so
//! tests can substitute an in-memory fake for [`TgtgClient`].

use std::time::Duration;

use async_trait::async_trait;
use tgbridge_tgtg::{ItemRecord, Order, Session, TgtgClient, TgtgError};

#[async_trait]
pub trait Marketplace: Send + Sync {
    async fn login(&self) -> Result<(), TgtgError>;

    async fn get_favourite_items(&self, page_size: u32) -> Result<Vec<ItemRecord>, TgtgError>;

    async fn get_item(&self, item_id: &str) -> Result<ItemRecord, TgtgError>;

    async fn get_active_orders(&self) -> Result<Vec<Order>, TgtgError>;

    /// Current token state, for persisting.
    fn session(&self) -> Session;

    /// Replaces the token state, e.g. with a rebuilt user agent.
    fn restore_session(&self, session: Session);

    fn request_timeout(&self) -> Duration;
}

#[async_trait]
impl Marketplace for TgtgClient {
    async fn login(&self) -> Result<(), TgtgError> {
        TgtgClient::login(self).await
    }

    async fn get_favourite_items(&self, page_size: u32) -> Result<Vec<ItemRecord>, TgtgError> {
        TgtgClient::get_favourite_items(self, page_size).await
    }

    async fn get_item(&self, item_id: &str) -> Result<ItemRecord, TgtgError> {
        TgtgClient::get_item(self, item_id).await
    }

    async fn get_active_orders(&self) -> Result<Vec<Order>, TgtgError> {
        TgtgClient::get_active_orders(self).await
    }

    fn session(&self) -> Session {
        TgtgClient::session(self)
    }

    fn restore_session(&self, session: Session) {
        TgtgClient::restore_session(self, session);
    }

    fn request_timeout(&self) -> Duration {
        TgtgClient::request_timeout(self)
    }
}
