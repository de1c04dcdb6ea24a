pub mod client;
pub mod error;
pub mod types;
pub mod user_agent;
pub mod version;

pub use client::{ClientOptions, Session, TgtgClient, DEFAULT_ACCESS_TOKEN_LIFETIME_SECS};
pub use error::TgtgError;
pub use types::{ItemRecord, Money, Order, PickupInterval};
pub use version::AppVersionChecker;
