//! Latest published app version, read from the Play-Store listing.
//!
//! The API rejects clients whose user agent advertises an app version that is
//! too old, so the bridge keeps its user agent in step with the store.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use reqwest::Client;

use crate::error::TgtgError;

const PLAY_STORE_URL: &str = "https://play.google.com/store/apps/details?id=com.app.tgtg&hl=de&gl=de";

/// Looks up the current app version.
pub struct AppVersionChecker {
    client: Client,
    url: String,
}

impl AppVersionChecker {
    /// # Errors
    ///
    /// Returns [`TgtgError::Http`] if the `reqwest::Client` cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, TgtgError> {
        Self::with_url(PLAY_STORE_URL, timeout)
    }

    /// Checker reading from an arbitrary listing URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`TgtgError::Http`] if the `reqwest::Client` cannot be built.
    pub fn with_url(url: &str, timeout: Duration) -> Result<Self, TgtgError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.to_owned(),
        })
    }

    /// Fetches the listing and extracts the version string, e.g. `"24.3.1"`.
    ///
    /// # Errors
    ///
    /// - [`TgtgError::Http`] on network failure or non-2xx status.
    /// - [`TgtgError::VersionNotFound`] if the page carries no version.
    pub async fn latest_version(&self) -> Result<String, TgtgError> {
        let html = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        extract_version(&html).ok_or(TgtgError::VersionNotFound)
    }
}

/// Pulls the version out of the listing's embedded data blob, where it
/// appears as `[[["24.3.1"]]`.
fn extract_version(html: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r#"\[\[\["(\d+\.\d+(?:\.\d+)*)"\]\]"#).expect("version pattern is valid")
    });
    pattern
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_owned())
}
