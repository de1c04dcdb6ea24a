//! HTTP client for the marketplace REST API.
//!
//! Wraps `reqwest` with the login/refresh flow, the anti-bot cookie, and typed
//! response deserialization. Token state lives behind a mutex so a single
//! client can be shared between the scheduled cycle, intense fetch and the
//! sales-window checker.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, AUTHORIZATION, COOKIE,
    SET_COOKIE, USER_AGENT,
};
use reqwest::{Client, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::error::TgtgError;
use crate::types::{
    ActiveOrdersResponse, AuthByEmailResponse, ItemRecord, ItemsResponse, Order, TokenResponse,
};

const DEFAULT_BASE_URL: &str = "https://apptoogoodtogo.com/api/";

const AUTH_BY_EMAIL_ENDPOINT: &str = "auth/v3/authByEmail";
const AUTH_POLLING_ENDPOINT: &str = "auth/v3/authByRequestPollingId";
const REFRESH_ENDPOINT: &str = "auth/v3/token/refresh";
const ITEM_ENDPOINT: &str = "item/v8/";
const ACTIVE_ORDERS_ENDPOINT: &str = "order/v7/active";

const DEVICE_TYPE: &str = "ANDROID";

/// Access tokens are treated as valid for four hours unless the API says otherwise.
pub const DEFAULT_ACCESS_TOKEN_LIFETIME_SECS: u64 = 4 * 60 * 60;

const MAX_POLLING_TRIES: u32 = 24;
const POLLING_WAIT: Duration = Duration::from_secs(5);

/// The mutable authentication state of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_id: Option<String>,
    pub access_token_lifetime_secs: u64,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub cookie: Option<String>,
    pub user_agent: String,
}

impl Session {
    /// A session with no tokens, only a user agent.
    #[must_use]
    pub fn anonymous(user_agent: impl Into<String>) -> Self {
        Self {
            access_token: None,
            refresh_token: None,
            user_id: None,
            access_token_lifetime_secs: DEFAULT_ACCESS_TOKEN_LIFETIME_SECS,
            last_refreshed_at: None,
            cookie: None,
            user_agent: user_agent.into(),
        }
    }

    /// `true` when the access token is older than its lifetime, or its age is unknown.
    #[must_use]
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.last_refreshed_at {
            None => true,
            Some(at) => {
                let age = now.signed_duration_since(at).num_seconds();
                age < 0 || age.unsigned_abs() > self.access_token_lifetime_secs
            }
        }
    }
}

/// Construction parameters for [`TgtgClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub email: Option<String>,
    pub language: String,
    pub timeout: Duration,
    pub session: Session,
}

/// Client for the marketplace REST API.
///
/// Use [`TgtgClient::new`] for production or [`TgtgClient::with_base_url`] to
/// point at a mock server in tests.
pub struct TgtgClient {
    client: Client,
    base_url: Url,
    email: Option<String>,
    language: String,
    timeout: Duration,
    polling_tries: u32,
    polling_wait: Duration,
    session: Mutex<Session>,
}

impl TgtgClient {
    /// Creates a new client pointed at the production API.
    ///
    /// # Errors
    ///
    /// Returns [`TgtgError::Http`] if the underlying `reqwest::Client`
    /// cannot be constructed.
    pub fn new(options: ClientOptions) -> Result<Self, TgtgError> {
        Self::with_base_url(options, DEFAULT_BASE_URL)
    }

    /// Creates a new client with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`TgtgError::Http`] if the underlying `reqwest::Client` cannot
    /// be constructed, or [`TgtgError::InvalidBaseUrl`] if `base_url` does not parse.
    pub fn with_base_url(options: ClientOptions, base_url: &str) -> Result<Self, TgtgError> {
        let client = Client::builder()
            .timeout(options.timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        // Exactly one trailing slash so `Url::join` appends instead of
        // replacing the last path segment.
        let normalised = format!("{}/", base_url.trim_end_matches('/'));
        let base_url = Url::parse(&normalised).map_err(|e| TgtgError::InvalidBaseUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            client,
            base_url,
            email: options.email,
            language: options.language,
            timeout: options.timeout,
            polling_tries: MAX_POLLING_TRIES,
            polling_wait: POLLING_WAIT,
            session: Mutex::new(options.session),
        })
    }

    /// Overrides how often and how far apart the e-mail login is polled.
    #[must_use]
    pub fn with_polling(mut self, tries: u32, wait: Duration) -> Self {
        self.polling_tries = tries;
        self.polling_wait = wait;
        self
    }

    /// The per-request timeout this client was built with.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.timeout
    }

    /// A snapshot of the current token state.
    #[must_use]
    pub fn session(&self) -> Session {
        self.lock_session().clone()
    }

    /// Replaces the token state wholesale, e.g. after a user-agent rebuild.
    pub fn restore_session(&self, session: Session) {
        *self.lock_session() = session;
    }

    /// Ensures the client holds a usable access token.
    ///
    /// With an access token present this refreshes it when it has outlived its
    /// lifetime; otherwise it runs the e-mail login, which blocks until the
    /// user confirms the login mail or the polling budget runs out.
    ///
    /// # Errors
    ///
    /// - [`TgtgError::MissingCredentials`] with neither tokens nor e-mail.
    /// - [`TgtgError::TooManyRequests`] on HTTP 429.
    /// - [`TgtgError::Login`] / [`TgtgError::PollingExhausted`] if the e-mail login fails.
    /// - [`TgtgError::Api`] if the refresh endpoint rejects the refresh token.
    pub async fn login(&self) -> Result<(), TgtgError> {
        let has_token = self.lock_session().access_token.is_some();
        if has_token {
            return self.refresh_if_needed().await;
        }
        let email = self.email.clone().ok_or(TgtgError::MissingCredentials)?;
        self.login_by_email(&email).await
    }

    /// Fetches the favourite items of the logged-in user.
    ///
    /// # Errors
    ///
    /// Any login error, plus [`TgtgError::Api`], [`TgtgError::Http`] and
    /// [`TgtgError::Deserialize`] from the request itself.
    pub async fn get_favourite_items(&self, page_size: u32) -> Result<Vec<ItemRecord>, TgtgError> {
        self.login().await?;
        let user_id = self.lock_session().user_id.clone();
        let body = serde_json::json!({
            "user_id": user_id,
            "origin": { "latitude": 0.0, "longitude": 0.0 },
            "radius": 21,
            "page_size": page_size,
            "page": 1,
            "discover": false,
            "favorites_only": true,
            "item_categories": [],
            "diet_categories": [],
            "with_stock_only": false,
            "hidden_only": false,
            "we_care_only": false,
        });
        let response: ItemsResponse = self.post_json(ITEM_ENDPOINT, &body).await?;
        Ok(response.items)
    }

    /// Fetches the detail record of a single item.
    ///
    /// # Errors
    ///
    /// Same as [`TgtgClient::get_favourite_items`].
    pub async fn get_item(&self, item_id: &str) -> Result<ItemRecord, TgtgError> {
        self.login().await?;
        let user_id = self.lock_session().user_id.clone();
        let body = serde_json::json!({ "user_id": user_id, "origin": null });
        self.post_json(&format!("{ITEM_ENDPOINT}{item_id}"), &body)
            .await
    }

    /// Fetches the orders that have not been collected yet.
    ///
    /// # Errors
    ///
    /// Same as [`TgtgClient::get_favourite_items`].
    pub async fn get_active_orders(&self) -> Result<Vec<Order>, TgtgError> {
        self.login().await?;
        let user_id = self.lock_session().user_id.clone();
        let body = serde_json::json!({ "user_id": user_id });
        let response: ActiveOrdersResponse = self.post_json(ACTIVE_ORDERS_ENDPOINT, &body).await?;
        Ok(response.orders)
    }

    async fn refresh_if_needed(&self) -> Result<(), TgtgError> {
        let (needs_refresh, refresh_token) = {
            let session = self.lock_session();
            (session.needs_refresh(Utc::now()), session.refresh_token.clone())
        };
        if !needs_refresh {
            return Ok(());
        }
        let refresh_token = refresh_token.ok_or(TgtgError::MissingCredentials)?;

        let body = serde_json::json!({ "refresh_token": refresh_token });
        let response = self.send(REFRESH_ENDPOINT, &body).await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TgtgError::TooManyRequests);
        }
        if !status.is_success() {
            return Err(api_error(REFRESH_ENDPOINT, response).await);
        }
        let cookie = set_cookie(response.headers());
        let tokens: TokenResponse = decode(REFRESH_ENDPOINT, response).await?;
        self.apply_tokens(tokens, cookie);
        tracing::debug!("access token refreshed");
        Ok(())
    }

    async fn login_by_email(&self, email: &str) -> Result<(), TgtgError> {
        let body = serde_json::json!({
            "device_type": DEVICE_TYPE,
            "email": email,
        });
        let response = self.send(AUTH_BY_EMAIL_ENDPOINT, &body).await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TgtgError::TooManyRequests);
        }
        if !status.is_success() {
            return Err(TgtgError::Login(format!("authByEmail returned HTTP {status}")));
        }
        let first: AuthByEmailResponse = decode(AUTH_BY_EMAIL_ENDPOINT, response).await?;
        match first.state.as_str() {
            "WAIT" => {
                let polling_id = first.polling_id.ok_or_else(|| {
                    TgtgError::Login("authByEmail answered WAIT without a polling id".to_string())
                })?;
                self.poll_for_tokens(email, &polling_id).await
            }
            "TERMS" => Err(TgtgError::Login(format!(
                "{email} is not linked to an account, sign up in the app first"
            ))),
            other => Err(TgtgError::Login(format!("unexpected login state {other}"))),
        }
    }

    async fn poll_for_tokens(&self, email: &str, polling_id: &str) -> Result<(), TgtgError> {
        let body = serde_json::json!({
            "device_type": DEVICE_TYPE,
            "email": email,
            "request_polling_id": polling_id,
        });
        for _ in 0..self.polling_tries {
            let response = self.send(AUTH_POLLING_ENDPOINT, &body).await?;
            match response.status() {
                StatusCode::ACCEPTED => {
                    tracing::warn!(
                        email,
                        "check your mailbox on a desktop to confirm the login (the link does not work on a phone with the app installed)"
                    );
                    tokio::time::sleep(self.polling_wait).await;
                }
                StatusCode::OK => {
                    let cookie = set_cookie(response.headers());
                    let tokens: TokenResponse = decode(AUTH_POLLING_ENDPOINT, response).await?;
                    self.apply_tokens(tokens, cookie);
                    tracing::info!("logged in");
                    return Ok(());
                }
                StatusCode::TOO_MANY_REQUESTS => return Err(TgtgError::TooManyRequests),
                status => {
                    let body = response.text().await.unwrap_or_default();
                    return Err(TgtgError::Login(format!("HTTP {status}: {body}")));
                }
            }
        }
        Err(TgtgError::PollingExhausted {
            attempts: self.polling_tries,
        })
    }

    fn apply_tokens(&self, tokens: TokenResponse, cookie: Option<String>) {
        let mut session = self.lock_session();
        session.access_token = Some(tokens.access_token);
        session.refresh_token = Some(tokens.refresh_token);
        if let Some(ttl) = tokens.access_token_ttl_seconds {
            session.access_token_lifetime_secs = ttl;
        }
        if let Some(startup) = tokens.startup_data {
            session.user_id = Some(startup.user.user_id);
        }
        if cookie.is_some() {
            session.cookie = cookie;
        }
        session.last_refreshed_at = Some(Utc::now());
    }

    /// Sends an authenticated POST and decodes a 2xx JSON response.
    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T, TgtgError> {
        let response = self.send(endpoint, body).await?;
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TgtgError::TooManyRequests);
        }
        if !status.is_success() {
            return Err(api_error(endpoint, response).await);
        }
        decode(endpoint, response).await
    }

    async fn send(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, TgtgError> {
        let url = self
            .base_url
            .join(endpoint)
            .map_err(|e| TgtgError::InvalidBaseUrl {
                url: format!("{}{endpoint}", self.base_url),
                reason: e.to_string(),
            })?;
        let response = self
            .client
            .post(url)
            .headers(self.headers())
            .json(body)
            .send()
            .await?;
        Ok(response)
    }

    fn headers(&self) -> HeaderMap {
        let session = self.lock_session();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        insert_header(&mut headers, ACCEPT_LANGUAGE, &self.language);
        insert_header(&mut headers, USER_AGENT, &session.user_agent);
        if let Some(cookie) = &session.cookie {
            insert_header(&mut headers, COOKIE, cookie);
        }
        if let Some(token) = &session.access_token {
            insert_header(&mut headers, AUTHORIZATION, &format!("Bearer {token}"));
        }
        headers
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        // A panic while holding the lock cannot leave a half-written session
        // behind: every writer replaces whole fields.
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn insert_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(v) => {
            headers.insert(name, v);
        }
        Err(_) => tracing::warn!(header = name.as_str(), "dropping header with non-ASCII value"),
    }
}

fn set_cookie(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
}

async fn api_error(endpoint: &str, response: reqwest::Response) -> TgtgError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    TgtgError::Api {
        status,
        endpoint: endpoint.to_string(),
        body,
    }
}

async fn decode<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> Result<T, TgtgError> {
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| TgtgError::Deserialize {
        context: endpoint.to_string(),
        source: e,
    })
}
