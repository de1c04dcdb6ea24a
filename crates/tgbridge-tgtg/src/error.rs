use thiserror::Error;

/// Errors returned by the marketplace API client.
#[derive(Debug, Error)]
pub enum TgtgError {
    /// Network or TLS failure from the underlying HTTP client.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// HTTP 429 from any endpoint.
    #[error("too many requests, try again later")]
    TooManyRequests,

    /// Non-2xx response outside the login flow.
    #[error("unexpected HTTP status {status} from {endpoint}: {body}")]
    Api {
        status: u16,
        endpoint: String,
        body: String,
    },

    /// The login flow was refused.
    #[error("login failed: {0}")]
    Login(String),

    /// The user never confirmed the login e-mail.
    #[error("login e-mail was not confirmed after {attempts} polling attempts")]
    PollingExhausted { attempts: u32 },

    /// Neither a token set nor an e-mail address is available.
    #[error("no access token and no e-mail address to log in with")]
    MissingCredentials,

    /// The response body could not be deserialized into the expected type.
    #[error("JSON deserialization error for {context}: {source}")]
    Deserialize {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    /// The Play-Store page did not contain a recognisable version string.
    #[error("no app version found in store listing")]
    VersionNotFound,
}
