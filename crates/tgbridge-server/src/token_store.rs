//! Persisted authentication tokens (`tokens.json`).
//!
//! The bundle is written after every login or refresh and read once at
//! startup. Bundles from older releases lack fields or carry an old `rev`;
//! those are deleted so the bridge falls back to a fresh e-mail login.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tgbridge_tgtg::user_agent::with_app_version;
use tgbridge_tgtg::{Session, DEFAULT_ACCESS_TOKEN_LIFETIME_SECS};

use crate::error::StoreError;
use crate::marketplace::Marketplace;

/// Bump when the file layout changes; older files are discarded on load.
pub const TOKEN_REVISION: u32 = 1;

const TOKEN_FILE: &str = "tokens.json";

/// Stored by early releases when the store listing reported no version.
const VARIES_WITH_DEVICE: &str = "Varies with device";

/// The on-disk token bundle. Field names match files written by earlier
/// releases so existing installations keep their login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default, rename = "access_token_lifetime")]
    pub access_token_lifetime_secs: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(
        default,
        rename = "last_time_token_refreshed",
        deserialize_with = "lenient_timestamp"
    )]
    pub last_refreshed_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "ua")]
    pub user_agent: Option<String>,
    #[serde(default, rename = "token_version")]
    pub client_version: Option<String>,
    #[serde(default, rename = "cookie_datadome")]
    pub cookie: Option<String>,
    #[serde(default, rename = "rev")]
    pub revision: Option<u32>,
}

impl TokenBundle {
    #[must_use]
    pub fn from_session(session: &Session, client_version: &str) -> Self {
        Self {
            access_token: session.access_token.clone(),
            access_token_lifetime_secs: Some(session.access_token_lifetime_secs),
            refresh_token: session.refresh_token.clone(),
            user_id: session.user_id.clone(),
            last_refreshed_at: session.last_refreshed_at,
            user_agent: Some(session.user_agent.clone()),
            client_version: Some(client_version.to_owned()),
            cookie: session.cookie.clone(),
            revision: Some(TOKEN_REVISION),
        }
    }

    /// Whether the bundle can be handed to the client as-is.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        let complete = self.user_agent.is_some()
            && self.client_version.is_some()
            && self.access_token.is_some()
            && self.refresh_token.is_some();
        complete && self.revision.is_some_and(|rev| rev >= TOKEN_REVISION)
    }

    /// Client session for a usable bundle, `None` otherwise.
    #[must_use]
    pub fn to_session(&self) -> Option<Session> {
        if !self.is_usable() {
            return None;
        }
        Some(Session {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            user_id: self.user_id.clone(),
            access_token_lifetime_secs: self
                .access_token_lifetime_secs
                .unwrap_or(DEFAULT_ACCESS_TOKEN_LIFETIME_SECS),
            last_refreshed_at: self.last_refreshed_at,
            cookie: self.cookie.clone(),
            user_agent: self.user_agent.clone()?,
        })
    }
}

/// Reads `tokens.json` and keeps track of the app version the current user
/// agent was built for.
#[derive(Debug)]
pub struct TokenStore {
    path: PathBuf,
    client_version: Mutex<String>,
}

impl TokenStore {
    pub fn new(data_dir: &Path, client_version: impl Into<String>) -> Self {
        Self {
            path: data_dir.join(TOKEN_FILE),
            client_version: Mutex::new(client_version.into()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted bundle. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] on read failure, [`StoreError::Malformed`] if the
    /// file is not a token bundle.
    pub fn load(&self) -> Result<Option<TokenBundle>, StoreError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| StoreError::Malformed {
                path: self.path.clone(),
                source,
            })
    }

    /// Loads the bundle and discards it when it is unusable or unreadable,
    /// so the caller falls back to credential login.
    ///
    /// # Errors
    ///
    /// Only I/O errors that prevent reading or deleting the file.
    pub fn load_usable(&self) -> Result<Option<TokenBundle>, StoreError> {
        let bundle = match self.load() {
            Ok(Some(bundle)) => bundle,
            Ok(None) => {
                tracing::info!("no token file found, logging in with credentials");
                return Ok(None);
            }
            Err(StoreError::Malformed { source, .. }) => {
                tracing::warn!(error = %source, "token file is unreadable, please log in via e-mail again");
                self.discard()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !bundle.is_usable() {
            tracing::info!(
                revision = ?bundle.revision,
                "old token file found, please log in via e-mail again"
            );
            self.discard()?;
            return Ok(None);
        }

        if let Some(version) = &bundle.client_version {
            self.set_client_version(version);
        }
        Ok(Some(bundle))
    }

    /// Atomically replaces the persisted bundle.
    ///
    /// # Errors
    ///
    /// [`StoreError::Encode`] or [`StoreError::Io`].
    pub fn save(&self, bundle: &TokenBundle) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(bundle).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &json)?;
        tracing::info!(path = %self.path.display(), "token file written");
        Ok(())
    }

    /// Persists the marketplace session together with the current version.
    ///
    /// # Errors
    ///
    /// Same as [`TokenStore::save`].
    pub fn save_session(&self, session: &Session) -> Result<(), StoreError> {
        self.save(&TokenBundle::from_session(session, &self.client_version()))
    }

    /// Deletes the persisted bundle. Deleting a missing file is not an error.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] if the file exists but cannot be removed.
    pub fn discard(&self) -> Result<(), StoreError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    #[must_use]
    pub fn client_version(&self) -> String {
        self.client_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_client_version(&self, version: &str) {
        *self
            .client_version
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = version.to_owned();
    }

    /// Rebuilds the user agent when `latest` is far enough ahead of the
    /// recorded version, then persists the session. Returns whether a
    /// rebuild happened.
    ///
    /// # Errors
    ///
    /// Same as [`TokenStore::save`]; the session has already been updated
    /// in the marketplace client when this fails.
    pub fn apply_latest_version(
        &self,
        marketplace: &dyn Marketplace,
        latest: &str,
    ) -> Result<bool, StoreError> {
        let recorded = self.client_version();
        if !version_is_stale(&recorded, latest) {
            tracing::debug!(recorded, latest, "app version is current");
            return Ok(false);
        }

        tracing::info!(recorded, latest, "token for old app version found, updating user agent");
        let mut session = marketplace.session();
        session.user_agent = with_app_version(&session.user_agent, latest);
        marketplace.restore_session(session);
        self.set_client_version(latest);
        self.save_session(&marketplace.session())?;
        Ok(true)
    }
}

/// Whether a user agent built for `recorded` should be rebuilt for `latest`.
///
/// Stale means more than two minor versions behind, or any major version
/// behind. An unparsable `recorded` value is always stale; an unparsable
/// `latest` never is.
#[must_use]
pub fn version_is_stale(recorded: &str, latest: &str) -> bool {
    let Some(latest) = parse_version(latest) else {
        return false;
    };
    if recorded == VARIES_WITH_DEVICE {
        return true;
    }
    let Some(recorded) = parse_version(recorded) else {
        return true;
    };
    let minor_distance = i128::from(latest.1) - i128::from(recorded.1);
    minor_distance > 2 || latest.0 > recorded.0
}

fn parse_version(raw: &str) -> Option<(u64, u64)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().map_or(Some(0), |m| m.parse().ok())?;
    Some((major, minor))
}

/// Writes to a sibling temp file and renames it over `path`.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };
    std::fs::write(&tmp, contents).map_err(io_err)?;
    std::fs::rename(&tmp, path).map_err(io_err)
}

/// Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS[.ffffff]` form older
/// releases wrote. Anything else reads as unknown, which forces a refresh.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }))
}

#[cfg(test)]
#[path = "token_store_test.rs"]
mod tests;
