//! The item ids published in the previous cycle (`known_shops.json`), used
//! to retract sensors for stores that were removed from the favourites.

use std::path::{Path, PathBuf};

use crate::error::StoreError;
use crate::token_store::write_atomic;

const KNOWN_SHOPS_FILE: &str = "known_shops.json";

#[derive(Debug, Clone)]
pub struct KnownShops {
    path: PathBuf,
}

impl KnownShops {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(KNOWN_SHOPS_FILE),
        }
    }

    /// The previously saved ids, or `None` before the first save.
    ///
    /// # Errors
    ///
    /// [`StoreError::Io`] or [`StoreError::Malformed`].
    pub fn load(&self) -> Result<Option<Vec<String>>, StoreError> {
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

    /// Replaces the saved ids.
    ///
    /// # Errors
    ///
    /// [`StoreError::Encode`] or [`StoreError::Io`].
    pub fn save(&self, item_ids: &[String]) -> Result<(), StoreError> {
        let json = serde_json::to_vec(item_ids).map_err(|source| StoreError::Encode {
            path: self.path.clone(),
            source,
        })?;
        write_atomic(&self.path, &json)
    }
}

/// Ids in `previous` that are missing from `current`, in `previous` order.
#[must_use]
pub fn removed_ids<'a>(previous: &'a [String], current: &[String]) -> Vec<&'a str> {
    previous
        .iter()
        .filter(|id| !current.contains(*id))
        .map(String::as_str)
        .collect()
}
