//! Favorites store — persisted list of peers the user marked as favorite.
//!
//! Read and written by presentation-layer code only; the transport core
//! never touches it. Records are keyed on the session-stable identifier the
//! facade resolves for an identity, with the observed name and an optional
//! user nickname carried alongside. Stored as a JSON file under the node's
//! data directory, order preserved.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// File name under the data directory.
const FAVORITES_FILE: &str = "favorites.json";

/// One user-marked peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FavoritePeer {
    /// Stable identifier, used as the primary key.
    pub stable_id: String,

    /// Name the peer advertised when it was marked, if any.
    #[serde(default)]
    pub observed_name: Option<String>,

    /// User-defined nickname, overriding the observed name when present.
    #[serde(default)]
    pub nickname: Option<String>,
}

impl FavoritePeer {
    /// What a list row should show for this favorite.
    pub fn display_label(&self) -> &str {
        self.nickname
            .as_deref()
            .or(self.observed_name.as_deref())
            .unwrap_or(&self.stable_id)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, serde_json::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize favorites: {0}")]
    SerializeFailed(serde_json::Error),
}

// ── Store ─────────────────────────────────────────────────────────────────────

/// JSON-file-backed favorites store.
#[derive(Debug, Clone)]
pub struct FavoriteStore {
    path: PathBuf,
}

impl FavoriteStore {
    /// Store at an explicit file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the conventional location under a data directory.
    pub fn in_data_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join(FAVORITES_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all favorites. A missing file is an empty list, not an error.
    pub fn load(&self) -> Result<Vec<FavoritePeer>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path)
            .map_err(|e| StoreError::ReadFailed(self.path.clone(), e))?;
        serde_json::from_str(&text).map_err(|e| StoreError::ParseFailed(self.path.clone(), e))
    }

    /// Overwrite the stored list.
    pub fn save(&self, favorites: &[FavoritePeer]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::WriteFailed(self.path.clone(), e))?;
        }
        let text =
            serde_json::to_string_pretty(favorites).map_err(StoreError::SerializeFailed)?;
        std::fs::write(&self.path, text)
            .map_err(|e| StoreError::WriteFailed(self.path.clone(), e))
    }

    /// Insert or replace by `stable_id`, preserving list order for an
    /// existing entry. Returns the updated list.
    pub fn upsert(&self, favorite: FavoritePeer) -> Result<Vec<FavoritePeer>, StoreError> {
        let mut current = self.load()?;
        match current.iter_mut().find(|f| f.stable_id == favorite.stable_id) {
            Some(existing) => *existing = favorite,
            None => current.push(favorite),
        }
        self.save(&current)?;
        Ok(current)
    }

    /// Remove by `stable_id`. Returns the updated list.
    pub fn remove(&self, stable_id: &str) -> Result<Vec<FavoritePeer>, StoreError> {
        let mut current = self.load()?;
        current.retain(|f| f.stable_id != stable_id);
        self.save(&current)?;
        Ok(current)
    }
}
