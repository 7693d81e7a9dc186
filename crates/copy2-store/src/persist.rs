use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capacity::Capacity;
use crate::store::{ProtectedStore, StoreSnapshot};

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize {what}: {source}")]
    Serialize {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl PersistError {
    fn io(context: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// The per-collection JSON documents backing a store.
#[derive(Debug, Clone)]
pub struct StoreFiles {
    pub history: PathBuf,
    pub favorites: PathBuf,
    pub pins: PathBuf,
    pub tags: PathBuf,
}

impl StoreFiles {
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            history: dir.join("history.json"),
            favorites: dir.join("favorites.json"),
            pins: dir.join("pins.json"),
            tags: dir.join("tags.json"),
        }
    }

    /// Load the store. Missing, unreadable, or corrupt files each degrade to
    /// an empty collection.
    #[must_use]
    pub fn load(&self, capacity: Capacity) -> ProtectedStore {
        let snapshot = StoreSnapshot {
            history: load_or_default(&self.history),
            favorites: load_or_default(&self.favorites),
            pins: load_or_default(&self.pins),
            tags: load_or_default::<BTreeMap<String, BTreeSet<String>>>(&self.tags),
        };
        ProtectedStore::from_snapshot(capacity, &snapshot)
    }

    /// Write every collection atomically.
    ///
    /// # Errors
    /// Returns an error if a collection cannot be serialized or written.
    pub fn save(&self, store: &ProtectedStore) -> Result<(), PersistError> {
        let snapshot = store.snapshot();
        save_json(&self.history, "history", &snapshot.history)?;
        save_json(&self.favorites, "favorites", &snapshot.favorites)?;
        save_json(&self.pins, "pins", &snapshot.pins)?;
        save_json(&self.tags, "tags", &snapshot.tags)?;
        Ok(())
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> T {
    let Ok(data) = std::fs::read_to_string(path) else {
        return T::default();
    };
    match serde_json::from_str(&data) {
        Ok(value) => value,
        Err(error) => {
            warn!("Ignoring corrupt store file {}: {error}", path.display());
            T::default()
        }
    }
}

fn save_json<T: Serialize>(path: &Path, what: &'static str, value: &T) -> Result<(), PersistError> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|source| PersistError::Serialize { what, source })?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|error| PersistError::io("failed to create directory for", path, error))?;
    }
    write_atomic(path, &data).map_err(|error| PersistError::io("failed to write", path, error))
}

/// Export/import document: the whole store plus the soft cap it was
/// exported with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportDocument {
    #[serde(default)]
    pub exported_at: String,
    #[serde(flatten)]
    pub snapshot: StoreSnapshot,
    #[serde(default)]
    pub max_history: Option<usize>,
}

impl ExportDocument {
    #[must_use]
    pub fn from_store(store: &ProtectedStore) -> Self {
        Self {
            exported_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            snapshot: store.snapshot(),
            max_history: Some(store.capacity().soft()),
        }
    }
}

/// Write an export document for `store` to `path`.
///
/// # Errors
/// Returns an error if the document cannot be serialized or written.
pub fn write_export(path: &Path, store: &ProtectedStore) -> Result<(), PersistError> {
    save_json(path, "export document", &ExportDocument::from_store(store))
}

/// Read an export document. Unlike the store files, a malformed export is
/// reported rather than silently replaced by an empty one.
///
/// # Errors
/// Returns an error if the file cannot be read or is not a valid export
/// document.
pub fn read_export(path: &Path) -> Result<ExportDocument, PersistError> {
    let data = std::fs::read_to_string(path)
        .map_err(|error| PersistError::io("failed to read", path, error))?;
    serde_json::from_str(&data).map_err(|source| PersistError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Replace `path` with `data` via a uniquely named sibling temp file, so a
/// crash mid-write never leaves a truncated document behind.
///
/// # Errors
/// Returns an error if the temp file cannot be created, written, or moved
/// into place.
pub fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "store path has no parent")
    })?;

    let file_name = path
        .file_name()
        .and_then(std::ffi::OsStr::to_str)
        .unwrap_or("store");
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_nanos());
    let pid = std::process::id();

    let mut tmp_path = None;
    for attempt in 0..16_u8 {
        let candidate = parent.join(format!(".{file_name}.{pid}.{timestamp}.{attempt}.tmp"));
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(mut file) => {
                file.write_all(data)?;
                file.sync_all()?;
                tmp_path = Some(candidate);
                break;
            }
            Err(error) if error.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(error) => return Err(error),
        }
    }

    let Some(tmp_path) = tmp_path else {
        return Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "failed to create unique store temp file",
        ));
    };

    if let Err(error) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(error);
    }

    Ok(())
}
