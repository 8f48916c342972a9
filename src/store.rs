//! Process-wide settings and feedback history.
//!
//! The root folder path and the list of past feedback records are simple
//! key-value state with no pipeline involvement: loaded explicitly at
//! startup, mutated only through accessors, persisted as one JSON file
//! under the platform config directory:
//!   macOS:   ~/Library/Application Support/snip-relay/store.json
//!   Linux:   ~/.config/snip-relay/store.json
//!   Windows: %APPDATA%/snip-relay/store.json

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

/// One past feedback submission, kept for the history panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub feedback: String,
    pub page_url: String,
    pub timestamp_ms: u64,
    /// Prompt string the agent generated for this record.
    pub prompt: String,
    pub screenshot_path: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    #[serde(default)]
    root_folder_path: String,
    #[serde(default)]
    history: Vec<HistoryEntry>,
}

/// Thread-safe store for the root folder path and feedback history.
pub struct FeedbackStore {
    path: PathBuf,
    inner: Mutex<StoreData>,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store file is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Store file location under the platform config directory.
pub fn default_store_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("snip-relay")
        .join("store.json")
}

impl FeedbackStore {
    /// Load the store from `path`, starting empty if the file does not
    /// exist yet.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let data = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(&path)?)?
        } else {
            StoreData::default()
        };
        log::info!(
            "Store loaded: root folder {:?}, {} history entries",
            data.root_folder_path,
            data.history.len()
        );
        Ok(Self { path, inner: Mutex::new(data) })
    }

    /// Load from [`default_store_path`].
    pub fn load_default() -> Result<Self, StoreError> {
        Self::load(default_store_path())
    }

    /// Currently configured root folder path; empty until set.
    pub fn root_folder(&self) -> String {
        self.lock().root_folder_path.clone()
    }

    /// Set and persist the root folder path.
    pub fn set_root_folder(&self, path: impl Into<String>) -> Result<(), StoreError> {
        let mut data = self.lock();
        data.root_folder_path = path.into();
        log::info!("Root folder set to {:?}", data.root_folder_path);
        self.persist(&data)
    }

    /// Past feedback records, newest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        let mut entries = self.lock().history.clone();
        entries.sort_by(|a, b| b.timestamp_ms.cmp(&a.timestamp_ms));
        entries
    }

    /// Append and persist one history entry.
    pub fn record(&self, entry: HistoryEntry) -> Result<(), StoreError> {
        let mut data = self.lock();
        data.history.push(entry);
        self.persist(&data)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreData> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, data: &StoreData) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_vec_pretty(data)?)?;
        Ok(())
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
