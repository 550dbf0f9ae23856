//! Player preferences persistence
//!
//! Only plain scalars are persisted: the last played channel index (for
//! resume on startup) and the playlist source descriptor. The store is
//! deliberately tiny; playlist and EPG contents are never written here.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{AppError, AppResult};

#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn save_last_played_index(&self, index: i64) -> AppResult<()>;
    async fn load_last_played_index(&self) -> AppResult<i64>;
    async fn save_playlist_source(&self, source: &str) -> AppResult<()>;
    async fn load_playlist_source(&self) -> AppResult<Option<String>>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Preferences {
    #[serde(default)]
    last_played_index: i64,
    #[serde(default)]
    playlist_source: Option<String>,
}

/// File-backed store: one JSON document, rewritten whole on every save
///
/// All access is serialized behind a mutex so concurrent saves cannot
/// interleave their read-modify-write cycles.
pub struct JsonPreferencesStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonPreferencesStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> AppResult<Preferences> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| AppError::Persistence {
                message: format!("corrupt preferences file {}: {e}", self.path.display()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Preferences::default()),
            Err(e) => Err(AppError::Persistence {
                message: format!("failed to read {}: {e}", self.path.display()),
            }),
        }
    }

    async fn write(&self, prefs: &Preferences) -> AppResult<()> {
        let json = serde_json::to_vec_pretty(prefs).map_err(|e| AppError::Persistence {
            message: format!("failed to serialize preferences: {e}"),
        })?;
        tokio::fs::write(&self.path, json)
            .await
            .map_err(|e| AppError::Persistence {
                message: format!("failed to write {}: {e}", self.path.display()),
            })
    }
}

#[async_trait]
impl PreferencesStore for JsonPreferencesStore {
    async fn save_last_played_index(&self, index: i64) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut prefs = self.read().await?;
        prefs.last_played_index = index;
        self.write(&prefs).await?;
        debug!("Saved last played index: {}", index);
        Ok(())
    }

    async fn load_last_played_index(&self) -> AppResult<i64> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.last_played_index)
    }

    async fn save_playlist_source(&self, source: &str) -> AppResult<()> {
        let _guard = self.lock.lock().await;
        let mut prefs = self.read().await?;
        prefs.playlist_source = Some(source.to_string());
        self.write(&prefs).await
    }

    async fn load_playlist_source(&self) -> AppResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.playlist_source)
    }
}

/// In-memory store used by tests and headless runs
#[derive(Default)]
pub struct MemoryPreferencesStore {
    prefs: Mutex<Preferences>,
}

impl MemoryPreferencesStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferencesStore for MemoryPreferencesStore {
    async fn save_last_played_index(&self, index: i64) -> AppResult<()> {
        self.prefs.lock().await.last_played_index = index;
        Ok(())
    }

    async fn load_last_played_index(&self) -> AppResult<i64> {
        Ok(self.prefs.lock().await.last_played_index)
    }

    async fn save_playlist_source(&self, source: &str) -> AppResult<()> {
        self.prefs.lock().await.playlist_source = Some(source.to_string());
        Ok(())
    }

    async fn load_playlist_source(&self) -> AppResult<Option<String>> {
        Ok(self.prefs.lock().await.playlist_source.clone())
    }
}
