use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::state::{Session, TimerState};

/// Name of the blob holding the active session and its timer.
pub const STORE_KEY: &str = "timer-session";

/// Everything the clock engine needs to survive a process restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PersistedClock {
    pub session: Option<Session>,
    pub timer: TimerState,
}

/// Key-value boundary the engine checkpoints into after every transition.
#[async_trait]
pub trait StateStore: Send + Sync + 'static {
    /// `Ok(None)` when nothing was saved yet. A blob that can't be decoded is an error.
    async fn load(&self) -> Result<Option<PersistedClock>>;

    async fn save(&self, state: &PersistedClock) -> Result<()>;
}

/// Stores the blob as a JSON file named after the store key.
pub struct JsonStateStore {
    path: PathBuf,
}

impl JsonStateStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            path: dir.join(format!("{STORE_KEY}.json")),
        }
    }
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn load(&self) -> Result<Option<PersistedClock>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, state: &PersistedClock) -> Result<()> {
        // Write then rename so a crash mid-write leaves the previous checkpoint intact.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(state)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!("Checkpointed timer state to {:?}", self.path);
        Ok(())
    }
}

/// Keeps the serialized blob in memory. Used when the shell has no writable directory and in
/// tests.
#[derive(Default)]
pub struct MemoryStateStore {
    blob: std::sync::Mutex<Option<String>>,
}

impl MemoryStateStore {
    pub fn with_raw(raw: &str) -> Self {
        Self {
            blob: std::sync::Mutex::new(Some(raw.to_owned())),
        }
    }

    pub fn raw(&self) -> Option<String> {
        self.blob.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load(&self) -> Result<Option<PersistedClock>> {
        match self.raw() {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, state: &PersistedClock) -> Result<()> {
        let raw = serde_json::to_string(state)?;
        if let Ok(mut blob) = self.blob.lock() {
            *blob = Some(raw);
        }
        Ok(())
    }
}
