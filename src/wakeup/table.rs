use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use super::{Precision, RecurrenceRule, WakeupPayload, WakeupRegistrar};

/// One entry of the wake-up table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    pub trigger: DateTime<Utc>,
    pub payload: WakeupPayload,
    pub rule: RecurrenceRule,
    pub precision: Precision,
}

/// Wake-up table kept by this process. When a path is given the table is written through to a
/// JSON file after every change, and read back before every operation, so separate invocations
/// see the same registrations.
pub struct LocalWakeupTable {
    path: Option<PathBuf>,
    exact_permitted: bool,
    entries: Mutex<BTreeMap<String, Registration>>,
}

impl LocalWakeupTable {
    pub fn in_memory(exact_permitted: bool) -> Self {
        Self {
            path: None,
            exact_permitted,
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Opens the table file, starting empty when it is missing or unreadable.
    pub async fn open(path: PathBuf, exact_permitted: bool) -> Result<Self> {
        let entries = read_entries(&path).await?;
        Ok(Self {
            path: Some(path),
            exact_permitted,
            entries: Mutex::new(entries),
        })
    }

    /// Current registrations ordered by id.
    pub async fn registrations(&self) -> Vec<Registration> {
        self.lock_fresh().await.values().cloned().collect()
    }

    /// Locks the table after picking up whatever other processes wrote to the file. Keeps the
    /// cached entries when the file can't be read.
    async fn lock_fresh(&self) -> MutexGuard<'_, BTreeMap<String, Registration>> {
        let mut entries = self.entries.lock().await;
        if let Some(path) = &self.path {
            match read_entries(path).await {
                Ok(v) => *entries = v,
                Err(e) => warn!("Failed to reload wake-up table {path:?}, using cached {e:?}"),
            }
        }
        entries
    }

    async fn write_through(&self, entries: &BTreeMap<String, Registration>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let values = entries.values().collect::<Vec<_>>();
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&values)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn insert(&self, registration: Registration) -> Result<()> {
        let mut entries = self.lock_fresh().await;
        debug!(
            "Registering wake-up {} at {}",
            registration.id, registration.trigger
        );
        entries.insert(registration.id.clone(), registration);
        self.write_through(&entries).await
    }
}

async fn read_entries(path: &Path) -> Result<BTreeMap<String, Registration>> {
    let entries = match tokio::fs::read(path).await {
        Ok(bytes) => match serde_json::from_slice::<Vec<Registration>>(&bytes) {
            Ok(v) => v.into_iter().map(|r| (r.id.clone(), r)).collect(),
            Err(e) => {
                warn!("Wake-up table {path:?} is corrupted, starting empty: {e}");
                BTreeMap::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
        Err(e) => Err(e)?,
    };
    Ok(entries)
}

#[async_trait]
impl WakeupRegistrar for LocalWakeupTable {
    async fn schedule(
        &self,
        trigger: DateTime<Utc>,
        id: &str,
        payload: WakeupPayload,
        precision: Precision,
    ) -> Result<()> {
        self.insert(Registration {
            id: id.to_owned(),
            trigger,
            payload,
            rule: RecurrenceRule::Once,
            precision,
        })
        .await
    }

    async fn schedule_recurring(
        &self,
        first_trigger: DateTime<Utc>,
        id: &str,
        payload: WakeupPayload,
        rule: RecurrenceRule,
        precision: Precision,
    ) -> Result<()> {
        self.insert(Registration {
            id: id.to_owned(),
            trigger: first_trigger,
            payload,
            rule,
            precision,
        })
        .await
    }

    async fn cancel(&self, id: &str) -> Result<()> {
        let mut entries = self.lock_fresh().await;
        if entries.remove(id).is_some() {
            debug!("Cancelled wake-up {id}");
            self.write_through(&entries).await?;
        }
        Ok(())
    }

    async fn cancel_all(&self) -> Result<()> {
        let mut entries = self.lock_fresh().await;
        debug!("Cancelling {} wake-ups", entries.len());
        entries.clear();
        self.write_through(&entries).await
    }

    fn exact_permitted(&self) -> bool {
        self.exact_permitted
    }
}
