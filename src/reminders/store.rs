use std::path::PathBuf;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::spec::{ReminderCategory, ReminderSpec};

/// Source of truth for reminders. The hosted backend implements this in the app shell; the
/// core only reads the full set and flips `delivered`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReminderStore: Send + Sync + 'static {
    /// Full current set of reminders of one category for this device/account.
    async fn fetch(&self, category: ReminderCategory) -> Result<Vec<ReminderSpec>>;

    async fn mark_delivered(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ReminderFile {
    #[serde(default)]
    personal: Vec<ReminderSpec>,
    #[serde(default)]
    shared: Vec<ReminderSpec>,
}

impl ReminderFile {
    fn category(&self, category: ReminderCategory) -> &Vec<ReminderSpec> {
        match category {
            ReminderCategory::Personal => &self.personal,
            ReminderCategory::Shared => &self.shared,
        }
    }

    fn category_mut(&mut self, category: ReminderCategory) -> &mut Vec<ReminderSpec> {
        match category {
            ReminderCategory::Personal => &mut self.personal,
            ReminderCategory::Shared => &mut self.shared,
        }
    }
}

/// File backed stand-in for the hosted reminder store, used by the command line front end.
pub struct JsonReminderStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonReminderStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn read(&self) -> Result<ReminderFile> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ReminderFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, file: &ReminderFile) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(file)?).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Adds or replaces a reminder with the same id.
    pub async fn add(&self, category: ReminderCategory, spec: ReminderSpec) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let specs = file.category_mut(category);
        specs.retain(|v| v.id != spec.id);
        debug!("Storing {category} reminder {}", spec.id);
        specs.push(spec);
        self.write(&file).await
    }
}

#[async_trait]
impl ReminderStore for JsonReminderStore {
    async fn fetch(&self, category: ReminderCategory) -> Result<Vec<ReminderSpec>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.category(category).clone())
    }

    async fn mark_delivered(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let spec = file
            .personal
            .iter_mut()
            .chain(file.shared.iter_mut())
            .find(|v| v.id == id)
            .ok_or_else(|| anyhow!("No reminder with id {id}"))?;
        spec.delivered = true;
        self.write(&file).await
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use crate::reminders::spec::{ReminderCategory, ReminderSchedule, ReminderSpec};

    use super::{JsonReminderStore, ReminderStore};

    fn spec(id: &str) -> ReminderSpec {
        ReminderSpec {
            id: id.into(),
            title: "Weigh in".into(),
            notes: String::new(),
            schedule: ReminderSchedule::OneTime {
                notify_at: Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap(),
            },
            origin_device_id: None,
            delivered: false,
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonReminderStore::new(dir.path().join("reminders.json"));
        assert!(store.fetch(ReminderCategory::Personal).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_add_and_mark_delivered() -> Result<()> {
        let dir = tempdir()?;
        let store = JsonReminderStore::new(dir.path().join("reminders.json"));
        store.add(ReminderCategory::Personal, spec("a")).await?;
        store.add(ReminderCategory::Shared, spec("b")).await?;
        store.add(ReminderCategory::Shared, spec("b")).await?;

        assert_eq!(store.fetch(ReminderCategory::Personal).await?.len(), 1);
        assert_eq!(store.fetch(ReminderCategory::Shared).await?.len(), 1);

        store.mark_delivered("b").await?;
        assert!(store.fetch(ReminderCategory::Shared).await?[0].delivered);
        assert!(store.mark_delivered("missing").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("reminders.json");
        tokio::fs::write(&path, b"{not json").await?;
        let store = JsonReminderStore::new(path);
        assert!(store.fetch(ReminderCategory::Personal).await.is_err());
        Ok(())
    }
}
