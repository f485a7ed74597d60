//! Acknowledgment storage and the dedup filter.
//!
//! A key, once acknowledged, stays acknowledged; there is no removal.

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

use crate::notify::derive::Notification;
use crate::notify::NotifyError;

#[async_trait]
pub trait AcknowledgmentStore: Send + Sync {
    async fn is_acknowledged(&self, key: &str) -> Result<bool, NotifyError>;

    /// Idempotent: acknowledging an acknowledged key succeeds.
    async fn acknowledge(&self, key: &str) -> Result<(), NotifyError>;
}

/// Drop notifications whose key is already acknowledged, keeping order.
pub async fn filter_unacknowledged(
    notifications: Vec<Notification>,
    store: &dyn AcknowledgmentStore,
) -> Result<Vec<Notification>, NotifyError> {
    Ok(partition_acknowledged(notifications, store).await?.0)
}

/// Like [`filter_unacknowledged`], also returning the keys it suppressed.
pub async fn partition_acknowledged(
    notifications: Vec<Notification>,
    store: &dyn AcknowledgmentStore,
) -> Result<(Vec<Notification>, Vec<String>), NotifyError> {
    let mut fresh = Vec::with_capacity(notifications.len());
    let mut suppressed = Vec::new();
    for notification in notifications {
        if store.is_acknowledged(&notification.key).await? {
            debug!(key = %notification.key, "suppressing acknowledged notification");
            suppressed.push(notification.key);
            continue;
        }
        fresh.push(notification);
    }
    Ok((fresh, suppressed))
}

/// Process-local store, for tests and `store.backend = "memory"`.
#[derive(Debug, Default)]
pub struct MemoryAckStore {
    keys: Mutex<HashSet<String>>,
}

impl MemoryAckStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: Mutex::new(keys.into_iter().map(Into::into).collect()),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.lock().map(|k| k.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl AcknowledgmentStore for MemoryAckStore {
    async fn is_acknowledged(&self, key: &str) -> Result<bool, NotifyError> {
        let keys = self.keys.lock().map_err(NotifyError::ack_store)?;
        Ok(keys.contains(key))
    }

    async fn acknowledge(&self, key: &str) -> Result<(), NotifyError> {
        let mut keys = self.keys.lock().map_err(NotifyError::ack_store)?;
        keys.insert(key.to_string());
        Ok(())
    }
}

/// JSON file holding the acknowledged keys of one profile.
///
/// The whole set is kept in memory and rewritten (temp file + rename) on
/// every new acknowledgment, so a key counts as acknowledged only once it
/// is on disk.
pub struct FileAckStore {
    path: PathBuf,
    keys: AsyncMutex<HashSet<String>>,
}

impl FileAckStore {
    /// Open (or start) the store at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, NotifyError> {
        let path = path.as_ref().to_path_buf();
        let keys: HashSet<String> = match tokio::fs::read_to_string(&path).await {
            Ok(contents) if contents.trim().is_empty() => HashSet::new(),
            Ok(contents) => serde_json::from_str(&contents).map_err(NotifyError::ack_store)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(NotifyError::ack_store(e)),
        };
        info!(path = %path.display(), acknowledged = keys.len(), "opened acknowledgment file");
        Ok(Self {
            path,
            keys: AsyncMutex::new(keys),
        })
    }

    async fn persist(&self, keys: &HashSet<String>) -> Result<(), NotifyError> {
        let mut sorted: Vec<&String> = keys.iter().collect();
        sorted.sort();
        let json = serde_json::to_string_pretty(&sorted).map_err(NotifyError::ack_store)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(NotifyError::ack_store)?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(NotifyError::ack_store)
    }
}

#[async_trait]
impl AcknowledgmentStore for FileAckStore {
    async fn is_acknowledged(&self, key: &str) -> Result<bool, NotifyError> {
        Ok(self.keys.lock().await.contains(key))
    }

    async fn acknowledge(&self, key: &str) -> Result<(), NotifyError> {
        let mut keys = self.keys.lock().await;
        if keys.contains(key) {
            return Ok(());
        }
        let mut next = keys.clone();
        next.insert(key.to_string());
        self.persist(&next).await?;
        *keys = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::types::EventPosition;
    use crate::notify::derive::{notification_key, Category};
    use alloy::primitives::Address;
    use chrono::Utc;

    fn notification(log_index: u64) -> Notification {
        let position = EventPosition::new(10, 0, log_index);
        let account = Address::repeat_byte(1);
        Notification {
            key: notification_key(&position, &account),
            account,
            occurred_at: Utc::now(),
            category: Category::Drawn,
            message: "m".to_string(),
            dispute_id: 1,
            position,
        }
    }

    #[tokio::test]
    async fn filter_drops_acknowledged_and_keeps_order() {
        let items: Vec<_> = (0..4).map(notification).collect();
        let store = MemoryAckStore::with_keys([items[1].key.clone()]);

        let out = filter_unacknowledged(items.clone(), &store).await.unwrap();
        let keys: Vec<_> = out.iter().map(|n| n.key.clone()).collect();
        assert_eq!(
            keys,
            vec![items[0].key.clone(), items[2].key.clone(), items[3].key.clone()]
        );
    }

    #[tokio::test]
    async fn partition_reports_suppressed_keys() {
        let items: Vec<_> = (0..3).map(notification).collect();
        let store = MemoryAckStore::with_keys([items[0].key.clone(), items[2].key.clone()]);

        let (fresh, suppressed) = partition_acknowledged(items.clone(), &store).await.unwrap();
        assert_eq!(fresh, vec![items[1].clone()]);
        assert_eq!(suppressed, vec![items[0].key.clone(), items[2].key.clone()]);
    }

    #[tokio::test]
    async fn memory_acknowledge_is_idempotent() {
        let store = MemoryAckStore::new();
        store.acknowledge("k").await.unwrap();
        store.acknowledge("k").await.unwrap();
        assert!(store.is_acknowledged("k").await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acks.json");

        let store = FileAckStore::open(&path).await.unwrap();
        assert!(!store.is_acknowledged("a").await.unwrap());
        store.acknowledge("a").await.unwrap();
        store.acknowledge("a").await.unwrap();
        drop(store);

        let reopened = FileAckStore::open(&path).await.unwrap();
        assert!(reopened.is_acknowledged("a").await.unwrap());
        assert!(!reopened.is_acknowledged("b").await.unwrap());
    }

    #[tokio::test]
    async fn file_store_write_failure_is_reported_and_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("acks.json");

        let store = FileAckStore::open(&path).await.unwrap();
        let err = store.acknowledge("a").await.unwrap_err();
        assert!(matches!(err, NotifyError::AckStore(_)));
        assert!(!store.is_acknowledged("a").await.unwrap());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acks.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            FileAckStore::open(&path).await,
            Err(NotifyError::AckStore(_))
        ));
    }
}
