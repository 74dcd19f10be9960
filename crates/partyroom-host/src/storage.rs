//! Durable per-room storage kept in host memory.
//!
//! [`MemoryStorage`] outlives the room runtimes that use it: evicting a room
//! drops its runtime, never its storage. Each storage holds at most one
//! pending alarm, backed by a tokio timer.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::debug;

use partyroom_common::PartyError;
use partyroom_core::Storage;

/// Called when an alarm fires.
pub type AlarmHandler = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct PendingAlarm {
    at: SystemTime,
    generation: u64,
    timer: JoinHandle<()>,
}

#[derive(Default)]
struct AlarmSlot {
    pending: Option<PendingAlarm>,
    generation: u64,
}

/// In-memory implementation of [`Storage`].
pub struct MemoryStorage {
    values: RwLock<BTreeMap<String, serde_json::Value>>,
    alarm: Arc<Mutex<AlarmSlot>>,
    on_alarm: Option<AlarmHandler>,
}

impl MemoryStorage {
    /// Storage whose alarms fire nothing.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Storage whose alarms call `handler`.
    pub fn with_alarm_handler(handler: AlarmHandler) -> Self {
        Self::build(Some(handler))
    }

    fn build(on_alarm: Option<AlarmHandler>) -> Self {
        Self {
            values: RwLock::new(BTreeMap::new()),
            alarm: Arc::new(Mutex::new(AlarmSlot::default())),
            on_alarm,
        }
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, PartyError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), PartyError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, PartyError> {
        Ok(self.values.write().remove(key).is_some())
    }

    async fn list(
        &self,
        prefix: Option<&str>,
    ) -> Result<BTreeMap<String, serde_json::Value>, PartyError> {
        let values = self.values.read();
        Ok(values
            .iter()
            .filter(|(key, _)| prefix.is_none_or(|prefix| key.starts_with(prefix)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }

    async fn set_alarm(&self, at: SystemTime) -> Result<(), PartyError> {
        let delay = at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO);

        let mut slot = self.alarm.lock();
        if let Some(previous) = slot.pending.take() {
            previous.timer.abort();
        }
        slot.generation += 1;
        let generation = slot.generation;

        let alarm = Arc::downgrade(&self.alarm);
        let handler = self.on_alarm.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            // Clear the slot first so the handler can schedule the next alarm.
            let Some(alarm) = alarm.upgrade() else {
                return;
            };
            {
                let mut slot = alarm.lock();
                match &slot.pending {
                    Some(pending) if pending.generation == generation => slot.pending = None,
                    _ => return,
                }
            }

            debug!("Alarm fired");
            if let Some(handler) = handler {
                handler().await;
            }
        });

        slot.pending = Some(PendingAlarm {
            at,
            generation,
            timer,
        });
        Ok(())
    }

    async fn get_alarm(&self) -> Result<Option<SystemTime>, PartyError> {
        Ok(self.alarm.lock().pending.as_ref().map(|pending| pending.at))
    }

    async fn delete_alarm(&self) -> Result<(), PartyError> {
        if let Some(previous) = self.alarm.lock().pending.take() {
            previous.timer.abort();
        }
        Ok(())
    }
}

impl Drop for MemoryStorage {
    fn drop(&mut self) {
        if let Some(previous) = self.alarm.lock().pending.take() {
            previous.timer.abort();
        }
    }
}

impl fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("keys", &self.len())
            .field("alarm", &self.alarm.lock().pending.as_ref().map(|p| p.at))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::FutureExt;
    use serde_json::json;
    use tokio_test::assert_ok;

    use super::*;

    fn counting_storage() -> (MemoryStorage, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        let handler: AlarmHandler = Arc::new(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
            .boxed()
        });
        (MemoryStorage::with_alarm_handler(handler), fired)
    }

    #[tokio::test]
    async fn test_values() {
        let storage = MemoryStorage::new();
        assert_ok!(storage.put("count", json!(1)).await);
        assert_ok!(storage.put("name", json!("room")).await);

        assert_eq!(storage.get("count").await.unwrap(), Some(json!(1)));
        assert!(storage.delete("count").await.unwrap());
        assert!(!storage.delete("count").await.unwrap());
        assert_eq!(storage.get("count").await.unwrap(), None);
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let storage = MemoryStorage::new();
        storage.put("user:1", json!("a")).await.unwrap();
        storage.put("user:2", json!("b")).await.unwrap();
        storage.put("topic", json!("c")).await.unwrap();

        let users = storage.list(Some("user:")).await.unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(storage.list(None).await.unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_fires_once() {
        let (storage, fired) = counting_storage();
        let at = SystemTime::now() + Duration::from_secs(5);
        storage.set_alarm(at).await.unwrap();
        assert_eq!(storage.get_alarm().await.unwrap(), Some(at));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(storage.get_alarm().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alarm_replaced_and_deleted() {
        let (storage, fired) = counting_storage();
        storage
            .set_alarm(SystemTime::now() + Duration::from_secs(5))
            .await
            .unwrap();
        storage
            .set_alarm(SystemTime::now() + Duration::from_secs(10))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        storage.delete_alarm().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(storage.get_alarm().await.unwrap(), None);
    }
}
