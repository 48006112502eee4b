use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{diff_entries, ChangeSet, KeyChange, KeyValueStore, CHANGE_CHANNEL_CAPACITY};

/// In-memory store with the same notification semantics as the durable one.
/// Backs ephemeral contexts and tests.
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<ChangeSet>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            data: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn notify(&self, changes: ChangeSet) {
        if !changes.is_empty() {
            // Send only fails when nobody is subscribed, which is fine.
            let _ = self.changes.send(changes);
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let data = self.data.lock().unwrap();
        Ok(keys
            .iter()
            .filter_map(|key| data.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let changes = {
            let mut data = self.data.lock().unwrap();
            let changes = diff_entries(&data, &entries);
            data.extend(entries);
            changes
        };
        self.notify(changes);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let changes = {
            let mut data = self.data.lock().unwrap();
            keys.iter()
                .filter_map(|key| {
                    data.remove(*key).map(|old| {
                        (
                            key.to_string(),
                            KeyChange {
                                old: Some(old),
                                new: None,
                            },
                        )
                    })
                })
                .collect::<ChangeSet>()
        };
        self.notify(changes);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let changes = {
            let mut data = self.data.lock().unwrap();
            data.drain()
                .map(|(key, old)| {
                    (
                        key,
                        KeyChange {
                            old: Some(old),
                            new: None,
                        },
                    )
                })
                .collect::<ChangeSet>()
        };
        self.notify(changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }
}
