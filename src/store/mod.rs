//! Key-value store boundary.
//!
//! Tracking agents and the preference surfaces never talk to each other
//! directly; they share a flat key-value store whose change-notification
//! broadcast is the only cross-context channel. Writers get no ordering
//! guarantee beyond "subscribers eventually see a `ChangeSet` for every
//! successful write", and there is no compare-and-swap: concurrent writers
//! race last-write-wins.

mod context;
mod memory;
mod sqlite;

pub use context::RuntimeContext;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

/// Store key names shared by every surface.
pub mod keys {
    pub const TIME_DATA: &str = "timeData";
    pub const TRACKING_PAUSED: &str = "trackingPaused";
    pub const WIDGET_VISIBLE: &str = "widgetVisible";
    pub const TRACK_ALL_SITES: &str = "trackAllSites";
    pub const TRACKED_SITES: &str = "trackedSites";
    pub const HIDDEN_SITES: &str = "hiddenSites";
    pub const WIDGET_THEME: &str = "widgetTheme";
    pub const WIDGET_POSITION: &str = "widgetPosition";
}

/// Old and new value for a single changed key. `None` means absent.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyChange {
    pub old: Option<Value>,
    pub new: Option<Value>,
}

/// Every key touched by one write, delivered to all subscribers including
/// the writer itself.
pub type ChangeSet = HashMap<String, KeyChange>;

/// Capacity of the change-notification channel. Slow subscribers that lag
/// behind drop old notifications rather than blocking writers.
pub(crate) const CHANGE_CHANNEL_CAPACITY: usize = 64;

#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch the requested keys. Absent keys are simply missing from the
    /// result map.
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>>;

    /// Upsert the given entries. Emits a single [`ChangeSet`] covering every
    /// key whose value actually changed.
    async fn set(&self, entries: HashMap<String, Value>) -> Result<()>;

    /// Remove the given keys, notifying with `new: None`.
    async fn remove(&self, keys: &[&str]) -> Result<()>;

    /// Drop everything. User-initiated reset only.
    async fn clear(&self) -> Result<()>;

    fn subscribe(&self) -> broadcast::Receiver<ChangeSet>;
}

/// Build the change set for an upsert, dropping keys whose value did not
/// actually change.
pub(crate) fn diff_entries(
    old: &HashMap<String, Value>,
    entries: &HashMap<String, Value>,
) -> ChangeSet {
    entries
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(value))
        .map(|(key, value)| {
            (
                key.clone(),
                KeyChange {
                    old: old.get(key).cloned(),
                    new: Some(value.clone()),
                },
            )
        })
        .collect()
}
