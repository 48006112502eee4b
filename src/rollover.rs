//! Daily rollover of accumulated time records.
//!
//! Once per calendar day the background context drops every `timeData` entry
//! for the day that just ended; the options page can also trigger an
//! on-demand reset of today's entries. Agents observe the removals through
//! the store's change notifications and zero their counters.

use std::{collections::HashMap, sync::Arc};

use anyhow::Result;
use chrono::{Duration as ChronoDuration, Local, NaiveDate, NaiveDateTime};
use tokio::{task::JoinHandle, time};

use crate::{
    log_error, log_info,
    record::{self, split_key, time_data_from_value, time_data_to_value},
    store::{keys, KeyValueStore},
};

const ENABLE_LOGS: bool = true;

/// Remove every `timeData` entry recorded for `day`. Entries with keys that
/// do not parse are left alone. Returns the number of removed entries.
pub async fn drop_day(store: &dyn KeyValueStore, day: NaiveDate) -> Result<usize> {
    let stored = store.get(&[keys::TIME_DATA]).await?;
    let mut data = time_data_from_value(stored.get(keys::TIME_DATA));

    let before = data.len();
    data.retain(|key, _| split_key(key).map(|(_, entry_day)| entry_day != day).unwrap_or(true));
    let removed = before - data.len();

    if removed > 0 {
        store
            .set(HashMap::from([(
                keys::TIME_DATA.to_string(),
                time_data_to_value(&data),
            )]))
            .await?;
    }
    Ok(removed)
}

/// On-demand reset of everything tracked today.
pub async fn reset_today(store: &dyn KeyValueStore) -> Result<usize> {
    drop_day(store, record::today()).await
}

fn until_next_midnight(now: NaiveDateTime) -> std::time::Duration {
    let next_midnight = (now.date() + ChronoDuration::days(1))
        .and_hms_opt(0, 0, 0)
        .unwrap_or(now);
    let seconds = (next_midnight - now).num_seconds().max(1) as u64;
    std::time::Duration::from_secs(seconds)
}

/// Background task that clears the previous day's records every midnight.
pub struct RolloverScheduler {
    handle: JoinHandle<()>,
}

impl RolloverScheduler {
    pub fn start(store: Arc<dyn KeyValueStore>) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let wait = until_next_midnight(Local::now().naive_local());
                log_info!(
                    "Next rollover scheduled in {} minutes",
                    wait.as_secs() / 60
                );
                time::sleep(wait).await;

                let ended = record::today() - ChronoDuration::days(1);
                match drop_day(store.as_ref(), ended).await {
                    Ok(removed) => {
                        log_info!("Rollover complete: removed {removed} entries for {ended}");
                    }
                    Err(err) => log_error!("Rollover for {ended} failed: {err}"),
                }
            }
        });
        Self { handle }
    }

    pub fn stop(&self) {
        self.handle.abort();
    }
}

impl Drop for RolloverScheduler {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_key;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn drop_day_removes_only_that_day() {
        let store = MemoryStore::new();
        store
            .set(HashMap::from([(
                keys::TIME_DATA.to_string(),
                json!({
                    (record_key("a.com", date(2025, 3, 8))): 100,
                    (record_key("b.com", date(2025, 3, 8))): 200,
                    (record_key("a.com", date(2025, 3, 9))): 300,
                    "malformed": 400,
                }),
            )]))
            .await
            .unwrap();

        let removed = drop_day(&store, date(2025, 3, 8)).await.unwrap();
        assert_eq!(removed, 2);

        let stored = store.get(&[keys::TIME_DATA]).await.unwrap();
        let data = time_data_from_value(stored.get(keys::TIME_DATA));
        assert_eq!(data.len(), 2);
        assert!(data.contains_key(&record_key("a.com", date(2025, 3, 9))));
        assert!(data.contains_key("malformed"));
    }

    #[tokio::test]
    async fn drop_day_with_nothing_to_remove_writes_nothing() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        let removed = drop_day(&store, date(2025, 3, 8)).await.unwrap();
        assert_eq!(removed, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reset_today_clears_todays_entries() {
        let store = MemoryStore::new();
        let today = record::today();
        let yesterday = today - ChronoDuration::days(1);
        store
            .set(HashMap::from([(
                keys::TIME_DATA.to_string(),
                json!({
                    (record_key("a.com", today)): 50,
                    (record_key("a.com", yesterday)): 75,
                }),
            )]))
            .await
            .unwrap();

        let removed = reset_today(&store).await.unwrap();
        assert_eq!(removed, 1);

        let stored = store.get(&[keys::TIME_DATA]).await.unwrap();
        let data = time_data_from_value(stored.get(keys::TIME_DATA));
        assert_eq!(data.len(), 1);
        assert!(data.contains_key(&record_key("a.com", yesterday)));
    }

    #[test]
    fn midnight_wait_is_positive_and_at_most_a_day() {
        let now = date(2025, 3, 9).and_hms_opt(23, 59, 30).unwrap();
        assert_eq!(until_next_midnight(now).as_secs(), 30);

        let start_of_day = date(2025, 3, 9).and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(until_next_midnight(start_of_day).as_secs(), 86_400);
    }
}
