use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};
use rusqlite::{params, Connection};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};

use super::{diff_entries, ChangeSet, KeyChange, KeyValueStore, CHANGE_CHANNEL_CAPACITY};

type StoreTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Execute(StoreTask),
    Shutdown,
}

struct StoreWorker {
    sender: mpsc::Sender<StoreCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(StoreCommand::Shutdown) {
                error!("Failed to send shutdown to store thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join store thread: {join_err:?}");
            }
        }
    }
}

/// Durable key-value store: one `kv(key, value)` table behind a dedicated
/// worker thread, values stored as JSON text. Change notifications fan out on
/// the same broadcast channel as [`super::MemoryStore`].
#[derive(Clone)]
pub struct SqliteStore {
    inner: Arc<StoreWorker>,
    changes: broadcast::Sender<ChangeSet>,
}

impl SqliteStore {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<StoreCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("sitetime-store".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite store")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }

                let init_result = conn
                    .execute(
                        "CREATE TABLE IF NOT EXISTS kv (
                            key TEXT PRIMARY KEY,
                            value TEXT NOT NULL
                        )",
                        [],
                    )
                    .map(|_| ())
                    .context("failed to create kv table");
                if ready_tx.send(init_result).is_err() {
                    error!("Store initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        StoreCommand::Execute(task) => task(&mut conn),
                        StoreCommand::Shutdown => break,
                    }
                }

                info!("Store thread shutting down");
            })
            .with_context(|| "failed to spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited before signaling readiness")??;

        info!("Key-value store initialized at {}", db_path.display());

        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            inner: Arc::new(StoreWorker {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            changes,
        })
    }

    async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = StoreCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("Store caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to store thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store thread terminated unexpectedly"))?
    }

    fn notify(&self, changes: ChangeSet) {
        if !changes.is_empty() {
            let _ = self.changes.send(changes);
        }
    }
}

fn read_rows(conn: &Connection, keys: &[String]) -> Result<HashMap<String, Value>> {
    let mut result = HashMap::new();
    let mut stmt = conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
    for key in keys {
        let row: Option<String> = stmt
            .query_row(params![key], |row| row.get(0))
            .map(Some)
            .or_else(|err| match err {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(text) = row {
            match serde_json::from_str(&text) {
                Ok(value) => {
                    result.insert(key.clone(), value);
                }
                Err(err) => {
                    // A corrupt row behaves like an absent key.
                    warn!("Dropping unparsable store value for '{key}': {err}");
                }
            }
        }
    }
    Ok(result)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, keys: &[&str]) -> Result<HashMap<String, Value>> {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        self.execute(move |conn| read_rows(conn, &keys)).await
    }

    async fn set(&self, entries: HashMap<String, Value>) -> Result<()> {
        let changes = self
            .execute(move |conn| {
                let keys: Vec<String> = entries.keys().cloned().collect();
                let old = read_rows(conn, &keys)?;
                let changes = diff_entries(&old, &entries);

                let tx = conn.transaction()?;
                for (key, value) in &entries {
                    tx.execute(
                        "INSERT INTO kv (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                        params![key, serde_json::to_string(value)?],
                    )
                    .with_context(|| format!("failed to upsert key '{key}'"))?;
                }
                tx.commit()?;
                Ok(changes)
            })
            .await?;
        self.notify(changes);
        Ok(())
    }

    async fn remove(&self, keys: &[&str]) -> Result<()> {
        let keys: Vec<String> = keys.iter().map(|key| key.to_string()).collect();
        let changes = self
            .execute(move |conn| {
                let old = read_rows(conn, &keys)?;
                let tx = conn.transaction()?;
                for key in &keys {
                    tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
                }
                tx.commit()?;
                Ok(old
                    .into_iter()
                    .map(|(key, value)| {
                        (
                            key,
                            KeyChange {
                                old: Some(value),
                                new: None,
                            },
                        )
                    })
                    .collect::<ChangeSet>())
            })
            .await?;
        self.notify(changes);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let changes = self
            .execute(|conn| {
                let mut stmt = conn.prepare("SELECT key, value FROM kv")?;
                let mut rows = stmt.query([])?;
                let mut changes = ChangeSet::new();
                while let Some(row) = rows.next()? {
                    let key: String = row.get(0)?;
                    let text: String = row.get(1)?;
                    let old = serde_json::from_str(&text).ok();
                    changes.insert(key, KeyChange { old, new: None });
                }
                drop(rows);
                drop(stmt);
                conn.execute("DELETE FROM kv", [])?;
                Ok(changes)
            })
            .await?;
        self.notify(changes);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChangeSet> {
        self.changes.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteStore {
        SqliteStore::new(dir.path().join("store.sqlite3")).unwrap()
    }

    #[tokio::test]
    async fn values_survive_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store
                .set(HashMap::from([(
                    "timeData".to_string(),
                    json!({"a.com_2025-03-09": 120}),
                )]))
                .await
                .unwrap();
        }

        let store = open_store(&dir);
        let result = store.get(&["timeData"]).await.unwrap();
        assert_eq!(result["timeData"], json!({"a.com_2025-03-09": 120}));
    }

    #[tokio::test]
    async fn set_notifies_with_old_and_new() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .set(HashMap::from([("k".to_string(), json!(1))]))
            .await
            .unwrap();

        let mut rx = store.subscribe();
        store
            .set(HashMap::from([("k".to_string(), json!(2))]))
            .await
            .unwrap();

        let changes = rx.recv().await.unwrap();
        assert_eq!(changes["k"].old, Some(json!(1)));
        assert_eq!(changes["k"].new, Some(json!(2)));
    }

    #[tokio::test]
    async fn remove_then_get_is_absent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .set(HashMap::from([("k".to_string(), json!(true))]))
            .await
            .unwrap();

        store.remove(&["k"]).await.unwrap();
        assert!(store.get(&["k"]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_table() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .set(HashMap::from([
                ("a".to_string(), json!(1)),
                ("b".to_string(), json!(2)),
            ]))
            .await
            .unwrap();

        store.clear().await.unwrap();
        assert!(store.get(&["a", "b"]).await.unwrap().is_empty());
    }
}
