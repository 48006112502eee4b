//! Per-page tracking agent.
//!
//! One agent per open tab. It owns the in-memory seconds counter for
//! `(site, today)`, ticks it once per second while the tab is visible and
//! tracking is not paused, and reconciles it with the shared store: a flush
//! every ten seconds, an immediate flush on hide/pause/teardown, and adoption
//! of whatever value other tabs flush for the same key. The flush is a plain
//! overwrite of the stored counter, so concurrent tabs race last-write-wins.

mod state;

pub use state::{AgentState, AgentStatus};

use std::{collections::HashMap, sync::Arc, time::Duration};

use serde::Serialize;
use serde_json::Value;
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{self, Instant},
};

use anyhow::Result;

use crate::{
    log_info, log_warn,
    prefs::{self, GlobalFlags, WidgetTheme},
    record::{self, record_key, time_data_from_value, time_data_to_value},
    store::{keys, ChangeSet, KeyChange, KeyValueStore, RuntimeContext},
    util::format::format_clock,
};

const ENABLE_LOGS: bool = true;

const TICK_INTERVAL: Duration = Duration::from_secs(1);
const FLUSH_EVERY_SECONDS: u64 = 10;
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What the widget layer renders. The agent emits these instead of touching
/// any UI directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum AgentEvent {
    Display {
        formatted: String,
        elapsed_seconds: u64,
    },
    StatusChanged {
        status: AgentStatus,
    },
    ThemeChanged {
        theme: WidgetTheme,
    },
}

struct AgentInner {
    state: Mutex<AgentState>,
    store: Arc<dyn KeyValueStore>,
    context: RuntimeContext,
    events: broadcast::Sender<AgentEvent>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

pub struct TrackerAgent {
    inner: Arc<AgentInner>,
}

impl Clone for TrackerAgent {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl TrackerAgent {
    /// Attach a tracking agent to a page on `site`.
    ///
    /// Reads the global flags and the stored counter once, decides dormancy
    /// (never revisited), seeds the counter, and starts the tick and
    /// store-listener tasks. A dormant agent spawns nothing and never writes.
    pub async fn attach(
        store: Arc<dyn KeyValueStore>,
        context: RuntimeContext,
        site: impl Into<String>,
    ) -> Result<Self> {
        let site = site.into();
        let day = record::today();

        if !context.is_valid() {
            log_info!("Tracker for {site} staying dormant: runtime already invalid");
            return Ok(Self::dormant(store, context, site, day));
        }

        let flags = GlobalFlags::load(store.as_ref()).await?;
        if flags.is_dormant(&site) {
            return Ok(Self::dormant(store, context, site, day));
        }

        let stored = store.get(&[keys::TIME_DATA]).await?;
        let seed = time_data_from_value(stored.get(keys::TIME_DATA))
            .get(&record_key(&site, day))
            .copied()
            .unwrap_or(0);

        let state = AgentState::new(site, day, seed, flags.tracking_paused);
        let ticking = state.is_ticking();

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let inner = Arc::new(AgentInner {
            state: Mutex::new(state),
            store,
            context,
            events,
            ticker: Mutex::new(None),
            listener: Mutex::new(None),
        });

        spawn_listener(&inner).await;
        if ticking {
            spawn_ticker(&inner).await;
        }
        emit_display(&inner, seed);

        Ok(Self { inner })
    }

    fn dormant(
        store: Arc<dyn KeyValueStore>,
        context: RuntimeContext,
        site: String,
        day: chrono::NaiveDate,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(AgentInner {
                state: Mutex::new(AgentState::dormant(site, day)),
                store,
                context,
                events,
                ticker: Mutex::new(None),
                listener: Mutex::new(None),
            }),
        }
    }

    pub async fn snapshot(&self) -> AgentState {
        self.inner.state.lock().await.clone()
    }

    pub async fn status(&self) -> AgentStatus {
        self.inner.state.lock().await.status
    }

    pub async fn formatted_time(&self) -> String {
        format_clock(self.inner.state.lock().await.elapsed_seconds)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    /// Page visibility changed. Hiding flushes the counter and stops the
    /// tick; showing re-reads the store first, because another tab may have
    /// advanced the counter in the meantime, and adopts the larger value.
    pub async fn set_visible(&self, visible: bool) {
        let inner = &self.inner;

        if visible {
            let resumed = {
                let mut state = inner.state.lock().await;
                if state.status == AgentStatus::Dormant || state.visible {
                    return;
                }
                state.show();
                (state.status, record_key(&state.site, state.day))
            };
            let (status, key) = resumed;
            emit_status(inner, status);

            if status == AgentStatus::Running {
                if let Some(stored) = read_stored_seconds(inner, &key).await {
                    let elapsed = {
                        let mut state = inner.state.lock().await;
                        state.elapsed_seconds = state.elapsed_seconds.max(stored);
                        state.elapsed_seconds
                    };
                    emit_display(inner, elapsed);
                }
                spawn_ticker(inner).await;
            }
        } else {
            let hidden = {
                let mut state = inner.state.lock().await;
                if state.status == AgentStatus::Dormant || !state.visible {
                    return;
                }
                let was_ticking = state.is_ticking();
                state.hide();
                (
                    was_ticking,
                    state.elapsed_seconds,
                    record_key(&state.site, state.day),
                )
            };
            let (was_ticking, elapsed, key) = hidden;
            cancel_ticker(inner).await;
            emit_status(inner, AgentStatus::HiddenTab);
            if was_ticking {
                flush_value(inner, &key, elapsed).await;
            }
        }
    }

    /// Zero the counter for this site today (widget reset button).
    pub async fn reset(&self) {
        let key = {
            let mut state = self.inner.state.lock().await;
            if state.status == AgentStatus::Dormant {
                return;
            }
            state.elapsed_seconds = 0;
            record_key(&state.site, state.day)
        };
        emit_display(&self.inner, 0);
        flush_value(&self.inner, &key, 0).await;
    }

    /// Widget close button: flush, stop tracking this page for good, and put
    /// the site on the hidden list so future page loads stay dormant.
    pub async fn hide_widget(&self) {
        let inner = &self.inner;
        let retired = {
            let mut state = inner.state.lock().await;
            if state.status == AgentStatus::Dormant {
                return;
            }
            let info = (
                state.elapsed_seconds,
                record_key(&state.site, state.day),
                state.site.clone(),
            );
            state.retire();
            info
        };
        let (elapsed, key, site) = retired;

        cancel_ticker(inner).await;
        cancel_listener(inner).await;
        emit_status(inner, AgentStatus::Dormant);
        flush_value(inner, &key, elapsed).await;

        if inner.context.is_valid() {
            if let Err(err) = prefs::hide_site(inner.store.as_ref(), &site).await {
                log_warn!("Failed to record hidden site {site}: {err}");
            }
        }
    }

    /// Page unload: one final best-effort flush, then tear the tasks down.
    /// No retry; the page is going away.
    pub async fn shutdown(&self) {
        let final_flush = {
            let state = self.inner.state.lock().await;
            (state.status != AgentStatus::Dormant)
                .then(|| (state.elapsed_seconds, record_key(&state.site, state.day)))
        };
        cancel_ticker(&self.inner).await;
        cancel_listener(&self.inner).await;
        if let Some((elapsed, key)) = final_flush {
            flush_value(&self.inner, &key, elapsed).await;
        }
    }

    #[cfg(test)]
    pub(crate) async fn tick(&self) -> bool {
        tick_once(&self.inner).await
    }

    #[cfg(test)]
    pub(crate) async fn stop_tasks_for_test(&self) {
        cancel_ticker(&self.inner).await;
        cancel_listener(&self.inner).await;
    }

    #[cfg(test)]
    pub(crate) async fn force_pause(&self, paused: bool) {
        apply_pause(&self.inner, paused).await;
    }
}

async fn spawn_ticker(inner: &Arc<AgentInner>) {
    let mut guard = inner.ticker.lock().await;
    if let Some(handle) = guard.take() {
        handle.abort();
    }

    let task_inner = Arc::clone(inner);
    *guard = Some(tokio::spawn(async move {
        // interval() fires immediately; anchor the first tick a full second out
        let mut interval = time::interval_at(Instant::now() + TICK_INTERVAL, TICK_INTERVAL);
        loop {
            interval.tick().await;
            if !tick_once(&task_inner).await {
                break;
            }
        }
    }));
}

async fn cancel_ticker(inner: &AgentInner) {
    if let Some(handle) = inner.ticker.lock().await.take() {
        handle.abort();
    }
}

async fn cancel_listener(inner: &AgentInner) {
    if let Some(handle) = inner.listener.lock().await.take() {
        handle.abort();
    }
}

async fn spawn_listener(inner: &Arc<AgentInner>) {
    let mut rx = inner.store.subscribe();
    let task_inner = Arc::clone(inner);
    let handle = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(changes) => handle_changes(&task_inner, changes).await,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log_warn!("Store listener lagged; dropped {skipped} notifications");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
    *inner.listener.lock().await = Some(handle);
}

async fn handle_changes(inner: &Arc<AgentInner>, changes: ChangeSet) {
    if let Some(change) = changes.get(keys::TRACKING_PAUSED) {
        let paused = change.new.as_ref().and_then(Value::as_bool).unwrap_or(false);
        apply_pause(inner, paused).await;
    }

    if let Some(change) = changes.get(keys::TIME_DATA) {
        adopt_remote_count(inner, change).await;
    }

    if let Some(change) = changes.get(keys::WIDGET_THEME) {
        let theme = WidgetTheme::from_value(change.new.as_ref());
        let _ = inner.events.send(AgentEvent::ThemeChanged { theme });
    }
}

/// Another context wrote `timeData`. If the value under our key differs from
/// the local counter, take it as-is right away; a removed entry (rollover or
/// manual reset) counts as zero.
async fn adopt_remote_count(inner: &Arc<AgentInner>, change: &KeyChange) {
    let adopted = {
        let mut state = inner.state.lock().await;
        if state.status == AgentStatus::Dormant {
            return;
        }
        let key = record_key(&state.site, state.day);
        let remote = match time_data_from_value(change.new.as_ref()).get(&key) {
            Some(&value) => Some(value),
            None => time_data_from_value(change.old.as_ref())
                .contains_key(&key)
                .then_some(0),
        };
        match remote {
            Some(value) if value != state.elapsed_seconds => {
                state.elapsed_seconds = value;
                Some(value)
            }
            _ => None,
        }
    };
    if let Some(value) = adopted {
        emit_display(inner, value);
    }
}

async fn apply_pause(inner: &Arc<AgentInner>, paused: bool) {
    let transition = {
        let mut state = inner.state.lock().await;
        if state.status == AgentStatus::Dormant || state.globally_paused == paused {
            None
        } else {
            let was_ticking = state.is_ticking();
            state.set_paused(paused);
            Some((
                was_ticking,
                state.status,
                state.elapsed_seconds,
                record_key(&state.site, state.day),
            ))
        }
    };
    let Some((was_ticking, status, elapsed, key)) = transition else {
        return;
    };

    emit_status(inner, status);
    if was_ticking && status == AgentStatus::Paused {
        cancel_ticker(inner).await;
        flush_value(inner, &key, elapsed).await;
    }
    if status == AgentStatus::Running {
        // Resume counts on from the local value. Only the visibility path
        // re-reads the store before resuming.
        spawn_ticker(inner).await;
    }
}

/// One second of tracked time. Returns false when the agent is no longer in
/// the running state, which ends the tick task.
async fn tick_once(inner: &Arc<AgentInner>) -> bool {
    let (elapsed, key) = {
        let mut state = inner.state.lock().await;
        if !state.is_ticking() {
            return false;
        }
        state.elapsed_seconds += 1;
        (state.elapsed_seconds, record_key(&state.site, state.day))
    };
    emit_display(inner, elapsed);
    if elapsed % FLUSH_EVERY_SECONDS == 0 {
        flush_value(inner, &key, elapsed).await;
    }
    true
}

/// Write the counter to the store: read the current `timeData` object,
/// overwrite our entry, write the whole object back. Fire-and-forget; a
/// failure costs at most the seconds accrued since the last good flush.
async fn flush_value(inner: &Arc<AgentInner>, key: &str, elapsed: u64) {
    if !inner.context.is_valid() {
        log_info!("Flush skipped for {key}: runtime context invalid");
        return;
    }

    let stored = match inner.store.get(&[keys::TIME_DATA]).await {
        Ok(stored) => stored,
        Err(err) => {
            log_warn!("Time data read failed for {key}: {err}");
            return;
        }
    };

    let mut data = time_data_from_value(stored.get(keys::TIME_DATA));
    data.insert(key.to_string(), elapsed);

    let entries = HashMap::from([(keys::TIME_DATA.to_string(), time_data_to_value(&data))]);
    if let Err(err) = inner.store.set(entries).await {
        log_warn!("Flush failed for {key}: {err}");
    }
}

/// Read the stored counter for `key`. `Some(0)` when the entry is absent,
/// `None` when the store is unreachable, in which case the caller keeps its
/// local value.
async fn read_stored_seconds(inner: &Arc<AgentInner>, key: &str) -> Option<u64> {
    if !inner.context.is_valid() {
        log_info!("Resync skipped for {key}: runtime context invalid");
        return None;
    }
    match inner.store.get(&[keys::TIME_DATA]).await {
        Ok(stored) => Some(
            time_data_from_value(stored.get(keys::TIME_DATA))
                .get(key)
                .copied()
                .unwrap_or(0),
        ),
        Err(err) => {
            log_warn!("Time data read failed for {key}: {err}");
            None
        }
    }
}

fn emit_display(inner: &AgentInner, elapsed: u64) {
    let _ = inner.events.send(AgentEvent::Display {
        formatted: format_clock(elapsed),
        elapsed_seconds: elapsed,
    });
}

fn emit_status(inner: &AgentInner, status: AgentStatus) {
    let _ = inner.events.send(AgentEvent::StatusChanged { status });
}
