//! sitetime: per-site active time tracking.
//!
//! Each open page gets a [`TrackerAgent`] that counts active seconds for
//! `(site, today)` and keeps that counter consistent with sibling tabs
//! through a shared key-value store ([`store::KeyValueStore`]) and its
//! change-notification broadcast. The [`stats`] module turns the flat record
//! map into period-filtered summaries for the dashboard, and [`rollover`]
//! retires each day's records at midnight.

pub mod agent;
pub mod prefs;
pub mod record;
pub mod rollover;
pub mod stats;
pub mod store;
pub mod util;

pub use agent::{AgentEvent, AgentState, AgentStatus, TrackerAgent};
pub use prefs::{GlobalFlags, WidgetPosition, WidgetTheme};
pub use stats::{
    compute_stats, filter_by_period, focus_score, trend_vs_yesterday, Period, SiteTime,
    StatsSummary, Trend,
};
pub use store::{ChangeSet, KeyChange, KeyValueStore, MemoryStore, RuntimeContext, SqliteStore};
