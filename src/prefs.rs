//! Global tracking preferences.
//!
//! Every flag lives in the shared store; the popup and options surfaces
//! mutate them and agents pick the changes up through the store's
//! change-notification channel. [`GlobalFlags`] is an explicit snapshot taken
//! at one point in time, not a live view.

use std::collections::HashMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::{keys, KeyValueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WidgetTheme {
    Dark,
    Light,
}

impl Default for WidgetTheme {
    fn default() -> Self {
        WidgetTheme::Dark
    }
}

impl WidgetTheme {
    /// Lenient decode: anything unrecognized falls back to the default.
    pub fn from_value(value: Option<&Value>) -> Self {
        value
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetPosition {
    pub x: i32,
    pub y: i32,
}

impl Default for WidgetPosition {
    fn default() -> Self {
        Self { x: 20, y: 20 }
    }
}

/// Process-wide flags read by every tracking agent at attach time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalFlags {
    pub tracking_paused: bool,
    pub widget_visible: bool,
    pub track_all_sites: bool,
    pub tracked_sites: Vec<String>,
    pub hidden_sites: Vec<String>,
    pub widget_theme: WidgetTheme,
    pub widget_position: WidgetPosition,
}

impl Default for GlobalFlags {
    fn default() -> Self {
        Self {
            tracking_paused: false,
            widget_visible: true,
            track_all_sites: true,
            tracked_sites: Vec::new(),
            hidden_sites: Vec::new(),
            widget_theme: WidgetTheme::default(),
            widget_position: WidgetPosition::default(),
        }
    }
}

fn bool_from(value: Option<&Value>, default: bool) -> bool {
    value.and_then(Value::as_bool).unwrap_or(default)
}

fn strings_from(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

impl GlobalFlags {
    pub async fn load(store: &dyn KeyValueStore) -> Result<Self> {
        let data = store
            .get(&[
                keys::TRACKING_PAUSED,
                keys::WIDGET_VISIBLE,
                keys::TRACK_ALL_SITES,
                keys::TRACKED_SITES,
                keys::HIDDEN_SITES,
                keys::WIDGET_THEME,
                keys::WIDGET_POSITION,
            ])
            .await?;

        Ok(Self {
            tracking_paused: bool_from(data.get(keys::TRACKING_PAUSED), false),
            widget_visible: bool_from(data.get(keys::WIDGET_VISIBLE), true),
            track_all_sites: bool_from(data.get(keys::TRACK_ALL_SITES), true),
            tracked_sites: strings_from(data.get(keys::TRACKED_SITES)),
            hidden_sites: strings_from(data.get(keys::HIDDEN_SITES)),
            widget_theme: WidgetTheme::from_value(data.get(keys::WIDGET_THEME)),
            widget_position: data
                .get(keys::WIDGET_POSITION)
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
        })
    }

    /// Should an agent on `site` stay dormant? Decided once at attach.
    pub fn is_dormant(&self, site: &str) -> bool {
        if !self.widget_visible {
            return true;
        }
        if self.hidden_sites.iter().any(|hidden| hidden == site) {
            return true;
        }
        !self.track_all_sites && !self.tracked_sites.iter().any(|tracked| tracked == site)
    }
}

async fn set_one(store: &dyn KeyValueStore, key: &str, value: Value) -> Result<()> {
    store.set(HashMap::from([(key.to_string(), value)])).await
}

/// Flip the global pause flag. Returns the new state.
pub async fn toggle_tracking_paused(store: &dyn KeyValueStore) -> Result<bool> {
    let data = store.get(&[keys::TRACKING_PAUSED]).await?;
    let paused = !bool_from(data.get(keys::TRACKING_PAUSED), false);
    set_one(store, keys::TRACKING_PAUSED, Value::Bool(paused)).await?;
    Ok(paused)
}

/// Flip widget visibility for all sites. Returns the new state.
pub async fn toggle_widget_visible(store: &dyn KeyValueStore) -> Result<bool> {
    let data = store.get(&[keys::WIDGET_VISIBLE]).await?;
    let visible = !bool_from(data.get(keys::WIDGET_VISIBLE), true);
    set_one(store, keys::WIDGET_VISIBLE, Value::Bool(visible)).await?;
    Ok(visible)
}

pub async fn set_widget_theme(store: &dyn KeyValueStore, theme: WidgetTheme) -> Result<()> {
    set_one(store, keys::WIDGET_THEME, serde_json::to_value(theme)?).await
}

pub async fn set_widget_position(
    store: &dyn KeyValueStore,
    position: WidgetPosition,
) -> Result<()> {
    set_one(store, keys::WIDGET_POSITION, serde_json::to_value(position)?).await
}

pub async fn set_track_all_sites(store: &dyn KeyValueStore, track_all: bool) -> Result<()> {
    set_one(store, keys::TRACK_ALL_SITES, Value::Bool(track_all)).await
}

/// Strip scheme, `www.` and a trailing slash from user input, as the options
/// page does before storing an allowlist entry.
pub fn normalize_site(input: &str) -> String {
    let mut site = input.trim().to_lowercase();
    for prefix in ["https://", "http://"] {
        if let Some(rest) = site.strip_prefix(prefix) {
            site = rest.to_string();
            break;
        }
    }
    if let Some(rest) = site.strip_prefix("www.") {
        site = rest.to_string();
    }
    if let Some(rest) = site.strip_suffix('/') {
        site = rest.to_string();
    }
    site
}

/// Add a site to the allowlist. Returns the normalized name, or `None` when
/// the input normalizes to nothing or is already present.
pub async fn add_tracked_site(store: &dyn KeyValueStore, input: &str) -> Result<Option<String>> {
    let site = normalize_site(input);
    if site.is_empty() {
        return Ok(None);
    }

    let data = store.get(&[keys::TRACKED_SITES]).await?;
    let mut tracked = strings_from(data.get(keys::TRACKED_SITES));
    if tracked.contains(&site) {
        return Ok(None);
    }
    tracked.push(site.clone());
    set_one(store, keys::TRACKED_SITES, serde_json::to_value(tracked)?).await?;
    Ok(Some(site))
}

pub async fn remove_tracked_site(store: &dyn KeyValueStore, site: &str) -> Result<()> {
    let data = store.get(&[keys::TRACKED_SITES]).await?;
    let tracked: Vec<String> = strings_from(data.get(keys::TRACKED_SITES))
        .into_iter()
        .filter(|tracked| tracked != site)
        .collect();
    set_one(store, keys::TRACKED_SITES, serde_json::to_value(tracked)?).await
}

/// Put a site on the hidden list (widget close button).
pub async fn hide_site(store: &dyn KeyValueStore, site: &str) -> Result<()> {
    let data = store.get(&[keys::HIDDEN_SITES]).await?;
    let mut hidden = strings_from(data.get(keys::HIDDEN_SITES));
    if !hidden.iter().any(|hidden_site| hidden_site == site) {
        hidden.push(site.to_string());
        set_one(store, keys::HIDDEN_SITES, serde_json::to_value(hidden)?).await?;
    }
    Ok(())
}

/// Take a site back off the hidden list (popup "Show" button).
pub async fn show_site(store: &dyn KeyValueStore, site: &str) -> Result<()> {
    let data = store.get(&[keys::HIDDEN_SITES]).await?;
    let hidden: Vec<String> = strings_from(data.get(keys::HIDDEN_SITES))
        .into_iter()
        .filter(|hidden_site| hidden_site != site)
        .collect();
    set_one(store, keys::HIDDEN_SITES, serde_json::to_value(hidden)?).await
}

/// Wipe everything, flags included. Cannot be undone.
pub async fn clear_all_data(store: &dyn KeyValueStore) -> Result<()> {
    store.clear().await
}
