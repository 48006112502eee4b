use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AgentStatus {
    /// Counting: +1 second per tick.
    Running,
    /// Global pause flag is set; counter frozen.
    Paused,
    /// Tab not visible; counter frozen, resync on return.
    HiddenTab,
    /// Not tracking this page at all. Decided at attach, never entered from
    /// a live state except through the widget close button.
    Dormant,
}

/// Per-page tracking state. In-memory only; the store holds the durable
/// counter this one is reconciled against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub site: String,
    pub day: NaiveDate,
    pub status: AgentStatus,
    pub elapsed_seconds: u64,
    pub visible: bool,
    pub globally_paused: bool,
}

impl AgentState {
    pub fn new(site: String, day: NaiveDate, seed_seconds: u64, globally_paused: bool) -> Self {
        Self {
            site,
            day,
            status: if globally_paused {
                AgentStatus::Paused
            } else {
                AgentStatus::Running
            },
            elapsed_seconds: seed_seconds,
            visible: true,
            globally_paused,
        }
    }

    pub fn dormant(site: String, day: NaiveDate) -> Self {
        Self {
            site,
            day,
            status: AgentStatus::Dormant,
            elapsed_seconds: 0,
            visible: true,
            globally_paused: false,
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.status == AgentStatus::Running
    }

    /// Resolve the status from the visibility and pause inputs. Visibility
    /// wins: a hidden tab stays `HiddenTab` even while globally paused, and
    /// the pause state is re-applied when the tab comes back.
    fn resolve(&mut self) {
        if self.status == AgentStatus::Dormant {
            return;
        }
        self.status = if !self.visible {
            AgentStatus::HiddenTab
        } else if self.globally_paused {
            AgentStatus::Paused
        } else {
            AgentStatus::Running
        };
    }

    pub fn hide(&mut self) {
        self.visible = false;
        self.resolve();
    }

    pub fn show(&mut self) {
        self.visible = true;
        self.resolve();
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.globally_paused = paused;
        self.resolve();
    }

    /// Permanently stop tracking this page (widget close button).
    pub fn retire(&mut self) {
        self.status = AgentStatus::Dormant;
    }
}
