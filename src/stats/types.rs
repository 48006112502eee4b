use serde::{Deserialize, Serialize};

use crate::util::format::format_duration;

/// Dashboard reporting window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Period {
    Today,
    Yesterday,
    Last7Days,
    Last30Days,
    All,
}

/// One site's summed seconds within a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteTime {
    pub site: String,
    pub seconds: u64,
}

impl SiteTime {
    pub fn formatted(&self) -> String {
        format_duration(self.seconds)
    }
}

/// Summary statistics over a filtered dataset.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_seconds: u64,
    pub site_count: usize,
    pub average_seconds: f64,
    /// Descending by seconds; ties keep their first-appearance order.
    pub ranked_sites: Vec<SiteTime>,
    pub top_site: Option<SiteTime>,
}

/// Today's total versus yesterday's, as a signed percentage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Trend {
    /// Yesterday summed to zero; a percentage would be meaningless. This does
    /// not distinguish "nothing tracked" from a legitimate zero.
    NoData,
    Change { percent: f64 },
}
