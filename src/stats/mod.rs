//! Aggregation over the flat time-record map.
//!
//! Pure functions of a store snapshot and a reference date: the dashboard
//! calls these on demand, nothing here holds state. Keys that do not split
//! into `(site, day)` are skipped, never an error.

mod export;
mod types;

pub use export::{export_csv, parse_csv};
pub use types::{Period, SiteTime, StatsSummary, Trend};

use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

use crate::record::{split_key, TimeData};

impl Period {
    fn contains(self, day: NaiveDate, reference: NaiveDate) -> bool {
        match self {
            Period::Today => day == reference,
            Period::Yesterday => day == reference - Duration::days(1),
            // Inclusive lower bound, no upper bound: future-dated entries
            // land in every rolling window.
            Period::Last7Days => day >= reference - Duration::days(7),
            Period::Last30Days => day >= reference - Duration::days(30),
            Period::All => true,
        }
    }
}

/// Collapse the record map into per-site totals for one period. The result
/// preserves each site's first-appearance order in the input, which is what
/// the stable ranking sort ties break on.
pub fn filter_by_period(records: &TimeData, period: Period, reference: NaiveDate) -> Vec<SiteTime> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut totals: Vec<SiteTime> = Vec::new();

    for (key, &seconds) in records {
        let Some((site, day)) = split_key(key) else {
            continue;
        };
        if !period.contains(day, reference) {
            continue;
        }
        match index.get(site) {
            Some(&at) => totals[at].seconds += seconds,
            None => {
                index.insert(site, totals.len());
                totals.push(SiteTime {
                    site: site.to_string(),
                    seconds,
                });
            }
        }
    }

    totals
}

pub fn compute_stats(filtered: Vec<SiteTime>) -> StatsSummary {
    let total_seconds: u64 = filtered.iter().map(|entry| entry.seconds).sum();
    let site_count = filtered.len();
    let average_seconds = if site_count == 0 {
        0.0
    } else {
        total_seconds as f64 / site_count as f64
    };

    let mut ranked_sites = filtered;
    // sort_by is stable: equal counts keep their input order.
    ranked_sites.sort_by(|a, b| b.seconds.cmp(&a.seconds));
    let top_site = ranked_sites.first().cloned();

    StatsSummary {
        total_seconds,
        site_count,
        average_seconds,
        ranked_sites,
        top_site,
    }
}

/// Share of total tracked time concentrated in the single largest site,
/// 0..=100. A concentration ratio, not an entropy measure.
pub fn focus_score(ranked_sites: &[SiteTime]) -> u32 {
    if ranked_sites.is_empty() {
        return 0;
    }
    if ranked_sites.len() == 1 {
        return 100;
    }
    let total: u64 = ranked_sites.iter().map(|entry| entry.seconds).sum();
    if total == 0 {
        return 0;
    }
    (100.0 * ranked_sites[0].seconds as f64 / total as f64).round() as u32
}

/// Compare today's overall total with yesterday's, across all sites.
pub fn trend_vs_yesterday(records: &TimeData, reference: NaiveDate) -> Trend {
    let yesterday = reference - Duration::days(1);
    let mut today_total: u64 = 0;
    let mut yesterday_total: u64 = 0;

    for (key, &seconds) in records {
        let Some((_, day)) = split_key(key) else {
            continue;
        };
        if day == reference {
            today_total += seconds;
        } else if day == yesterday {
            yesterday_total += seconds;
        }
    }

    if yesterday_total == 0 {
        return Trend::NoData;
    }
    Trend::Change {
        percent: 100.0 * (today_total as f64 - yesterday_total as f64) / yesterday_total as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::record_key;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn reference() -> NaiveDate {
        date(2025, 3, 9)
    }

    fn records(entries: &[(&str, NaiveDate, u64)]) -> TimeData {
        entries
            .iter()
            .map(|(site, day, seconds)| (record_key(site, *day), *seconds))
            .collect()
    }

    #[test]
    fn today_and_yesterday_match_exact_days() {
        let data = records(&[
            ("a.com", reference(), 100),
            ("b.com", date(2025, 3, 8), 200),
            ("c.com", date(2025, 3, 1), 300),
        ]);

        let today = filter_by_period(&data, Period::Today, reference());
        assert_eq!(today, vec![SiteTime { site: "a.com".into(), seconds: 100 }]);

        let yesterday = filter_by_period(&data, Period::Yesterday, reference());
        assert_eq!(yesterday, vec![SiteTime { site: "b.com".into(), seconds: 200 }]);
    }

    #[test]
    fn rolling_windows_are_inclusive_with_no_upper_bound() {
        let data = records(&[
            ("edge.com", date(2025, 3, 2), 10),   // exactly 7 days back
            ("old.com", date(2025, 3, 1), 20),    // 8 days back
            ("future.com", date(2025, 4, 1), 30), // future-dated
        ]);

        let week = filter_by_period(&data, Period::Last7Days, reference());
        let sites: Vec<&str> = week.iter().map(|entry| entry.site.as_str()).collect();
        assert_eq!(sites, vec!["edge.com", "future.com"]);

        let month = filter_by_period(&data, Period::Last30Days, reference());
        assert_eq!(month.len(), 3);
    }

    #[test]
    fn all_period_is_date_independent() {
        let data = records(&[
            ("a.com", date(2025, 3, 9), 10),
            ("a.com", date(2025, 3, 8), 15),
            ("b.com", date(2024, 1, 1), 20),
        ]);

        let on_one_date = filter_by_period(&data, Period::All, date(2025, 3, 9));
        let on_another = filter_by_period(&data, Period::All, date(1999, 12, 31));
        assert_eq!(on_one_date, on_another);

        // Multiple days collapse into one total per site.
        assert_eq!(on_one_date[0], SiteTime { site: "a.com".into(), seconds: 25 });
    }

    #[test]
    fn filtering_conserves_seconds() {
        let data = records(&[
            ("a.com", reference(), 10),
            ("a.com", date(2025, 3, 8), 20),
            ("b.com", reference(), 30),
            ("c.com", date(2025, 2, 1), 40),
        ]);

        for period in [
            Period::Today,
            Period::Yesterday,
            Period::Last7Days,
            Period::Last30Days,
            Period::All,
        ] {
            let per_record: u64 = data
                .iter()
                .filter_map(|(key, &seconds)| {
                    let (_, day) = split_key(key)?;
                    period.contains(day, reference()).then_some(seconds)
                })
                .sum();
            let per_site: u64 = filter_by_period(&data, period, reference())
                .iter()
                .map(|entry| entry.seconds)
                .sum();
            assert_eq!(per_site, per_record);
        }
    }

    #[test]
    fn malformed_keys_are_skipped() {
        let mut data = records(&[("a.com", reference(), 10)]);
        data.insert("garbage".to_string(), 99);
        data.insert("b.com_not-a-date".to_string(), 99);

        let all = filter_by_period(&data, Period::All, reference());
        assert_eq!(all, vec![SiteTime { site: "a.com".into(), seconds: 10 }]);
    }

    #[test]
    fn ranking_is_descending_and_stable_on_ties() {
        let filtered = vec![
            SiteTime { site: "first.com".into(), seconds: 50 },
            SiteTime { site: "big.com".into(), seconds: 200 },
            SiteTime { site: "second.com".into(), seconds: 50 },
        ];
        let stats = compute_stats(filtered);

        let sites: Vec<&str> = stats
            .ranked_sites
            .iter()
            .map(|entry| entry.site.as_str())
            .collect();
        assert_eq!(sites, vec!["big.com", "first.com", "second.com"]);
        assert_eq!(stats.top_site.unwrap().site, "big.com");
        assert_eq!(stats.total_seconds, 300);
        assert_eq!(stats.site_count, 3);
        assert!((stats.average_seconds - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_stats_avoid_division_by_zero() {
        let stats = compute_stats(Vec::new());
        assert_eq!(stats.total_seconds, 0);
        assert_eq!(stats.site_count, 0);
        assert_eq!(stats.average_seconds, 0.0);
        assert!(stats.top_site.is_none());
    }

    #[test]
    fn focus_score_bounds() {
        assert_eq!(focus_score(&[]), 0);

        let single = vec![SiteTime { site: "a.com".into(), seconds: 7 }];
        assert_eq!(focus_score(&single), 100);

        let spread = vec![
            SiteTime { site: "a.com".into(), seconds: 60 },
            SiteTime { site: "b.com".into(), seconds: 25 },
            SiteTime { site: "c.com".into(), seconds: 15 },
        ];
        assert_eq!(focus_score(&spread), 60);

        let even = vec![
            SiteTime { site: "a.com".into(), seconds: 1 },
            SiteTime { site: "b.com".into(), seconds: 1 },
            SiteTime { site: "c.com".into(), seconds: 1 },
        ];
        let score = focus_score(&even);
        assert!(score <= 100);
        assert_eq!(score, 33);

        let zeros = vec![
            SiteTime { site: "a.com".into(), seconds: 0 },
            SiteTime { site: "b.com".into(), seconds: 0 },
        ];
        assert_eq!(focus_score(&zeros), 0);
    }

    #[test]
    fn trend_reports_signed_percent_change() {
        let data = records(&[
            ("a.com", reference(), 90),
            ("b.com", reference(), 30),
            ("a.com", date(2025, 3, 8), 100),
        ]);
        assert_eq!(
            trend_vs_yesterday(&data, reference()),
            Trend::Change { percent: 20.0 }
        );

        let down = records(&[
            ("a.com", reference(), 50),
            ("a.com", date(2025, 3, 8), 100),
        ]);
        assert_eq!(
            trend_vs_yesterday(&down, reference()),
            Trend::Change { percent: -50.0 }
        );
    }

    #[test]
    fn trend_with_no_yesterday_data_is_a_sentinel() {
        let data = records(&[("a.com", reference(), 120)]);
        assert_eq!(trend_vs_yesterday(&data, reference()), Trend::NoData);
    }
}
