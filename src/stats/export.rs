//! CSV export of a filtered, ranked dataset.

use anyhow::{anyhow, Context, Result};

use super::SiteTime;

const CSV_HEADER: &str = "Domain,Time,Hours,Seconds";

/// Serialize ranked rows to CSV. The `Time` and `Hours` columns are
/// formatting only; `Seconds` carries the authoritative value.
pub fn export_csv(rows: &[SiteTime]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for row in rows {
        let hours = row.seconds as f64 / 3600.0;
        out.push_str(&format!(
            "{},{},{hours:.2},{}\n",
            row.site,
            row.formatted(),
            row.seconds
        ));
    }
    out
}

/// Parse an exported CSV back into `(domain, seconds)` pairs, ignoring the
/// formatting-only columns.
pub fn parse_csv(csv: &str) -> Result<Vec<(String, u64)>> {
    let mut lines = csv.lines();
    let header = lines.next().ok_or_else(|| anyhow!("empty CSV"))?;
    if header != CSV_HEADER {
        return Err(anyhow!("unexpected CSV header '{header}'"));
    }

    let mut rows = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split(',');
        let domain = fields
            .next()
            .filter(|domain| !domain.is_empty())
            .ok_or_else(|| anyhow!("row without a domain: '{line}'"))?;
        let seconds = fields
            .next_back()
            .ok_or_else(|| anyhow!("row without a seconds column: '{line}'"))?
            .parse::<u64>()
            .with_context(|| format!("bad seconds value in row '{line}'"))?;
        rows.push((domain.to_string(), seconds));
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_ranked_dataset() {
        let rows = vec![
            SiteTime { site: "a.com".into(), seconds: 7380 },
            SiteTime { site: "b.com".into(), seconds: 150 },
            SiteTime { site: "c.com".into(), seconds: 0 },
        ];

        let csv = export_csv(&rows);
        let parsed = parse_csv(&csv).unwrap();
        let expected: Vec<(String, u64)> = rows
            .iter()
            .map(|row| (row.site.clone(), row.seconds))
            .collect();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn export_layout() {
        let csv = export_csv(&[SiteTime { site: "a.com".into(), seconds: 7380 }]);
        assert_eq!(csv, "Domain,Time,Hours,Seconds\na.com,2h 3m,2.05,7380\n");
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse_csv("").is_err());
        assert!(parse_csv("Wrong,Header\n").is_err());
        assert!(parse_csv("Domain,Time,Hours,Seconds\na.com,1s,0.00,NaN\n").is_err());
        assert!(parse_csv("Domain,Time,Hours,Seconds\n,1s,0.00,1\n").is_err());
    }

    #[test]
    fn empty_dataset_is_just_the_header() {
        let csv = export_csv(&[]);
        assert_eq!(csv, "Domain,Time,Hours,Seconds\n");
        assert!(parse_csv(&csv).unwrap().is_empty());
    }
}
