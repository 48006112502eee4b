//! Elapsed-time display helpers.

/// Widget clock face: `HH:MM:SS`, zero-padded.
pub fn format_clock(seconds: u64) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

/// Compact human form used by the dashboard and popup lists:
/// `2h 5m`, `5m 30s`, or `30s`.
pub fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_pads_every_field() {
        assert_eq!(format_clock(0), "00:00:00");
        assert_eq!(format_clock(61), "00:01:01");
        assert_eq!(format_clock(3661), "01:01:01");
        assert_eq!(format_clock(100 * 3600), "100:00:00");
    }

    #[test]
    fn duration_picks_the_right_units() {
        assert_eq!(format_duration(45), "45s");
        assert_eq!(format_duration(150), "2m 30s");
        assert_eq!(format_duration(7380), "2h 3m");
    }
}
