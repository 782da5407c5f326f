//! ISO-8601 durations as CloudFormation expects them (`PT5M`, `PT1H30M`)

use std::time::Duration;

/// Render a duration as an ISO-8601 `PT…` string with whole seconds.
///
/// Zero components are omitted; a zero duration renders as `PT0S`.
pub fn iso8601_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;

    let mut out = String::from("PT");
    if hours > 0 {
        out.push_str(&format!("{hours}H"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}M"));
    }
    if seconds > 0 || total == 0 {
        out.push_str(&format!("{seconds}S"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minutes_only() {
        assert_eq!(iso8601_duration(Duration::from_secs(300)), "PT5M");
    }

    #[test]
    fn test_mixed_components() {
        assert_eq!(iso8601_duration(Duration::from_secs(5400)), "PT1H30M");
        assert_eq!(iso8601_duration(Duration::from_secs(3661)), "PT1H1M1S");
        assert_eq!(iso8601_duration(Duration::from_secs(45)), "PT45S");
    }

    #[test]
    fn test_zero_and_subsecond() {
        assert_eq!(iso8601_duration(Duration::ZERO), "PT0S");
        assert_eq!(iso8601_duration(Duration::from_millis(1500)), "PT1S");
    }
}
