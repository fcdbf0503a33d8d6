use chrono::{DateTime, Duration, Months, Utc};

/// Adds calendar months, clamping to the last day of the target month
/// (Jan 31 + 1 month = Feb 28/29).
pub fn add_months(at: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    at.checked_add_months(Months::new(months))
        .unwrap_or_else(|| at + Duration::days(30 * i64::from(months)))
}

/// Renders an optional limit where `-1` means unlimited.
pub fn limit_label(limit: i32) -> String {
    if limit < 0 {
        "unlimited".to_string()
    } else {
        limit.to_string()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn month_end_is_clamped() {
        let jan31 = Utc.with_ymd_and_hms(2024, 1, 31, 8, 0, 0).unwrap();
        assert_eq!(
            add_months(jan31, 1),
            Utc.with_ymd_and_hms(2024, 2, 29, 8, 0, 0).unwrap()
        );
        assert_eq!(
            add_months(jan31, 12),
            Utc.with_ymd_and_hms(2025, 1, 31, 8, 0, 0).unwrap()
        );
    }

    #[test]
    fn negative_limit_is_unlimited() {
        assert_eq!(limit_label(-1), "unlimited");
        assert_eq!(limit_label(5), "5");
    }
}
