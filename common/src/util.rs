use chrono::{DateTime, Local, NaiveDateTime, TimeZone, format::{Item, StrftimeItems}};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Converts seconds since the Unix epoch into a local date/time.
///
/// Fractional seconds are kept with nanosecond precision. Returns `None` for
/// non-finite or out of range values.
pub fn timestamp_to_local(seconds: f64) -> Option<DateTime<Local>> {
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.floor();
    if whole < i64::MIN as f64 || whole > i64::MAX as f64 {
        return None;
    }
    let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
    Local.timestamp_opt(whole as i64, nanos).single()
}

/// Plotting representation of a wall-clock time: fractional days since
/// 1970-01-01 00:00:00.
pub fn date_to_num(date: &NaiveDateTime) -> f64 {
    let utc = date.and_utc();
    (utc.timestamp() as f64 + utc.timestamp_subsec_nanos() as f64 / 1e9) / SECONDS_PER_DAY
}

/// Inverse of [`date_to_num`].
pub fn num_to_date(days: f64) -> Option<NaiveDateTime> {
    if !days.is_finite() {
        return None;
    }
    let micros = (days * SECONDS_PER_DAY * 1e6).round();
    if micros < i64::MIN as f64 || micros > i64::MAX as f64 {
        return None;
    }
    DateTime::from_timestamp_micros(micros as i64).map(|d| d.naive_utc())
}

/// Formats a plotting date number with a strftime pattern. Values outside the
/// representable range format as an empty string.
pub fn format_date_num(days: f64, format: &str) -> String {
    num_to_date(days)
        .map(|d| d.format(format).to_string())
        .unwrap_or_default()
}

/// Checks that a strftime pattern only contains recognised specifiers.
pub fn is_valid_date_format(format: &str) -> bool {
    !StrftimeItems::new(format).any(|item| matches!(item, Item::Error))
}

/// Upper-cases the first character and lower-cases the rest, ie. `n1` -> `N1`.
pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(|c| c.to_lowercase()))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    #[test]
    fn date_num_is_days_since_epoch() {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        assert_eq!(date_to_num(&epoch), 0.0);

        let noon = NaiveDate::from_ymd_opt(1970, 1, 2)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(date_to_num(&noon), 1.5);
    }

    #[test]
    fn num_to_date_inverts_date_to_num() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 17)
            .unwrap()
            .and_hms_opt(14, 5, 9)
            .unwrap();
        let back = num_to_date(date_to_num(&date)).unwrap();
        assert_eq!(back, date);
        assert!(num_to_date(f64::NAN).is_none());
    }

    #[test]
    fn timestamp_keeps_instant() {
        let local = timestamp_to_local(1_700_000_000.5).unwrap();
        assert_eq!(local.timestamp(), 1_700_000_000);
        assert_eq!(local.timestamp_subsec_millis(), 500);
        assert!(timestamp_to_local(f64::INFINITY).is_none());
    }

    #[test]
    fn formats_date_numbers() {
        let date = NaiveDate::from_ymd_opt(2023, 11, 14)
            .unwrap()
            .and_hms_opt(22, 13, 20)
            .unwrap();
        assert_eq!(
            format_date_num(date_to_num(&date), "%d.%m.%Y %H:%M:%S"),
            "14.11.2023 22:13:20"
        );
    }

    #[test]
    fn validates_date_formats() {
        assert!(is_valid_date_format("%d.%m.%Y %H:%M:%S"));
        assert!(!is_valid_date_format("%Q"));
    }

    #[test]
    fn capitalizes_like_title_labels() {
        assert_eq!(capitalize("n1"), "N1");
        assert_eq!(capitalize("dOCKER"), "Docker");
        assert_eq!(capitalize(""), "");
    }
}
