use std::sync::OnceLock;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;

/// Outcome of best-effort date normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedDate {
    Parsed(DateTime<Utc>),
    /// Kept verbatim because no format matched.
    Raw(String),
}

impl PublishedDate {
    /// Value stored in `articles.published_date`.
    pub fn into_stored(self) -> String {
        match self {
            PublishedDate::Parsed(dt) => dt.to_rfc3339(),
            PublishedDate::Raw(raw) => raw,
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%m/%d/%Y, %I:%M %p",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d %b %Y",
    "%d %B %Y",
    "%m/%d/%Y",
];

fn relative_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(\d+)\s*(second|sec|minute|min|hour|hr|day|week|month|year)s?\s+ago")
            .expect("relative date pattern is valid")
    })
}

/// Normalizes a feed date string against the reference time `now`.
///
/// Absolute formats are tried first, then relative expressions such as
/// "3 days ago", "yesterday" or "just now". Months count as 30 days and years
/// as 365. Anything else is returned as [`PublishedDate::Raw`].
pub fn normalize_date(raw: &str, now: DateTime<Utc>) -> PublishedDate {
    let trimmed = raw.trim();

    if let Some(dt) = parse_absolute(trimmed) {
        return PublishedDate::Parsed(dt);
    }
    if let Some(dt) = parse_relative(trimmed, now) {
        return PublishedDate::Parsed(dt);
    }
    PublishedDate::Raw(raw.to_string())
}

fn parse_absolute(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }

    // Google News appends ", +0000 UTC" to its US-style timestamps.
    let s = s.trim_end_matches(" UTC").trim_end_matches(", +0000");

    for format in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}

fn parse_relative(s: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let lower = s.to_lowercase();

    if let Some(caps) = relative_re().captures(&lower) {
        let amount: i64 = caps[1].parse().ok()?;
        // Out-of-range amounts yield None and the string is kept raw.
        let delta = match &caps[2] {
            "second" | "sec" => Duration::try_seconds(amount),
            "minute" | "min" => Duration::try_minutes(amount),
            "hour" | "hr" => Duration::try_hours(amount),
            "day" => Duration::try_days(amount),
            "week" => Duration::try_weeks(amount),
            "month" => amount.checked_mul(30).and_then(Duration::try_days),
            "year" => amount.checked_mul(365).and_then(Duration::try_days),
            _ => None,
        }?;
        return now.checked_sub_signed(delta);
    }

    if lower.contains("yesterday") {
        return Some(now - Duration::days(1));
    }
    if lower.contains("today") || lower.contains("just now") {
        return Some(now);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 19, 15, 30, 0).unwrap()
    }

    #[test]
    fn relative_days_resolve_against_reference() {
        let now = reference();
        assert_eq!(
            normalize_date("2 days ago", now),
            PublishedDate::Parsed(now - Duration::days(2))
        );
        assert_eq!(
            normalize_date("yesterday", now),
            PublishedDate::Parsed(now - Duration::days(1))
        );
        assert_eq!(
            normalize_date("5 hours ago", now),
            PublishedDate::Parsed(now - Duration::hours(5))
        );
        assert_eq!(
            normalize_date("1 month ago", now),
            PublishedDate::Parsed(now - Duration::days(30))
        );
        assert_eq!(normalize_date("Just now", now), PublishedDate::Parsed(now));
    }

    #[test]
    fn absolute_formats() {
        let now = reference();
        assert_eq!(
            normalize_date("2025-11-03T08:00:00Z", now),
            PublishedDate::Parsed(Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap())
        );
        assert_eq!(
            normalize_date("2025-11-03 08:00:00", now),
            PublishedDate::Parsed(Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap())
        );
        assert_eq!(
            normalize_date("Nov 3, 2025", now),
            PublishedDate::Parsed(Utc.with_ymd_and_hms(2025, 11, 3, 0, 0, 0).unwrap())
        );
        assert_eq!(
            normalize_date("11/03/2025, 08:00 AM, +0000 UTC", now),
            PublishedDate::Parsed(Utc.with_ymd_and_hms(2025, 11, 3, 8, 0, 0).unwrap())
        );
        assert_eq!(
            normalize_date("Mon, 03 Nov 2025 08:00:00 +0100", now),
            PublishedDate::Parsed(Utc.with_ymd_and_hms(2025, 11, 3, 7, 0, 0).unwrap())
        );
    }

    #[test]
    fn huge_relative_amounts_are_kept_verbatim() {
        let now = reference();
        for raw in [
            "200000000000 days ago",
            "999999999999999999 months ago",
            "99999999999999999999 years ago",
            "9223372036854775807 seconds ago",
        ] {
            assert_eq!(normalize_date(raw, now), PublishedDate::Raw(raw.to_string()));
        }
    }

    #[test]
    fn unparseable_is_kept_verbatim() {
        let now = reference();
        assert_eq!(
            normalize_date("sometime last spring", now),
            PublishedDate::Raw("sometime last spring".to_string())
        );
        assert_eq!(
            normalize_date("sometime last spring", now).into_stored(),
            "sometime last spring"
        );
    }
}
