use chrono::{DateTime, Duration, Utc};

/// RFC 3339 timestamp used for every `generated_at` field.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Whole seconds elapsed since `stored_at`, never negative.
pub fn age_seconds(stored_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - stored_at).num_seconds().max(0) as u64
}

/// Unix timestamp `days` before `now`, for history window queries.
pub fn window_start(now: DateTime<Utc>, days: u32) -> i64 {
    (now - Duration::days(i64::from(days))).timestamp()
}

/// Parse a timestamp stored either as RFC 3339 or as SQLite's
/// `YYYY-MM-DD HH:MM:SS` (assumed UTC).
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}
