//! Quota command helper functions
//!
//! Parsing of resource ids, durations and reset times, plus display helpers.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Local, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Truncate string to max characters with ellipsis
pub fn truncate(s: &str, max_chars: usize) -> String {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() <= max_chars {
        s.to_string()
    } else {
        let truncated: String = chars[..max_chars.saturating_sub(3)].iter().collect();
        format!("{}...", truncated)
    }
}

/// Resource ids are stored lowercase
pub fn normalize_resource_id(raw: &str) -> Result<String> {
    let id = raw.trim().to_lowercase();
    if id.is_empty() {
        bail!("Resource ID must not be empty");
    }
    Ok(id)
}

/// Render a UTC timestamp in local time
pub fn format_local(dt: &DateTime<Utc>) -> String {
    dt.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Parse durations like `90`, `90m`, `2h`, `1h30m`, `1d12h`.
///
/// A bare number is minutes.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    if s.is_empty() {
        bail!("Empty duration");
    }
    if let Ok(minutes) = s.parse::<i64>() {
        return Duration::try_minutes(minutes).ok_or_else(|| out_of_range(&s));
    }

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let n: i64 = digits
            .parse()
            .map_err(|_| anyhow!("Invalid duration: {}. Use e.g. 90m, 2h, 1h30m", s))?;
        let part = match c {
            'd' => Duration::try_days(n),
            'h' => Duration::try_hours(n),
            'm' => Duration::try_minutes(n),
            's' => Duration::try_seconds(n),
            _ => bail!("Invalid duration unit '{}' in {}", c, s),
        };
        total = part
            .and_then(|part| total.checked_add(&part))
            .ok_or_else(|| out_of_range(&s))?;
        digits.clear();
    }
    if !digits.is_empty() {
        bail!("Invalid duration: {}. Missing unit after {}", s, digits);
    }
    Ok(total)
}

fn out_of_range(s: &str) -> anyhow::Error {
    anyhow!("Duration out of range: {}", s)
}

/// `now + offset`, failing instead of overflowing
pub fn offset_from(now: DateTime<Utc>, offset: Duration) -> Result<DateTime<Utc>> {
    now.checked_add_signed(offset)
        .ok_or_else(|| anyhow!("Time out of range: now + {}", offset))
}

/// Parse a reset time relative to `now`.
///
/// Accepts RFC 3339, local `YYYY-MM-DD HH:MM`, local `HH:MM` (today, or
/// tomorrow if already past) and durations.
pub fn parse_reset_time(s: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return local_to_utc(naive);
    }

    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M") {
        let today = now.with_timezone(&Local).date_naive();
        let candidate = local_to_utc(today.and_time(time))?;
        return if candidate <= now {
            offset_from(candidate, Duration::days(1))
        } else {
            Ok(candidate)
        };
    }

    let offset = parse_duration(s).map_err(|_| {
        anyhow!("Invalid time: {}. Use RFC 3339, YYYY-MM-DD HH:MM, HH:MM or a duration", s)
    })?;
    offset_from(now, offset)
}

fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("{} does not exist in the local time zone", naive))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("1D").unwrap(), Duration::days(1));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("2x").is_err());
        assert!(parse_duration("1h30").is_err());
        assert!(parse_duration("h").is_err());
    }

    #[test]
    fn test_parse_reset_time_rfc3339() {
        let parsed = parse_reset_time("2026-03-01T15:00:00+02:00", now()).unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 3, 1, 13, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_duration_out_of_range() {
        for raw in ["999999999999999999", "999999999999d", "9223372036854775807s", "106751991d106751991d"] {
            let err = parse_duration(raw).unwrap_err();
            assert!(err.to_string().contains("out of range"), "{}: {}", raw, err);
        }
    }

    #[test]
    fn test_parse_reset_time_far_offset_is_an_error() {
        let err = parse_reset_time("99999999999999m", now()).unwrap_err();
        assert!(err.to_string().contains("out of range"), "{}", err);
        assert!(offset_from(now(), Duration::MAX).is_err());
    }

    #[test]
    fn test_parse_reset_time_duration() {
        let parsed = parse_reset_time("45m", now()).unwrap();
        assert_eq!(parsed, now() + Duration::minutes(45));
    }

    #[test]
    fn test_parse_reset_time_clock_is_in_future() {
        let parsed = parse_reset_time("08:15", now()).unwrap();
        assert!(parsed > now());
        assert!(parsed <= now() + Duration::days(1));
    }

    #[test]
    fn test_parse_reset_time_rejects_garbage() {
        assert!(parse_reset_time("next tuesday", now()).is_err());
    }

    #[test]
    fn test_normalize_resource_id() {
        assert_eq!(normalize_resource_id(" Claude ").unwrap(), "claude");
        assert!(normalize_resource_id("  ").is_err());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a rather long note", 10), "a rathe...");
        assert_eq!(truncate("abcdef", 2), "...");
        assert_eq!(truncate("abcdef", 0), "...");
    }
}
