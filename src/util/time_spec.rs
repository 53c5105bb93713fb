//! Time-window argument parsing.
//!
//! Window bounds are anchored to the input archive rather than to the wall
//! clock, so relative expressions are offsets from a base timestamp (the
//! recorded start for `--start`, the recorded end for `--finish`):
//!
//! - Unix timestamp: `1738944000`
//! - ISO 8601, UTC assumed when no zone: `2026-02-07T17:00:00`
//! - Offset from the base: `+30m`, `-1h`, `+2d`
//! - Time of day on the base's date (UTC): `07:00`

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Utc};

#[derive(Debug, Clone)]
pub struct TimeSpecError {
    pub input: String,
}

impl std::fmt::Display for TimeSpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cannot parse time \"{}\": use a Unix timestamp (1738944000), \
             ISO 8601 (2026-02-07T17:00:00), an offset (+30m, -1h, +2d), \
             or a time of day (07:00)",
            self.input
        )
    }
}

impl std::error::Error for TimeSpecError {}

/// Parses one window-bound expression into a Unix timestamp, resolving
/// relative forms against `base`.
pub fn parse_time_spec(input: &str, base: i64) -> Result<i64, TimeSpecError> {
    let input = input.trim();
    let err = || TimeSpecError {
        input: input.to_string(),
    };

    if !input.is_empty() && input.chars().all(|c| c.is_ascii_digit()) {
        return input.parse::<i64>().map_err(|_| err());
    }

    if let Some(delta) = offset_seconds(input) {
        return base.checked_add(delta).ok_or_else(err);
    }

    if let Some(ts) = iso8601(input) {
        return Ok(ts);
    }

    if let Some(ts) = time_of_day(input, base) {
        return Ok(ts);
    }

    Err(err())
}

/// `+30m` / `-1h` style offsets. Returns signed seconds.
fn offset_seconds(input: &str) -> Option<i64> {
    let (sign, rest) = match input.as_bytes().first()? {
        b'+' => (1, &input[1..]),
        b'-' => (-1, &input[1..]),
        _ => return None,
    };
    let unit = rest.chars().last()?;
    let count: i64 = rest[..rest.len() - unit.len_utf8()].parse().ok()?;
    let per_unit = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return None,
    };
    Some(sign * count * per_unit)
}

fn iso8601(input: &str) -> Option<i64> {
    if !input.contains('T') {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.with_timezone(&Utc).timestamp());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(Utc.from_utc_datetime(&ndt).timestamp());
        }
    }
    None
}

/// `HH:MM` on the date of `base`, UTC.
fn time_of_day(input: &str, base: i64) -> Option<i64> {
    if input.len() != 5 {
        return None;
    }
    let time = NaiveTime::parse_from_str(input, "%H:%M").ok()?;
    let date = Utc.timestamp_opt(base, 0).single()?.date_naive();
    Some(Utc.from_utc_datetime(&date.and_time(time)).timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: i64 = 1770544800; // 2026-02-08 10:00:00 UTC

    #[test]
    fn unix_timestamp_passes_through() {
        assert_eq!(parse_time_spec("1738944000", BASE).unwrap(), 1738944000);
        assert_eq!(parse_time_spec("0", BASE).unwrap(), 0);
    }

    #[test]
    fn offsets_resolve_against_base() {
        assert_eq!(parse_time_spec("+30m", BASE).unwrap(), BASE + 1800);
        assert_eq!(parse_time_spec("-1h", BASE).unwrap(), BASE - 3600);
        assert_eq!(parse_time_spec("+2d", BASE).unwrap(), BASE + 172800);
        assert_eq!(parse_time_spec("+90s", BASE).unwrap(), BASE + 90);
    }

    #[test]
    fn iso8601_parses_utc() {
        let expected = Utc
            .with_ymd_and_hms(2026, 2, 7, 17, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(
            parse_time_spec("2026-02-07T17:00:00", BASE).unwrap(),
            expected
        );
        assert_eq!(parse_time_spec("2026-02-07T17:00", BASE).unwrap(), expected);
    }

    #[test]
    fn time_of_day_keeps_base_date() {
        let expected = Utc
            .with_ymd_and_hms(2026, 2, 8, 16, 0, 0)
            .single()
            .unwrap()
            .timestamp();
        assert_eq!(parse_time_spec("16:00", BASE).unwrap(), expected);
    }

    #[test]
    fn garbage_is_rejected() {
        for bad in ["", "tomorrow", "2026-02-07", "-xyz", "+5y", "12:34:56:78"] {
            assert!(parse_time_spec(bad, BASE).is_err(), "{:?} accepted", bad);
        }
    }
}
