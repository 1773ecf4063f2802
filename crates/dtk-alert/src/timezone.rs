use chrono::{FixedOffset, NaiveDateTime};
use dtk_common::TIMESTAMP_FORMAT;

/// Render a naive UTC instant for a display timezone.
///
/// `UTC` and fixed offsets (`UTC+3`, `+03:00`, `-0530`) shift the instant;
/// any other label leaves the time in UTC and is shown alongside it by the
/// message template. Internally the engine never carries zones.
pub fn render_in_timezone(ts: NaiveDateTime, timezone: &str) -> String {
    if let Some(offset) = parse_fixed_offset(timezone) {
        let shifted = ts + chrono::Duration::seconds(offset.local_minus_utc() as i64);
        return shifted.format(TIMESTAMP_FORMAT).to_string();
    }
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn parse_fixed_offset(timezone: &str) -> Option<FixedOffset> {
    let tz = timezone.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") {
        return FixedOffset::east_opt(0);
    }
    let rest = tz
        .strip_prefix("UTC")
        .or_else(|| tz.strip_prefix("utc"))
        .unwrap_or(tz);
    let (sign, body) = match *rest.as_bytes().first()? {
        b'+' => (1i32, &rest[1..]),
        b'-' => (-1i32, &rest[1..]),
        _ => return None,
    };
    let digits: String = body.chars().filter(|c| c.is_ascii_digit()).collect();
    let (hours, minutes): (i32, i32) = match digits.len() {
        1 | 2 => (digits.parse().ok()?, 0),
        3 => (digits[..1].parse().ok()?, digits[1..].parse().ok()?),
        4 => (digits[..2].parse().ok()?, digits[2..].parse().ok()?),
        _ => return None,
    };
    if hours > 14 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
