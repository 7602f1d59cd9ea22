//! Strict ISO-8601 UTC timestamp parsing for timing invariants.
//!
//! Runner and pack artifacts carry wall-clock timestamps that only ever
//! appear in ephemeral sections, but their internal consistency (ordering,
//! duration deltas) is still checked. Parsing is strict: `Z` suffix
//! required, no offsets, optional 3-digit millisecond fraction.

use regex::Regex;

/// Parse `YYYY-MM-DDTHH:MM:SS[.fff]Z` into unix-epoch milliseconds.
///
/// Returns `None` for anything else, including real-but-unsupported
/// ISO-8601 shapes (offsets, lowercase `z`, missing seconds). Calendar
/// validity is enforced, leap seconds are not.
pub fn parse_utc_millis(text: &str) -> Option<i64> {
    let re = Regex::new(r"^(\d{4})-(\d{2})-(\d{2})T(\d{2}):(\d{2}):(\d{2})(?:\.(\d{3}))?Z$")
        .expect("timestamp pattern is valid");
    let caps = re.captures(text)?;

    let year: i64 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    let hour: i64 = caps[4].parse().ok()?;
    let minute: i64 = caps[5].parse().ok()?;
    let second: i64 = caps[6].parse().ok()?;
    let millis: i64 = caps.get(7).map_or(Some(0), |m| m.as_str().parse().ok())?;

    if !(1..=12).contains(&month) || day < 1 || day > days_in_month(year, month) {
        return None;
    }
    if hour > 23 || minute > 59 || second > 59 {
        return None;
    }

    let days = days_from_civil(year, month, day);
    Some((((days * 24 + hour) * 60 + minute) * 60 + second) * 1000 + millis)
}

fn days_in_month(year: i64, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 0,
    }
}

fn is_leap_year(year: i64) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

// Howard Hinnant's days-from-civil algorithm.
fn days_from_civil(year: i64, month: u32, day: u32) -> i64 {
    let y = if month <= 2 { year - 1 } else { year };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = y - era * 400;
    let mp = (i64::from(month) + 9) % 12;
    let doy = (153 * mp + 2) / 5 + i64::from(day) - 1;
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy;
    era * 146097 + doe - 719468
}
