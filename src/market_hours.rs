use std::cmp::Ordering;

use chrono::{Datelike, NaiveDateTime, Timelike, Weekday};

// session bounds in seconds from midnight, local time, both inclusive
const OPEN: u32 = 9 * 3600 + 30 * 60;
const CLOSE: u32 = 15 * 3600;

/// Weekdays between 09:30:00 and 15:00:00 local time, bounds included.
pub fn is_trading_time(now: NaiveDateTime) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let seconds = now.num_seconds_from_midnight();
    match seconds.cmp(&CLOSE) {
        Ordering::Less => seconds >= OPEN,
        Ordering::Equal => now.nanosecond() == 0,
        Ordering::Greater => false,
    }
}
