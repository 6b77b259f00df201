use chrono::{NaiveTime, Timelike};

/// True iff the half-open intervals `[start_a, end_a)` and `[start_b, end_b)`
/// intersect. Intervals that merely touch at a boundary do not overlap, so
/// back-to-back windows and appointments are legal.
pub fn overlaps<T: PartialOrd>(start_a: T, end_a: T, start_b: T, end_b: T) -> bool {
    start_a < end_b && start_b < end_a
}

/// Wall-clock addition via total-minutes arithmetic, wrapping at midnight.
/// Seconds are preserved.
pub fn add_minutes(time: NaiveTime, minutes: i64) -> NaiveTime {
    const DAY_MINUTES: i64 = 24 * 60;

    let total = minutes_from_midnight(time) + minutes;
    let wrapped = total.rem_euclid(DAY_MINUTES);

    NaiveTime::from_hms_opt(
        (wrapped / 60) as u32,
        (wrapped % 60) as u32,
        time.second(),
    )
    .unwrap()
}

/// Floors to the minute: a time carrying seconds projects onto the same
/// minute range as its truncation, so slot generation and conflict checks
/// operate on minute-aligned ranges.
pub fn minutes_from_midnight(time: NaiveTime) -> i64 {
    (time.hour() * 60 + time.minute()) as i64
}

pub fn time_from_minutes(minutes: i64) -> NaiveTime {
    let wrapped = minutes.rem_euclid(24 * 60);
    NaiveTime::from_hms_opt((wrapped / 60) as u32, (wrapped % 60) as u32, 0).unwrap()
}
