//! Interval algebra over the reference time zone (UTC).
//!
//! All bucket math is done in UTC with pure functions. A *normalized*
//! interval is either the calendar month containing a timestamp or the
//! fixed all-time sentinel; everything else is ad-hoc. Month ends are
//! start-of-next-month minus one second, week ends are start-of-week plus
//! seven days minus one second, so adjacent buckets never overlap.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// First day of the all-time sentinel: the Unix epoch year.
const SENTINEL_START_YEAR: i32 = 1970;

/// The sentinel spans 300 years from the reference epoch.
const SENTINEL_SPAN_YEARS: i32 = 300;

/// Which weekday anchors the start of a week.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WeekStart {
    /// Weeks run Sunday through Saturday.
    Sunday,
    /// Weeks run Monday through Sunday (ISO).
    #[default]
    Monday,
}

/// A closed interval of absolute time, inclusive at both ends.
///
/// Intervals are hashable and totally ordered (by start, then end) so
/// they can key the analyzer's historical and ad-hoc state maps. The
/// encoded form carries both bounds as f64 seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateInterval {
    /// Inclusive start.
    #[serde(with = "timestamp_secs")]
    pub start: DateTime<Utc>,
    /// Inclusive end.
    #[serde(with = "timestamp_secs")]
    pub end: DateTime<Utc>,
}

impl DateInterval {
    /// Create an interval from inclusive bounds.
    ///
    /// `start` must not exceed `end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        assert!(start <= end, "interval start {start} exceeds end {end}");
        Self { start, end }
    }

    /// The degenerate interval `[instant, instant]`.
    ///
    /// Fresh interval states start with a degenerate processed-event
    /// interval anchored at the state's start.
    pub fn point(instant: DateTime<Utc>) -> Self {
        Self {
            start: instant,
            end: instant,
        }
    }

    /// Whether `instant` lies within the interval (inclusive).
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    /// Whether `other` lies entirely within this interval.
    pub fn contains_interval(&self, other: &DateInterval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Whether the two intervals share any instant.
    pub fn overlaps(&self, other: &DateInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Span between the bounds. Zero for a degenerate interval.
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// Grow the interval just enough to cover `instant`.
    pub fn expand_to(&mut self, instant: DateTime<Utc>) {
        if instant < self.start {
            self.start = instant;
        }
        if instant > self.end {
            self.end = instant;
        }
    }
}

impl std::fmt::Display for DateInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {}]", self.start, self.end)
    }
}

/// Start of the UTC day containing `instant`.
pub fn day_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(instant.year(), instant.month(), instant.day(), 0, 0, 0)
        .single()
        .expect("midnight of an existing UTC day is unambiguous")
}

/// Start of the UTC hour containing `instant`.
pub fn hour_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    day_start(instant) + Duration::hours(i64::from(instant.hour()))
}

/// The UTC day containing `instant`, `[00:00:00, 23:59:59]`.
pub fn day_interval(instant: DateTime<Utc>) -> DateInterval {
    let start = day_start(instant);
    DateInterval::new(start, start + Duration::days(1) - Duration::seconds(1))
}

/// Start of the week containing `instant` under the given anchor.
pub fn week_start(instant: DateTime<Utc>, anchor: WeekStart) -> DateTime<Utc> {
    let days_in = match anchor {
        WeekStart::Sunday => instant.weekday().num_days_from_sunday(),
        WeekStart::Monday => instant.weekday().num_days_from_monday(),
    };
    day_start(instant) - Duration::days(i64::from(days_in))
}

/// The week containing `instant`: start-of-week plus seven days minus one second.
pub fn week_interval(instant: DateTime<Utc>, anchor: WeekStart) -> DateInterval {
    let start = week_start(instant, anchor);
    DateInterval::new(start, start + Duration::days(7) - Duration::seconds(1))
}

/// Start of the calendar month containing `instant`.
pub fn month_start(instant: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(instant.year(), instant.month(), 1, 0, 0, 0)
        .single()
        .expect("first of an existing UTC month is unambiguous")
}

/// The calendar month containing `instant`. This is the normalized bucket.
pub fn month_interval(instant: DateTime<Utc>) -> DateInterval {
    let start = month_start(instant);
    let next = next_month_start(start);
    DateInterval::new(start, next - Duration::seconds(1))
}

/// The calendar year containing `instant`.
pub fn year_interval(instant: DateTime<Utc>) -> DateInterval {
    let start = Utc
        .with_ymd_and_hms(instant.year(), 1, 1, 0, 0, 0)
        .single()
        .expect("January 1st of an existing UTC year is unambiguous");
    let next = Utc
        .with_ymd_and_hms(instant.year() + 1, 1, 1, 0, 0, 0)
        .single()
        .expect("January 1st of an existing UTC year is unambiguous");
    DateInterval::new(start, next - Duration::seconds(1))
}

/// The month immediately before `interval`'s month.
pub fn month_before(interval: &DateInterval) -> DateInterval {
    month_interval(month_start(interval.start) - Duration::seconds(1))
}

/// The month immediately after `interval`'s month.
pub fn month_after(interval: &DateInterval) -> DateInterval {
    month_interval(interval.end + Duration::seconds(1))
}

/// The monthly intervals touching `interval`, in chronological order.
pub fn months_covering(interval: &DateInterval) -> Vec<DateInterval> {
    let mut months = Vec::new();
    let mut month = month_interval(interval.start);
    while month.start <= interval.end {
        months.push(month);
        month = month_after(&month);
    }
    months
}

fn next_month_start(start: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if start.month() == 12 {
        (start.year() + 1, 1)
    } else {
        (start.year(), start.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .expect("first of an existing UTC month is unambiguous")
}

/// The fixed all-time sentinel: 300 years from the reference epoch.
///
/// Every event the analyzer will ever see falls inside this interval, so
/// it doubles as the accumulated bucket's identity and the persistence
/// key for all-time state.
pub fn all_time() -> DateInterval {
    let start = Utc
        .with_ymd_and_hms(SENTINEL_START_YEAR, 1, 1, 0, 0, 0)
        .single()
        .expect("the reference epoch is a valid UTC instant");
    let end = Utc
        .with_ymd_and_hms(SENTINEL_START_YEAR + SENTINEL_SPAN_YEARS, 1, 1, 0, 0, 0)
        .single()
        .expect("the sentinel end year is a valid UTC instant");
    DateInterval::new(start, end - Duration::seconds(1))
}

/// Whether `interval` is a bucket the analyzer persists: the calendar
/// month of its own start, or the all-time sentinel.
pub fn is_normalized(interval: &DateInterval) -> bool {
    *interval == month_interval(interval.start) || *interval == all_time()
}

/// Zero-padded `YYYYMMDD` rendering of the UTC calendar date of `instant`.
///
/// Used by the delegate key layout (`state-YYYYMMDD-YYYYMMDD`, ...).
pub fn key_date(instant: DateTime<Utc>) -> String {
    format!(
        "{:04}{:02}{:02}",
        instant.year(),
        instant.month(),
        instant.day()
    )
}

/// Serde adapter encoding a `DateTime<Utc>` as f64 seconds since the
/// Unix epoch, the wire format for every persisted timestamp.
///
/// Millisecond precision survives the round trip; anything finer is
/// rounded at encode time.
pub(crate) mod timestamp_secs {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S>(instant: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(instant.timestamp_millis() as f64 / 1000.0)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
            .ok_or_else(|| de::Error::custom(format!("timestamp out of range: {seconds}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn month_interval_ends_one_second_before_next_month() {
        let interval = month_interval(at(2023, 1, 14, 9, 30, 0));
        assert_eq!(interval.start, at(2023, 1, 1, 0, 0, 0));
        assert_eq!(interval.end, at(2023, 1, 31, 23, 59, 59));
    }

    #[test]
    fn month_interval_crosses_year_boundary() {
        let interval = month_interval(at(2022, 12, 31, 23, 59, 59));
        assert_eq!(interval.start, at(2022, 12, 1, 0, 0, 0));
        assert_eq!(interval.end, at(2022, 12, 31, 23, 59, 59));
    }

    #[test]
    fn month_before_and_after_navigate() {
        let january = month_interval(at(2023, 1, 10, 0, 0, 0));
        let december = month_before(&january);
        assert_eq!(december.start, at(2022, 12, 1, 0, 0, 0));
        let february = month_after(&january);
        assert_eq!(february.start, at(2023, 2, 1, 0, 0, 0));
        assert_eq!(february.end, at(2023, 2, 28, 23, 59, 59));
    }

    #[test]
    fn week_interval_monday_anchor() {
        // 2023-01-14 is a Saturday; the Monday week starts on the 9th.
        let interval = week_interval(at(2023, 1, 14, 12, 0, 0), WeekStart::Monday);
        assert_eq!(interval.start, at(2023, 1, 9, 0, 0, 0));
        assert_eq!(interval.end, at(2023, 1, 15, 23, 59, 59));
    }

    #[test]
    fn week_interval_sunday_anchor() {
        let interval = week_interval(at(2023, 1, 14, 12, 0, 0), WeekStart::Sunday);
        assert_eq!(interval.start, at(2023, 1, 8, 0, 0, 0));
        assert_eq!(interval.end, at(2023, 1, 14, 23, 59, 59));
    }

    #[test]
    fn day_and_hour_starts() {
        let instant = at(2023, 1, 14, 17, 45, 12);
        assert_eq!(day_start(instant), at(2023, 1, 14, 0, 0, 0));
        assert_eq!(hour_start(instant), at(2023, 1, 14, 17, 0, 0));
        let day = day_interval(instant);
        assert_eq!(day.end, at(2023, 1, 14, 23, 59, 59));
    }

    #[test]
    fn year_interval_bounds() {
        let interval = year_interval(at(2023, 6, 15, 0, 0, 0));
        assert_eq!(interval.start, at(2023, 1, 1, 0, 0, 0));
        assert_eq!(interval.end, at(2023, 12, 31, 23, 59, 59));
    }

    #[test]
    fn all_time_sentinel_spans_three_centuries() {
        let sentinel = all_time();
        assert_eq!(sentinel.start, at(1970, 1, 1, 0, 0, 0));
        assert_eq!(sentinel.end, at(2269, 12, 31, 23, 59, 59));
    }

    #[test]
    fn normalized_iff_month_or_sentinel() {
        assert!(is_normalized(&month_interval(at(2023, 1, 5, 0, 0, 0))));
        assert!(is_normalized(&all_time()));
        assert!(!is_normalized(&day_interval(at(2023, 1, 5, 0, 0, 0))));
        let adhoc = DateInterval::new(at(2023, 1, 3, 0, 0, 0), at(2023, 1, 20, 0, 0, 0));
        assert!(!is_normalized(&adhoc));
    }

    #[test]
    fn contains_is_inclusive_at_both_ends() {
        let interval = month_interval(at(2023, 1, 1, 0, 0, 0));
        assert!(interval.contains(interval.start));
        assert!(interval.contains(interval.end));
        assert!(!interval.contains(interval.end + Duration::seconds(1)));
    }

    #[test]
    fn expand_to_grows_both_directions() {
        let mut interval = DateInterval::point(at(2023, 1, 10, 0, 0, 0));
        assert!(interval.duration().is_zero());
        interval.expand_to(at(2023, 1, 5, 0, 0, 0));
        interval.expand_to(at(2023, 1, 20, 0, 0, 0));
        assert_eq!(interval.start, at(2023, 1, 5, 0, 0, 0));
        assert_eq!(interval.end, at(2023, 1, 20, 0, 0, 0));
    }

    #[test]
    fn months_covering_spans_the_interval() {
        let interval = DateInterval::new(at(2022, 12, 20, 0, 0, 0), at(2023, 2, 7, 23, 59, 59));
        let months = months_covering(&interval);
        assert_eq!(months.len(), 3);
        assert_eq!(months[0].start, at(2022, 12, 1, 0, 0, 0));
        assert_eq!(months[2].start, at(2023, 2, 1, 0, 0, 0));

        let single = months_covering(&DateInterval::point(at(2023, 1, 5, 0, 0, 0)));
        assert_eq!(single.len(), 1);
    }

    #[test]
    fn key_date_zero_pads() {
        assert_eq!(key_date(at(2023, 1, 5, 10, 0, 0)), "20230105");
        assert_eq!(key_date(at(450, 11, 30, 0, 0, 0)), "04501130");
    }

    #[test]
    fn interval_serde_roundtrips_as_seconds() {
        let interval = DateInterval::new(at(2023, 1, 1, 0, 0, 0), at(2023, 1, 31, 23, 59, 59));
        let json = serde_json::to_string(&interval).unwrap();
        let back: DateInterval = serde_json::from_str(&json).unwrap();
        assert_eq!(back, interval);
        // The encoded form is numeric seconds, not an RFC-3339 string.
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert!(value["start"].is_f64() || value["start"].is_number());
    }
}
