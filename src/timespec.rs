use std::cmp::Ordering;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use nix::time::{clock_gettime, ClockId};
use time::macros::format_description;
use time::OffsetDateTime;

const NANOS_PER_SEC: u32 = 1_000_000_000;

/// A point in time with nanosecond precision, `(sec, nsec)` with `nsec < 1e9`.
///
/// Field order gives the derived `Ord` the lexicographic (seconds, then
/// nanoseconds) comparison, which is a strict total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timespec {
    sec: i64,
    nsec: u32,
}

impl Timespec {
    pub const EPOCH: Timespec = Timespec { sec: 0, nsec: 0 };

    /// Returns `None` when `nsec` is out of range.
    pub const fn new(sec: i64, nsec: u32) -> Option<Self> {
        if nsec < NANOS_PER_SEC {
            Some(Self { sec, nsec })
        } else {
            None
        }
    }

    /// Carries whole seconds out of `nsec`, so `(1, 1_500_000_000)` becomes `(2, 500_000_000)`.
    pub const fn normalized(sec: i64, nsec: i64) -> Self {
        let carry = nsec.div_euclid(NANOS_PER_SEC as i64);
        let nsec = nsec.rem_euclid(NANOS_PER_SEC as i64);
        Self {
            sec: sec.saturating_add(carry),
            nsec: nsec as u32,
        }
    }

    pub const fn sec(&self) -> i64 {
        self.sec
    }

    pub const fn nsec(&self) -> u32 {
        self.nsec
    }

    /// Const-evaluable equivalent of `Ord::cmp`.
    pub const fn const_cmp(&self, other: &Timespec) -> Ordering {
        if self.sec < other.sec {
            Ordering::Less
        } else if self.sec > other.sec {
            Ordering::Greater
        } else if self.nsec < other.nsec {
            Ordering::Less
        } else if self.nsec > other.nsec {
            Ordering::Greater
        } else {
            Ordering::Equal
        }
    }

    /// `None` when the value does not fit the platform's `SystemTime`.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self.sec >= 0 {
            UNIX_EPOCH.checked_add(Duration::new(self.sec as u64, self.nsec))
        } else {
            // (-1, 5e8) is half a second before the epoch
            UNIX_EPOCH
                .checked_sub(Duration::from_secs(self.sec.unsigned_abs()))?
                .checked_add(Duration::from_nanos(self.nsec as u64))
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(after) => Timespec::normalized(after.as_secs() as i64, after.subsec_nanos() as i64),
            Err(before) => {
                let before = before.duration();
                Timespec::normalized(-(before.as_secs() as i64), -(before.subsec_nanos() as i64))
            }
        }
    }
}

impl fmt::Display for Timespec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.sec, self.nsec)
    }
}

/// A timestamp slot value: either a concrete time, or the sentinel that asks
/// an attribute update to leave the slot alone.
///
/// `Timestamp` deliberately has no `PartialOrd`; ordering goes through
/// [`compare`], which has no opinion whenever `Omit` is involved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timestamp {
    Omit,
    Value(Timespec),
}

impl Timestamp {
    /// Builds a value timestamp, or `None` when `nsec` is out of range.
    pub const fn at(sec: i64, nsec: u32) -> Option<Self> {
        match Timespec::new(sec, nsec) {
            Some(ts) => Some(Timestamp::Value(ts)),
            None => None,
        }
    }

    pub const fn is_omit(&self) -> bool {
        matches!(self, Timestamp::Omit)
    }

    pub const fn value(&self) -> Option<Timespec> {
        match self {
            Timestamp::Omit => None,
            Timestamp::Value(ts) => Some(*ts),
        }
    }

    /// Samples the wall clock for stamping a new cache entry.
    pub fn now() -> Self {
        Timestamp::Value(realtime())
    }

    /// Translates the time argument of a FUSE `setattr` request.
    ///
    /// An absent argument means the caller does not want the slot touched.
    pub fn from_time_or_now(time: Option<fuser::TimeOrNow>) -> Self {
        match time {
            None => Timestamp::Omit,
            Some(fuser::TimeOrNow::SpecificTime(at)) => Timestamp::Value(at.into()),
            Some(fuser::TimeOrNow::Now) => Timestamp::now(),
        }
    }
}

impl From<Timespec> for Timestamp {
    fn from(ts: Timespec) -> Self {
        Timestamp::Value(ts)
    }
}

impl From<SystemTime> for Timestamp {
    fn from(time: SystemTime) -> Self {
        Timestamp::Value(time.into())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Omit => f.write_str("omit"),
            Timestamp::Value(ts) => ts.fmt(f),
        }
    }
}

/// Orders two timestamps. Returns `None` if either side is `Omit`.
///
/// Every staleness decision in the crate goes through this function.
pub const fn compare(ts1: &Timestamp, ts2: &Timestamp) -> Option<Ordering> {
    match (ts1, ts2) {
        (Timestamp::Value(a), Timestamp::Value(b)) => Some(a.const_cmp(b)),
        _ => None,
    }
}

/// True only when both sides are values and `cached` is strictly older than `remote`.
pub const fn is_stale(cached: &Timestamp, remote: &Timestamp) -> bool {
    matches!(compare(cached, remote), Some(Ordering::Less))
}

fn sample(clock: ClockId) -> Option<Timespec> {
    let ts = clock_gettime(clock).ok()?;
    Some(Timespec::normalized(ts.tv_sec() as i64, ts.tv_nsec() as i64))
}

/// Current wall-clock time, falling back to `SystemTime` if `CLOCK_REALTIME` fails.
pub fn realtime() -> Timespec {
    sample(ClockId::CLOCK_REALTIME).unwrap_or_else(|| SystemTime::now().into())
}

#[cfg(target_os = "linux")]
fn coarse_monotonic() -> Option<Timespec> {
    sample(ClockId::CLOCK_MONOTONIC_COARSE)
}

#[cfg(not(target_os = "linux"))]
fn coarse_monotonic() -> Option<Timespec> {
    None
}

/// A cheap monotonic sample for measuring entry age.
///
/// Tries the coarse monotonic clock first, then the precise one, then wall time.
pub fn monotonic() -> Timespec {
    coarse_monotonic()
        .or_else(|| sample(ClockId::CLOCK_MONOTONIC))
        .unwrap_or_else(realtime)
}

/// Wall time as `YYYY-MM-DDTHH:MM:SS.mmmZ`, used as a log line prefix.
pub fn str_realtime() -> String {
    format_utc(realtime())
}

fn format_utc(ts: Timespec) -> String {
    let nanos = ts.sec() as i128 * NANOS_PER_SEC as i128 + ts.nsec() as i128;
    let format = format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]Z");
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|at| at.format(format).ok())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(sec: i64, nsec: u32) -> Timestamp {
        Timestamp::at(sec, nsec).unwrap()
    }

    #[test]
    fn test_compare_is_lexicographic() {
        assert_eq!(compare(&ts(1, 0), &ts(2, 0)), Some(Ordering::Less));
        assert_eq!(compare(&ts(2, 0), &ts(1, 999_999_999)), Some(Ordering::Greater));
        assert_eq!(compare(&ts(5, 10), &ts(5, 20)), Some(Ordering::Less));
        assert_eq!(compare(&ts(5, 20), &ts(5, 20)), Some(Ordering::Equal));
        assert_eq!(compare(&ts(-1, 0), &ts(0, 0)), Some(Ordering::Less));
    }

    #[test]
    fn test_compare_is_total_order() {
        let samples = [
            ts(-3, 7),
            ts(0, 0),
            ts(0, 1),
            ts(1, 999_999_999),
            ts(2, 0),
            ts(i64::MAX, 999_999_999),
            ts(i64::MIN, 0),
        ];

        for a in &samples {
            assert_eq!(compare(a, a), Some(Ordering::Equal));
            for b in &samples {
                let ab = compare(a, b).unwrap();
                let ba = compare(b, a).unwrap();
                assert_eq!(ab, ba.reverse(), "antisymmetry for {} / {}", a, b);
                for c in &samples {
                    let bc = compare(b, c).unwrap();
                    if ab == Ordering::Less && bc == Ordering::Less {
                        assert_eq!(compare(a, c), Some(Ordering::Less), "transitivity {} {} {}", a, b, c);
                    }
                }
            }
        }
    }

    #[test]
    fn test_omit_has_no_ordering() {
        let value = ts(10, 0);
        assert_eq!(compare(&Timestamp::Omit, &value), None);
        assert_eq!(compare(&value, &Timestamp::Omit), None);
        assert_eq!(compare(&Timestamp::Omit, &Timestamp::Omit), None);
    }

    #[test]
    fn test_compare_is_const_evaluable() {
        const OLDER: Timestamp = Timestamp::Value(Timespec::EPOCH);
        const NEWER: Timestamp = match Timestamp::at(1, 0) {
            Some(t) => t,
            None => Timestamp::Omit,
        };
        const ORDER: Option<Ordering> = compare(&OLDER, &NEWER);
        const STALE: bool = is_stale(&OLDER, &NEWER);
        assert_eq!(ORDER, Some(Ordering::Less));
        assert!(STALE);
    }

    #[test]
    fn test_staleness_tie_break() {
        assert!(is_stale(&ts(1, 0), &ts(1, 1)));
        assert!(!is_stale(&ts(1, 1), &ts(1, 1)));
        assert!(!is_stale(&ts(2, 0), &ts(1, 1)));
        assert!(!is_stale(&Timestamp::Omit, &ts(1, 1)));
        assert!(!is_stale(&ts(1, 1), &Timestamp::Omit));
    }

    #[test]
    fn test_new_rejects_out_of_range_nanos() {
        assert!(Timespec::new(0, 999_999_999).is_some());
        assert!(Timespec::new(0, 1_000_000_000).is_none());
        assert!(Timestamp::at(0, u32::MAX).is_none());
    }

    #[test]
    fn test_normalized_carries() {
        assert_eq!(Timespec::normalized(1, 1_500_000_000), Timespec::new(2, 500_000_000).unwrap());
        assert_eq!(Timespec::normalized(0, -1), Timespec::new(-1, 999_999_999).unwrap());
    }

    #[test]
    fn test_system_time_conversion() {
        let at = UNIX_EPOCH + Duration::new(1_700_000_000, 123_456_789);
        let converted = Timespec::from(at);
        assert_eq!(converted, Timespec::new(1_700_000_000, 123_456_789).unwrap());
        assert_eq!(converted.to_system_time(), Some(at));

        let before = UNIX_EPOCH - Duration::from_millis(500);
        let converted = Timespec::from(before);
        assert_eq!(converted, Timespec::new(-1, 500_000_000).unwrap());
        assert_eq!(converted.to_system_time(), Some(before));
    }

    #[test]
    fn test_time_or_now_translation() {
        assert_eq!(Timestamp::from_time_or_now(None), Timestamp::Omit);

        let at = UNIX_EPOCH + Duration::from_secs(42);
        assert_eq!(
            Timestamp::from_time_or_now(Some(fuser::TimeOrNow::SpecificTime(at))),
            ts(42, 0)
        );

        let before = realtime();
        let now = Timestamp::from_time_or_now(Some(fuser::TimeOrNow::Now));
        assert!(!now.is_omit());
        assert_ne!(compare(&now, &Timestamp::Value(before)), Some(Ordering::Less));
    }

    #[test]
    fn test_clocks_advance() {
        let first = monotonic();
        let second = monotonic();
        assert!(second >= first);
        assert!(realtime() > Timespec::new(1_600_000_000, 0).unwrap());
    }

    #[test]
    fn test_display() {
        assert_eq!(ts(12, 5).to_string(), "12.000000005");
        assert_eq!(Timestamp::Omit.to_string(), "omit");
    }

    #[test]
    fn test_format_utc() {
        let at = Timespec::new(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(format_utc(at), "2023-11-14T22:13:20.123Z");

        let now = str_realtime();
        assert_eq!(now.len(), "2023-11-14T22:13:20.123Z".len());
        assert!(now.ends_with('Z'));
    }
}
