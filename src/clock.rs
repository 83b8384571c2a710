use chrono::{LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::model::{Minutes, Ms};

/// Time source injected into the engine. All date-sensitive booking and
/// scheduling logic goes through this trait so tests can pin the clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;
}

/// Wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system clock before epoch")
            .as_millis() as Ms
    }
}

/// Manually advanced clock for tests.
pub struct ManualClock(std::sync::atomic::AtomicI64);

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self(std::sync::atomic::AtomicI64::new(now))
    }

    pub fn set(&self, now: Ms) {
        self.0.store(now, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn advance(&self, by: Ms) {
        self.0.fetch_add(by, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

/// Calendar date at `now` in the club's timezone.
pub fn local_date(now: Ms, tz: Tz) -> NaiveDate {
    Utc.timestamp_millis_opt(now)
        .single()
        .map(|dt| dt.with_timezone(&tz).date_naive())
        .unwrap_or(NaiveDate::MIN)
}

/// Club-local (date, minute-of-day) as an epoch-ms instant.
/// On a DST fold the earlier instant wins; in a DST gap the naive time is
/// read as UTC, which keeps replay deterministic.
pub fn local_instant(date: NaiveDate, minute: Minutes, tz: Tz) -> Ms {
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minute as u32 * 60, 0)
        .unwrap_or(NaiveTime::MIN);
    let naive = date.and_time(time);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.timestamp_millis(),
        LocalResult::Ambiguous(earlier, _) => earlier.timestamp_millis(),
        LocalResult::None => naive.and_utc().timestamp_millis(),
    }
}

/// Day of week as 0=Sunday..6=Saturday. Pricing rules and discount
/// conditions store weekdays in this encoding.
pub fn weekday_index(date: NaiveDate) -> u8 {
    chrono::Datelike::weekday(&date).num_days_from_sunday() as u8
}

/// Lowercase English day name for the given 0=Sunday index.
pub fn weekday_name(index: u8) -> &'static str {
    match index {
        0 => "sunday",
        1 => "monday",
        2 => "tuesday",
        3 => "wednesday",
        4 => "thursday",
        5 => "friday",
        _ => "saturday",
    }
}
