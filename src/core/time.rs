use std::sync::Arc;

use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, Duration,
    OffsetDateTime, Time, UtcOffset,
};

/// Source of the current instant. Everything that compares against "now" takes one.
pub(crate) trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub(crate) type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

#[cfg(test)]
#[derive(Debug)]
pub(crate) struct ManualClock {
    now: std::sync::Mutex<OffsetDateTime>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn new(now: OffsetDateTime) -> Arc<Self> {
        Arc::new(Self { now: std::sync::Mutex::new(to_utc(now)) })
    }

    pub(crate) fn set(&self, now: OffsetDateTime) {
        *self.now.lock().expect("clock lock") = to_utc(now);
    }

    pub(crate) fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock lock");
        *guard += by;
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("clock lock")
    }
}

pub(crate) fn to_utc(value: OffsetDateTime) -> OffsetDateTime {
    value.to_offset(UtcOffset::UTC)
}

/// Start of the calendar day `value` falls on in `offset`, as a UTC instant.
pub(crate) fn start_of_day(value: OffsetDateTime, offset: UtcOffset) -> OffsetDateTime {
    to_utc(value.to_offset(offset).replace_time(Time::MIDNIGHT))
}

/// Renders `dd-mm-YYYY HH:MM` in the given display offset.
pub(crate) fn format_display(value: OffsetDateTime, offset: UtcOffset) -> String {
    let shifted = value.to_offset(offset);
    shifted
        .format(format_description!("[day]-[month]-[year] [hour]:[minute]"))
        .unwrap_or_else(|_| shifted.to_string())
}

pub(crate) fn format_rfc3339(value: OffsetDateTime) -> String {
    to_utc(value).format(&Rfc3339).unwrap_or_else(|_| value.to_string())
}

/// Time left until the next `hour:00` wall-clock moment in `offset`.
/// Returns a full day when `now` sits exactly on the trigger.
pub(crate) fn until_next_daily(
    now: OffsetDateTime,
    hour: u8,
    offset: UtcOffset,
) -> std::time::Duration {
    let local = now.to_offset(offset);
    let trigger_time = Time::from_hms(hour.min(23), 0, 0).unwrap_or(Time::MIDNIGHT);
    let today = local.date().with_time(trigger_time).assume_offset(offset);
    let next = if today > local {
        today
    } else {
        next_day(local.date()).with_time(trigger_time).assume_offset(offset)
    };

    let delta = next - local;
    std::time::Duration::try_from(delta).unwrap_or(std::time::Duration::from_secs(86_400))
}

fn next_day(date: Date) -> Date {
    date.next_day().unwrap_or(date)
}

pub(crate) fn hours(value: u32) -> Duration {
    Duration::hours(i64::from(value))
}

pub(crate) fn days(value: u32) -> Duration {
    Duration::days(i64::from(value))
}
