// libs/doctor-cell/src/services/calendar.rs
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, Utc};

use crate::models::{DayOfWeek, DoctorError};

/// Calendar arithmetic pinned to the clinic's UTC offset.
///
/// Every weekday and day-boundary decision goes through here, so the answer
/// does not depend on the host's locale or timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClinicCalendar {
    offset: FixedOffset,
}

impl Default for ClinicCalendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl ClinicCalendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }

    pub fn from_offset_minutes(minutes: i32) -> Result<Self, DoctorError> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(Self::new)
            .ok_or_else(|| DoctorError::ValidationError(format!("Invalid clinic UTC offset: {} minutes", minutes)))
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn weekday(&self, date: NaiveDate) -> DayOfWeek {
        date.weekday().into()
    }

    /// Calendar date of an instant on the clinic's wall clock.
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.offset).date_naive()
    }

    /// The instant at which the clinic's clock reads `time` on `date`.
    pub fn at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        (local - Duration::seconds(i64::from(self.offset.local_minus_utc()))).and_utc()
    }

    /// `[start, end)` of a clinic-local day.
    pub fn day_bounds(&self, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
        let start = self.at(date, NaiveTime::default());
        (start, start + Duration::days(1))
    }

    /// Monday 00:00 of the clinic-local week containing `now`.
    pub fn week_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today = self.local_date(now);
        let monday = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
        self.at(monday, NaiveTime::default())
    }
}
