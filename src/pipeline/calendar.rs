//! Calendar buckets derived from each row's timestamp.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::Serialize;

use crate::pipeline::reconcile::ReconciledRow;
use crate::pipeline::records::{MetricValues, SystemId};

/// Shared date every `time_of_day` is projected onto, so readings taken at the
/// same clock time on different days compare equal.
pub const REFERENCE_DATE: NaiveDate = match NaiveDate::from_ymd_opt(2000, 1, 1) {
    Some(date) => date,
    None => panic!("reference date out of range"),
};

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarFields {
    pub time_of_day: NaiveDateTime,
    pub hour: NaiveDateTime,
    pub day: NaiveDate,
    /// 1 = January.
    pub month: u32,
    pub month_name: &'static str,
    /// Day-of-year (1-based) integer-divided by 7. Not an ISO week, and not
    /// distinguished across years.
    pub week: u32,
    pub year: i32,
    /// 0 = Monday.
    pub day_of_week: u32,
    pub day_of_month: u32,
}

impl CalendarFields {
    pub fn from_timestamp(ts: NaiveDateTime) -> Self {
        let day = ts.date();
        let hour = day.and_time(NaiveTime::MIN) + TimeDelta::hours(i64::from(ts.hour()));
        let month = day.month();
        CalendarFields {
            time_of_day: REFERENCE_DATE.and_time(ts.time()),
            hour,
            day,
            month,
            month_name: MONTH_NAMES[month0_index(month)],
            week: day.ordinal() / 7,
            year: day.year(),
            day_of_week: day.weekday().num_days_from_monday(),
            day_of_month: day.day(),
        }
    }
}

fn month0_index(month: u32) -> usize {
    (month.clamp(1, 12) - 1) as usize
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichedRow {
    pub system_id: SystemId,
    pub end_at: DateTime<FixedOffset>,
    /// Local wall clock of `end_at`; repeats during a DST fall-back hour.
    pub timestamp: NaiveDateTime,
    #[serde(flatten)]
    pub metrics: MetricValues,
    #[serde(flatten)]
    pub calendar: CalendarFields,
}

pub fn enrich(row: ReconciledRow) -> EnrichedRow {
    let timestamp = row.end_at.naive_local();
    EnrichedRow {
        system_id: row.system_id,
        end_at: row.end_at,
        timestamp,
        metrics: row.metrics,
        calendar: CalendarFields::from_timestamp(timestamp),
    }
}

pub fn enrich_all(rows: Vec<ReconciledRow>) -> Vec<EnrichedRow> {
    rows.into_iter().map(enrich).collect()
}
