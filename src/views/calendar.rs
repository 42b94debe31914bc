//! Per-day totals laid out on a month-by-week heatmap grid, plus the
//! single-day drill-down with its envelope efficiency.
//!
//! Grid coordinates: each month occupies seven columns (one per weekday),
//! offset from the earliest month present; rows are the week of the month.
//! Months of different years share columns.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::pipeline::dataset::EnrichedDataset;
use crate::pipeline::envelope::Scope;
use crate::pipeline::records::MetricKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalendarCell {
    pub day: NaiveDate,
    pub month: u32,
    pub month_name: &'static str,
    pub day_of_week: u32,
    pub day_of_month: u32,
    pub total: f64,
    pub x: u32,
    pub y: u32,
}

/// 1-based row of a day within its month. Rows start on Monday and row 1
/// holds the days before the first Monday, so a month starting on a Monday
/// begins on row 2.
pub fn week_of_month(day_of_month: u32, day_of_week: u32) -> u32 {
    let dom = i64::from(day_of_month);
    let dow = i64::from(day_of_week);
    let row = (dom - dow + (dow - dom).rem_euclid(7)) / 7 + 1;
    u32::try_from(row).unwrap_or(1)
}

/// Daily sums of `metric`, one cell per day present in the dataset.
pub fn daily_totals(dataset: &EnrichedDataset, metric: MetricKind) -> Vec<CalendarCell> {
    let mut days: BTreeMap<NaiveDate, CalendarCell> = BTreeMap::new();
    for row in dataset.rows() {
        let calendar = &row.row.calendar;
        let cell = days.entry(calendar.day).or_insert_with(|| CalendarCell {
            day: calendar.day,
            month: calendar.month,
            month_name: calendar.month_name,
            day_of_week: calendar.day_of_week,
            day_of_month: calendar.day_of_month,
            total: 0.0,
            x: 0,
            y: week_of_month(calendar.day_of_month, calendar.day_of_week),
        });
        cell.total += row.metric(metric).unwrap_or(0.0);
    }

    let Some(min_month) = days.values().map(|cell| cell.month).min() else {
        return Vec::new();
    };
    days.into_values()
        .map(|mut cell| {
            cell.x = (cell.month - min_month) * 7 + cell.day_of_week;
            cell
        })
        .collect()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum EfficiencyBand {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl EfficiencyBand {
    pub fn for_percent(percent: f64) -> Self {
        if percent >= 75.0 {
            EfficiencyBand::Excellent
        } else if percent >= 50.0 {
            EfficiencyBand::Good
        } else if percent >= 25.0 {
            EfficiencyBand::Fair
        } else {
            EfficiencyBand::Poor
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Serialize)]
pub struct Efficiency {
    pub percent: f64,
    pub band: EfficiencyBand,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayEfficiency {
    pub day: NaiveDate,
    pub global: Option<Efficiency>,
    pub month: Option<Efficiency>,
    pub week: Option<Efficiency>,
}

impl DayEfficiency {
    pub fn get(&self, scope: Scope) -> Option<Efficiency> {
        match scope {
            Scope::Global => self.global,
            Scope::Month => self.month,
            Scope::Week => self.week,
        }
    }
}

/// How much of each envelope a day achieved, as a whole percentage.
/// `None` for a scope whose envelope sums to zero over the day.
pub fn day_efficiency(dataset: &EnrichedDataset, day: NaiveDate) -> Option<DayEfficiency> {
    let metric = dataset.envelope_metric();
    let mut actual = 0.0;
    let mut envelope = [0.0f64; 3];
    let mut seen = false;
    for row in dataset.rows_on(day) {
        seen = true;
        actual += row.metric(metric).unwrap_or(0.0);
        for (sum, scope) in envelope.iter_mut().zip(Scope::ALL) {
            *sum += row.envelope(scope).unwrap_or(0.0);
        }
    }
    if !seen {
        return None;
    }

    let efficiency = |max: f64| {
        (max != 0.0).then(|| {
            let percent = (100.0 * actual / max).round_ties_even();
            Efficiency {
                percent,
                band: EfficiencyBand::for_percent(percent),
            }
        })
    };
    Some(DayEfficiency {
        day,
        global: efficiency(envelope[0]),
        month: efficiency(envelope[1]),
        week: efficiency(envelope[2]),
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfilePoint {
    pub time_of_day: NaiveDateTime,
    pub value: Option<f64>,
    pub max_global: Option<f64>,
    pub max_month: Option<f64>,
    pub max_week: Option<f64>,
}

/// One day's readings of `metric` next to the three envelopes.
pub fn day_profile(dataset: &EnrichedDataset, day: NaiveDate, metric: MetricKind) -> Vec<ProfilePoint> {
    dataset
        .rows_on(day)
        .map(|row| ProfilePoint {
            time_of_day: row.row.calendar.time_of_day,
            value: row.metric(metric),
            max_global: row.max_global,
            max_month: row.max_month,
            max_week: row.max_week,
        })
        .collect()
}
