//! Side-by-side daily profiles for a hand-picked set of days.

use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;

use crate::pipeline::dataset::EnrichedDataset;
use crate::pipeline::records::MetricKind;

pub const COMPARED_METRICS: [MetricKind; 4] = [
    MetricKind::Produced,
    MetricKind::Consumed,
    MetricKind::Imported,
    MetricKind::Exported,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaySelection(BTreeSet<NaiveDate>);

impl DaySelection {
    /// Picking an already selected day removes it.
    pub fn toggle(&mut self, day: NaiveDate) {
        if !self.0.remove(&day) {
            self.0.insert(day);
        }
    }

    pub fn days(&self) -> &BTreeSet<NaiveDate> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Long-format point: one metric of one slot on one day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonPoint {
    pub day: NaiveDate,
    pub time_of_day: NaiveDateTime,
    pub metric: MetricKind,
    pub wh: Option<f64>,
}

/// Points ordered by metric, then day, then time of day.
pub fn compare_days(dataset: &EnrichedDataset, selection: &DaySelection) -> Vec<ComparisonPoint> {
    let mut points = Vec::new();
    for metric in COMPARED_METRICS {
        for &day in selection.days() {
            points.extend(dataset.rows_on(day).map(|row| ComparisonPoint {
                day,
                time_of_day: row.row.calendar.time_of_day,
                metric,
                wh: row.metric(metric),
            }));
        }
    }
    points
}
