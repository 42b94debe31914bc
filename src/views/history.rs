//! Flow totals over time, bucketed by a selectable granularity.

use chrono::{Datelike, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::pipeline::dataset::{DatasetRow, EnrichedDataset};
use crate::pipeline::records::{MetricKind, MetricValues};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Granularity {
    /// The native 15-minute interval.
    Interval,
    Hour,
    #[default]
    Day,
    Month,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "interval" | "time" | "15 min" | "15min" => Ok(Granularity::Interval),
            "hour" => Ok(Granularity::Hour),
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            other => Err(format!("unknown granularity: {}", other)),
        }
    }
}

impl Granularity {
    /// Start of the bucket a row falls into.
    pub fn bucket_start(self, row: &DatasetRow) -> NaiveDateTime {
        let calendar = &row.row.calendar;
        match self {
            Granularity::Interval => row.row.timestamp,
            Granularity::Hour => calendar.hour,
            Granularity::Day => calendar.day.and_time(NaiveTime::MIN),
            Granularity::Month => calendar.day.with_day(1).unwrap_or(calendar.day).and_time(NaiveTime::MIN),
        }
    }
}

/// Sums of the six energy flows. Missing readings contribute nothing.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize)]
pub struct FlowTotals {
    pub produced: f64,
    pub consumed: f64,
    pub imported: f64,
    pub exported: f64,
    pub charged: f64,
    pub discharged: f64,
}

impl FlowTotals {
    pub fn add(&mut self, values: &MetricValues) {
        self.produced += values.produced.unwrap_or(0.0);
        self.consumed += values.consumed.unwrap_or(0.0);
        self.imported += values.imported.unwrap_or(0.0);
        self.exported += values.exported.unwrap_or(0.0);
        self.charged += values.charged.unwrap_or(0.0);
        self.discharged += values.discharged.unwrap_or(0.0);
    }

    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Produced => Some(self.produced),
            MetricKind::Consumed => Some(self.consumed),
            MetricKind::Imported => Some(self.imported),
            MetricKind::Exported => Some(self.exported),
            MetricKind::Charged => Some(self.charged),
            MetricKind::Discharged => Some(self.discharged),
            MetricKind::ChargePercent => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryQuery {
    /// Inclusive bounds on the row timestamp.
    pub from: Option<NaiveDateTime>,
    pub to: Option<NaiveDateTime>,
    /// When non-empty, only rows at these times of day are counted.
    pub times_of_day: BTreeSet<NaiveDateTime>,
    pub granularity: Granularity,
}

impl HistoryQuery {
    fn matches(&self, row: &DatasetRow) -> bool {
        let ts = row.row.timestamp;
        self.from.is_none_or(|from| ts >= from)
            && self.to.is_none_or(|to| ts <= to)
            && (self.times_of_day.is_empty() || self.times_of_day.contains(&row.row.calendar.time_of_day))
    }

    /// Add the slot if absent, remove it if present.
    pub fn toggle_time_of_day(&mut self, time_of_day: NaiveDateTime) {
        if !self.times_of_day.remove(&time_of_day) {
            self.times_of_day.insert(time_of_day);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryBucket {
    pub start: NaiveDateTime,
    #[serde(flatten)]
    pub totals: FlowTotals,
}

/// Buckets ordered by start. All systems are summed together.
pub fn history(dataset: &EnrichedDataset, query: &HistoryQuery) -> Vec<HistoryBucket> {
    let mut buckets: BTreeMap<NaiveDateTime, FlowTotals> = BTreeMap::new();
    for row in dataset.rows().iter().filter(|row| query.matches(row)) {
        buckets
            .entry(query.granularity.bucket_start(row))
            .or_default()
            .add(&row.row.metrics);
    }
    buckets
        .into_iter()
        .map(|(start, totals)| HistoryBucket { start, totals })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeOfDayTotals {
    pub time_of_day: NaiveDateTime,
    #[serde(flatten)]
    pub totals: FlowTotals,
}

/// Flow totals per time-of-day slot over the whole dataset.
pub fn time_of_day_summary(dataset: &EnrichedDataset) -> Vec<TimeOfDayTotals> {
    let mut slots: BTreeMap<NaiveDateTime, FlowTotals> = BTreeMap::new();
    for row in dataset.rows() {
        slots.entry(row.row.calendar.time_of_day).or_default().add(&row.row.metrics);
    }
    slots
        .into_iter()
        .map(|(time_of_day, totals)| TimeOfDayTotals { time_of_day, totals })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::calendar::REFERENCE_DATE;
    use crate::pipeline::dataset::{PipelineConfig, build_enriched_dataset};
    use crate::pipeline::records::{RawRow, RawTables};
    use chrono::NaiveDate;

    fn at(month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, month, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    /// Quarter-hour rows across two days in June and one in July.
    fn dataset() -> EnrichedDataset {
        let mut raw = RawTables::default();
        for (month, day) in [(6, 1), (6, 2), (7, 1)] {
            for hour in 10..12 {
                for minute in [0, 15, 30, 45] {
                    let ts = Some(at(month, day, hour, minute));
                    raw.import.rows.push(RawRow::new(Some(1), ts).with("wh_imported", Some(1.0)));
                    raw.production.rows.push(RawRow::new(Some(1), ts).with("wh_del", Some(10.0)));
                    raw.consumption.rows.push(RawRow::new(Some(1), ts).with("enwh", Some(4.0)));
                }
            }
        }
        build_enriched_dataset(&raw, &PipelineConfig::default()).unwrap().dataset
    }

    #[test]
    fn day_buckets_sum_all_intervals() {
        let buckets = history(&dataset(), &HistoryQuery::default());
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[0].start, at(6, 1, 0, 0));
        assert_eq!(buckets[0].totals.produced, 80.0);
        assert_eq!(buckets[0].totals.consumed, -32.0);
        assert_eq!(buckets[0].totals.exported, 0.0);
    }

    #[test]
    fn month_and_hour_buckets() {
        let data = dataset();
        let months = history(
            &data,
            &HistoryQuery {
                granularity: Granularity::Month,
                ..HistoryQuery::default()
            },
        );
        assert_eq!(
            months.iter().map(|b| (b.start, b.totals.produced)).collect::<Vec<_>>(),
            vec![(at(6, 1, 0, 0), 160.0), (at(7, 1, 0, 0), 80.0)]
        );

        let hours = history(
            &data,
            &HistoryQuery {
                granularity: Granularity::Hour,
                ..HistoryQuery::default()
            },
        );
        assert_eq!(hours.len(), 6);
        assert_eq!(hours[1].start, at(6, 1, 11, 0));
        assert_eq!(hours[1].totals.imported, 4.0);
    }

    #[test]
    fn range_and_time_of_day_filters_apply() {
        let mut query = HistoryQuery {
            from: Some(at(6, 2, 0, 0)),
            to: Some(at(6, 30, 0, 0)),
            granularity: Granularity::Interval,
            ..HistoryQuery::default()
        };
        query.toggle_time_of_day(REFERENCE_DATE.and_hms_opt(10, 15, 0).unwrap());
        let buckets = history(&dataset(), &query);
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets[0].start, at(6, 2, 10, 15));

        query.toggle_time_of_day(REFERENCE_DATE.and_hms_opt(10, 15, 0).unwrap());
        assert!(query.times_of_day.is_empty());
        assert_eq!(history(&dataset(), &query).len(), 8);
    }

    #[test]
    fn time_of_day_summary_spans_days() {
        let summary = time_of_day_summary(&dataset());
        assert_eq!(summary.len(), 8);
        assert_eq!(summary[0].time_of_day, REFERENCE_DATE.and_hms_opt(10, 0, 0).unwrap());
        assert_eq!(summary[0].totals.produced, 30.0);
        assert_eq!(summary[0].totals.get(MetricKind::ChargePercent), None);
    }

    #[test]
    fn granularity_parses_dashboard_names() {
        assert_eq!("15 min".parse::<Granularity>(), Ok(Granularity::Interval));
        assert_eq!("Month".parse::<Granularity>(), Ok(Granularity::Month));
        assert!("fortnight".parse::<Granularity>().is_err());
    }
}
