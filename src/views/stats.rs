//! Percentile bands of a metric per time-of-day slot.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::pipeline::dataset::EnrichedDataset;
use crate::pipeline::records::MetricKind;

pub const LEVELS: [f64; 5] = [0.10, 0.25, 0.50, 0.75, 0.90];

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatsGrouping {
    #[default]
    Month,
    Year,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PercentileBand {
    /// Month number or year, depending on the grouping.
    pub group: i32,
    pub time_of_day: NaiveDateTime,
    pub samples: usize,
    pub p10: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p90: f64,
}

/// Quantile of an ascending slice, interpolating linearly between the two
/// closest ranks.
pub fn quantile(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let position = q.clamp(0.0, 1.0) * last as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

pub fn percentile_bands(dataset: &EnrichedDataset, grouping: StatsGrouping, metric: MetricKind) -> Vec<PercentileBand> {
    let mut groups: BTreeMap<(i32, NaiveDateTime), Vec<f64>> = BTreeMap::new();
    for row in dataset.rows() {
        let Some(value) = row.metric(metric) else {
            continue;
        };
        let calendar = &row.row.calendar;
        let group = match grouping {
            StatsGrouping::Month => calendar.month as i32,
            StatsGrouping::Year => calendar.year,
        };
        groups.entry((group, calendar.time_of_day)).or_default().push(value);
    }

    groups
        .into_iter()
        .filter_map(|((group, time_of_day), mut values)| {
            values.sort_by(f64::total_cmp);
            let [p10, p25, p50, p75, p90] = LEVELS.map(|q| quantile(&values, q));
            Some(PercentileBand {
                group,
                time_of_day,
                samples: values.len(),
                p10: p10?,
                p25: p25?,
                p50: p50?,
                p75: p75?,
                p90: p90?,
            })
        })
        .collect()
}
