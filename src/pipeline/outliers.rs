//! Static exclusion of days known to contain instrumentation interventions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::pipeline::calendar::EnrichedRow;

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExclusionList(BTreeSet<NaiveDate>);

impl ExclusionList {
    /// Parse a comma/whitespace separated list of `YYYY-MM-DD` dates.
    pub fn parse(list: &str) -> Result<Self, String> {
        list.split(|c: char| c == ',' || c.is_whitespace())
            .filter(|part| !part.is_empty())
            .map(|part| {
                NaiveDate::parse_from_str(part, "%Y-%m-%d")
                    .map_err(|_| format!("excluded day {:?} must be in YYYY-MM-DD format", part))
            })
            .collect()
    }

    pub fn contains(&self, day: &NaiveDate) -> bool {
        self.0.contains(day)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NaiveDate> {
        self.0.iter()
    }
}

impl FromIterator<NaiveDate> for ExclusionList {
    fn from_iter<I: IntoIterator<Item = NaiveDate>>(iter: I) -> Self {
        ExclusionList(iter.into_iter().collect())
    }
}

/// Drop rows falling on an excluded day. Returns the kept rows and the number dropped.
pub fn exclude_days(rows: Vec<EnrichedRow>, excluded: &ExclusionList) -> (Vec<EnrichedRow>, usize) {
    if excluded.is_empty() {
        return (rows, 0);
    }
    let before = rows.len();
    let kept: Vec<EnrichedRow> = rows
        .into_iter()
        .filter(|row| !excluded.contains(&row.calendar.day))
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}
