//! Typed records flowing into the enrichment pipeline.
//!
//! Raw tables arrive with metric columns addressed by their source column
//! name. The reconciler turns them into `IntervalRecord`s tagged with a
//! `MetricKind`, so nothing downstream deals with string-named columns.

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::pipeline::mapping::SourceKind;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemId(pub i64);

impl Display for SystemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Produced,
    Consumed,
    Imported,
    Exported,
    Charged,
    Discharged,
    ChargePercent,
}

impl MetricKind {
    pub const ALL: [MetricKind; 7] = [
        MetricKind::Produced,
        MetricKind::Consumed,
        MetricKind::Imported,
        MetricKind::Exported,
        MetricKind::Charged,
        MetricKind::Discharged,
        MetricKind::ChargePercent,
    ];

    /// Energy flows, i.e. every metric measured in watt-hours.
    pub const FLOWS: [MetricKind; 6] = [
        MetricKind::Produced,
        MetricKind::Consumed,
        MetricKind::Imported,
        MetricKind::Exported,
        MetricKind::Charged,
        MetricKind::Discharged,
    ];

    pub fn label(self) -> &'static str {
        match self {
            MetricKind::Produced => "Produced",
            MetricKind::Consumed => "Consumed",
            MetricKind::Imported => "Imported",
            MetricKind::Exported => "Exported",
            MetricKind::Charged => "Charged",
            MetricKind::Discharged => "Discharged",
            MetricKind::ChargePercent => "Charged (Pct)",
        }
    }

    /// Outflows relative to the household carry a negative sign.
    pub fn is_outflow(self) -> bool {
        matches!(self, MetricKind::Consumed | MetricKind::Exported)
    }
}

impl Display for MetricKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        MetricKind::ALL
            .into_iter()
            .find(|kind| {
                kind.label().eq_ignore_ascii_case(wanted) || format!("{:?}", kind).eq_ignore_ascii_case(wanted)
            })
            .ok_or_else(|| format!("unknown metric kind: {}", wanted))
    }
}

/// One validated observation of one metric, with the sign convention applied.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct IntervalRecord {
    pub system_id: SystemId,
    pub end_at: DateTime<FixedOffset>,
    pub metric: MetricKind,
    pub value: f64,
}

impl IntervalRecord {
    /// Build a record from a source magnitude, negating outflows.
    pub fn from_source(system_id: SystemId, end_at: DateTime<FixedOffset>, metric: MetricKind, magnitude: f64) -> Self {
        let value = if metric.is_outflow() { -magnitude } else { magnitude };
        IntervalRecord {
            system_id,
            end_at,
            metric,
            value,
        }
    }
}

/// One optional value per metric kind. `None` means "no reading", which is
/// distinct from a reading of zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MetricValues {
    pub produced: Option<f64>,
    pub consumed: Option<f64>,
    pub imported: Option<f64>,
    pub exported: Option<f64>,
    pub charged: Option<f64>,
    pub discharged: Option<f64>,
    pub charge_percent: Option<f64>,
}

impl MetricValues {
    pub fn get(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Produced => self.produced,
            MetricKind::Consumed => self.consumed,
            MetricKind::Imported => self.imported,
            MetricKind::Exported => self.exported,
            MetricKind::Charged => self.charged,
            MetricKind::Discharged => self.discharged,
            MetricKind::ChargePercent => self.charge_percent,
        }
    }

    fn slot_mut(&mut self, kind: MetricKind) -> &mut Option<f64> {
        match kind {
            MetricKind::Produced => &mut self.produced,
            MetricKind::Consumed => &mut self.consumed,
            MetricKind::Imported => &mut self.imported,
            MetricKind::Exported => &mut self.exported,
            MetricKind::Charged => &mut self.charged,
            MetricKind::Discharged => &mut self.discharged,
            MetricKind::ChargePercent => &mut self.charge_percent,
        }
    }

    /// Store a value if the slot is empty. Returns `false` when the slot was
    /// already occupied, leaving the first value in place.
    pub fn fill(&mut self, kind: MetricKind, value: f64) -> bool {
        let slot = self.slot_mut(kind);
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        true
    }
}

/// A row as read from a source table: typed key columns, numeric columns by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub system_id: Option<i64>,
    /// End of interval in source-local time. The offset keeps the repeated
    /// wall-clock hour of a DST fall-back apart.
    pub end_at: Option<DateTime<FixedOffset>>,
    pub columns: BTreeMap<String, Option<f64>>,
}

impl RawRow {
    /// A row whose timestamp is UTC wall-clock time.
    pub fn new(system_id: Option<i64>, timestamp: Option<NaiveDateTime>) -> Self {
        RawRow::at(system_id, timestamp.map(|ts| ts.and_utc().fixed_offset()))
    }

    pub fn at(system_id: Option<i64>, end_at: Option<DateTime<FixedOffset>>) -> Self {
        RawRow {
            system_id,
            end_at,
            columns: BTreeMap::new(),
        }
    }

    pub fn with(mut self, column: &str, value: Option<f64>) -> Self {
        self.columns.insert(column.to_string(), value);
        self
    }
}

impl Hash for RawRow {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.system_id.hash(state);
        self.end_at
            .map(|ts| (ts.naive_utc(), ts.offset().local_minus_utc()))
            .hash(state);
        for (name, value) in &self.columns {
            name.hash(state);
            value.map(f64::to_bits).hash(state);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Hash)]
pub struct RawTable {
    pub rows: Vec<RawRow>,
}

impl RawTable {
    pub fn new(rows: Vec<RawRow>) -> Self {
        RawTable { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// The five source tables supplied by the ingestion side.
#[derive(Debug, Clone, Default, PartialEq, Hash)]
pub struct RawTables {
    pub import: RawTable,
    pub export: RawTable,
    pub production: RawTable,
    pub consumption: RawTable,
    pub battery: RawTable,
}

impl RawTables {
    pub fn get(&self, kind: SourceKind) -> &RawTable {
        match kind {
            SourceKind::Import => &self.import,
            SourceKind::Export => &self.export,
            SourceKind::Production => &self.production,
            SourceKind::Consumption => &self.consumption,
            SourceKind::Battery => &self.battery,
        }
    }

    pub fn get_mut(&mut self, kind: SourceKind) -> &mut RawTable {
        match kind {
            SourceKind::Import => &mut self.import,
            SourceKind::Export => &mut self.export,
            SourceKind::Production => &mut self.production,
            SourceKind::Consumption => &mut self.consumption,
            SourceKind::Battery => &mut self.battery,
        }
    }

    pub fn total_rows(&self) -> usize {
        SourceKind::JOIN_ORDER.iter().map(|kind| self.get(*kind).len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, 1)
            .unwrap()
            .and_hms_opt(12, 15, 0)
            .unwrap()
    }

    #[test]
    fn outflows_are_negated() {
        for kind in MetricKind::ALL {
            let rec = IntervalRecord::from_source(SystemId(1), ts().and_utc().fixed_offset(), kind, 250.0);
            if matches!(kind, MetricKind::Consumed | MetricKind::Exported) {
                assert_eq!(rec.value, -250.0);
            } else {
                assert_eq!(rec.value, 250.0);
            }
        }
    }

    #[test]
    fn zero_reading_is_kept_distinct_from_missing() {
        let mut values = MetricValues::default();
        assert!(values.fill(MetricKind::Produced, 0.0));
        assert_eq!(values.get(MetricKind::Produced), Some(0.0));
        assert_eq!(values.get(MetricKind::Consumed), None);
    }

    #[test]
    fn fill_keeps_first_value() {
        let mut values = MetricValues::default();
        assert!(values.fill(MetricKind::Imported, 10.0));
        assert!(!values.fill(MetricKind::Imported, 20.0));
        assert_eq!(values.imported, Some(10.0));
    }

    #[test]
    fn metric_kind_parses_labels_and_names() {
        assert_eq!("Produced".parse::<MetricKind>(), Ok(MetricKind::Produced));
        assert_eq!("charged (pct)".parse::<MetricKind>(), Ok(MetricKind::ChargePercent));
        assert_eq!("chargepercent".parse::<MetricKind>(), Ok(MetricKind::ChargePercent));
        assert!("Voltage".parse::<MetricKind>().is_err());
    }
}
