//! `build_enriched_dataset`: the one entry point of the enrichment pipeline.
//!
//! Stages run in order, each consuming its input fully:
//! reconcile → enrich → exclude days → envelopes → join.

use chrono::{NaiveDate, NaiveDateTime};
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use crate::pipeline::calendar::{EnrichedRow, enrich_all};
use crate::pipeline::envelope::{Envelope, EnvelopeRow, Scope};
use crate::pipeline::error::BuildError;
use crate::pipeline::mapping::{SourceKind, SourceMappings};
use crate::pipeline::outliers::{ExclusionList, exclude_days};
use crate::pipeline::reconcile::reconcile;
use crate::pipeline::records::{MetricKind, RawTables};

/// Explicit inputs besides the raw tables themselves.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineConfig {
    pub sources: SourceMappings,
    pub excluded_days: ExclusionList,
    pub envelope_metric: MetricKind,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            sources: SourceMappings::default(),
            excluded_days: ExclusionList::default(),
            envelope_metric: MetricKind::Produced,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetRow {
    #[serde(flatten)]
    pub row: EnrichedRow,
    pub max_global: Option<f64>,
    pub max_month: Option<f64>,
    pub max_week: Option<f64>,
}

impl DatasetRow {
    pub fn envelope(&self, scope: Scope) -> Option<f64> {
        match scope {
            Scope::Global => self.max_global,
            Scope::Month => self.max_month,
            Scope::Week => self.max_week,
        }
    }

    pub fn metric(&self, kind: MetricKind) -> Option<f64> {
        self.row.metrics.get(kind)
    }
}

/// Enriched rows with all three envelopes joined on. Read-only once built.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichedDataset {
    rows: Vec<DatasetRow>,
    envelope_metric: MetricKind,
    global: Envelope,
    month: Envelope,
    week: Envelope,
}

impl EnrichedDataset {
    /// Rows ordered by (system_id, end_at).
    pub fn rows(&self) -> &[DatasetRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn envelope_metric(&self) -> MetricKind {
        self.envelope_metric
    }

    pub fn envelope(&self, scope: Scope) -> &Envelope {
        match scope {
            Scope::Global => &self.global,
            Scope::Month => &self.month,
            Scope::Week => &self.week,
        }
    }

    pub fn envelope_rows(&self, scope: Scope) -> Vec<EnvelopeRow> {
        self.envelope(scope).rows().collect()
    }

    pub fn days(&self) -> BTreeSet<NaiveDate> {
        self.rows.iter().map(|r| r.row.calendar.day).collect()
    }

    pub fn rows_on(&self, day: NaiveDate) -> impl Iterator<Item = &DatasetRow> {
        self.rows.iter().filter(move |r| r.row.calendar.day == day)
    }

    pub fn time_range(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        let first = self.rows.iter().map(|r| r.row.timestamp).min()?;
        let last = self.rows.iter().map(|r| r.row.timestamp).max()?;
        Some((first, last))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildReport {
    pub input_rows: BTreeMap<SourceKind, usize>,
    pub empty_sources: Vec<SourceKind>,
    pub malformed_records: usize,
    pub duplicate_records: usize,
    pub unmatched_records: usize,
    pub excluded_rows: usize,
    pub output_rows: usize,
    /// Output rows lacking a value, per metric.
    pub null_metrics: BTreeMap<MetricKind, usize>,
    pub envelope_slots: BTreeMap<Scope, usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Build {
    pub dataset: EnrichedDataset,
    pub report: BuildReport,
}

/// Turn the raw source tables into the enriched dataset. Deterministic for
/// identical inputs; either returns a complete dataset or a single error.
pub fn build_enriched_dataset(raw: &RawTables, config: &PipelineConfig) -> Result<Build, BuildError> {
    config.sources.validate().map_err(BuildError::InvalidMapping)?;

    let (reconciled, stats) = reconcile(raw, &config.sources)?;
    let reconciled_len = reconciled.len();

    let enriched = enrich_all(reconciled);
    ensure_len("calendar enricher", reconciled_len, enriched.len())?;

    let (rows, excluded_rows) = exclude_days(enriched, &config.excluded_days);
    ensure_len("outlier filter", reconciled_len - excluded_rows, rows.len())?;

    let metric = config.envelope_metric;
    let global = Envelope::compute(&rows, Scope::Global, metric);
    let month = Envelope::compute(&rows, Scope::Month, metric);
    let week = Envelope::compute(&rows, Scope::Week, metric);

    let joined: Vec<DatasetRow> = rows
        .into_iter()
        .map(|row| DatasetRow {
            max_global: global.value_for(&row.calendar),
            max_month: month.value_for(&row.calendar),
            max_week: week.value_for(&row.calendar),
            row,
        })
        .collect();
    ensure_len("envelope join", reconciled_len - excluded_rows, joined.len())?;

    let null_metrics = MetricKind::ALL
        .into_iter()
        .map(|kind| (kind, joined.iter().filter(|r| r.metric(kind).is_none()).count()))
        .collect();
    let envelope_slots = [(Scope::Global, global.len()), (Scope::Month, month.len()), (Scope::Week, week.len())]
        .into_iter()
        .collect();

    let report = BuildReport {
        input_rows: stats.input_rows,
        empty_sources: stats.empty_sources,
        malformed_records: stats.malformed_records,
        duplicate_records: stats.duplicate_records,
        unmatched_records: stats.unmatched_records,
        excluded_rows,
        output_rows: joined.len(),
        null_metrics,
        envelope_slots,
    };
    debug!(
        "Pipeline: built {} row(s) ({} excluded, {} malformed)",
        report.output_rows, report.excluded_rows, report.malformed_records
    );

    Ok(Build {
        dataset: EnrichedDataset {
            rows: joined,
            envelope_metric: metric,
            global,
            month,
            week,
        },
        report,
    })
}

fn ensure_len(stage: &'static str, expected: usize, actual: usize) -> Result<(), BuildError> {
    if expected == actual {
        Ok(())
    } else {
        Err(BuildError::ShapeMismatch {
            stage,
            expected,
            actual,
        })
    }
}
