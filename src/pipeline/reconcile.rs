//! Merge the five source tables into one row per (system, timestamp).
//!
//! Import timestamps form the backbone. Every other source is left-joined
//! onto it, so a source can add values but never rows. Records that fail
//! validation are skipped and counted; only an unusable backbone fails.
//! Keys compare instants, not wall clocks, so a DST fall-back hour keeps
//! both of its intervals.

use chrono::{DateTime, FixedOffset};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::pipeline::error::BuildError;
use crate::pipeline::mapping::{ColumnMapping, SourceKind, SourceMappings};
use crate::pipeline::records::{IntervalRecord, MetricValues, RawTable, RawTables, SystemId};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconciledRow {
    pub system_id: SystemId,
    pub end_at: DateTime<FixedOffset>,
    pub metrics: MetricValues,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileStats {
    pub input_rows: BTreeMap<SourceKind, usize>,
    pub empty_sources: Vec<SourceKind>,
    /// Rows without a key plus metric values that were null or not finite.
    pub malformed_records: usize,
    /// Records whose (key, metric) slot was already filled; the first one wins.
    pub duplicate_records: usize,
    /// Records from joined sources whose key is not on the backbone.
    pub unmatched_records: usize,
}

type RowKey = (SystemId, DateTime<FixedOffset>);

struct ValidatedRow {
    key: RowKey,
    records: Vec<IntervalRecord>,
}

pub fn reconcile(
    raw: &RawTables,
    sources: &SourceMappings,
) -> Result<(Vec<ReconciledRow>, ReconcileStats), BuildError> {
    let mut stats = ReconcileStats::default();
    let mut merged: BTreeMap<RowKey, MetricValues> = BTreeMap::new();

    for kind in SourceKind::JOIN_ORDER {
        let table = raw.get(kind);
        let mapping = sources.get(kind);
        stats.input_rows.insert(kind, table.len());

        if table.is_empty() {
            stats.empty_sources.push(kind);
            if kind == SourceKind::BACKBONE {
                return Err(BuildError::MissingBackbone {
                    table: mapping.table.clone(),
                });
            }
            warn!("Reconcile: {} source is empty; its metrics will be null", kind.label());
            continue;
        }

        ensure_columns_present(kind, table, mapping)?;
        let rows = validate_table(table, mapping, &mut stats);

        if kind == SourceKind::BACKBONE {
            for row in &rows {
                merged.entry(row.key).or_default();
            }
            if merged.is_empty() {
                return Err(BuildError::MissingBackbone {
                    table: mapping.table.clone(),
                });
            }
        }

        let mut joined = 0usize;
        for row in rows {
            let Some(values) = merged.get_mut(&row.key) else {
                stats.unmatched_records += row.records.len();
                continue;
            };
            for record in row.records {
                if values.fill(record.metric, record.value) {
                    joined += 1;
                } else {
                    stats.duplicate_records += 1;
                }
            }
        }
        debug!("Reconcile: {} source contributed {} value(s)", kind.label(), joined);
    }

    let rows = merged
        .into_iter()
        .map(|((system_id, end_at), metrics)| ReconciledRow {
            system_id,
            end_at,
            metrics,
        })
        .collect();
    Ok((rows, stats))
}

/// A mapped column that no row carries points at a naming mismatch between
/// ingestion and mapping, not at missing data.
fn ensure_columns_present(kind: SourceKind, table: &RawTable, mapping: &ColumnMapping) -> Result<(), BuildError> {
    for metric_column in &mapping.metrics {
        let present = table
            .rows
            .iter()
            .any(|row| row.columns.contains_key(&metric_column.column));
        if !present {
            return Err(BuildError::UnmappedColumn {
                source: kind,
                column: metric_column.column.clone(),
            });
        }
    }
    Ok(())
}

fn validate_table(table: &RawTable, mapping: &ColumnMapping, stats: &mut ReconcileStats) -> Vec<ValidatedRow> {
    let mut out = Vec::with_capacity(table.len());
    for row in &table.rows {
        let (Some(system_id), Some(end_at)) = (row.system_id, row.end_at) else {
            stats.malformed_records += 1;
            continue;
        };
        let system_id = SystemId(system_id);

        let mut records = Vec::with_capacity(mapping.metrics.len());
        for metric_column in &mapping.metrics {
            match row.columns.get(&metric_column.column).copied().flatten() {
                Some(value) if value.is_finite() => {
                    records.push(IntervalRecord::from_source(
                        system_id,
                        end_at,
                        metric_column.metric,
                        value,
                    ));
                }
                _ => stats.malformed_records += 1,
            }
        }
        out.push(ValidatedRow {
            key: (system_id, end_at),
            records,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::records::{MetricKind, RawRow};
    use chrono::{NaiveDate, NaiveDateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2023, 6, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn import_row(ts: NaiveDateTime, wh: f64) -> RawRow {
        RawRow::new(Some(7), Some(ts)).with("wh_imported", Some(wh))
    }

    fn base_tables() -> RawTables {
        RawTables {
            import: RawTable::new(vec![import_row(at(1, 12, 0), 10.0), import_row(at(1, 12, 15), 12.0)]),
            export: RawTable::new(vec![RawRow::new(Some(7), Some(at(1, 12, 0))).with("wh_exported", Some(40.0))]),
            production: RawTable::new(vec![
                RawRow::new(Some(7), Some(at(1, 12, 0))).with("wh_del", Some(300.0)),
                RawRow::new(Some(7), Some(at(1, 12, 15))).with("wh_del", Some(0.0)),
            ]),
            consumption: RawTable::new(vec![RawRow::new(Some(7), Some(at(1, 12, 15))).with("enwh", Some(150.0))]),
            battery: RawTable::default(),
        }
    }

    #[test]
    fn negates_consumption_and_export() {
        let (rows, _) = reconcile(&base_tables(), &SourceMappings::default()).unwrap();
        assert_eq!(rows[0].metrics.exported, Some(-40.0));
        assert_eq!(rows[1].metrics.consumed, Some(-150.0));
        assert_eq!(rows[1].metrics.produced, Some(0.0));
    }

    #[test]
    fn output_keys_match_backbone_exactly() {
        let mut tables = base_tables();
        // Production has an interval the backbone does not know about.
        tables
            .production
            .rows
            .push(RawRow::new(Some(7), Some(at(1, 12, 30))).with("wh_del", Some(280.0)));

        let (rows, stats) = reconcile(&tables, &SourceMappings::default()).unwrap();
        let keys: Vec<_> = rows.iter().map(|r| (r.system_id, r.end_at.naive_local())).collect();
        assert_eq!(keys, vec![(SystemId(7), at(1, 12, 0)), (SystemId(7), at(1, 12, 15))]);
        assert_eq!(stats.unmatched_records, 1);
    }

    #[test]
    fn missing_matches_stay_null() {
        let (rows, _) = reconcile(&base_tables(), &SourceMappings::default()).unwrap();
        assert_eq!(rows[0].metrics.consumed, None);
        assert_eq!(rows[1].metrics.exported, None);
        assert_eq!(rows[0].metrics.charged, None);
    }

    #[test]
    fn empty_backbone_fails() {
        let mut tables = base_tables();
        tables.import = RawTable::default();
        let err = reconcile(&tables, &SourceMappings::default()).unwrap_err();
        assert_eq!(
            err,
            BuildError::MissingBackbone {
                table: "import".to_string()
            }
        );
    }

    #[test]
    fn backbone_without_keys_fails() {
        let mut tables = base_tables();
        tables.import = RawTable::new(vec![RawRow::new(None, Some(at(1, 12, 0))).with("wh_imported", Some(1.0))]);
        assert!(matches!(
            reconcile(&tables, &SourceMappings::default()),
            Err(BuildError::MissingBackbone { .. })
        ));
    }

    #[test]
    fn malformed_records_are_skipped_and_counted() {
        let mut tables = base_tables();
        tables.production.rows.push(RawRow::new(Some(7), None).with("wh_del", Some(1.0)));
        tables.consumption.rows.push(RawRow::new(Some(7), Some(at(1, 12, 0))).with("enwh", None));
        tables
            .export
            .rows
            .push(RawRow::new(Some(7), Some(at(1, 12, 15))).with("wh_exported", Some(f64::NAN)));

        let (rows, stats) = reconcile(&tables, &SourceMappings::default()).unwrap();
        assert_eq!(stats.malformed_records, 3);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].metrics.consumed, None);
        assert_eq!(rows[1].metrics.exported, None);
    }

    #[test]
    fn duplicates_keep_first_value() {
        let mut tables = base_tables();
        tables
            .production
            .rows
            .push(RawRow::new(Some(7), Some(at(1, 12, 0))).with("wh_del", Some(999.0)));
        let (rows, stats) = reconcile(&tables, &SourceMappings::default()).unwrap();
        assert_eq!(rows[0].metrics.produced, Some(300.0));
        assert_eq!(stats.duplicate_records, 1);
    }

    #[test]
    fn battery_columns_join_when_present() {
        let mut tables = base_tables();
        tables.battery = RawTable::new(vec![
            RawRow::new(Some(7), Some(at(1, 12, 15)))
                .with("charge_enwh", Some(80.0))
                .with("discharge_enwh", Some(0.0))
                .with("soc_percent", Some(64.0)),
        ]);
        let (rows, _) = reconcile(&tables, &SourceMappings::default()).unwrap();
        assert_eq!(rows[1].metrics.get(MetricKind::Charged), Some(80.0));
        assert_eq!(rows[1].metrics.get(MetricKind::Discharged), Some(0.0));
        assert_eq!(rows[1].metrics.get(MetricKind::ChargePercent), Some(64.0));
    }

    #[test]
    fn unknown_column_fails_loudly() {
        let mut tables = base_tables();
        tables.consumption = RawTable::new(vec![RawRow::new(Some(7), Some(at(1, 12, 0))).with("consumed_wh", Some(1.0))]);
        let err = reconcile(&tables, &SourceMappings::default()).unwrap_err();
        assert_eq!(
            err,
            BuildError::UnmappedColumn {
                source: SourceKind::Consumption,
                column: "enwh".to_string()
            }
        );
    }

    #[test]
    fn systems_are_kept_apart() {
        let mut tables = base_tables();
        tables.import.rows.push(RawRow::new(Some(8), Some(at(1, 12, 0))).with("wh_imported", Some(3.0)));
        let (rows, _) = reconcile(&tables, &SourceMappings::default()).unwrap();
        assert_eq!(rows.len(), 3);
        let other = rows.iter().find(|r| r.system_id == SystemId(8)).unwrap();
        assert_eq!(other.metrics.produced, None);
        assert_eq!(other.metrics.imported, Some(3.0));
    }

    #[test]
    fn fall_back_hour_keeps_both_intervals() {
        // 02:15 local happens twice on 2023-10-29 in Zurich: 00:15Z (CEST) and 01:15Z (CET).
        let local = |hour: u32| {
            Utc.with_ymd_and_hms(2023, 10, 29, hour, 15, 0)
                .unwrap()
                .with_timezone(&chrono_tz::Europe::Zurich)
                .fixed_offset()
        };
        let tables = RawTables {
            import: RawTable::new(vec![
                RawRow::at(Some(7), Some(local(0))).with("wh_imported", Some(10.0)),
                RawRow::at(Some(7), Some(local(1))).with("wh_imported", Some(99.0)),
            ]),
            production: RawTable::new(vec![RawRow::at(Some(7), Some(local(1))).with("wh_del", Some(5.0))]),
            ..RawTables::default()
        };

        let (rows, stats) = reconcile(&tables, &SourceMappings::default()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(stats.duplicate_records, 0);
        assert_eq!(rows[0].end_at.naive_local(), rows[1].end_at.naive_local());
        assert_eq!(rows[0].metrics.imported, Some(10.0));
        assert_eq!(rows[0].metrics.produced, None);
        assert_eq!(rows[1].metrics.imported, Some(99.0));
        assert_eq!(rows[1].metrics.produced, Some(5.0));
    }
}
