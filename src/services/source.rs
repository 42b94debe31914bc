//! Reads the mapped source tables back into `RawTables` for the pipeline.

use chrono_tz::Tz;
use diesel::PgConnection;
use diesel::prelude::*;
use log::debug;
use serde_json::Value;

use crate::db::models::RawSourceRow;
use crate::pipeline::mapping::{ColumnMapping, SourceKind, SourceMappings};
use crate::pipeline::records::{RawRow, RawTable, RawTables};

/// Identifiers are checked by `SourceMappings::validate` before they get here.
fn select_statement(mapping: &ColumnMapping) -> String {
    format!(
        "SELECT t.\"{sid}\"::bigint AS system_id, t.\"{ts}\"::timestamptz AS end_at, to_jsonb(t) AS payload FROM \"{table}\" t",
        sid = mapping.system_id_column,
        ts = mapping.timestamp_column,
        table = mapping.table,
    )
}

/// Typed keys stay typed; only the mapped metric columns are lifted out of
/// the JSON payload. A column absent from the payload stays absent, a null
/// or non-numeric value becomes `None`. The timestamp keeps its offset in
/// `tz`, so the wall clock alone never identifies an interval.
pub fn to_raw_row(row: &RawSourceRow, mapping: &ColumnMapping, tz: Tz) -> RawRow {
    let end_at = row.end_at.map(|ts| ts.with_timezone(&tz).fixed_offset());
    let mut raw = RawRow::at(row.system_id, end_at);
    if let Value::Object(fields) = &row.payload {
        for metric_column in &mapping.metrics {
            if let Some(value) = fields.get(&metric_column.column) {
                raw.columns.insert(metric_column.column.clone(), value.as_f64());
            }
        }
    }
    raw
}

fn read_table(conn: &mut PgConnection, kind: SourceKind, mapping: &ColumnMapping, tz: Tz) -> Result<RawTable, String> {
    let rows: Vec<RawSourceRow> = diesel::sql_query(select_statement(mapping))
        .load(conn)
        .map_err(|e| format!("read {} source table {:?} failed: {}", kind.label(), mapping.table, e))?;
    debug!("Source: {} rows from {}", rows.len(), mapping.table);
    Ok(RawTable::new(rows.iter().map(|row| to_raw_row(row, mapping, tz)).collect()))
}

pub fn read_raw_tables(conn: &mut PgConnection, mappings: &SourceMappings, tz: Tz) -> Result<RawTables, String> {
    mappings.validate()?;
    let mut tables = RawTables::default();
    for kind in SourceKind::JOIN_ORDER {
        *tables.get_mut(kind) = read_table(conn, kind, mappings.get(kind), tz)?;
    }
    Ok(tables)
}
