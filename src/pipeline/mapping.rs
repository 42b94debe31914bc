//! Column-name mapping per source table.
//!
//! Keeps ingestion-side naming out of the pipeline: a mapping says which
//! table a source lives in, which columns carry the key, and which numeric
//! columns map onto which `MetricKind`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::pipeline::records::MetricKind;
use crate::utils::is_sql_identifier;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Import,
    Export,
    Production,
    Consumption,
    Battery,
}

impl SourceKind {
    /// The source whose timestamps anchor the merge.
    pub const BACKBONE: SourceKind = SourceKind::Import;

    /// Backbone first, then the left-joined sources.
    pub const JOIN_ORDER: [SourceKind; 5] = [
        SourceKind::Import,
        SourceKind::Export,
        SourceKind::Production,
        SourceKind::Consumption,
        SourceKind::Battery,
    ];

    pub fn label(self) -> &'static str {
        match self {
            SourceKind::Import => "import",
            SourceKind::Export => "export",
            SourceKind::Production => "production",
            SourceKind::Consumption => "consumption",
            SourceKind::Battery => "battery",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricColumn {
    pub column: String,
    pub metric: MetricKind,
}

impl MetricColumn {
    pub fn new(column: &str, metric: MetricKind) -> Self {
        MetricColumn {
            column: column.to_string(),
            metric,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ColumnMapping {
    pub table: String,
    #[serde(default = "default_system_id_column")]
    pub system_id_column: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    pub metrics: Vec<MetricColumn>,
}

fn default_system_id_column() -> String {
    "system_id".to_string()
}

fn default_timestamp_column() -> String {
    "end_at".to_string()
}

impl ColumnMapping {
    pub fn new(table: &str, metrics: Vec<MetricColumn>) -> Self {
        ColumnMapping {
            table: table.to_string(),
            system_id_column: default_system_id_column(),
            timestamp_column: default_timestamp_column(),
            metrics,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceMappings {
    pub import: ColumnMapping,
    pub export: ColumnMapping,
    pub production: ColumnMapping,
    pub consumption: ColumnMapping,
    pub battery: ColumnMapping,
}

impl Default for SourceMappings {
    fn default() -> Self {
        SourceMappings {
            import: ColumnMapping::new("import", vec![MetricColumn::new("wh_imported", MetricKind::Imported)]),
            export: ColumnMapping::new("export", vec![MetricColumn::new("wh_exported", MetricKind::Exported)]),
            production: ColumnMapping::new(
                "production_meter",
                vec![MetricColumn::new("wh_del", MetricKind::Produced)],
            ),
            consumption: ColumnMapping::new("consumption", vec![MetricColumn::new("enwh", MetricKind::Consumed)]),
            battery: ColumnMapping::new(
                "battery",
                vec![
                    MetricColumn::new("charge_enwh", MetricKind::Charged),
                    MetricColumn::new("discharge_enwh", MetricKind::Discharged),
                    MetricColumn::new("soc_percent", MetricKind::ChargePercent),
                ],
            ),
        }
    }
}

impl SourceMappings {
    pub fn get(&self, kind: SourceKind) -> &ColumnMapping {
        match kind {
            SourceKind::Import => &self.import,
            SourceKind::Export => &self.export,
            SourceKind::Production => &self.production,
            SourceKind::Consumption => &self.consumption,
            SourceKind::Battery => &self.battery,
        }
    }

    /// Parse a JSON mapping document, reporting the path of the offending field.
    pub fn from_json_str(json: &str) -> Result<Self, String> {
        let mut de = serde_json::Deserializer::from_str(json);
        let mappings: SourceMappings =
            serde_path_to_error::deserialize(&mut de).map_err(|e| format!("invalid source mapping: {}", e))?;
        mappings.validate()?;
        Ok(mappings)
    }

    /// Every identifier must be a plain SQL name and each metric kind may be
    /// fed by one source column only.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        for kind in SourceKind::JOIN_ORDER {
            let mapping = self.get(kind);
            for ident in [&mapping.table, &mapping.system_id_column, &mapping.timestamp_column] {
                if !is_sql_identifier(ident) {
                    return Err(format!("{} mapping: invalid identifier {:?}", kind.label(), ident));
                }
            }
            for metric_column in &mapping.metrics {
                if !is_sql_identifier(&metric_column.column) {
                    return Err(format!(
                        "{} mapping: invalid column name {:?}",
                        kind.label(),
                        metric_column.column
                    ));
                }
                if !seen.insert(metric_column.metric) {
                    return Err(format!(
                        "{} mapping: metric {} is already mapped by another column",
                        kind.label(),
                        metric_column.metric
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_mapping_is_valid() {
        SourceMappings::default().validate().expect("default mapping validates");
    }

    #[test]
    fn rejects_metric_mapped_twice() {
        let mut mappings = SourceMappings::default();
        mappings
            .battery
            .metrics
            .push(MetricColumn::new("wh_del", MetricKind::Produced));
        let err = mappings.validate().unwrap_err();
        assert!(err.contains("Produced"), "{}", err);
    }

    #[test]
    fn rejects_injection_in_table_name() {
        let mut mappings = SourceMappings::default();
        mappings.import.table = "import; drop table import".to_string();
        assert!(mappings.validate().is_err());
    }

    #[test]
    fn parses_json_with_default_key_columns() {
        let json = r#"{
            "import": {"table": "grid_in", "metrics": [{"column": "wh", "metric": "Imported"}]},
            "export": {"table": "grid_out", "metrics": [{"column": "wh", "metric": "Exported"}]},
            "production": {"table": "production_micro", "metrics": [{"column": "enwh", "metric": "Produced"}]},
            "consumption": {"table": "consumption", "metrics": [{"column": "enwh", "metric": "Consumed"}]},
            "battery": {"table": "battery", "timestamp_column": "ts", "metrics": []}
        }"#;
        let mappings = SourceMappings::from_json_str(json).expect("parse mapping");
        assert_eq!(mappings.import.table, "grid_in");
        assert_eq!(mappings.import.timestamp_column, "end_at");
        assert_eq!(mappings.battery.timestamp_column, "ts");
        assert!(mappings.battery.metrics.is_empty());
    }

    #[test]
    fn json_errors_name_the_field_path() {
        let json = r#"{
            "import": {"table": "import", "metrics": [{"column": "wh", "metric": "Voltage"}]}
        }"#;
        let err = SourceMappings::from_json_str(json).unwrap_err();
        assert!(err.contains("import.metrics[0].metric"), "{}", err);
    }
}
