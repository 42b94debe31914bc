//! Wire types for the subset of the Enlighten v4 monitoring API we consume.
//!
//! Telemetry endpoints share an envelope (`system_id`, `granularity`,
//! `intervals`, ...) around an endpoint-specific interval record. Import and
//! export telemetry nest their intervals one level deeper (a list of lists);
//! both shapes are accepted and flattened on decode.
//!
//! Timestamps on the wire are epoch seconds.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::pipeline::records::SystemId;

// =====================
// Systems
// =====================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemsPage {
    pub total: Option<i64>,
    pub current_page: Option<i64>,
    pub size: Option<i64>,
    pub count: Option<i64>,
    pub items: Option<String>,
    #[serde(default)]
    pub systems: Vec<System>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub system_id: SystemId,
    pub name: Option<String>,
    pub public_name: Option<String>,
    pub timezone: Option<String>,
    pub address: Option<SystemAddress>,
    pub connection_type: Option<String>,
    pub energy_lifetime: Option<i64>,
    pub energy_today: Option<i64>,
    pub system_size: Option<f64>,
    pub status: Option<String>,
    pub last_report_at: Option<i64>,
    pub last_energy_at: Option<i64>,
    pub operational_at: Option<i64>,
    pub attachment_type: Option<String>,
    pub interconnect_date: Option<String>,
    pub other_references: Option<Vec<String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SystemAddress {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
}

// =====================
// Telemetry
// =====================

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    #[serde(rename = "15mins")]
    FifteenMinutes,
    Day,
    Week,
}

impl Granularity {
    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::FifteenMinutes => "15mins",
            Granularity::Day => "day",
            Granularity::Week => "week",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TelemetryMeta {
    pub status: Option<String>,
    pub last_report_at: Option<i64>,
    pub last_energy_at: Option<i64>,
    pub operational_at: Option<i64>,
}

/// Common envelope of every telemetry response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct TelemetryResponse<T> {
    pub system_id: Option<SystemId>,
    pub granularity: Option<String>,
    pub total_devices: Option<i64>,
    pub start_at: Option<i64>,
    pub end_at: Option<i64>,
    pub start_date: Option<String>,
    pub items: Option<String>,
    pub meta: Option<TelemetryMeta>,
    #[serde(default, deserialize_with = "flatten_intervals")]
    pub intervals: Vec<T>,
}

/// Accepts `[i, i, ...]` as well as `[[i, i], [i], ...]`.
fn flatten_intervals<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged, bound(deserialize = "T: Deserialize<'de>"))]
    enum Entry<T> {
        Nested(Vec<T>),
        Flat(T),
    }

    let entries: Option<Vec<Entry<T>>> = Option::deserialize(deserializer)?;
    let mut out = Vec::new();
    for entry in entries.unwrap_or_default() {
        match entry {
            Entry::Nested(list) => out.extend(list),
            Entry::Flat(item) => out.push(item),
        }
    }
    Ok(out)
}

pub trait TelemetryInterval {
    /// Interval end, epoch seconds.
    fn end_at(&self) -> i64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionMeterInterval {
    pub end_at: i64,
    pub devices_reporting: Option<i32>,
    pub wh_del: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionInterval {
    pub end_at: i64,
    pub devices_reporting: Option<i32>,
    pub enwh: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BatteryFlow {
    pub enwh: Option<f64>,
    pub devices_reporting: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct BatteryStateOfCharge {
    pub percent: Option<f64>,
    pub devices_reporting: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryInterval {
    pub end_at: i64,
    #[serde(default)]
    pub charge: BatteryFlow,
    #[serde(default)]
    pub discharge: BatteryFlow,
    #[serde(default)]
    pub soc: BatteryStateOfCharge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportInterval {
    pub end_at: i64,
    pub wh_imported: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportInterval {
    pub end_at: i64,
    pub wh_exported: Option<f64>,
}

macro_rules! impl_telemetry_interval {
    ($($ty:ty),+ $(,)?) => {
        $(impl TelemetryInterval for $ty {
            fn end_at(&self) -> i64 {
                self.end_at
            }
        })+
    };
}

impl_telemetry_interval!(
    ProductionMeterInterval,
    ConsumptionInterval,
    BatteryInterval,
    ImportInterval,
    ExportInterval,
);

pub type ProductionMeterTelemetry = TelemetryResponse<ProductionMeterInterval>;
pub type ConsumptionTelemetry = TelemetryResponse<ConsumptionInterval>;
pub type BatteryTelemetry = TelemetryResponse<BatteryInterval>;
pub type ImportTelemetry = TelemetryResponse<ImportInterval>;
pub type ExportTelemetry = TelemetryResponse<ExportInterval>;

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> String {
        std::fs::read_to_string(format!("tests/data/{}", name)).expect("fixture present")
    }

    #[test]
    fn decodes_nested_import_intervals() {
        let resp: ImportTelemetry = serde_json::from_str(&fixture("import-telemetry.json")).expect("parse import");
        assert_eq!(resp.system_id, Some(SystemId(2875)));
        assert_eq!(resp.intervals.len(), 5);
        assert_eq!(resp.intervals[0].end_at, 1685570400);
        assert_eq!(resp.intervals[4].wh_imported, Some(0.0));
        let ends: Vec<i64> = resp.intervals.iter().map(TelemetryInterval::end_at).collect();
        assert!(ends.windows(2).all(|w| w[1] - w[0] == 900));
    }

    #[test]
    fn decodes_battery_sub_objects() {
        let resp: BatteryTelemetry = serde_json::from_str(&fixture("battery-telemetry.json")).expect("parse battery");
        assert_eq!(resp.granularity.as_deref(), Some("week"));
        assert_eq!(resp.intervals.len(), 3);
        let first = &resp.intervals[0];
        assert_eq!(first.charge.enwh, Some(120.0));
        assert_eq!(first.discharge.enwh, Some(0.0));
        assert_eq!(first.soc.percent, Some(48.0));
        // Missing sub-objects decode to empty flows.
        assert_eq!(resp.intervals[2].charge, BatteryFlow::default());
    }

    #[test]
    fn decodes_flat_production_intervals() {
        let json = r#"{
            "system_id": 2875,
            "granularity": "week",
            "total_devices": 1,
            "start_at": 1685570400,
            "end_at": 1685571300,
            "items": "intervals",
            "intervals": [
                {"end_at": 1685571300, "devices_reporting": 1, "wh_del": 412},
                {"end_at": 1685572200, "devices_reporting": 1, "wh_del": null}
            ]
        }"#;
        let resp: ProductionMeterTelemetry = serde_json::from_str(json).expect("parse production");
        assert_eq!(resp.intervals.len(), 2);
        assert_eq!(resp.intervals[0].wh_del, Some(412.0));
        assert_eq!(resp.intervals[1].wh_del, None);
    }

    #[test]
    fn missing_intervals_decode_empty() {
        let resp: ConsumptionTelemetry =
            serde_json::from_str(r#"{"system_id": 1, "intervals": null}"#).expect("parse consumption");
        assert!(resp.intervals.is_empty());
    }

    #[test]
    fn decodes_systems_page_keeping_unknown_fields() {
        let json = r#"{
            "total": 1, "current_page": 1, "size": 10, "count": 1, "items": "systems",
            "systems": [{
                "system_id": 2875, "name": "Rooftop", "timezone": "Europe/Zurich",
                "address": {"city": "Bern", "country": "CH", "postal_code": "3000"},
                "status": "normal", "battery_charge_w": 3000
            }]
        }"#;
        let page: SystemsPage = serde_json::from_str(json).expect("parse systems");
        let system = &page.systems[0];
        assert_eq!(system.system_id, SystemId(2875));
        assert_eq!(system.timezone.as_deref(), Some("Europe/Zurich"));
        assert!(system.extra.contains_key("battery_charge_w"));
    }
}
