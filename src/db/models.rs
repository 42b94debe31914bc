//! Diesel row structs for the five telemetry tables, plus the generic row
//! shape the dataset source reads back.
//!
//! Creating the tables is left to the operator; `schema.rs` mirrors them.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sql_types::{BigInt, Jsonb, Nullable, Timestamptz};
use serde::{Deserialize, Serialize};

use crate::models::enlighten::{
    BatteryInterval, ConsumptionInterval, ExportInterval, ImportInterval, ProductionMeterInterval,
};
use crate::pipeline::records::SystemId;
use crate::schema;

/// Interval end as stored, or `None` if the epoch value is out of range.
pub fn interval_end(epoch_secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(epoch_secs, 0)
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::production_meter)]
pub struct NewProductionMeterInterval {
    pub system_id: i64,
    pub end_at: DateTime<Utc>,
    pub devices_reporting: Option<i32>,
    pub wh_del: Option<f64>,
}

impl NewProductionMeterInterval {
    pub fn from_interval(system_id: SystemId, interval: &ProductionMeterInterval) -> Option<Self> {
        Some(NewProductionMeterInterval {
            system_id: system_id.0,
            end_at: interval_end(interval.end_at)?,
            devices_reporting: interval.devices_reporting,
            wh_del: interval.wh_del,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::consumption)]
pub struct NewConsumptionInterval {
    pub system_id: i64,
    pub end_at: DateTime<Utc>,
    pub devices_reporting: Option<i32>,
    pub enwh: Option<f64>,
}

impl NewConsumptionInterval {
    pub fn from_interval(system_id: SystemId, interval: &ConsumptionInterval) -> Option<Self> {
        Some(NewConsumptionInterval {
            system_id: system_id.0,
            end_at: interval_end(interval.end_at)?,
            devices_reporting: interval.devices_reporting,
            enwh: interval.enwh,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::battery)]
pub struct NewBatteryInterval {
    pub system_id: i64,
    pub end_at: DateTime<Utc>,
    pub charge_enwh: Option<f64>,
    pub charge_devices_reporting: Option<i32>,
    pub discharge_enwh: Option<f64>,
    pub discharge_devices_reporting: Option<i32>,
    pub soc_percent: Option<f64>,
    pub soc_devices_reporting: Option<i32>,
}

impl NewBatteryInterval {
    pub fn from_interval(system_id: SystemId, interval: &BatteryInterval) -> Option<Self> {
        Some(NewBatteryInterval {
            system_id: system_id.0,
            end_at: interval_end(interval.end_at)?,
            charge_enwh: interval.charge.enwh,
            charge_devices_reporting: interval.charge.devices_reporting,
            discharge_enwh: interval.discharge.enwh,
            discharge_devices_reporting: interval.discharge.devices_reporting,
            soc_percent: interval.soc.percent,
            soc_devices_reporting: interval.soc.devices_reporting,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::import)]
pub struct NewImportInterval {
    pub system_id: i64,
    pub end_at: DateTime<Utc>,
    pub wh_imported: Option<f64>,
}

impl NewImportInterval {
    pub fn from_interval(system_id: SystemId, interval: &ImportInterval) -> Option<Self> {
        Some(NewImportInterval {
            system_id: system_id.0,
            end_at: interval_end(interval.end_at)?,
            wh_imported: interval.wh_imported,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Insertable, Serialize, Deserialize)]
#[diesel(table_name = schema::export)]
pub struct NewExportInterval {
    pub system_id: i64,
    pub end_at: DateTime<Utc>,
    pub wh_exported: Option<f64>,
}

impl NewExportInterval {
    pub fn from_interval(system_id: SystemId, interval: &ExportInterval) -> Option<Self> {
        Some(NewExportInterval {
            system_id: system_id.0,
            end_at: interval_end(interval.end_at)?,
            wh_exported: interval.wh_exported,
        })
    }
}

/// One row of any mapped source table: typed key columns plus the whole row
/// as JSON, so metric columns can be picked by name.
#[derive(Debug, Clone, QueryableByName)]
pub struct RawSourceRow {
    #[diesel(sql_type = Nullable<BigInt>)]
    pub system_id: Option<i64>,
    #[diesel(sql_type = Nullable<Timestamptz>)]
    pub end_at: Option<DateTime<Utc>>,
    #[diesel(sql_type = Jsonb)]
    pub payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enlighten::{BatteryFlow, BatteryStateOfCharge};

    #[test]
    fn battery_interval_flattens_sub_objects() {
        let interval = BatteryInterval {
            end_at: 1685570400,
            charge: BatteryFlow {
                enwh: Some(120.0),
                devices_reporting: Some(2),
            },
            discharge: BatteryFlow::default(),
            soc: BatteryStateOfCharge {
                percent: Some(48.0),
                devices_reporting: Some(2),
            },
        };
        let row = NewBatteryInterval::from_interval(SystemId(9), &interval).unwrap();
        assert_eq!(row.system_id, 9);
        assert_eq!(row.end_at.to_rfc3339(), "2023-05-31T22:00:00+00:00");
        assert_eq!(row.charge_enwh, Some(120.0));
        assert_eq!(row.discharge_enwh, None);
        assert_eq!(row.soc_percent, Some(48.0));
    }

    #[test]
    fn out_of_range_end_is_rejected() {
        let interval = ImportInterval {
            end_at: i64::MAX,
            wh_imported: Some(1.0),
        };
        assert!(NewImportInterval::from_interval(SystemId(1), &interval).is_none());
    }
}
