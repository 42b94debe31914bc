use crate::db::models::{
    NewBatteryInterval, NewConsumptionInterval, NewExportInterval, NewImportInterval, NewProductionMeterInterval,
};
use crate::pipeline::records::SystemId;
use crate::services::ingest;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc, Weekday};
use diesel::PgConnection;
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

pub const FAKE_SYSTEM_ID: SystemId = SystemId(4_201_337);
const HISTORY_DAYS: i64 = 120;
const STEP_MINUTES: i64 = 15;
const SEED: u64 = 0x0420_1337_50DA_BEEF;

/// Peak production of one 15-minute interval on a clear June noon.
const PEAK_WH: f64 = 1_600.0;
const BATTERY_CAPACITY_WH: f64 = 10_000.0;
/// Most a battery moves in one interval (5 kW for 15 minutes).
const BATTERY_STEP_WH: f64 = 1_250.0;

/// One synthetic interval across all five streams.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub produced: f64,
    pub consumed: f64,
    pub charged: f64,
    pub discharged: f64,
    pub soc_percent: f64,
    pub imported: f64,
    pub exported: f64,
}

/// Deterministic generator: same seed and timestamps, same samples.
pub struct Generator {
    rng: SmallRng,
    stored_wh: f64,
    /// Cloudiness, drawn once per day.
    cloud: Option<(NaiveDate, f64)>,
}

impl Generator {
    pub fn new(seed: u64) -> Self {
        Generator {
            rng: SmallRng::seed_from_u64(seed),
            stored_wh: BATTERY_CAPACITY_WH * 0.5,
            cloud: None,
        }
    }

    pub fn sample_at(&mut self, end_at: DateTime<Utc>) -> Sample {
        let day = end_at.date_naive();
        let cloud_factor = match self.cloud {
            Some((cloud_day, factor)) if cloud_day == day => factor,
            _ => {
                let factor = self.rng.random_range(0.25..=0.98);
                self.cloud = Some((day, factor));
                factor
            }
        };
        let day_fraction = end_at.time().num_seconds_from_midnight() as f64 / 86_400.0;
        let annual_fraction = end_at.ordinal0() as f64 / 365.0;

        let produced = self.production(day_fraction, annual_fraction, cloud_factor);
        let consumed = self.consumption(day_fraction, end_at.weekday());

        let mut surplus = produced - consumed;
        let (mut charged, mut discharged) = (0.0, 0.0);
        if surplus > 0.0 {
            charged = surplus.min(BATTERY_STEP_WH).min(BATTERY_CAPACITY_WH - self.stored_wh);
            self.stored_wh += charged;
            surplus -= charged;
        } else {
            discharged = (-surplus).min(BATTERY_STEP_WH).min(self.stored_wh);
            self.stored_wh -= discharged;
            surplus += discharged;
        }

        Sample {
            produced,
            consumed,
            charged,
            discharged,
            soc_percent: (100.0 * self.stored_wh / BATTERY_CAPACITY_WH).round(),
            imported: (-surplus).max(0.0),
            exported: surplus.max(0.0),
        }
    }

    fn production(&mut self, day_fraction: f64, annual_fraction: f64, cloud_factor: f64) -> f64 {
        // Day length swings around the June solstice.
        let season = ((annual_fraction - 0.47) * 2.0 * PI).cos();
        let half_day = 0.25 + 0.07 * season;
        let from_noon = (day_fraction - 0.5).abs();
        if from_noon >= half_day {
            return 0.0;
        }
        let daylight = (from_noon / half_day * PI / 2.0).cos().powi(2);
        let strength = 0.55 + 0.45 * season;
        let passing_clouds = self.rng.random_range(0.85..=1.0);
        (PEAK_WH * daylight * strength * cloud_factor * passing_clouds).round()
    }

    fn consumption(&mut self, day_fraction: f64, weekday: Weekday) -> f64 {
        let base = 90.0;
        let morning = gaussian(day_fraction, 0.29, 0.04) * 350.0;
        let evening = gaussian(day_fraction, 0.78, 0.06) * 600.0;
        let weekend = if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            gaussian(day_fraction, 0.52, 0.12) * 250.0
        } else {
            0.0
        };
        let noise = self.rng.random_range(-25.0..=25.0);
        (base + morning + evening + weekend + noise).max(40.0).round()
    }
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    (-((x - center) * (x - center)) / (2.0 * width * width)).exp()
}

fn align_to_step(ts: DateTime<Utc>) -> DateTime<Utc> {
    let step_seconds = STEP_MINUTES * 60;
    let aligned = (ts.timestamp() / step_seconds) * step_seconds;
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap_or(ts)
}

#[derive(Default)]
struct Batches {
    production: Vec<NewProductionMeterInterval>,
    consumption: Vec<NewConsumptionInterval>,
    battery: Vec<NewBatteryInterval>,
    import: Vec<NewImportInterval>,
    export: Vec<NewExportInterval>,
}

impl Batches {
    fn push(&mut self, system_id: SystemId, end_at: DateTime<Utc>, sample: &Sample) {
        let system_id = system_id.0;
        self.production.push(NewProductionMeterInterval {
            system_id,
            end_at,
            devices_reporting: Some(1),
            wh_del: Some(sample.produced),
        });
        self.consumption.push(NewConsumptionInterval {
            system_id,
            end_at,
            devices_reporting: Some(1),
            enwh: Some(sample.consumed),
        });
        self.battery.push(NewBatteryInterval {
            system_id,
            end_at,
            charge_enwh: Some(sample.charged),
            charge_devices_reporting: Some(1),
            discharge_enwh: Some(sample.discharged),
            discharge_devices_reporting: Some(1),
            soc_percent: Some(sample.soc_percent),
            soc_devices_reporting: Some(1),
        });
        self.import.push(NewImportInterval {
            system_id,
            end_at,
            wh_imported: Some(sample.imported),
        });
        self.export.push(NewExportInterval {
            system_id,
            end_at,
            wh_exported: Some(sample.exported),
        });
    }

    fn flush(&mut self, conn: &mut PgConnection) -> Result<usize, String> {
        let mut inserted = ingest::insert_production_meter(conn, &self.production)?;
        inserted += ingest::insert_consumption(conn, &self.consumption)?;
        inserted += ingest::insert_battery(conn, &self.battery)?;
        inserted += ingest::insert_import(conn, &self.import)?;
        inserted += ingest::insert_export(conn, &self.export)?;
        *self = Batches::default();
        Ok(inserted)
    }
}

pub fn run(conn: &mut PgConnection) -> Result<(), String> {
    let end = align_to_step(Utc::now());
    let start = end - Duration::days(HISTORY_DAYS);
    let step = Duration::minutes(STEP_MINUTES);

    info!(
        "Fake data: generating {} day(s) of telemetry for system {} ending {}",
        HISTORY_DAYS, FAKE_SYSTEM_ID, end
    );

    let mut generator = Generator::new(SEED);
    let mut batches = Batches::default();
    let mut inserted = 0usize;
    let mut ts = start + step;
    let mut current_day = ts.date_naive();

    while ts <= end {
        if ts.date_naive() != current_day {
            inserted += batches.flush(conn)?;
            current_day = ts.date_naive();
        }
        let sample = generator.sample_at(ts);
        batches.push(FAKE_SYSTEM_ID, ts, &sample);
        ts += step;
    }
    inserted += batches.flush(conn)?;

    info!("Fake data: complete ({} row(s) inserted across five tables)", inserted);
    Ok(())
}
