//! Incremental telemetry loader: pulls everything newer than what the tables
//! already hold, in week-sized pages, and stores it idempotently.

use crate::client::{EnlightenClient, EnlightenClientError, TelemetryKind};
use crate::db::models::{
    NewBatteryInterval, NewConsumptionInterval, NewExportInterval, NewImportInterval, NewProductionMeterInterval,
};
use crate::models::enlighten::{Granularity, TelemetryInterval};
use crate::pipeline::records::SystemId;
use crate::schema;
use crate::services::ingest;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use diesel::PgConnection;
use diesel::dsl::max;
use diesel::prelude::*;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::num::NonZeroU32;
use std::thread;
use std::time::{Duration as StdDuration, Instant};

const PAGE_SPAN_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct LoaderSettings {
    /// How far back to start when a table holds nothing for the system yet.
    pub lookback: TimeDelta,
    /// Skip the API entirely if the newest stored interval is younger than this.
    pub min_age: TimeDelta,
    pub requests_per_minute: Option<NonZeroU32>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    pub inserted: BTreeMap<&'static str, usize>,
    pub skipped_fresh: Vec<&'static str>,
    pub requests: usize,
}

/// First instant to request: one minute past the newest stored interval, or
/// `lookback` before `now` for an empty table.
pub fn plan_start(latest: Option<DateTime<Utc>>, now: DateTime<Utc>, lookback: TimeDelta) -> DateTime<Utc> {
    match latest {
        Some(ts) => ts + TimeDelta::minutes(1),
        None => now - lookback,
    }
}

/// Whether data starting at `start` is too recent to be worth an API call.
pub fn is_fresh(start: DateTime<Utc>, now: DateTime<Utc>, min_age: TimeDelta) -> bool {
    start >= now - min_age
}

/// Page starts `start, start + 7d, ...` strictly before `now`.
pub fn chunk_starts(start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<DateTime<Utc>> {
    let span = TimeDelta::days(PAGE_SPAN_DAYS);
    let mut starts = vec![start];
    let mut next = start + span;
    while next < now {
        starts.push(next);
        next += span;
    }
    starts
}

/// A page never re-requests what the previous page already returned.
pub fn request_start(chunk_start: DateTime<Utc>, last_loaded: Option<DateTime<Utc>>) -> DateTime<Utc> {
    match last_loaded {
        Some(last) => chunk_start.max(last) + TimeDelta::minutes(1),
        None => chunk_start,
    }
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn latest_end_at(conn: &mut PgConnection, kind: TelemetryKind, system_id: SystemId) -> Result<Option<DateTime<Utc>>, String> {
    let result: QueryResult<Option<DateTime<Utc>>> = match kind {
        TelemetryKind::ProductionMeter => {
            use schema::production_meter::dsl as P;
            P::production_meter
                .filter(P::system_id.eq(system_id.0))
                .select(max(P::end_at))
                .first(conn)
        }
        TelemetryKind::Consumption => {
            use schema::consumption::dsl as C;
            C::consumption
                .filter(C::system_id.eq(system_id.0))
                .select(max(C::end_at))
                .first(conn)
        }
        TelemetryKind::Battery => {
            use schema::battery::dsl as B;
            B::battery
                .filter(B::system_id.eq(system_id.0))
                .select(max(B::end_at))
                .first(conn)
        }
        TelemetryKind::Import => {
            use schema::import::dsl as I;
            I::import
                .filter(I::system_id.eq(system_id.0))
                .select(max(I::end_at))
                .first(conn)
        }
        TelemetryKind::Export => {
            use schema::export::dsl as E;
            E::export
                .filter(E::system_id.eq(system_id.0))
                .select(max(E::end_at))
                .first(conn)
        }
    };
    result.map_err(|e| format!("query latest {} timestamp failed: {}", kind.label(), e))
}

struct Pacer {
    spacing: Option<StdDuration>,
    last_call: Option<Instant>,
}

impl Pacer {
    fn new(requests_per_minute: Option<NonZeroU32>) -> Self {
        Pacer {
            spacing: requests_per_minute.map(|limit| StdDuration::from_secs_f64(60.0 / f64::from(limit.get()))),
            last_call: None,
        }
    }

    fn wait(&mut self) {
        if let (Some(required), Some(last)) = (self.spacing, self.last_call) {
            let elapsed = last.elapsed();
            if elapsed < required {
                thread::sleep(required - elapsed);
            }
        }
        self.last_call = Some(Instant::now());
    }
}

#[allow(clippy::too_many_arguments)]
fn load_stream<I, R>(
    conn: &mut PgConnection,
    client: &EnlightenClient,
    pacer: &mut Pacer,
    kind: TelemetryKind,
    system_id: SystemId,
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    to_row: fn(SystemId, &I) -> Option<R>,
    insert: fn(&mut PgConnection, &[R]) -> Result<usize, String>,
) -> Result<(usize, usize), String>
where
    I: DeserializeOwned + TelemetryInterval,
{
    let mut last_loaded: Option<DateTime<Utc>> = None;
    let mut inserted = 0usize;
    let mut requests = 0usize;

    for chunk in chunk_starts(start, now) {
        let from = request_start(chunk, last_loaded);
        if from >= now {
            break;
        }
        pacer.wait();
        requests += 1;
        let page = client
            .get_telemetry::<I>(system_id, kind, from, Granularity::Week)
            .map_err(|e: EnlightenClientError| format!("{} telemetry from {} failed: {}", kind.label(), format_ts(from), e))?;

        let mut rows: BTreeMap<i64, R> = BTreeMap::new();
        for interval in &page.intervals {
            match to_row(system_id, interval) {
                Some(row) => {
                    rows.entry(interval.end_at()).or_insert(row);
                }
                None => warn!(
                    "Loader: {} interval with invalid end_at {} skipped",
                    kind.label(),
                    interval.end_at()
                ),
            }
        }
        if let Some(newest) = rows.keys().next_back().and_then(|ts| DateTime::from_timestamp(*ts, 0)) {
            last_loaded = Some(last_loaded.map_or(newest, |prev| prev.max(newest)));
        }

        let rows: Vec<R> = rows.into_values().collect();
        let count = insert(conn, &rows)?;
        debug!(
            "Loader: {} page from {} returned {} interval(s), {} new",
            kind.label(),
            format_ts(from),
            rows.len(),
            count
        );
        inserted += count;
    }
    Ok((inserted, requests))
}

pub fn load_all(
    conn: &mut PgConnection,
    client: &EnlightenClient,
    system_id: SystemId,
    settings: &LoaderSettings,
) -> Result<LoadSummary, String> {
    let now = Utc::now();
    let mut pacer = Pacer::new(settings.requests_per_minute);
    let mut summary = LoadSummary::default();
    let mut failures = Vec::new();

    for kind in TelemetryKind::ALL {
        let latest = latest_end_at(conn, kind, system_id)?;
        let start = plan_start(latest, now, settings.lookback);
        if is_fresh(start, now, settings.min_age) {
            info!(
                "Loader: {} is fresh (next interval {}); no API call",
                kind.label(),
                format_ts(start)
            );
            summary.skipped_fresh.push(kind.label());
            continue;
        }

        info!("Loader: loading {} from {}", kind.label(), format_ts(start));
        let result = match kind {
            TelemetryKind::ProductionMeter => load_stream(
                conn,
                client,
                &mut pacer,
                kind,
                system_id,
                start,
                now,
                NewProductionMeterInterval::from_interval,
                ingest::insert_production_meter,
            ),
            TelemetryKind::Consumption => load_stream(
                conn,
                client,
                &mut pacer,
                kind,
                system_id,
                start,
                now,
                NewConsumptionInterval::from_interval,
                ingest::insert_consumption,
            ),
            TelemetryKind::Battery => load_stream(
                conn,
                client,
                &mut pacer,
                kind,
                system_id,
                start,
                now,
                NewBatteryInterval::from_interval,
                ingest::insert_battery,
            ),
            TelemetryKind::Import => load_stream(
                conn,
                client,
                &mut pacer,
                kind,
                system_id,
                start,
                now,
                NewImportInterval::from_interval,
                ingest::insert_import,
            ),
            TelemetryKind::Export => load_stream(
                conn,
                client,
                &mut pacer,
                kind,
                system_id,
                start,
                now,
                NewExportInterval::from_interval,
                ingest::insert_export,
            ),
        };

        match result {
            Ok((inserted, requests)) => {
                info!("Loader: {} stored {} new interval(s)", kind.label(), inserted);
                summary.inserted.insert(kind.label(), inserted);
                summary.requests += requests;
            }
            Err(e) => {
                warn!("Loader: {}", e);
                failures.push(e);
            }
        }
    }

    if failures.is_empty() {
        Ok(summary)
    } else {
        Err(failures.join("; "))
    }
}
