use crate::client::EnlightenClient;
use crate::pipeline::cache::{DatasetCache, RefreshOutcome, Snapshot};
use crate::pipeline::dataset::{BuildReport, DatasetRow, PipelineConfig};
use crate::pipeline::envelope::{EnvelopeRow, Scope};
use crate::pipeline::records::{MetricKind, SystemId};
use crate::services::{loader, source};
use crate::views::calendar::{CalendarCell, DayEfficiency, daily_totals, day_efficiency};
use crate::views::history::{HistoryBucket, HistoryQuery, TimeOfDayTotals, history, time_of_day_summary};
use crate::views::stats::{PercentileBand, StatsGrouping, percentile_bands};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use diesel::PgConnection;
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

pub struct LoadTarget<'a> {
    pub client: &'a EnlightenClient,
    pub system_id: SystemId,
    pub settings: loader::LoaderSettings,
}

pub struct RefreshContext<'a> {
    pub load: Option<LoadTarget<'a>>,
    pub pipeline: PipelineConfig,
    pub timezone: Tz,
    pub export_path: Option<PathBuf>,
}

/// The dashboard-facing export of one snapshot.
#[derive(Debug, Serialize)]
pub struct DashboardExport<'a> {
    pub version: String,
    pub built_at: DateTime<Utc>,
    pub envelope_metric: MetricKind,
    pub report: &'a BuildReport,
    pub rows: &'a [DatasetRow],
    pub envelopes: BTreeMap<Scope, Vec<EnvelopeRow>>,
    pub daily: Vec<HistoryBucket>,
    pub time_of_day: Vec<TimeOfDayTotals>,
    pub calendar: Vec<CalendarCell>,
    pub efficiency: Vec<DayEfficiency>,
    pub monthly_percentiles: Vec<PercentileBand>,
}

pub fn dashboard_export(snapshot: &Snapshot) -> DashboardExport<'_> {
    let dataset = &snapshot.dataset;
    DashboardExport {
        version: format!("{:016x}", snapshot.version),
        built_at: snapshot.built_at,
        envelope_metric: dataset.envelope_metric(),
        report: &snapshot.report,
        rows: dataset.rows(),
        envelopes: Scope::ALL
            .into_iter()
            .map(|scope| (scope, dataset.envelope_rows(scope)))
            .collect(),
        daily: history(dataset, &HistoryQuery::default()),
        time_of_day: time_of_day_summary(dataset),
        calendar: daily_totals(dataset, dataset.envelope_metric()),
        efficiency: dataset
            .days()
            .into_iter()
            .filter_map(|day| day_efficiency(dataset, day))
            .collect(),
        monthly_percentiles: percentile_bands(dataset, StatsGrouping::Month, dataset.envelope_metric()),
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_export(path: &Path, snapshot: &Snapshot) -> Result<(), String> {
    let json = serde_json::to_vec(&dashboard_export(snapshot))
        .map_err(|e| format!("serialize dataset export failed: {}", e))?;
    // Write then rename, so readers never see a partial file.
    let tmp = temp_path(path);
    fs::write(&tmp, json).map_err(|e| format!("write {} failed: {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("rename {} to {} failed: {}", tmp.display(), path.display(), e))?;
    info!("Refresh: export written to {}", path.display());
    Ok(())
}

fn log_report(report: &BuildReport) {
    let inputs = report
        .input_rows
        .iter()
        .map(|(kind, n)| format!("{}={}", kind.label(), n))
        .collect::<Vec<_>>()
        .join(", ");
    info!(
        "Refresh: inputs [{}], output {} row(s), {} excluded, {} malformed, {} duplicate, {} unmatched",
        inputs,
        report.output_rows,
        report.excluded_rows,
        report.malformed_records,
        report.duplicate_records,
        report.unmatched_records
    );
    for kind in &report.empty_sources {
        warn!("Refresh: source {} is empty", kind.label());
    }
}

/// One pass: load, read, rebuild if changed, export. A load failure is
/// logged and the pass carries on with what is already stored.
pub fn run_once(conn: &mut PgConnection, cache: &DatasetCache, ctx: &RefreshContext<'_>) -> Result<RefreshOutcome, String> {
    if let Some(target) = &ctx.load {
        match loader::load_all(conn, target.client, target.system_id, &target.settings) {
            Ok(summary) => {
                let inserted: usize = summary.inserted.values().sum();
                info!(
                    "Refresh: loader stored {} interval(s) in {} request(s)",
                    inserted, summary.requests
                );
            }
            Err(e) => warn!("Refresh: telemetry load failed, using stored data: {}", e),
        }
    }

    let raw = source::read_raw_tables(conn, &ctx.pipeline.sources, ctx.timezone)?;
    let outcome = cache
        .refresh(&raw, &ctx.pipeline)
        .map_err(|e| format!("dataset build failed: {}", e))?;

    if outcome == RefreshOutcome::Rebuilt {
        if let Some(snapshot) = cache.current() {
            log_report(&snapshot.report);
            if let Some(path) = &ctx.export_path {
                write_export(path, &snapshot)?;
            }
        }
    } else {
        info!("Refresh: inputs unchanged; keeping current dataset");
    }
    Ok(outcome)
}

pub fn run_loop(
    conn: &mut PgConnection,
    cache: &DatasetCache,
    ctx: &RefreshContext<'_>,
    interval: Duration,
) -> Result<(), String> {
    loop {
        let tick_start = Instant::now();

        // A failed pass keeps the previous snapshot; the next tick retries.
        if let Err(e) = run_once(conn, cache, ctx) {
            warn!("Refresh: pass failed: {}", e);
        }

        // Maintain steady cadence
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }
}
