pub mod models {
    pub mod enlighten;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
}
pub mod schema;
pub mod utils;
pub mod services {
    pub mod fake_data;
    pub mod ingest;
    pub mod loader;
    pub mod refresh;
    pub mod source;
}
pub mod pipeline {
    pub mod cache;
    pub mod calendar;
    pub mod dataset;
    pub mod envelope;
    pub mod error;
    pub mod mapping;
    pub mod outliers;
    pub mod reconcile;
    pub mod records;
}
pub mod views {
    pub mod calendar;
    pub mod comparison;
    pub mod history;
    pub mod stats;
}

use crate::client::EnlightenClient;
use crate::config::{CliOptions, Config};
use crate::pipeline::cache::DatasetCache;
use crate::services::loader::LoaderSettings;
use crate::services::refresh::{LoadTarget, RefreshContext};
use crate::services::{fake_data, refresh};
use diesel::PgConnection;
use diesel::prelude::*;
use log::{error, info, warn};

pub fn run(options: &CliOptions) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_env()?;
    info!(
        "Config loaded (load_enabled={}, lookback={}d, min_age={}m, load_rpm={}, refresh_interval={}, timezone={}, excluded_days={}, envelope_metric={}, max_request_retries={})",
        cfg.api.is_some(),
        cfg.load_lookback.num_days(),
        cfg.load_min_age.num_minutes(),
        cfg.load_requests_per_minute
            .map(|v| v.get().to_string())
            .unwrap_or_else(|| "-".to_string()),
        cfg.refresh_interval
            .map(|d| format!("{}s", d.as_secs()))
            .unwrap_or_else(|| "once".to_string()),
        cfg.timezone,
        cfg.pipeline.excluded_days.len(),
        cfg.pipeline.envelope_metric,
        cfg.max_request_retries.get()
    );

    // 2) Connect DB
    let mut conn = PgConnection::establish(&cfg.database_url).map_err(|e| format!("DB connection failed: {}", e))?;
    info!("Connected to database");

    // 3) Synthetic history, if asked for
    if options.fake_data {
        fake_data::run(&mut conn)?;
    }

    // 4) Init Enlighten client
    let client = cfg.api.as_ref().map(|api| {
        EnlightenClient::new(
            api.api_url.as_str(),
            api.api_key.as_str(),
            api.access_token.as_str(),
            cfg.max_request_retries,
        )
    });
    let load = match (&client, &cfg.api) {
        (Some(client), Some(api)) => {
            match client.get_system(api.system_id) {
                Ok(system) => info!(
                    "Loading telemetry for system {} ({}, timezone {})",
                    system.system_id,
                    system.name.as_deref().unwrap_or("unnamed"),
                    system.timezone.as_deref().unwrap_or("-")
                ),
                Err(e) => warn!("get_system({}) failed, loading anyway: {}", api.system_id, e),
            }
            Some(LoadTarget {
                client,
                system_id: api.system_id,
                settings: LoaderSettings {
                    lookback: cfg.load_lookback,
                    min_age: cfg.load_min_age,
                    requests_per_minute: cfg.load_requests_per_minute,
                },
            })
        }
        _ => {
            info!("Telemetry loading disabled via LOAD_ENABLED=false");
            None
        }
    };

    // 5) Refresh: one pass, or a steady-cadence loop
    let ctx = RefreshContext {
        load,
        pipeline: cfg.pipeline.clone(),
        timezone: cfg.timezone,
        export_path: cfg.dataset_export_path.clone(),
    };
    let cache = DatasetCache::new();
    match cfg.refresh_interval {
        Some(interval) if !options.once => {
            info!("Starting refresh loop: interval={}s", interval.as_secs());
            refresh::run_loop(&mut conn, &cache, &ctx, interval)?;
        }
        _ => {
            refresh::run_once(&mut conn, &cache, &ctx)?;
            info!("Single refresh pass complete");
        }
    }

    Ok(())
}

fn main() {
    let options = match CliOptions::parse(std::env::args_os().skip(1)) {
        Ok(options) => options,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };
    let loaded_env = match config::load_env(options.env_file.as_deref()) {
        Ok(info) => info,
        Err(err) => {
            eprintln!("fatal: {}", err);
            std::process::exit(1);
        }
    };

    // Init logging after environment so RUST_LOG from .env is respected.
    let default_filter = env_logger::Env::default().default_filter_or("info");
    env_logger::Builder::from_env(default_filter)
        .format_timestamp_secs()
        .init();

    if let Some(info) = loaded_env.as_ref() {
        let origin = if info.explicit { "CLI-specified" } else { "default" };
        info!("Environment loaded from {} .env file: {}", origin, info.path.display());
    }

    info!(
        "enlighten-insights {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );
    if let Err(e) = run(&options) {
        error!("fatal: {}", e);
        std::process::exit(1);
    }
}
