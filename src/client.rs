//! Blocking HTTP client for the Enlighten v4 monitoring API (GET endpoints we load).
//!
//! - Uses `ureq` with a shared agent; responses are decoded through
//!   `serde_path_to_error` so a schema drift names the offending field.
//! - Authenticates with a pre-issued bearer token plus the application key
//!   (`key` query parameter). Token refresh is out of scope.
//! - Retries 429, 5xx and transport failures with exponential back-off.

use chrono::{DateTime, Utc};
use log::warn;
use rand::Rng;
use serde::de::DeserializeOwned;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

use crate::models::enlighten::*;
use crate::pipeline::records::SystemId;

pub const DEFAULT_API_URL: &str = "https://api.enphaseenergy.com/";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const BACKOFF_BASE_MS: u64 = 1_000;
const BACKOFF_CAP_MS: u64 = 60_000;

#[derive(Debug)]
pub enum EnlightenClientError {
    Transport(String),
    Http { status: u16, message: String },
    Json(serde_path_to_error::Error<serde_json::Error>),
}

impl core::fmt::Display for EnlightenClientError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            EnlightenClientError::Transport(s) => write!(f, "transport error: {}", s),
            EnlightenClientError::Http { status, message } => write!(f, "http {}: {}", status, message),
            EnlightenClientError::Json(e) => write!(f, "json error at {}: {}", e.path(), e.inner()),
        }
    }
}

impl std::error::Error for EnlightenClientError {}

impl From<serde_path_to_error::Error<serde_json::Error>> for EnlightenClientError {
    fn from(value: serde_path_to_error::Error<serde_json::Error>) -> Self {
        EnlightenClientError::Json(value)
    }
}

impl EnlightenClientError {
    fn is_retryable(&self) -> bool {
        match self {
            EnlightenClientError::Transport(_) => true,
            EnlightenClientError::Http { status, .. } => *status == 429 || (500..600).contains(status),
            EnlightenClientError::Json(_) => false,
        }
    }
}

/// The five telemetry streams that feed the raw tables.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TelemetryKind {
    ProductionMeter,
    Consumption,
    Battery,
    Import,
    Export,
}

impl TelemetryKind {
    pub const ALL: [TelemetryKind; 5] = [
        TelemetryKind::ProductionMeter,
        TelemetryKind::Consumption,
        TelemetryKind::Battery,
        TelemetryKind::Import,
        TelemetryKind::Export,
    ];

    /// Path below `api/v4/systems/{id}/`.
    pub fn path(self) -> &'static str {
        match self {
            TelemetryKind::ProductionMeter => "telemetry/production_meter",
            TelemetryKind::Consumption => "telemetry/consumption_meter",
            TelemetryKind::Battery => "telemetry/battery",
            TelemetryKind::Import => "energy_import_telemetry",
            TelemetryKind::Export => "energy_export_telemetry",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TelemetryKind::ProductionMeter => "production_meter",
            TelemetryKind::Consumption => "consumption",
            TelemetryKind::Battery => "battery",
            TelemetryKind::Import => "import",
            TelemetryKind::Export => "export",
        }
    }
}

/// Delay before retry number `attempt` (0-based), honouring a server-sent
/// `Retry-After` in seconds when present.
pub fn backoff_delay(attempt: u32, retry_after_secs: Option<u64>) -> Duration {
    if let Some(secs) = retry_after_secs {
        return Duration::from_secs(secs).min(Duration::from_millis(BACKOFF_CAP_MS));
    }
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(BACKOFF_BASE_MS.saturating_mul(factor).min(BACKOFF_CAP_MS))
}

pub struct EnlightenClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    access_token: String,
    max_retries: NonZeroU32,
}

impl EnlightenClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        access_token: impl Into<String>,
        max_retries: NonZeroU32,
    ) -> Self {
        let config = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        EnlightenClient {
            agent: config.into(),
            base_url,
            api_key: api_key.into(),
            access_token: access_token.into(),
            max_retries,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}api/v4/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get_once<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, (EnlightenClientError, Option<u64>)> {
        let mut req = self
            .agent
            .get(url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {}", self.access_token))
            .query("key", &self.api_key);
        for (k, v) in query {
            req = req.query(*k, v);
        }

        let mut resp = req
            .call()
            .map_err(|e| (EnlightenClientError::Transport(e.to_string()), None))?;
        let status = resp.status();
        if status.is_success() {
            let reader = resp.into_body().into_reader();
            let mut de = serde_json::Deserializer::from_reader(reader);
            return serde_path_to_error::deserialize(&mut de).map_err(|e| (e.into(), None));
        }

        let retry_after = resp
            .headers()
            .get(http::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok());
        let message = resp
            .body_mut()
            .read_to_string()
            .unwrap_or_else(|_| String::from("<no body>"));
        Err((
            EnlightenClientError::Http {
                status: status.as_u16(),
                message,
            },
            retry_after,
        ))
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T, EnlightenClientError> {
        let url = self.url(path);
        let mut attempt = 0u32;
        loop {
            match self.get_once(&url, query) {
                Ok(value) => return Ok(value),
                Err((err, retry_after)) if err.is_retryable() && attempt < self.max_retries.get() => {
                    let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                    let delay = backoff_delay(attempt, retry_after) + jitter;
                    warn!(
                        "Enlighten: {} failed ({}); retry {}/{} in {}ms",
                        path,
                        err,
                        attempt + 1,
                        self.max_retries,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err((err, _)) => return Err(err),
            }
        }
    }

    pub fn get_systems(&self) -> Result<SystemsPage, EnlightenClientError> {
        self.get_json("systems", &[])
    }

    pub fn get_system(&self, system_id: SystemId) -> Result<System, EnlightenClientError> {
        self.get_json(&format!("systems/{}", system_id.0), &[])
    }

    /// One telemetry page starting at `start_at`; the API decides how far it
    /// reaches (one `granularity` span at most).
    pub fn get_telemetry<T: DeserializeOwned>(
        &self,
        system_id: SystemId,
        kind: TelemetryKind,
        start_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<TelemetryResponse<T>, EnlightenClientError> {
        let query = [
            ("start_at", start_at.timestamp().to_string()),
            ("granularity", granularity.as_str().to_string()),
        ];
        self.get_json(&format!("systems/{}/{}", system_id.0, kind.path()), &query)
    }

    pub fn get_production_meter(
        &self,
        system_id: SystemId,
        start_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<ProductionMeterTelemetry, EnlightenClientError> {
        self.get_telemetry(system_id, TelemetryKind::ProductionMeter, start_at, granularity)
    }

    pub fn get_consumption(
        &self,
        system_id: SystemId,
        start_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<ConsumptionTelemetry, EnlightenClientError> {
        self.get_telemetry(system_id, TelemetryKind::Consumption, start_at, granularity)
    }

    pub fn get_battery(
        &self,
        system_id: SystemId,
        start_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<BatteryTelemetry, EnlightenClientError> {
        self.get_telemetry(system_id, TelemetryKind::Battery, start_at, granularity)
    }

    pub fn get_import(
        &self,
        system_id: SystemId,
        start_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<ImportTelemetry, EnlightenClientError> {
        self.get_telemetry(system_id, TelemetryKind::Import, start_at, granularity)
    }

    pub fn get_export(
        &self,
        system_id: SystemId,
        start_at: DateTime<Utc>,
        granularity: Granularity,
    ) -> Result<ExportTelemetry, EnlightenClientError> {
        self.get_telemetry(system_id, TelemetryKind::Export, start_at, granularity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(0, None), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(4, None), Duration::from_secs(16));
        assert_eq!(backoff_delay(10, None), Duration::from_secs(60));
        assert_eq!(backoff_delay(80, None), Duration::from_secs(60));
    }

    #[test]
    fn backoff_prefers_retry_after() {
        assert_eq!(backoff_delay(0, Some(7)), Duration::from_secs(7));
        assert_eq!(backoff_delay(0, Some(3600)), Duration::from_secs(60));
    }

    #[test]
    fn retries_only_transient_failures() {
        let http = |status| EnlightenClientError::Http {
            status,
            message: String::new(),
        };
        assert!(http(429).is_retryable());
        assert!(http(503).is_retryable());
        assert!(!http(401).is_retryable());
        assert!(!http(404).is_retryable());
        assert!(EnlightenClientError::Transport("reset".into()).is_retryable());
    }

    #[test]
    fn urls_are_rooted_at_v4() {
        let client = EnlightenClient::new(
            "https://api.enphaseenergy.com",
            "key",
            "token",
            NonZeroU32::new(3).unwrap(),
        );
        assert_eq!(
            client.url(&format!("systems/42/{}", TelemetryKind::Import.path())),
            "https://api.enphaseenergy.com/api/v4/systems/42/energy_import_telemetry"
        );
    }
}
