//! Holds the most recent enriched dataset.
//!
//! A snapshot is rebuilt only when the content token of the raw inputs plus
//! configuration changes, or after an explicit `invalidate`. Builds run
//! outside the lock; publication swaps one `Arc`, so readers either see the
//! previous snapshot or the new one, never a half-built dataset.

use chrono::{DateTime, Utc};
use log::{debug, info};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use crate::pipeline::dataset::{BuildReport, EnrichedDataset, PipelineConfig, build_enriched_dataset};
use crate::pipeline::error::BuildError;
use crate::pipeline::records::RawTables;

/// Content token over the raw inputs and the configuration.
pub fn version_token(raw: &RawTables, config: &PipelineConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    config.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug)]
pub struct Snapshot {
    pub version: u64,
    pub built_at: DateTime<Utc>,
    pub dataset: EnrichedDataset,
    pub report: BuildReport,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    Rebuilt,
    Unchanged,
}

#[derive(Debug, Default)]
struct CacheState {
    snapshot: Option<Arc<Snapshot>>,
    /// Bumped by every `invalidate`.
    generation: u64,
    /// The generation the current snapshot was built for.
    built_generation: u64,
}

#[derive(Debug, Default)]
pub struct DatasetCache {
    state: RwLock<CacheState>,
}

impl DatasetCache {
    pub fn new() -> Self {
        DatasetCache::default()
    }

    /// The current snapshot, if a build has ever succeeded.
    pub fn current(&self) -> Option<Arc<Snapshot>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        state.snapshot.clone()
    }

    /// Force the next `refresh` to rebuild even if the inputs are unchanged.
    pub fn invalidate(&self) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.generation = state.generation.wrapping_add(1);
    }

    /// The generation a build for `version` would answer, or `None` when the
    /// current snapshot is already up to date.
    fn pending_generation(&self, version: u64) -> Option<u64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match &state.snapshot {
            Some(snapshot) if snapshot.version == version && state.built_generation == state.generation => None,
            _ => Some(state.generation),
        }
    }

    /// Swap in `snapshot`. An `invalidate` that arrived after `generation`
    /// was read leaves the cache stale.
    fn publish(&self, snapshot: Arc<Snapshot>, generation: u64) {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.snapshot = Some(snapshot);
        state.built_generation = generation;
    }

    /// Rebuild if needed. On error the previous snapshot stays in place.
    pub fn refresh(&self, raw: &RawTables, config: &PipelineConfig) -> Result<RefreshOutcome, BuildError> {
        let version = version_token(raw, config);
        let Some(generation) = self.pending_generation(version) else {
            debug!("Cache: inputs unchanged (token {:016x})", version);
            return Ok(RefreshOutcome::Unchanged);
        };

        let build = build_enriched_dataset(raw, config)?;
        let snapshot = Arc::new(Snapshot {
            version,
            built_at: Utc::now(),
            dataset: build.dataset,
            report: build.report,
        });
        info!(
            "Cache: published dataset with {} row(s) (token {:016x})",
            snapshot.dataset.len(),
            version
        );

        self.publish(snapshot, generation);
        Ok(RefreshOutcome::Rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::records::{RawRow, RawTable};
    use chrono::NaiveDate;

    fn raw(produced: f64) -> RawTables {
        let ts = NaiveDate::from_ymd_opt(2023, 7, 1).unwrap().and_hms_opt(12, 0, 0);
        RawTables {
            import: RawTable::new(vec![RawRow::new(Some(1), ts).with("wh_imported", Some(3.0))]),
            production: RawTable::new(vec![RawRow::new(Some(1), ts).with("wh_del", Some(produced))]),
            ..RawTables::default()
        }
    }

    #[test]
    fn token_tracks_inputs_and_config() {
        let config = PipelineConfig::default();
        assert_eq!(version_token(&raw(1.0), &config), version_token(&raw(1.0), &config));
        assert_ne!(version_token(&raw(1.0), &config), version_token(&raw(2.0), &config));

        let other = PipelineConfig {
            excluded_days: [NaiveDate::from_ymd_opt(2023, 7, 2).unwrap()].into_iter().collect(),
            ..PipelineConfig::default()
        };
        assert_ne!(version_token(&raw(1.0), &config), version_token(&raw(1.0), &other));
    }

    #[test]
    fn unchanged_inputs_keep_the_same_snapshot() {
        let cache = DatasetCache::new();
        let config = PipelineConfig::default();
        assert!(cache.current().is_none());

        assert_eq!(cache.refresh(&raw(1.0), &config).unwrap(), RefreshOutcome::Rebuilt);
        let first = cache.current().unwrap();
        assert_eq!(cache.refresh(&raw(1.0), &config).unwrap(), RefreshOutcome::Unchanged);
        assert!(Arc::ptr_eq(&first, &cache.current().unwrap()));
    }

    #[test]
    fn changed_inputs_or_invalidation_rebuild() {
        let cache = DatasetCache::new();
        let config = PipelineConfig::default();
        cache.refresh(&raw(1.0), &config).unwrap();
        let first = cache.current().unwrap();

        assert_eq!(cache.refresh(&raw(2.0), &config).unwrap(), RefreshOutcome::Rebuilt);
        let second = cache.current().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.dataset.rows()[0].row.metrics.produced, Some(2.0));

        cache.invalidate();
        assert_eq!(cache.refresh(&raw(2.0), &config).unwrap(), RefreshOutcome::Rebuilt);
        assert!(!Arc::ptr_eq(&second, &cache.current().unwrap()));
    }

    #[test]
    fn failed_build_keeps_previous_snapshot() {
        let cache = DatasetCache::new();
        let config = PipelineConfig::default();
        cache.refresh(&raw(1.0), &config).unwrap();
        let before = cache.current().unwrap();

        let mut broken = raw(1.0);
        broken.import = RawTable::default();
        assert!(cache.refresh(&broken, &config).is_err());
        assert!(Arc::ptr_eq(&before, &cache.current().unwrap()));
    }

    #[test]
    fn invalidation_during_a_build_forces_another() {
        let cache = DatasetCache::new();
        let config = PipelineConfig::default();
        let inputs = raw(1.0);
        let version = version_token(&inputs, &config);

        let generation = cache.pending_generation(version).unwrap();
        let build = build_enriched_dataset(&inputs, &config).unwrap();
        cache.invalidate();
        cache.publish(
            Arc::new(Snapshot {
                version,
                built_at: Utc::now(),
                dataset: build.dataset,
                report: build.report,
            }),
            generation,
        );

        assert_eq!(cache.pending_generation(version), Some(generation + 1));
        assert_eq!(cache.refresh(&inputs, &config).unwrap(), RefreshOutcome::Rebuilt);
        assert_eq!(cache.refresh(&inputs, &config).unwrap(), RefreshOutcome::Unchanged);
    }
}
