//! Maximum-producible envelope per time-of-day slot.
//!
//! For every scope group the raw per-slot maxima are ordered by time of day
//! and corrected with a two-sided running maximum:
//!
//! ```text
//! envelope[i] = min(max(raw[0..=i]), max(raw[i..n]))
//! ```
//!
//! The result never dips below both of its neighbours: a slot that fell short
//! of the readings on either side of it (a passing cloud, a dropped interval)
//! is lifted to the lower of the two surrounding peaks. The corrected curve is
//! non-decreasing up to its peak and non-increasing after it, and it is never
//! below the raw maximum it was derived from.

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::pipeline::calendar::{CalendarFields, EnrichedRow};
use crate::pipeline::records::MetricKind;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Scope {
    Global,
    Month,
    Week,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Global, Scope::Month, Scope::Week];

    pub fn key_for(self, calendar: &CalendarFields) -> ScopeKey {
        match self {
            Scope::Global => ScopeKey::Global,
            Scope::Month => ScopeKey::Month(calendar.month),
            Scope::Week => ScopeKey::Week(calendar.week),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum ScopeKey {
    Global,
    Month(u32),
    Week(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnvelopeRow {
    pub key: ScopeKey,
    pub time_of_day: NaiveDateTime,
    pub max_value: f64,
}

/// Per scope group, the raw maximum of `metric` for each time-of-day slot.
/// Null readings do not take part; a slot with no readings has no entry.
pub fn raw_slot_maxima(
    rows: &[EnrichedRow],
    scope: Scope,
    metric: MetricKind,
) -> BTreeMap<ScopeKey, BTreeMap<NaiveDateTime, f64>> {
    let mut groups: BTreeMap<ScopeKey, BTreeMap<NaiveDateTime, f64>> = BTreeMap::new();
    for row in rows {
        let Some(value) = row.metrics.get(metric) else {
            continue;
        };
        let slot = groups
            .entry(scope.key_for(&row.calendar))
            .or_default()
            .entry(row.calendar.time_of_day)
            .or_insert(value);
        if value > *slot {
            *slot = value;
        }
    }
    groups
}

/// `min(cummax_left[i], cummax_right[i])` for a sequence already ordered by
/// time of day.
pub fn two_sided_cummax(raw: &[f64]) -> Vec<f64> {
    let mut envelope = Vec::with_capacity(raw.len());
    let mut running = f64::NEG_INFINITY;
    for &value in raw {
        running = running.max(value);
        envelope.push(running);
    }

    let mut running = f64::NEG_INFINITY;
    for (slot, &value) in envelope.iter_mut().zip(raw).rev() {
        running = running.max(value);
        *slot = slot.min(running);
    }
    envelope
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    scope: Scope,
    metric: MetricKind,
    groups: BTreeMap<ScopeKey, BTreeMap<NaiveDateTime, f64>>,
}

impl Envelope {
    pub fn compute(rows: &[EnrichedRow], scope: Scope, metric: MetricKind) -> Self {
        let groups = raw_slot_maxima(rows, scope, metric)
            .into_iter()
            .map(|(key, slots)| {
                let raw: Vec<f64> = slots.values().copied().collect();
                let corrected = two_sided_cummax(&raw);
                let slots = slots.into_keys().zip(corrected).collect();
                (key, slots)
            })
            .collect();
        Envelope { scope, metric, groups }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn metric(&self) -> MetricKind {
        self.metric
    }

    pub fn get(&self, key: ScopeKey, time_of_day: NaiveDateTime) -> Option<f64> {
        self.groups.get(&key).and_then(|slots| slots.get(&time_of_day)).copied()
    }

    /// The envelope value matching a row's scope key and time of day.
    pub fn value_for(&self, calendar: &CalendarFields) -> Option<f64> {
        self.get(self.scope.key_for(calendar), calendar.time_of_day)
    }

    /// Slots of one group, ordered by time of day.
    pub fn group(&self, key: ScopeKey) -> Option<&BTreeMap<NaiveDateTime, f64>> {
        self.groups.get(&key)
    }

    pub fn rows(&self) -> impl Iterator<Item = EnvelopeRow> + '_ {
        self.groups.iter().flat_map(|(key, slots)| {
            slots.iter().map(move |(time_of_day, max_value)| EnvelopeRow {
                key: *key,
                time_of_day: *time_of_day,
                max_value: *max_value,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.groups.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
