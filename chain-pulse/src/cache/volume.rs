//! Incremental volume over a fixed wall-clock interval.
//!
//! Exchanges report volume as a cumulative day total. The dashboard instead shows how much traded
//! since the current interval began, so each contract keeps its previous observation and sums
//! the positive deltas. The interval is global: when it elapses every contract restarts at zero.
//!
//! A volume lower than the previous observation resets that contract's sum. This cannot tell a
//! data correction from a contract rollover; both are treated the same way.

use crate::types::ContractKey;
use chrono::{DateTime, Duration, Utc};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct VolumeEntry {
    previous: f64,
    cumulative: f64,
}

/// Result of one [`VolumeAccumulator::update`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct VolumeDelta {
    /// Sum of positive deltas since the interval started, never negative
    pub cumulative: f64,
    /// Positive delta contributed by this call
    pub delta: f64,
}

#[derive(Debug, Clone)]
pub struct VolumeAccumulator {
    interval: Duration,
    interval_start: DateTime<Utc>,
    entries: FnvHashMap<ContractKey, VolumeEntry>,
}

impl VolumeAccumulator {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Utc::now())
    }

    pub fn starting_at(interval: Duration, interval_start: DateTime<Utc>) -> Self {
        Self {
            interval,
            interval_start,
            entries: FnvHashMap::default(),
        }
    }

    pub fn update(&mut self, key: &ContractKey, volume: Option<f64>) -> VolumeDelta {
        self.update_at(key, volume, Utc::now())
    }

    /// Record a cumulative volume observation at `now`.
    ///
    /// An absent volume leaves the contract untouched and returns its current sum.
    pub fn update_at(&mut self, key: &ContractKey, volume: Option<f64>, now: DateTime<Utc>) -> VolumeDelta {
        self.roll_interval(now);

        let Some(volume) = volume.filter(|volume| volume.is_finite()) else {
            return VolumeDelta {
                cumulative: self.cumulative(key),
                delta: 0.0,
            };
        };

        let Some(entry) = self.entries.get_mut(key) else {
            self.entries.insert(
                key.clone(),
                VolumeEntry {
                    previous: volume,
                    cumulative: 0.0,
                },
            );
            return VolumeDelta::default();
        };

        let change = volume - entry.previous;
        entry.previous = volume;

        let delta = if change > 0.0 {
            entry.cumulative += change;
            change
        } else {
            if change < 0.0 {
                debug!(%key, change, "volume decreased, resetting incremental sum");
                entry.cumulative = 0.0;
            }
            0.0
        };

        VolumeDelta {
            cumulative: entry.cumulative,
            delta,
        }
    }

    pub fn cumulative(&self, key: &ContractKey) -> f64 {
        self.entries
            .get(key)
            .map(|entry| entry.cumulative)
            .unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContractKey, f64)> {
        self.entries.iter().map(|(key, entry)| (key, entry.cumulative))
    }

    /// Keep only the contracts for which `keep` returns true.
    pub fn retain(&mut self, mut keep: impl FnMut(&ContractKey) -> bool) {
        self.entries.retain(|key, _| keep(key));
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn interval_start(&self) -> DateTime<Utc> {
        self.interval_start
    }

    /// Drop all entries and start a fresh interval at `now` with a new length.
    pub fn reset(&mut self, interval: Duration, now: DateTime<Utc>) {
        self.interval = interval;
        self.interval_start = now;
        self.entries.clear();
    }

    fn roll_interval(&mut self, now: DateTime<Utc>) {
        if now - self.interval_start < self.interval {
            return;
        }
        debug!(
            contracts = self.entries.len(),
            "volume interval elapsed, clearing incremental sums"
        );
        self.entries
            .values_mut()
            .for_each(|entry| entry.cumulative = 0.0);
        self.interval_start = now;
    }
}
