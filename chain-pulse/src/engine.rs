//! Session-scoped owner of every derived store.
//!
//! The [`SignalEngine`] is fed one [`Snapshot`] per poll cycle and folds it into the volume,
//! eaten, direction, intensity and trend stores. Nothing outside the engine mutates them, and a
//! configuration change resets only the store(s) it governs.

use crate::{
    cache::{
        eaten::{EatenQuantityCache, EatenValues},
        intensity::{CellClass, ColorCache, DayRange, FieldKey},
        volume::{VolumeAccumulator, VolumeDelta},
    },
    config::{
        EngineConfig, clamp_bearish_threshold, clamp_bullish_threshold, clamp_min_change_pct,
        clamp_volume_window, snap_window_size,
    },
    error::ConfigError,
    signal::{
        direction::{DirectionFlowDetector, DirectionState},
        trend::{Thresholds, TrendEngine, TrendState},
        window::FieldValues,
    },
    types::{ContractKey, Segment, Snapshot},
};
use chrono::{DateTime, Utc};
use derive_more::Display;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Consecutive snapshots a contract may be missing from before its per-contract state is dropped.
pub const STALE_AFTER_SNAPSHOTS: u64 = 20;

/// Series tracked by the direction-flow detector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
pub enum SeriesKey {
    #[display("spot")]
    Spot,
    #[display("{_0}")]
    Contract(ContractKey),
}

/// Outcome of [`SignalEngine::apply_snapshot`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct ApplyReport {
    /// Contracts folded into the stores
    pub contracts: usize,
    /// Contracts without a usable identifier
    pub skipped: usize,
    pub trend: TrendState,
}

/// Intensity classes of the rendered cells of one contract.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellClasses {
    pub ltp: CellClass,
    pub bid: CellClass,
    pub ask: CellClass,
    pub volume: CellClass,
    pub oi: CellClass,
    pub bid_qty: CellClass,
    pub ask_qty: CellClass,
    /// Net eaten quantity after merging with the last known value
    pub eaten: CellClass,
    pub change: CellClass,
    pub change_percent: CellClass,
}

/// Derived state of one contract as of the last applied snapshot.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractView {
    pub key: ContractKey,
    pub segment: Segment,
    pub strike: Option<f64>,
    pub ltp: Option<f64>,
    pub volume: VolumeDelta,
    pub eaten: EatenValues,
    pub direction: DirectionState,
    pub cells: CellClasses,
}

/// Read-only view handed to the presentation layer on every render tick.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalView {
    pub underlying: String,
    pub spot_price: Option<f64>,
    pub trend: TrendState,
    pub spot_direction: DirectionState,
    pub contracts: Vec<ContractView>,
    pub timestamp: Option<DateTime<Utc>>,
    pub source: Option<String>,
    pub volume_interval_start: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct SignalEngine {
    config: EngineConfig,
    volume: VolumeAccumulator,
    eaten: EatenQuantityCache,
    directions: DirectionFlowDetector<SeriesKey>,
    colors: ColorCache,
    trend: TrendEngine,
    last: SignalView,
    sequence: u64,
    /// Sequence number of the last snapshot each contract appeared in
    last_seen: FnvHashMap<ContractKey, u64>,
}

impl SignalEngine {
    /// Normalise `config` and build every store from it.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        Self::starting_at(config, Utc::now())
    }

    /// As [`SignalEngine::new`], with the first volume interval starting at `now`.
    pub fn starting_at(config: EngineConfig, now: DateTime<Utc>) -> Result<Self, ConfigError> {
        let config = config.normalised()?;

        Ok(Self {
            volume: VolumeAccumulator::starting_at(config.volume_window(), now),
            eaten: EatenQuantityCache::new(),
            directions: DirectionFlowDetector::new(),
            colors: ColorCache::new(config.color_capacity)?,
            trend: TrendEngine::new(config.window_size, thresholds_of(&config)),
            last: SignalView::default(),
            sequence: 0,
            last_seen: FnvHashMap::default(),
            config,
        })
    }

    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) -> ApplyReport {
        self.apply_snapshot_at(snapshot, Utc::now())
    }

    /// Fold one snapshot into every store, using `now` as the wall-clock for volume intervals.
    pub fn apply_snapshot_at(&mut self, snapshot: &Snapshot, now: DateTime<Utc>) -> ApplyReport {
        self.sequence += 1;
        let min_change_pct = self.config.min_change_pct;
        let spot_direction =
            self.directions
                .observe(SeriesKey::Spot, snapshot.spot_price, min_change_pct);

        let mut contracts = Vec::with_capacity(
            snapshot.futures.len() + snapshot.calls.len() + snapshot.puts.len(),
        );
        let mut skipped = 0;

        for (segment, contract) in snapshot.contracts() {
            let Some(key) = contract.key() else {
                skipped += 1;
                continue;
            };

            let volume = self.volume.update_at(&key, contract.volume, now);
            let eaten = self.eaten.update(
                &key,
                contract.eaten_delta,
                contract.bid_eaten,
                contract.ask_eaten,
            );
            let direction = self.directions.observe(
                SeriesKey::Contract(key.clone()),
                contract.ltp,
                min_change_pct,
            );

            let day_range = DayRange {
                high: contract.day_high,
                low: contract.day_low,
            };
            let cells = {
                let mut cell = |field, value, range| evaluate(&mut self.colors, &key, field, value, range);
                CellClasses {
                    ltp: cell(FieldKey::Ltp, contract.ltp, day_range),
                    bid: cell(FieldKey::Bid, contract.bid, DayRange::default()),
                    ask: cell(FieldKey::Ask, contract.ask, DayRange::default()),
                    volume: cell(FieldKey::Volume, contract.volume, DayRange::default()),
                    oi: cell(FieldKey::OpenInterest, contract.oi, DayRange::default()),
                    bid_qty: cell(FieldKey::BidQty, contract.bid_qty, DayRange::default()),
                    ask_qty: cell(FieldKey::AskQty, contract.ask_qty, DayRange::default()),
                    eaten: cell(FieldKey::Eaten, eaten.eaten_delta, DayRange::default()),
                    change: cell(FieldKey::Change, contract.change, DayRange::default()),
                    change_percent: cell(
                        FieldKey::ChangePercent,
                        contract.change_percent,
                        DayRange::default(),
                    ),
                }
            };

            self.last_seen.insert(key.clone(), self.sequence);

            contracts.push(ContractView {
                key,
                segment,
                strike: contract.strike,
                ltp: contract.ltp,
                volume,
                eaten,
                direction,
                cells,
            });
        }

        self.prune_stale();

        for segment in Segment::ALL {
            let values = FieldValues::aggregate(segment, snapshot.segment(segment));
            self.trend.ingest(segment, &values);
        }
        let trend = self.trend.classify();

        if skipped > 0 {
            debug!(skipped, "snapshot contained contracts without identifier");
        }
        debug!(
            underlying = %snapshot.underlying,
            contracts = contracts.len(),
            trend = %trend.classification,
            score = trend.score,
            "applied snapshot"
        );

        let report = ApplyReport {
            contracts: contracts.len(),
            skipped,
            trend,
        };

        self.last = SignalView {
            underlying: snapshot.underlying.clone(),
            spot_price: snapshot.spot_price,
            trend,
            spot_direction,
            contracts,
            timestamp: snapshot.timestamp,
            source: snapshot.source.clone(),
            volume_interval_start: Some(self.volume.interval_start()),
        };

        report
    }

    /// Snapshot of the derived state for rendering.
    pub fn view(&self) -> SignalView {
        self.last.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn trend(&self) -> TrendState {
        self.trend.state()
    }

    pub fn direction(&self, series: &SeriesKey) -> DirectionState {
        self.directions.state(series)
    }

    pub fn volume(&self) -> &VolumeAccumulator {
        &self.volume
    }

    pub fn eaten(&self) -> &EatenQuantityCache {
        &self.eaten
    }

    pub fn colors(&self) -> &ColorCache {
        &self.colors
    }

    /// Snap the trend window size and rebuild the metric windows.
    pub fn set_window_size(&mut self, requested: usize) -> usize {
        let window_size = snap_window_size(requested);
        self.config.window_size = window_size;
        self.trend.reset(window_size);
        info!(requested, window_size, "trend window size changed, windows reset");
        window_size
    }

    /// Clamp the volume interval and restart every incremental sum.
    pub fn set_volume_window(&mut self, requested_min: u64) -> u64 {
        self.set_volume_window_at(requested_min, Utc::now())
    }

    pub fn set_volume_window_at(&mut self, requested_min: u64, now: DateTime<Utc>) -> u64 {
        let minutes = clamp_volume_window(requested_min);
        self.config.volume_window_min = minutes;
        self.volume.reset(self.config.volume_window(), now);
        info!(requested_min, minutes, "volume window changed, accumulator reset");
        minutes
    }

    /// Clamp both thresholds and restart trend smoothing.
    pub fn set_thresholds(&mut self, bullish: f64, bearish: f64) -> Result<Thresholds, ConfigError> {
        let thresholds = Thresholds {
            bullish: clamp_bullish_threshold(bullish)?,
            bearish: clamp_bearish_threshold(bearish)?,
        };
        self.config.bullish_threshold = thresholds.bullish;
        self.config.bearish_threshold = thresholds.bearish;
        self.trend.set_thresholds(thresholds);
        info!(
            bullish = thresholds.bullish,
            bearish = thresholds.bearish,
            "trend thresholds changed, smoothing reset"
        );
        Ok(thresholds)
    }

    /// Clamp the intensity cache capacity and rebuild it empty.
    pub fn set_color_capacity(&mut self, requested: usize) -> Result<usize, ConfigError> {
        self.colors = ColorCache::new(requested)?;
        self.config.color_capacity = self.colors.capacity();
        info!(
            requested,
            capacity = self.config.color_capacity,
            "color capacity changed, intensity cache reset"
        );
        Ok(self.config.color_capacity)
    }

    /// Clamp the direction-flow minimum move and restart every series.
    pub fn set_min_change_pct(&mut self, requested: f64) -> f64 {
        let min_change_pct = clamp_min_change_pct(requested);
        self.config.min_change_pct = min_change_pct;
        self.directions.clear();
        info!(requested, min_change_pct, "min change percent changed, direction flow reset");
        min_change_pct
    }

    /// Clear every store, keeping the configuration.
    pub fn reset(&mut self) {
        self.reset_at(Utc::now());
    }

    pub fn reset_at(&mut self, now: DateTime<Utc>) {
        self.volume.reset(self.config.volume_window(), now);
        self.eaten.clear();
        self.directions.clear();
        self.colors.clear();
        self.trend.reset(self.config.window_size);
        self.last = SignalView::default();
        self.sequence = 0;
        self.last_seen.clear();
        info!("signal engine reset");
    }

    /// Drop per-contract state of contracts that left the chain (strike or expiry rolls).
    fn prune_stale(&mut self) {
        let sequence = self.sequence;
        let before = self.last_seen.len();
        self.last_seen
            .retain(|_, seen| sequence - *seen < STALE_AFTER_SNAPSHOTS);

        let dropped = before - self.last_seen.len();
        if dropped == 0 {
            return;
        }

        let live = &self.last_seen;
        self.volume.retain(|key| live.contains_key(key));
        self.eaten.retain(|key| live.contains_key(key));
        self.directions.retain(|series| match series {
            SeriesKey::Spot => true,
            SeriesKey::Contract(key) => live.contains_key(key),
        });

        debug!(dropped, "dropped state of contracts no longer in the chain");
    }
}

fn thresholds_of(config: &EngineConfig) -> Thresholds {
    Thresholds {
        bullish: config.bullish_threshold,
        bearish: config.bearish_threshold,
    }
}

fn evaluate(
    colors: &mut ColorCache,
    key: &ContractKey,
    field: FieldKey,
    value: Option<f64>,
    range: DayRange,
) -> CellClass {
    value
        .map(|value| colors.evaluate(key, field, value, range))
        .unwrap_or_default()
}
