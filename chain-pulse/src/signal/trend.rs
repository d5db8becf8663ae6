//! Weighted multi-segment trend scoring and classification.
//!
//! Each segment (futures, calls, puts) is scored from its metric windows: every field's latest
//! value is compared against its window mean and converted into a trinary direction, then the
//! directions are combined with fixed weights. Segment scores are blended twice (one blend
//! leaning on calls, one on puts) and the blends are classified against the configured
//! thresholds, with a 3-slot majority vote smoothing non-crossing results.

use super::window::{FieldValues, MetricWindow, WindowSet};
use crate::types::{MetricField, Segment};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::debug;

/// Percent change versus the window mean below which a field counts as flat.
pub const FIELD_DEADBAND_PCT: f64 = 0.1;

pub const WEIGHT_LTP: f64 = 3.0;
pub const WEIGHT_VOL: f64 = 2.0;
pub const WEIGHT_BID: f64 = 2.0;
pub const WEIGHT_QTY: f64 = 1.0;

/// Ask direction scales the running score by `1 ± ASK_SOFT_FACTOR`; it never flips its sign.
pub const ASK_SOFT_FACTOR: f64 = 0.15;

/// Added (times polarity) when the bid/ask depth ratio leaves [`DEPTH_BAND`].
pub const DEPTH_TILT: f64 = 0.3;
pub const DEPTH_BAND: (f64, f64) = (0.8, 1.2);

/// Largest raw segment magnitude attainable, used to normalise into [-10, 10].
pub const MAX_SEGMENT_RAW: f64 =
    (WEIGHT_LTP + WEIGHT_VOL + WEIGHT_BID + 2.0 * WEIGHT_QTY) * (1.0 + ASK_SOFT_FACTOR) + DEPTH_TILT;

/// Segment weights (futures, calls, puts) of the bullish-leaning blend.
pub const BULLISH_BLEND: [f64; 3] = [0.45, 0.35, 0.20];

/// Segment weights (futures, calls, puts) of the bearish-leaning blend.
pub const BEARISH_BLEND: [f64; 3] = [0.45, 0.20, 0.35];

pub const SCORE_LIMIT: f64 = 10.0;

const SMOOTHING_SLOTS: usize = 3;

/// Trend classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Deserialize, Serialize)]
pub enum Trend {
    #[display("BULLISH")]
    Bullish,
    #[display("BEARISH")]
    Bearish,
    #[default]
    #[display("NEUTRAL")]
    Neutral,
}

impl Trend {
    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::Bullish => "▲",
            Trend::Bearish => "▼",
            Trend::Neutral => "→",
        }
    }
}

/// Bullish and bearish blend thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct Thresholds {
    pub bullish: f64,
    pub bearish: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            bullish: 2.0,
            bearish: -2.0,
        }
    }
}

/// Trend output exposed per render tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct TrendState {
    pub classification: Trend,
    /// Reported score in [-10, 10]
    pub score: f64,
    pub bullish_blend: f64,
    pub bearish_blend: f64,
    /// Normalised segment scores (futures, calls, puts)
    pub segment_scores: [f64; 3],
    /// True when this classification came from an actual threshold crossing
    pub crossed: bool,
}

/// Maintains the metric windows and the smoothing ring, and classifies on demand.
#[derive(Debug, Clone)]
pub struct TrendEngine {
    windows: WindowSet,
    thresholds: Thresholds,
    history: VecDeque<Trend>,
    state: TrendState,
}

impl TrendEngine {
    pub fn new(window_size: usize, thresholds: Thresholds) -> Self {
        Self {
            windows: WindowSet::new(window_size),
            thresholds,
            history: VecDeque::with_capacity(SMOOTHING_SLOTS),
            state: TrendState::default(),
        }
    }

    pub fn ingest(&mut self, segment: Segment, values: &FieldValues) {
        self.windows.ingest(segment, values);
    }

    /// Recompute the trend once every window is full; until then the previous state is kept.
    pub fn classify(&mut self) -> TrendState {
        if !self.windows.is_ready() {
            return self.state;
        }

        let segment_scores = Segment::ALL.map(|segment| segment_score(&self.windows, segment));
        let (bullish_blend, bearish_blend) = blend(segment_scores);
        let (raw, score, crossed) = decide(bullish_blend, bearish_blend, self.thresholds);

        if self.history.len() >= SMOOTHING_SLOTS {
            self.history.pop_front();
        }
        self.history.push_back(raw);

        let classification = if crossed {
            raw
        } else {
            majority(&self.history).unwrap_or(Trend::Neutral)
        };

        debug!(
            %raw,
            %classification,
            bullish_blend,
            bearish_blend,
            "trend classified"
        );

        self.state = TrendState {
            classification,
            score,
            bullish_blend,
            bearish_blend,
            segment_scores,
            crossed,
        };
        self.state
    }

    pub fn state(&self) -> TrendState {
        self.state
    }

    pub fn windows(&self) -> &WindowSet {
        &self.windows
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    /// Replace the thresholds; the smoothing ring and state restart from scratch.
    pub fn set_thresholds(&mut self, thresholds: Thresholds) {
        self.thresholds = thresholds;
        self.history.clear();
        self.state = TrendState::default();
    }

    /// Rebuild every window at a new size and discard all history.
    pub fn reset(&mut self, window_size: usize) {
        self.windows = WindowSet::new(window_size);
        self.history.clear();
        self.state = TrendState::default();
    }
}

/// Percent change of the latest sample versus the window mean.
pub fn pct_vs_mean(window: &MetricWindow) -> Option<f64> {
    let latest = window.latest()?;
    let mean = window.mean()?;
    if mean.abs() < f64::EPSILON {
        return None;
    }
    Some((latest - mean) / mean.abs() * 100.0)
}

/// Trinary field direction with a [`FIELD_DEADBAND_PCT`] deadband.
pub fn field_direction(window: &MetricWindow) -> f64 {
    match pct_vs_mean(window) {
        Some(pct) if pct > FIELD_DEADBAND_PCT => 1.0,
        Some(pct) if pct < -FIELD_DEADBAND_PCT => -1.0,
        _ => 0.0,
    }
}

/// Normalised score of one segment in [-10, 10].
pub fn segment_score(windows: &WindowSet, segment: Segment) -> f64 {
    let polarity = segment.polarity();
    let direction = |field: MetricField| field_direction(windows.window(segment, field));

    let mut raw = 0.0;
    raw += polarity * direction(MetricField::Ltp) * WEIGHT_LTP;
    raw += polarity * direction(MetricField::Vol) * WEIGHT_VOL;
    raw += polarity * direction(MetricField::Bid) * WEIGHT_BID;
    raw += polarity * direction(MetricField::BidQty) * WEIGHT_QTY;
    // Growing ask size is supply building up
    raw -= polarity * direction(MetricField::AskQty) * WEIGHT_QTY;

    let ask = polarity * direction(MetricField::Ask);
    if raw != 0.0 && ask != 0.0 {
        if ask.signum() == raw.signum() {
            raw *= 1.0 + ASK_SOFT_FACTOR;
        } else {
            raw *= 1.0 - ASK_SOFT_FACTOR;
        }
    }

    let bid_qty = windows.window(segment, MetricField::BidQty).latest();
    let ask_qty = windows.window(segment, MetricField::AskQty).latest();
    if let (Some(bid_qty), Some(ask_qty)) = (bid_qty, ask_qty) {
        if ask_qty > 0.0 {
            let ratio = bid_qty / ask_qty;
            if ratio > DEPTH_BAND.1 {
                raw += polarity * DEPTH_TILT;
            } else if ratio < DEPTH_BAND.0 {
                raw -= polarity * DEPTH_TILT;
            }
        }
    }

    (raw / MAX_SEGMENT_RAW * SCORE_LIMIT).clamp(-SCORE_LIMIT, SCORE_LIMIT)
}

/// Blend segment scores into the (bullish, bearish) composite scores.
pub fn blend(segment_scores: [f64; 3]) -> (f64, f64) {
    let weighted = |weights: [f64; 3]| {
        weights
            .iter()
            .zip(segment_scores.iter())
            .map(|(weight, score)| weight * score)
            .sum::<f64>()
            .clamp(-SCORE_LIMIT, SCORE_LIMIT)
    };
    (weighted(BULLISH_BLEND), weighted(BEARISH_BLEND))
}

/// Classify a pair of blends, returning `(classification, reported score, crossed)`.
pub fn decide(bullish_blend: f64, bearish_blend: f64, thresholds: Thresholds) -> (Trend, f64, bool) {
    let bullish_crossed = bullish_blend >= thresholds.bullish;
    let bearish_crossed = bearish_blend <= thresholds.bearish;
    let bullish_dominant = bullish_blend.abs() >= bearish_blend.abs();

    match (bullish_crossed, bearish_crossed) {
        (true, true) if bullish_dominant => (Trend::Bullish, bullish_blend, true),
        (true, true) => (Trend::Bearish, bearish_blend, true),
        (true, false) => (Trend::Bullish, bullish_blend, true),
        (false, true) => (Trend::Bearish, bearish_blend, true),
        (false, false) if bullish_dominant => (Trend::Neutral, bullish_blend, false),
        (false, false) => (Trend::Neutral, bearish_blend, false),
    }
}

/// Classification held by at least two of the ring's slots.
fn majority(history: &VecDeque<Trend>) -> Option<Trend> {
    [Trend::Bullish, Trend::Bearish, Trend::Neutral]
        .into_iter()
        .find(|trend| history.iter().filter(|seen| *seen == trend).count() >= 2)
}
