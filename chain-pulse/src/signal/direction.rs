//! Turning-point direction detection for numeric series.
//!
//! Raw tick deltas are too noisy to render as momentum, so each series records only moves
//! larger than a minimum percent change, keeps the last five of them, and classifies the
//! adjacent-pair patterns (higher-high, higher-low, lower-high, lower-low) found in that ring.

use derive_more::Display;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, hash::Hash};

const MOVE_SLOTS: usize = 5;
const SWITCH_SLOTS: usize = 2;

/// Confidence multiplier when both supporting patterns are present.
pub const PATTERN_BOOST: f64 = 1.2;

/// Confidence per percent of move while fewer than two moves are recorded.
pub const SINGLE_MOVE_CONFIDENCE_PER_PCT: f64 = 50.0;
pub const MIN_CONFIDENCE: f64 = 1.0;
pub const MAX_CONFIDENCE: f64 = 100.0;

/// Series direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, Deserialize, Serialize)]
pub enum Direction {
    #[display("UP")]
    Up,
    #[display("DOWN")]
    Down,
    #[default]
    #[display("NEUTRAL")]
    Neutral,
}

impl Direction {
    fn opposes(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Up, Direction::Down) | (Direction::Down, Direction::Up)
        )
    }
}

/// Direction and confidence (0-100) of one series.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct DirectionState {
    pub direction: Direction,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Move {
    Up,
    Down,
}

/// Adjacent-pair patterns present in the move ring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Patterns {
    higher_high: bool,
    higher_low: bool,
    lower_high: bool,
    lower_low: bool,
}

impl Patterns {
    fn scan(moves: &VecDeque<Move>) -> Self {
        let mut patterns = Self::default();
        for (prev, next) in moves.iter().zip(moves.iter().skip(1)) {
            match (prev, next) {
                (Move::Up, Move::Up) => patterns.higher_high = true,
                (Move::Up, Move::Down) => patterns.higher_low = true,
                (Move::Down, Move::Up) => patterns.lower_high = true,
                (Move::Down, Move::Down) => patterns.lower_low = true,
            }
        }
        patterns
    }

    fn bullish(&self) -> bool {
        self.higher_high || self.higher_low
    }

    fn bearish(&self) -> bool {
        self.lower_high || self.lower_low
    }
}

#[derive(Debug, Clone, Default)]
struct SeriesState {
    /// Last finite value observed, flat steps included
    reference: Option<f64>,
    moves: VecDeque<Move>,
    switches: VecDeque<Direction>,
    state: DirectionState,
}

/// Per-series turning-point detector.
#[derive(Debug, Clone)]
pub struct DirectionFlowDetector<K> {
    series: FnvHashMap<K, SeriesState>,
}

impl<K> Default for DirectionFlowDetector<K> {
    fn default() -> Self {
        Self {
            series: FnvHashMap::default(),
        }
    }
}

impl<K> DirectionFlowDetector<K>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Observe a new value for `series`.
    ///
    /// Unparseable or non-finite values yield a neutral result without touching the series.
    pub fn observe(&mut self, series: K, value: Option<f64>, min_change_pct: f64) -> DirectionState {
        let Some(value) = value.filter(|value| value.is_finite()) else {
            return DirectionState::default();
        };

        let entry = self.series.entry(series).or_default();

        let reference = match entry.reference.replace(value) {
            Some(reference) if reference.abs() > f64::EPSILON => reference,
            _ => return entry.state,
        };

        let change_pct = (value - reference) / reference.abs() * 100.0;
        if change_pct.abs() < min_change_pct || change_pct == 0.0 {
            return entry.state;
        }

        let movement = if change_pct > 0.0 { Move::Up } else { Move::Down };

        if entry.moves.len() >= MOVE_SLOTS {
            entry.moves.pop_front();
        }
        entry.moves.push_back(movement);

        if entry.moves.len() < 2 {
            let direction = match movement {
                Move::Up => Direction::Up,
                Move::Down => Direction::Down,
            };
            entry.state = DirectionState {
                direction,
                confidence: (change_pct.abs() * SINGLE_MOVE_CONFIDENCE_PER_PCT)
                    .clamp(MIN_CONFIDENCE, MAX_CONFIDENCE),
            };
            entry.switches.clear();
            entry.switches.push_back(direction);
            return entry.state;
        }

        let candidate = classify(&entry.moves);

        if entry.switches.len() >= SWITCH_SLOTS {
            entry.switches.pop_front();
        }
        entry.switches.push_back(candidate.direction);

        let confirmed = entry.switches.len() == SWITCH_SLOTS
            && entry
                .switches
                .iter()
                .all(|direction| *direction == candidate.direction);

        if !entry.state.direction.opposes(candidate.direction) || confirmed {
            entry.state = candidate;
        }

        entry.state
    }

    /// Last emitted state of a series.
    pub fn state(&self, series: &K) -> DirectionState {
        self.series
            .get(series)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }

    pub fn states(&self) -> impl Iterator<Item = (&K, DirectionState)> {
        self.series.iter().map(|(key, entry)| (key, entry.state))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.series.retain(|series, _| keep(series));
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn clear(&mut self) {
        self.series.clear();
    }
}

/// Classify a ring holding at least two moves. Bullish patterns take precedence.
fn classify(moves: &VecDeque<Move>) -> DirectionState {
    let patterns = Patterns::scan(moves);
    let ups = moves.iter().filter(|movement| **movement == Move::Up).count();
    let downs = moves.len() - ups;

    let direction = if patterns.bullish() {
        Direction::Up
    } else if patterns.bearish() {
        Direction::Down
    } else {
        Direction::Neutral
    };

    let (share, boosted) = match direction {
        Direction::Up => (ups, patterns.higher_high && patterns.higher_low),
        Direction::Down => (downs, patterns.lower_high && patterns.lower_low),
        Direction::Neutral => return DirectionState::default(),
    };

    let mut confidence = share as f64 / moves.len() as f64 * 100.0;
    if boosted {
        confidence *= PATTERN_BOOST;
    }

    DirectionState {
        direction,
        confidence: confidence.clamp(0.0, MAX_CONFIDENCE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN_PCT: f64 = 0.1;

    fn feed(detector: &mut DirectionFlowDetector<&'static str>, values: &[f64]) -> DirectionState {
        values
            .iter()
            .map(|value| detector.observe("ltp", Some(*value), MIN_PCT))
            .last()
            .unwrap_or_default()
    }

    #[test]
    fn test_up_up_is_up() {
        let mut detector = DirectionFlowDetector::new();
        let state = feed(&mut detector, &[100.0, 101.0, 102.0]);
        assert_eq!(state.direction, Direction::Up);
        assert_eq!(state.confidence, 100.0);
    }

    #[test]
    fn test_down_down_is_down() {
        let mut detector = DirectionFlowDetector::new();
        let state = feed(&mut detector, &[100.0, 99.0, 98.0]);
        assert_eq!(state.direction, Direction::Down);
        assert_eq!(state.confidence, 100.0);
    }

    #[test]
    fn test_single_move_reported_immediately() {
        let mut detector = DirectionFlowDetector::new();
        assert_eq!(feed(&mut detector, &[100.0]), DirectionState::default());

        let state = feed(&mut detector, &[100.5]);
        assert_eq!(state.direction, Direction::Up);
        assert!((state.confidence - 25.0).abs() < 1e-9);

        let mut detector = DirectionFlowDetector::new();
        let state = feed(&mut detector, &[100.0, 100.11]);
        assert_eq!(state.direction, Direction::Up);
        assert!(state.confidence >= MIN_CONFIDENCE);
    }

    #[test]
    fn test_flat_steps_are_not_recorded() {
        let mut detector = DirectionFlowDetector::new();
        let state = feed(&mut detector, &[100.0, 100.01, 100.02, 99.99]);
        assert_eq!(state, DirectionState::default());
    }

    #[test]
    fn test_sub_threshold_steps_never_accumulate() {
        let mut detector = DirectionFlowDetector::new();
        // each step is ~0.05% against the previous observation
        let state = feed(&mut detector, &[100.0, 100.05, 100.10, 100.15]);
        assert_eq!(state, DirectionState::default());
    }

    #[test]
    fn test_bullish_pattern_takes_precedence() {
        let mut detector = DirectionFlowDetector::new();
        // moves: U, D, D, D -> higher-low present alongside lower-lows
        let state = feed(&mut detector, &[100.0, 101.0, 100.0, 99.0, 98.0]);
        assert_eq!(state.direction, Direction::Up);
        assert!((state.confidence - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_direct_switch_requires_two_confirmations() {
        let mut detector = DirectionFlowDetector::new();
        assert_eq!(feed(&mut detector, &[100.0, 101.0, 102.0]).direction, Direction::Up);

        // up moves still in the ring keep a bullish pattern
        for value in [101.0, 100.0, 99.0, 98.0] {
            assert_eq!(feed(&mut detector, &[value]).direction, Direction::Up);
        }

        // ring [D, D, D, D, D]: first down vote is held back
        assert_eq!(feed(&mut detector, &[97.0]).direction, Direction::Up);

        // second consecutive down vote switches
        let state = feed(&mut detector, &[96.0]);
        assert_eq!(state.direction, Direction::Down);
        assert!((state.confidence - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_boost_when_both_patterns_present() {
        let mut detector = DirectionFlowDetector::new();
        // moves: U, U, D, U -> HH and HL present, 3 of 4 up
        let state = feed(&mut detector, &[100.0, 101.0, 102.0, 101.0, 102.0]);
        assert_eq!(state.direction, Direction::Up);
        assert!((state.confidence - 75.0 * PATTERN_BOOST).abs() < 1e-9);
    }

    #[test]
    fn test_unparseable_value_is_neutral_and_ignored() {
        let mut detector = DirectionFlowDetector::new();
        feed(&mut detector, &[100.0, 101.0, 102.0]);

        assert_eq!(detector.observe("ltp", None, MIN_PCT), DirectionState::default());
        assert_eq!(detector.observe("ltp", Some(f64::NAN), MIN_PCT), DirectionState::default());
        assert_eq!(detector.state(&"ltp").direction, Direction::Up);
        assert_eq!(detector.state(&"other"), DirectionState::default());
    }
}
