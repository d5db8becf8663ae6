//! Cell intensity (heat) classes per contract field.
//!
//! Each rendered cell is tinted by how far its value moved since the previous observation, in
//! three tiers per direction. Percent moves are computed against a field-specific denominator
//! floor so values near zero do not produce absurd percentages. A halo marks values touching
//! the day's high or low.
//!
//! The cache holds at most `capacity` contracts. Every evaluation touches its contract; once the
//! contract count exceeds capacity the least recently touched contract is evicted with all of
//! its fields.

use crate::{
    config::{COLOR_CAPACITY_RANGE, clamp_capacity},
    error::ConfigError,
    types::{ContractKey, parse_number},
};
use derive_more::Display;
use fnv::FnvHashMap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Field class selecting the denominator floor and tier thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldKey {
    #[display("ltp")]
    Ltp,
    #[display("bid")]
    Bid,
    #[display("ask")]
    Ask,
    #[display("volume")]
    Volume,
    #[display("oi")]
    OpenInterest,
    #[display("bidQty")]
    BidQty,
    #[display("askQty")]
    AskQty,
    #[display("eaten")]
    Eaten,
    #[display("change")]
    Change,
    #[display("changePercent")]
    ChangePercent,
}

/// Percent thresholds of one field class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierThresholds {
    pub floor: f64,
    pub soft: f64,
    pub medium: f64,
    pub strong: f64,
}

impl FieldKey {
    pub fn thresholds(&self) -> TierThresholds {
        match self {
            FieldKey::Ltp | FieldKey::Bid | FieldKey::Ask => TierThresholds {
                floor: 0.05,
                soft: 0.05,
                medium: 0.25,
                strong: 0.75,
            },
            FieldKey::Volume => TierThresholds {
                floor: 1.0,
                soft: 0.5,
                medium: 2.0,
                strong: 5.0,
            },
            FieldKey::OpenInterest => TierThresholds {
                floor: 1.0,
                soft: 0.25,
                medium: 1.0,
                strong: 3.0,
            },
            FieldKey::BidQty | FieldKey::AskQty | FieldKey::Eaten => TierThresholds {
                floor: 1.0,
                soft: 2.0,
                medium: 10.0,
                strong: 25.0,
            },
            FieldKey::Change | FieldKey::ChangePercent => TierThresholds {
                floor: 0.05,
                soft: 1.0,
                medium: 5.0,
                strong: 15.0,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Deserialize, Serialize)]
pub enum Tier {
    #[display("soft")]
    Soft,
    #[display("medium")]
    Medium,
    #[display("strong")]
    Strong,
}

/// Directional intensity class of a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum Intensity {
    #[default]
    None,
    Up(Tier),
    Down(Tier),
}

impl Intensity {
    pub fn class_name(&self) -> &'static str {
        match self {
            Intensity::None => "",
            Intensity::Up(Tier::Soft) => "up-soft",
            Intensity::Up(Tier::Medium) => "up-medium",
            Intensity::Up(Tier::Strong) => "up-strong",
            Intensity::Down(Tier::Soft) => "down-soft",
            Intensity::Down(Tier::Medium) => "down-medium",
            Intensity::Down(Tier::Strong) => "down-strong",
        }
    }

    fn from_change(change_pct: f64, thresholds: TierThresholds) -> Self {
        let magnitude = change_pct.abs();
        let tier = if magnitude >= thresholds.strong {
            Tier::Strong
        } else if magnitude >= thresholds.medium {
            Tier::Medium
        } else if magnitude >= thresholds.soft {
            Tier::Soft
        } else {
            return Intensity::None;
        };

        if change_pct > 0.0 {
            Intensity::Up(tier)
        } else {
            Intensity::Down(tier)
        }
    }
}

/// Day-extreme flag, evaluated fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
pub enum Halo {
    #[default]
    None,
    Max,
    Min,
}

impl Halo {
    pub fn class_name(&self) -> &'static str {
        match self {
            Halo::None => "",
            Halo::Max => "halo-max",
            Halo::Min => "halo-min",
        }
    }
}

/// Optional day bounds used for the halo.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DayRange {
    pub high: Option<f64>,
    pub low: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct CellClass {
    pub intensity: Intensity,
    pub halo: Halo,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ColorEntry {
    last_value: f64,
    last_intensity: Intensity,
}

#[derive(Debug, Clone)]
pub struct ColorCache {
    capacity: usize,
    /// Insertion order is recency order: front is least recently touched
    contracts: IndexMap<ContractKey, FnvHashMap<FieldKey, ColorEntry>>,
}

impl ColorCache {
    /// Build a cache with `requested` capacity clamped into the allowed band.
    pub fn new(requested: usize) -> Result<Self, ConfigError> {
        let capacity = clamp_capacity(requested, COLOR_CAPACITY_RANGE.0, COLOR_CAPACITY_RANGE.1)?;
        Ok(Self::with_exact_capacity(capacity))
    }

    pub(crate) fn with_exact_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            contracts: IndexMap::with_capacity(capacity),
        }
    }

    /// Evaluate a loosely typed value, as found in raw payloads.
    pub fn evaluate_raw(&mut self, key: &ContractKey, field: FieldKey, raw: &Value, range: DayRange) -> CellClass {
        match parse_number(raw) {
            Some(value) => self.evaluate(key, field, value, range),
            None => CellClass::default(),
        }
    }

    /// Classify `value` against the previous observation of `(key, field)` and store it.
    pub fn evaluate(&mut self, key: &ContractKey, field: FieldKey, value: f64, range: DayRange) -> CellClass {
        if !value.is_finite() {
            return CellClass::default();
        }

        let fields = self.touch(key);
        let intensity = match fields.get(&field) {
            Some(entry) if entry.last_value == value => entry.last_intensity,
            Some(entry) => {
                let thresholds = field.thresholds();
                let denominator = entry.last_value.abs().max(thresholds.floor);
                Intensity::from_change((value - entry.last_value) / denominator * 100.0, thresholds)
            }
            None => Intensity::None,
        };

        fields.insert(
            field,
            ColorEntry {
                last_value: value,
                last_intensity: intensity,
            },
        );

        self.evict();

        CellClass {
            intensity,
            halo: halo(value, range),
        }
    }

    /// Last class of `(key, field)` without touching recency.
    pub fn peek(&self, key: &ContractKey, field: FieldKey) -> Intensity {
        self.contracts
            .get(key)
            .and_then(|fields| fields.get(&field))
            .map(|entry| entry.last_intensity)
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &ContractKey) -> bool {
        self.contracts.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.contracts.clear();
    }

    /// Move `key` to the most recent position, inserting it if absent.
    fn touch(&mut self, key: &ContractKey) -> &mut FnvHashMap<FieldKey, ColorEntry> {
        let index = match self.contracts.get_index_of(key) {
            Some(index) => {
                let last = self.contracts.len() - 1;
                self.contracts.move_index(index, last);
                last
            }
            None => self.contracts.insert_full(key.clone(), FnvHashMap::default()).0,
        };

        &mut self.contracts[index]
    }

    fn evict(&mut self) {
        while self.contracts.len() > self.capacity {
            if let Some((evicted, _)) = self.contracts.shift_remove_index(0) {
                debug!(%evicted, capacity = self.capacity, "evicted least recently touched contract");
            }
        }
    }
}

fn halo(value: f64, range: DayRange) -> Halo {
    match (range.high, range.low) {
        (Some(high), _) if value >= high => Halo::Max,
        (_, Some(low)) if value <= low => Halo::Min,
        _ => Halo::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(id: usize) -> ContractKey {
        ContractKey::resolve(Some(id.to_string().as_str()), None).unwrap()
    }

    #[test]
    fn test_first_observation_has_no_class() {
        let mut cache = ColorCache::with_exact_capacity(10);
        let class = cache.evaluate(&key(1), FieldKey::Ltp, 100.0, DayRange::default());
        assert_eq!(class, CellClass::default());
    }

    #[test]
    fn test_tiers() {
        struct TestCase {
            field: FieldKey,
            from: f64,
            to: f64,
            expected: Intensity,
        }

        let tests = vec![
            TestCase {
                // TC0: 0.1% price move
                field: FieldKey::Ltp,
                from: 100.0,
                to: 100.1,
                expected: Intensity::Up(Tier::Soft),
            },
            TestCase {
                // TC1: 1% price drop
                field: FieldKey::Ltp,
                from: 100.0,
                to: 99.0,
                expected: Intensity::Down(Tier::Strong),
            },
            TestCase {
                // TC2: 0.3% volume move stays below soft
                field: FieldKey::Volume,
                from: 1_000.0,
                to: 1_003.0,
                expected: Intensity::None,
            },
            TestCase {
                // TC3: 3% volume move
                field: FieldKey::Volume,
                from: 1_000.0,
                to: 1_030.0,
                expected: Intensity::Up(Tier::Medium),
            },
            TestCase {
                // TC4: denominator floor keeps 0 -> 0.1 change percent from exploding
                field: FieldKey::ChangePercent,
                from: 0.0,
                to: 0.1,
                expected: Intensity::Up(Tier::Strong),
            },
            TestCase {
                // TC5: eaten 0 -> 0.01 is below soft thanks to the floor of 1
                field: FieldKey::Eaten,
                from: 0.0,
                to: 0.01,
                expected: Intensity::None,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut cache = ColorCache::with_exact_capacity(10);
            cache.evaluate(&key(1), test.field, test.from, DayRange::default());
            let class = cache.evaluate(&key(1), test.field, test.to, DayRange::default());
            assert_eq!(class.intensity, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_unchanged_value_keeps_class() {
        let mut cache = ColorCache::with_exact_capacity(10);
        cache.evaluate(&key(1), FieldKey::Ltp, 100.0, DayRange::default());
        cache.evaluate(&key(1), FieldKey::Ltp, 101.0, DayRange::default());
        let class = cache.evaluate(&key(1), FieldKey::Ltp, 101.0, DayRange::default());
        assert_eq!(class.intensity, Intensity::Up(Tier::Strong));
        assert_eq!(class.intensity.class_name(), "up-strong");
    }

    #[test]
    fn test_halo_is_fresh_each_call() {
        let mut cache = ColorCache::with_exact_capacity(10);
        let range = DayRange {
            high: Some(105.0),
            low: Some(95.0),
        };

        assert_eq!(cache.evaluate(&key(1), FieldKey::Ltp, 105.0, range).halo, Halo::Max);
        assert_eq!(cache.evaluate(&key(1), FieldKey::Ltp, 100.0, range).halo, Halo::None);
        assert_eq!(cache.evaluate(&key(1), FieldKey::Ltp, 95.0, range).halo, Halo::Min);
        assert_eq!(cache.evaluate(&key(1), FieldKey::Ltp, 90.0, DayRange::default()).halo, Halo::None);
        assert_eq!(Halo::Min.class_name(), "halo-min");
    }

    #[test]
    fn test_unparseable_raw_value_is_a_no_op() {
        let mut cache = ColorCache::with_exact_capacity(10);
        let class = cache.evaluate_raw(&key(1), FieldKey::Ltp, &json!("--"), DayRange::default());
        assert_eq!(class, CellClass::default());
        assert!(cache.is_empty());

        cache.evaluate_raw(&key(1), FieldKey::Ltp, &json!("100"), DayRange::default());
        let class = cache.evaluate_raw(&key(1), FieldKey::Ltp, &json!(99.0), DayRange::default());
        assert_eq!(class.intensity, Intensity::Down(Tier::Strong));
    }

    #[test]
    fn test_evicts_least_recently_touched() {
        let capacity = 3;
        let mut cache = ColorCache::with_exact_capacity(capacity);

        for id in 0..capacity {
            cache.evaluate(&key(id), FieldKey::Ltp, 100.0, DayRange::default());
            cache.evaluate(&key(id), FieldKey::Volume, 10.0, DayRange::default());
        }

        // touch contract 0 so contract 1 becomes least recent
        cache.evaluate(&key(0), FieldKey::Ltp, 101.0, DayRange::default());
        cache.evaluate(&key(capacity), FieldKey::Ltp, 100.0, DayRange::default());

        assert_eq!(cache.len(), capacity);
        assert!(!cache.contains(&key(1)));
        assert!(cache.contains(&key(0)));
        assert!(cache.contains(&key(2)));

        // evicted contract starts over: no prior value, no class
        let class = cache.evaluate(&key(1), FieldKey::Ltp, 150.0, DayRange::default());
        assert_eq!(class.intensity, Intensity::None);
        assert_eq!(cache.peek(&key(1), FieldKey::Volume), Intensity::None);
    }

    #[test]
    fn test_capacity_is_clamped() {
        assert_eq!(ColorCache::new(1).unwrap().capacity(), COLOR_CAPACITY_RANGE.0);
        assert_eq!(ColorCache::new(1_000_000).unwrap().capacity(), COLOR_CAPACITY_RANGE.1);
    }
}
