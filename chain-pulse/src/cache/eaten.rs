//! Last-known consumed (eaten) bid/ask quantities per contract.
//!
//! Poll payloads intermittently omit the eaten fields. An absent field keeps the stored value so
//! the dashboard never flickers to empty; a present value, zero included, always replaces it.

use crate::types::ContractKey;
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};

/// Merged eaten quantities for one contract.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize, Serialize)]
pub struct EatenValues {
    /// Net consumed quantity
    pub eaten_delta: Option<f64>,
    pub bid_eaten: Option<f64>,
    pub ask_eaten: Option<f64>,
}

impl EatenValues {
    fn merge(&mut self, incoming: EatenValues) {
        merge_field(&mut self.eaten_delta, incoming.eaten_delta);
        merge_field(&mut self.bid_eaten, incoming.bid_eaten);
        merge_field(&mut self.ask_eaten, incoming.ask_eaten);
    }
}

fn merge_field(stored: &mut Option<f64>, incoming: Option<f64>) {
    if let Some(value) = incoming.filter(|value| value.is_finite()) {
        *stored = Some(value);
    }
}

#[derive(Debug, Clone, Default)]
pub struct EatenQuantityCache {
    entries: FnvHashMap<ContractKey, EatenValues>,
}

impl EatenQuantityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge an observation and return the contract's current values.
    pub fn update(
        &mut self,
        key: &ContractKey,
        eaten_delta: Option<f64>,
        bid_eaten: Option<f64>,
        ask_eaten: Option<f64>,
    ) -> EatenValues {
        let incoming = EatenValues {
            eaten_delta,
            bid_eaten,
            ask_eaten,
        };

        match self.entries.get_mut(key) {
            Some(stored) => {
                stored.merge(incoming);
                *stored
            }
            None => {
                let mut stored = EatenValues::default();
                stored.merge(incoming);
                self.entries.insert(key.clone(), stored);
                stored
            }
        }
    }

    pub fn get(&self, key: &ContractKey) -> EatenValues {
        self.entries.get(key).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ContractKey, &EatenValues)> {
        self.entries.iter()
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ContractKey) -> bool) {
        self.entries.retain(|key, _| keep(key));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
