//! Bounded per-segment metric histories feeding the trend engine.

use crate::types::{Contract, MetricField, Segment};
use std::collections::VecDeque;

/// Rolling FIFO window of the last `max_size` samples of one field.
#[derive(Debug, Clone)]
pub struct MetricWindow {
    max_size: usize,
    values: VecDeque<f64>,
}

impl MetricWindow {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            max_size,
            values: VecDeque::with_capacity(max_size),
        }
    }

    /// Append a sample, evicting the oldest when full.
    pub fn push(&mut self, value: f64) {
        if self.values.len() >= self.max_size {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.values.len() == self.max_size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }

    pub fn latest(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
        }
    }

    /// Samples in arrival order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().copied()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// One sample of all six trend fields for a segment. Absent fields are not pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FieldValues([Option<f64>; 6]);

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: MetricField, value: f64) -> Self {
        self.set(field, Some(value));
        self
    }

    pub fn set(&mut self, field: MetricField, value: Option<f64>) {
        self.0[field.index()] = value.filter(|value| value.is_finite());
    }

    pub fn get(&self, field: MetricField) -> Option<f64> {
        self.0[field.index()]
    }

    /// Derive a segment sample from its contracts.
    ///
    /// Futures track the nearest expiry (first listed contract) and only its fields. Option
    /// segments average prices and sum quantities over contracts reporting the field.
    pub fn aggregate(segment: Segment, contracts: &[Contract]) -> Self {
        let mut values = Self::new();

        if segment == Segment::Futures {
            if let Some(front) = contracts.first() {
                for field in MetricField::ALL {
                    values.set(field, front.field(field));
                }
            }
            return values;
        }

        for field in MetricField::ALL {
            let (sum, count) = contracts
                .iter()
                .filter_map(|contract| contract.field(field))
                .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));

            if count == 0 {
                continue;
            }

            let value = if field.is_price() {
                sum / count as f64
            } else {
                sum
            };
            values.set(field, Some(value));
        }

        values
    }
}

/// Metric windows for every (segment, field) pair.
#[derive(Debug, Clone)]
pub struct WindowSet {
    size: usize,
    windows: [[MetricWindow; 6]; 3],
}

impl WindowSet {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            windows: std::array::from_fn(|_| std::array::from_fn(|_| MetricWindow::new(size))),
        }
    }

    /// Push every present field of a segment sample into its window.
    pub fn ingest(&mut self, segment: Segment, values: &FieldValues) {
        for field in MetricField::ALL {
            if let Some(value) = values.get(field) {
                self.windows[segment.index()][field.index()].push(value);
            }
        }
    }

    pub fn window(&self, segment: Segment, field: MetricField) -> &MetricWindow {
        &self.windows[segment.index()][field.index()]
    }

    /// True once every tracked window across all segments holds `size` samples.
    pub fn is_ready(&self) -> bool {
        self.windows.iter().flatten().all(MetricWindow::is_full)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn clear(&mut self) {
        self.windows.iter_mut().flatten().for_each(MetricWindow::clear);
    }
}
