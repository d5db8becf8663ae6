//! Runtime configuration for a dashboard session.
//!
//! Every value is normalised into its allowed range before use: polling intervals and trend
//! window sizes snap to a discrete set, everything else clamps to a bounded range.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::{str::FromStr, time::Duration};

/// Polling intervals the dashboard offers (milliseconds).
pub const POLL_INTERVALS_MS: [u64; 6] = [250, 500, 1_000, 2_000, 3_000, 5_000];

/// Trend-averaging window sizes (samples).
pub const WINDOW_SIZES: [usize; 5] = [3, 6, 9, 12, 15];

pub const VOLUME_WINDOW_MIN_RANGE: (u64, u64) = (1, 10);
pub const BULLISH_THRESHOLD_RANGE: (f64, f64) = (0.5, 10.0);
pub const BEARISH_THRESHOLD_RANGE: (f64, f64) = (-10.0, -0.5);
pub const COLOR_CAPACITY_RANGE: (usize, usize) = (50, 5_000);
pub const MIN_CHANGE_PCT_RANGE: (f64, f64) = (0.001, 5.0);

/// Session configuration consumed by the [`SignalEngine`](crate::engine::SignalEngine) and the
/// [`SamplingScheduler`](crate::scheduler::SamplingScheduler).
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineConfig {
    /// Poll cadence in milliseconds
    pub poll_interval_ms: u64,
    /// Trend-averaging window size in samples
    pub window_size: usize,
    /// Incremental volume reset interval in minutes
    pub volume_window_min: u64,
    /// Bullish blend must reach this score to count as a bullish crossing
    pub bullish_threshold: f64,
    /// Bearish blend must reach this (negative) score to count as a bearish crossing
    pub bearish_threshold: f64,
    /// Maximum number of distinct contracts kept by the intensity cache
    pub color_capacity: usize,
    /// Minimum percent move recorded by the direction-flow detector
    pub min_change_pct: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            window_size: 6,
            volume_window_min: 5,
            bullish_threshold: 2.0,
            bearish_threshold: -2.0,
            color_capacity: 500,
            min_change_pct: 0.02,
        }
    }
}

impl EngineConfig {
    /// Build a configuration from `CHAIN_*` environment variables on top of the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = env_var("CHAIN_POLL_INTERVAL_MS")? {
            config.poll_interval_ms = value;
        }
        if let Some(value) = env_var("CHAIN_WINDOW_SIZE")? {
            config.window_size = value;
        }
        if let Some(value) = env_var("CHAIN_VOLUME_WINDOW_MIN")? {
            config.volume_window_min = value;
        }
        if let Some(value) = env_var("CHAIN_BULLISH_THRESHOLD")? {
            config.bullish_threshold = value;
        }
        if let Some(value) = env_var("CHAIN_BEARISH_THRESHOLD")? {
            config.bearish_threshold = value;
        }
        if let Some(value) = env_var("CHAIN_COLOR_CAPACITY")? {
            config.color_capacity = value;
        }
        if let Some(value) = env_var("CHAIN_MIN_CHANGE_PCT")? {
            config.min_change_pct = value;
        }

        config.normalised()
    }

    /// Snap and clamp every field into its allowed range.
    pub fn normalised(self) -> Result<Self, ConfigError> {
        Ok(Self {
            poll_interval_ms: snap_poll_interval(self.poll_interval_ms),
            window_size: snap_window_size(self.window_size),
            volume_window_min: clamp_volume_window(self.volume_window_min),
            bullish_threshold: clamp_bullish_threshold(self.bullish_threshold)?,
            bearish_threshold: clamp_bearish_threshold(self.bearish_threshold)?,
            color_capacity: clamp_capacity(
                self.color_capacity,
                COLOR_CAPACITY_RANGE.0,
                COLOR_CAPACITY_RANGE.1,
            )?,
            min_change_pct: clamp_min_change_pct(self.min_change_pct),
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn volume_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.volume_window_min as i64)
    }
}

/// Snap a requested interval to the nearest allowed polling interval (ties pick the faster).
pub fn snap_poll_interval(requested_ms: u64) -> u64 {
    POLL_INTERVALS_MS
        .iter()
        .copied()
        .min_by_key(|allowed| allowed.abs_diff(requested_ms))
        .unwrap_or(POLL_INTERVALS_MS[2])
}

/// Snap a requested window size to the nearest step of 3 within 3..=15.
pub fn snap_window_size(requested: usize) -> usize {
    WINDOW_SIZES
        .iter()
        .copied()
        .min_by_key(|allowed| allowed.abs_diff(requested))
        .unwrap_or(WINDOW_SIZES[1])
}

pub fn clamp_volume_window(requested_min: u64) -> u64 {
    requested_min.clamp(VOLUME_WINDOW_MIN_RANGE.0, VOLUME_WINDOW_MIN_RANGE.1)
}

pub fn clamp_bullish_threshold(requested: f64) -> Result<f64, ConfigError> {
    finite("bullish_threshold", requested)
        .map(|value| value.clamp(BULLISH_THRESHOLD_RANGE.0, BULLISH_THRESHOLD_RANGE.1))
}

pub fn clamp_bearish_threshold(requested: f64) -> Result<f64, ConfigError> {
    finite("bearish_threshold", requested)
        .map(|value| value.clamp(BEARISH_THRESHOLD_RANGE.0, BEARISH_THRESHOLD_RANGE.1))
}

pub fn clamp_min_change_pct(requested: f64) -> f64 {
    if requested.is_finite() {
        requested.clamp(MIN_CHANGE_PCT_RANGE.0, MIN_CHANGE_PCT_RANGE.1)
    } else {
        EngineConfig::default().min_change_pct
    }
}

/// Clamp a requested cache capacity into `[min, max]`.
///
/// A band whose minimum exceeds its maximum is a configuration error: clamping against it
/// would yield a capacity outside the intended range.
pub fn clamp_capacity(requested: usize, min: usize, max: usize) -> Result<usize, ConfigError> {
    if min > max {
        return Err(ConfigError::InvalidCapacityBand { min, max });
    }
    Ok(requested.clamp(min, max))
}

fn finite(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ConfigError::NonFiniteThreshold { name, value })
    }
}

fn env_var<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
        Err(_) => Ok(None),
    }
}
