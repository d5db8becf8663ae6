/// Chain Pulse - Options Chain Signal Engine
///
/// Turns periodic futures/options chain snapshots into smoothed, low-noise trading signals:
/// - Sampling scheduler driving the snapshot poll at a configurable cadence
/// - Incremental volume and eaten-quantity stores per contract
/// - Direction-flow detection per series (spot and every contract)
/// - Weighted multi-segment trend classification with hysteresis
/// - Capacity-bounded cell intensity classes for rendering
pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod scheduler;
pub mod signal;
pub mod types;

// Re-export commonly used types for convenience
pub use config::EngineConfig;
pub use engine::{ApplyReport, ContractView, SeriesKey, SignalEngine, SignalView};
pub use error::{ConfigError, FetchError};
pub use feed::{AuthCallback, HttpSnapshotSource, PollStats, SnapshotPoller, SnapshotSource};
pub use scheduler::{GenerationId, GenerationState, PollTask, SamplingScheduler};
pub use types::{Contract, ContractKey, MetricField, Segment, Snapshot};

pub use signal::{
    direction::{Direction, DirectionFlowDetector, DirectionState},
    trend::{Thresholds, Trend, TrendState},
};
