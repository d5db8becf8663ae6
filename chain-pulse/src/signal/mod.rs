/// Per-series turning-point direction and confidence.
pub mod direction;

/// Weighted bullish/bearish trend classification over the metric windows.
pub mod trend;

/// Bounded FIFO histories of the six trend fields per segment.
pub mod window;
