/// Last-known consumed bid/ask quantities with null-preserving merges.
pub mod eaten;

/// Capacity-bounded (contract, field) intensity and day-extreme halo classes.
pub mod intensity;

/// Fixed-interval incremental volume per contract.
pub mod volume;
