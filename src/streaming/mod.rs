//! Streaming support: per-round delta accumulation.

pub mod processor;

pub use processor::{ProcessedDelta, RoundAccumulator};
