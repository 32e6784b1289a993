//! Per-monitor reading analysis: rolling statistics and edge-triggered
//! anomaly detection. Both are plain state machines owned by a single runner.

pub mod detector;
pub mod stats;

pub use detector::{Evaluation, EventDetector};
pub use stats::{RollingStats, StatsSnapshot};
