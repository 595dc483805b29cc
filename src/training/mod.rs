//! Training loop, run state and metrics

pub mod history;
pub mod metrics;
pub mod trainer;

pub use history::{EpochMetrics, RunPhase, TrainingReport, TrainingRun};
pub use metrics::{count_correct, EpochAccumulator};
pub use trainer::Trainer;
