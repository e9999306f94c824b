pub mod config;
pub mod context;
pub mod data;
pub mod early_stopping;
pub mod error;
pub mod graph;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod models;
pub mod reshape;
pub mod schedule;
pub mod train;
pub mod utils;

pub use config::ExperimentConfig;
pub use error::{HarnessError, Result};
pub use train::{EvalReport, Experiment, ModelContext, StopReason, TrainingOutcome, TrainingState};
