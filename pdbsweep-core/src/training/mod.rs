//! Training sweeps: run configurations, sweeps, the runner, and run records.

pub mod experiment;
pub mod model;
pub mod run_config;
pub mod runner;
pub mod scores;
pub mod sweep;

pub use experiment::{RunLedger, RunRecord, RunStatus, SweepReport};
pub use model::{DatasetName, FastDevRun, InputType, ModelName, Precision};
pub use run_config::{Finding, RunConfig, Severity};
pub use runner::{RunnerOptions, SweepRunner};
pub use scores::TrainerScores;
pub use sweep::{Sweep, SweepDefaults};
