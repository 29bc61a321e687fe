//! # pdbsweep-core
//!
//! Launches a protein–ligand affinity trainer (`train.py`) once per run of a
//! sweep over model architecture (GVP, HGVP and their multistage variants),
//! numeric precision, residue featurizer, and the energy-decoder /
//! heterogeneous-graph switches.
//!
//! Runs execute sequentially; a failed run is recorded and the sweep moves on.
//! The trainer itself (models, data loading, the training loop) is external.

pub mod config;
pub mod error;
pub mod runtime;
pub mod training;

pub use config::{load_settings, SettingsOverrides, SweepSettings};
pub use error::{Result, SweepError};
pub use runtime::{PythonEnvironment, TrainerLauncher};
pub use training::{
    RunConfig, RunLedger, RunRecord, RunStatus, RunnerOptions, Sweep, SweepReport, SweepRunner,
};
