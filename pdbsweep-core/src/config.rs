//! Configuration for pdbsweep.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> workspace
//! config -> explicit `--config` file -> environment -> CLI overrides. Files are
//! `config.toml` in the user config directory and `.pdbsweep/config.toml` in the
//! workspace.

use crate::error::{Result, SweepError};
use crate::runtime::PythonEnvironment;
use crate::training::SweepDefaults;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Workspace directory holding config and ledger.
pub const WORKSPACE_DIR: &str = ".pdbsweep";

/// Settings shared by every run of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSettings {
    /// Trainer entry point, relative to the workspace.
    #[serde(default = "default_trainer_script")]
    pub trainer_script: PathBuf,
    #[serde(default = "default_accelerator")]
    pub accelerator: String,
    /// GPUs requested per run.
    #[serde(default = "default_devices")]
    pub devices: u32,
    /// PIGNet-parsed PDBBind directory passed as `--data_dir`.
    #[serde(default = "default_pdbbind_data")]
    pub pdbbind_data: PathBuf,
    /// Sweep file to use instead of the built-in sweep.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_file: Option<PathBuf>,
    #[serde(default)]
    pub fail_fast: bool,
    /// Per-run limit in seconds; unset means no limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Ledger location, relative to the workspace.
    #[serde(default = "default_ledger_path")]
    pub ledger_path: PathBuf,
    /// Environment the trainer runs in.
    #[serde(default)]
    pub environment: PythonEnvironment,
}

impl Default for SweepSettings {
    fn default() -> Self {
        Self {
            trainer_script: default_trainer_script(),
            accelerator: default_accelerator(),
            devices: default_devices(),
            pdbbind_data: default_pdbbind_data(),
            sweep_file: None,
            fail_fast: false,
            timeout_secs: None,
            ledger_path: default_ledger_path(),
            environment: PythonEnvironment::default(),
        }
    }
}

fn default_trainer_script() -> PathBuf {
    PathBuf::from("train.py")
}

fn default_accelerator() -> String {
    "gpu".to_string()
}

fn default_devices() -> u32 {
    4
}

fn default_pdbbind_data() -> PathBuf {
    PathBuf::from("/home/ec2-user/SageMaker/efs/data/PIGNet/data/pdbbind_v2019/scoring")
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(WORKSPACE_DIR).join("ledger.json")
}

impl SweepSettings {
    /// Values the built-in sweep shares across its runs.
    pub fn sweep_defaults(&self) -> SweepDefaults {
        SweepDefaults {
            accelerator: self.accelerator.clone(),
            devices: self.devices,
            data_dir: self.pdbbind_data.clone(),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Ledger path resolved against the workspace.
    pub fn ledger_path_in(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.ledger_path)
    }

    /// Sweep file resolved against the workspace.
    pub fn sweep_file_in(&self, workspace: &Path) -> Option<PathBuf> {
        self.sweep_file.as_ref().map(|p| resolve(workspace, p))
    }
}

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Command-line overrides. Only fields that are set take part in the merge.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trainer_script: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub devices: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdbbind_data: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep_file: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fail_fast: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "pdbsweep", "pdbsweep")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Path of the workspace-level config file.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(WORKSPACE_DIR).join("config.toml")
}

/// Load settings from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides
/// 2. Environment variables (`PDBSWEEP_DEVICES`, `PDBSWEEP_ENVIRONMENT__KIND`, ...)
/// 3. `config_file`, which must exist when given
/// 4. Workspace config (`.pdbsweep/config.toml`)
/// 5. User config
/// 6. Built-in defaults
pub fn load_settings(
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&SettingsOverrides>,
) -> Result<SweepSettings> {
    let mut figment = Figment::from(Serialized::defaults(SweepSettings::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = config_file {
        if !path.is_file() {
            return Err(SweepError::config(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("PDBSWEEP_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let settings: SweepSettings = figment.extract()?;
    if settings.timeout_secs == Some(0) {
        return Err(SweepError::config("timeout_secs must be at least 1"));
    }
    Ok(settings)
}

/// Whether a user-level or workspace-level config file exists.
pub fn settings_exist(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}
