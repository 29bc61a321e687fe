//! A single trainer invocation: typed flags, argument assembly, preflight checks.

use super::model::{DatasetName, FastDevRun, InputType, ModelName, Precision};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Trainer flags owned by typed [`RunConfig`] fields. An hparam with one of
/// these names would be emitted a second time and override the typed value.
pub const TYPED_FLAGS: [&str; 11] = [
    "accelerator",
    "model_name",
    "devices",
    "fast_dev_run",
    "precision",
    "dataset_name",
    "input_type",
    "residue_featurizer_name",
    "use_energy_decoder",
    "is_hetero",
    "data_dir",
];

/// Flags for one trainer run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Optional human-readable name; never passed to the trainer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub accelerator: String,
    pub model_name: ModelName,
    pub devices: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fast_dev_run: Option<FastDevRun>,
    pub precision: Precision,
    pub dataset_name: DatasetName,
    pub input_type: InputType,
    pub residue_featurizer_name: String,
    #[serde(default)]
    pub use_energy_decoder: bool,
    #[serde(default)]
    pub is_hetero: bool,
    pub data_dir: PathBuf,
    /// Extra trainer hyperparameters (`--lr`, `--bs`, `--max_epochs`, ...),
    /// emitted after the fixed flags in key order.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub hparams: BTreeMap<String, toml::Value>,
}

impl RunConfig {
    /// Assemble the trainer's argument list.
    ///
    /// Order is fixed: accelerator, model, devices, fast_dev_run, precision,
    /// dataset, input type, featurizer, presence flags, data dir, hparams.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--accelerator".to_string(),
            self.accelerator.clone(),
            "--model_name".to_string(),
            self.model_name.to_string(),
            "--devices".to_string(),
            self.devices.to_string(),
        ];
        if let Some(fdr) = self.fast_dev_run {
            args.push("--fast_dev_run".to_string());
            args.push(fdr.to_string());
        }
        args.extend([
            "--precision".to_string(),
            self.precision.to_string(),
            "--dataset_name".to_string(),
            self.dataset_name.to_string(),
            "--input_type".to_string(),
            self.input_type.to_string(),
            "--residue_featurizer_name".to_string(),
            self.residue_featurizer_name.clone(),
        ]);
        if self.use_energy_decoder {
            args.push("--use_energy_decoder".to_string());
        }
        if self.is_hetero {
            args.push("--is_hetero".to_string());
        }
        args.push("--data_dir".to_string());
        args.push(self.data_dir.display().to_string());
        for (key, value) in &self.hparams {
            args.push(format!("--{key}"));
            args.push(render_hparam(value));
        }
        args
    }

    /// SHA-256 over the assembled argument list, hex encoded.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for arg in self.to_args() {
            hasher.update(arg.as_bytes());
            hasher.update(b"\0");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Short description used in logs and listings.
    pub fn describe(&self) -> String {
        if let Some(label) = &self.label {
            return label.clone();
        }
        let mut desc = format!(
            "{} precision={} featurizer={}",
            self.model_name, self.precision, self.residue_featurizer_name
        );
        if self.use_energy_decoder {
            desc.push_str(" +energy-decoder");
        }
        if self.is_hetero {
            desc.push_str(" +hetero");
        }
        desc
    }

    /// Hparam keys that shadow a typed flag.
    pub fn hparam_collisions(&self) -> Vec<&str> {
        self.hparams
            .keys()
            .map(String::as_str)
            .filter(|key| TYPED_FLAGS.contains(key))
            .collect()
    }

    /// Problems the trainer would hit with this configuration.
    pub fn validate(&self) -> Vec<Finding> {
        let mut findings = Vec::new();

        for key in self.hparam_collisions() {
            findings.push(Finding::error(format!(
                "hparam '{key}' duplicates the typed --{key} flag"
            )));
        }
        if self.model_name.is_multistage() && !self.input_type.is_multistage() {
            findings.push(Finding::error(format!(
                "'{}' needs a multistage-* input type, got '{}'",
                self.model_name, self.input_type
            )));
        }
        if !self.model_name.is_multistage() && self.input_type != InputType::Complex {
            findings.push(Finding::error(format!(
                "'{}' needs input type 'complex', got '{}'",
                self.model_name, self.input_type
            )));
        }

        if self.devices == 0 {
            findings.push(Finding::error("devices must be at least 1"));
        }
        if self.accelerator.trim().is_empty() {
            findings.push(Finding::error("accelerator is empty"));
        }
        match self.dataset_name {
            DatasetName::PdbBind => {
                if self.data_dir.as_os_str().is_empty() {
                    findings.push(Finding::error("PDBBind runs need a data_dir"));
                }
                if self.input_type == InputType::Polypeptides {
                    findings.push(Finding::error(
                        "input type 'polypeptides' is not available for PDBBind",
                    ));
                }
                if !self.model_name.has_regression_eval() {
                    findings.push(Finding::warning(format!(
                        "'{}' trains on PDBBind but the trainer has no regression evaluation for it; the final test scoring will fail",
                        self.model_name
                    )));
                }
            }
            DatasetName::PepBdb => {
                if self.input_type != InputType::Complex {
                    findings.push(Finding::error(format!(
                        "PepBDB only supports input type 'complex', got '{}'",
                        self.input_type
                    )));
                }
            }
        }
        if self.is_hetero && !self.use_energy_decoder {
            findings.push(Finding::warning(
                "is_hetero only affects runs with use_energy_decoder; it will be ignored",
            ));
        }
        if self.use_energy_decoder && self.input_type == InputType::Complex {
            findings.push(Finding::warning(
                "use_energy_decoder has no energy dataset for input type 'complex'",
            ));
        }
        if self.residue_featurizer_name.contains("grad") {
            findings.push(Finding::warning(format!(
                "residue featurizer '{}' is trained jointly with the model; features are not precomputed",
                self.residue_featurizer_name
            )));
        }

        findings
    }
}

fn render_hparam(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Boolean(true) => "True".to_string(),
        toml::Value::Boolean(false) => "False".to_string(),
        other => other.to_string(),
    }
}

/// Severity of a preflight finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// One preflight problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: msg.into(),
        }
    }

    pub fn warning(msg: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: msg.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.severity {
            Severity::Error => write!(f, "error: {}", self.message),
            Severity::Warning => write!(f, "warning: {}", self.message),
        }
    }
}
