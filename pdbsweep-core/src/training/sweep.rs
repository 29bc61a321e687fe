//! Ordered sweeps of trainer runs: the built-in nine-run sweep and TOML sweep files.

use super::model::{DatasetName, FastDevRun, InputType, ModelName, Precision};
use super::run_config::{Finding, RunConfig};
use crate::error::{Result, SweepError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Values the sweep defines once and every run shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepDefaults {
    pub accelerator: String,
    pub devices: u32,
    pub data_dir: PathBuf,
}

/// An ordered list of runs. Run order is execution order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sweep {
    pub name: String,
    pub runs: Vec<RunConfig>,
}

impl Sweep {
    /// The nine-run architecture sweep on PDBBind.
    pub fn builtin(defaults: &SweepDefaults) -> Self {
        use InputType::{Complex, MultistageHetero};
        use ModelName::{Gvp, Hgvp, MultistageGvp, MultistageHgvp};
        use Precision::{Half, Single};

        // (model, precision, input type, featurizer, energy decoder, hetero)
        let rows: [(ModelName, Precision, InputType, &str, bool, bool); 9] = [
            (Gvp, Single, Complex, "MACCS", false, false),
            (Gvp, Half, Complex, "MACCS", false, false),
            (Gvp, Single, Complex, "Morgan", false, false),
            (MultistageGvp, Single, MultistageHetero, "MACCS", false, false),
            (MultistageGvp, Single, MultistageHetero, "MACCS", true, false),
            (MultistageGvp, Single, MultistageHetero, "MACCS", true, true),
            (Hgvp, Single, Complex, "MACCS", false, false),
            (Hgvp, Single, Complex, "MACCS", true, true),
            (MultistageHgvp, Single, MultistageHetero, "MACCS", true, true),
        ];

        let runs = rows
            .into_iter()
            .map(
                |(model_name, precision, input_type, featurizer, energy, hetero)| RunConfig {
                    label: None,
                    accelerator: defaults.accelerator.clone(),
                    model_name,
                    devices: defaults.devices,
                    fast_dev_run: Some(FastDevRun::Flag(false)),
                    precision,
                    dataset_name: DatasetName::PdbBind,
                    input_type,
                    residue_featurizer_name: featurizer.to_string(),
                    use_energy_decoder: energy,
                    is_hetero: hetero,
                    data_dir: defaults.data_dir.clone(),
                    hparams: BTreeMap::new(),
                },
            )
            .collect();

        Self {
            name: "pdbbind-architectures".to_string(),
            runs,
        }
    }

    /// Parse a sweep file.
    ///
    /// Each `[[runs]]` table inherits every key of `[defaults]` it does not set.
    /// `hparams` tables merge key by key.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: SweepFile = toml::from_str(content)?;
        if file.runs.is_empty() {
            return Err(SweepError::sweep_file("sweep defines no [[runs]]"));
        }

        let mut runs = Vec::with_capacity(file.runs.len());
        for (i, run) in file.runs.into_iter().enumerate() {
            let merged = merge_tables(&file.defaults, run);
            let config: RunConfig = toml::Value::Table(merged)
                .try_into()
                .map_err(|e| SweepError::sweep_file(format!("run {}: {e}", i + 1)))?;
            if let Some(key) = config.hparam_collisions().first() {
                return Err(SweepError::sweep_file(format!(
                    "run {}: hparam '{key}' shadows a typed field; set `{key}` directly",
                    i + 1
                )));
            }
            runs.push(config);
        }

        Ok(Self {
            name: file.name.unwrap_or_else(|| "unnamed".to_string()),
            runs,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SweepError::sweep_file(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut sweep = Self::from_toml_str(&content)?;
        if sweep.name == "unnamed" {
            if let Some(stem) = path.file_stem() {
                sweep.name = stem.to_string_lossy().to_string();
            }
        }
        Ok(sweep)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Runs to execute, as `(1-based index, run)` pairs in sweep order.
    ///
    /// An empty `only` selects every run. Duplicates in `only` are ignored.
    pub fn select(&self, only: &[usize]) -> Result<Vec<(usize, &RunConfig)>> {
        for &n in only {
            if n == 0 || n > self.runs.len() {
                return Err(SweepError::not_found(format!(
                    "run {n} (sweep '{}' has runs 1..={})",
                    self.name,
                    self.runs.len()
                )));
            }
        }
        Ok(self
            .runs
            .iter()
            .enumerate()
            .map(|(i, run)| (i + 1, run))
            .filter(|(n, _)| only.is_empty() || only.contains(n))
            .collect())
    }

    /// Preflight findings for every run, tagged with the 1-based run index.
    pub fn validate(&self) -> Vec<(usize, Finding)> {
        self.runs
            .iter()
            .enumerate()
            .flat_map(|(i, run)| run.validate().into_iter().map(move |f| (i + 1, f)))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct SweepFile {
    name: Option<String>,
    #[serde(default)]
    defaults: toml::Table,
    #[serde(default)]
    runs: Vec<toml::Table>,
}

fn merge_tables(defaults: &toml::Table, run: toml::Table) -> toml::Table {
    let mut merged = defaults.clone();
    for (key, value) in run {
        if key == "hparams" {
            if let (Some(toml::Value::Table(base)), toml::Value::Table(overlay)) =
                (merged.get_mut(&key), &value)
            {
                base.extend(overlay.clone());
                continue;
            }
        }
        merged.insert(key, value);
    }
    merged
}
