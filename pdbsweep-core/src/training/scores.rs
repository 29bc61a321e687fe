//! Trainer output scraping: the best-checkpoint line and `scores.json`.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Prefix of the line the trainer prints after fitting.
pub const BEST_CHECKPOINT_MARKER: &str = "checkpoint_callback.best_model_path:";

/// Scores file the trainer writes into its log directory.
pub const SCORES_FILE: &str = "scores.json";

/// Test-set metrics keyed by name (`R2`, `rho`, `MSE` for PDBBind,
/// `MCC`, `AUPR`, `AUROC` for PepBDB). A metric the trainer wrote as
/// `NaN` or `Infinity` is kept as `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrainerScores(pub BTreeMap<String, Option<f64>>);

impl TrainerScores {
    pub fn get(&self, metric: &str) -> Option<f64> {
        self.0.get(metric).copied().flatten()
    }

    /// Parse the trainer's `scores.json`, which may contain Python's
    /// non-standard `NaN`/`Infinity` literals.
    pub fn from_json_str(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(&null_non_finite(content))?)
    }

    /// Read `scores.json` from a Lightning log directory, if it was written.
    pub fn load_from_log_dir(log_dir: &Path) -> Result<Option<Self>> {
        let path = log_dir.join(SCORES_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Self::from_json_str(&content).map(Some)
    }
}

impl fmt::Display for TrainerScores {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{k}={v:.4}"),
                None => format!("{k}=nan"),
            })
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Replace bare `NaN`, `Infinity` and `-Infinity` outside string literals with `null`.
fn null_non_finite(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    let mut rest = json;
    let mut in_string = false;
    while let Some(c) = rest.chars().next() {
        if in_string {
            if c == '\\' {
                let escaped: usize = rest.chars().take(2).map(char::len_utf8).sum();
                out.push_str(&rest[..escaped]);
                rest = &rest[escaped..];
                continue;
            }
            if c == '"' {
                in_string = false;
            }
        } else if c == '"' {
            in_string = true;
        } else if let Some(token) = ["-Infinity", "Infinity", "NaN"]
            .into_iter()
            .find(|t| rest.starts_with(*t))
        {
            out.push_str("null");
            rest = &rest[token.len()..];
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
    }
    out
}

/// Extract the checkpoint path from a trainer stdout line.
pub fn parse_best_checkpoint(line: &str) -> Option<PathBuf> {
    let rest = line.trim().strip_prefix(BEST_CHECKPOINT_MARKER)?.trim();
    if rest.is_empty() {
        None
    } else {
        Some(PathBuf::from(rest))
    }
}

/// Lightning stores checkpoints in `<log_dir>/checkpoints/<file>.ckpt`.
pub fn log_dir_for_checkpoint(checkpoint: &Path) -> Option<PathBuf> {
    checkpoint.parent()?.parent().map(Path::to_path_buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_best_checkpoint() {
        let line = "checkpoint_callback.best_model_path: lightning_logs/version_3/checkpoints/epoch=11-step=4000.ckpt";
        assert_eq!(
            parse_best_checkpoint(line),
            Some(PathBuf::from(
                "lightning_logs/version_3/checkpoints/epoch=11-step=4000.ckpt"
            ))
        );
        assert_eq!(parse_best_checkpoint("checkpoint_callback.best_model_path: "), None);
        assert_eq!(parse_best_checkpoint("Training finished"), None);
    }

    #[test]
    fn test_log_dir_for_checkpoint() {
        let ckpt = Path::new("lightning_logs/version_3/checkpoints/last.ckpt");
        assert_eq!(
            log_dir_for_checkpoint(ckpt),
            Some(PathBuf::from("lightning_logs/version_3"))
        );
    }

    #[test]
    fn test_load_scores() {
        let dir = TempDir::new().unwrap();
        assert!(TrainerScores::load_from_log_dir(dir.path())
            .unwrap()
            .is_none());

        std::fs::write(
            dir.path().join(SCORES_FILE),
            r#"{"R2": 0.61, "rho": 0.78, "MSE": 1.9}"#,
        )
        .unwrap();
        let scores = TrainerScores::load_from_log_dir(dir.path())
            .unwrap()
            .unwrap();
        assert_eq!(scores.get("rho"), Some(0.78));
        assert_eq!(scores.to_string(), "MSE=1.9000 R2=0.6100 rho=0.7800");
    }

    #[test]
    fn test_python_non_finite_literals_become_missing_metrics() {
        let scores =
            TrainerScores::from_json_str(r#"{"R2": NaN, "rho": 0.1, "MSE": Infinity, "AUPR": -Infinity}"#)
                .unwrap();
        assert_eq!(scores.get("R2"), None);
        assert_eq!(scores.get("MSE"), None);
        assert_eq!(scores.get("AUPR"), None);
        assert_eq!(scores.get("rho"), Some(0.1));
        assert_eq!(scores.0.len(), 4);
        assert_eq!(scores.to_string(), "AUPR=nan MSE=nan R2=nan rho=0.1000");

        // Survives a ledger round trip as null.
        let json = serde_json::to_string(&scores).unwrap();
        assert_eq!(serde_json::from_str::<TrainerScores>(&json).unwrap(), scores);
    }

    #[test]
    fn test_non_finite_words_inside_keys_are_untouched() {
        let scores = TrainerScores::from_json_str(r#"{"NaN \"count": 2.0}"#).unwrap();
        assert_eq!(scores.get("NaN \"count"), Some(2.0));
    }
}
