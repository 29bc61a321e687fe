//! Trainer vocabulary: model names, precisions, datasets, and input types.
//!
//! Each enum renders to exactly the string the trainer's argument parser
//! expects, and parses back from it.

use crate::error::SweepError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Model architecture selected with `--model_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelName {
    Gvp,
    Hgvp,
    MultistageGvp,
    MultistageHgvp,
}

impl ModelName {
    pub const ALL: [ModelName; 4] = [
        ModelName::Gvp,
        ModelName::Hgvp,
        ModelName::MultistageGvp,
        ModelName::MultistageHgvp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gvp => "gvp",
            Self::Hgvp => "hgvp",
            Self::MultistageGvp => "multistage-gvp",
            Self::MultistageHgvp => "multistage-hgvp",
        }
    }

    /// Multistage models consume separate protein, ligand, and complex graphs.
    pub fn is_multistage(&self) -> bool {
        matches!(self, Self::MultistageGvp | Self::MultistageHgvp)
    }

    /// Whether the trainer can score this model on PDBBind after fitting.
    /// The hierarchical variants train but their regression evaluation raises.
    pub fn has_regression_eval(&self) -> bool {
        matches!(self, Self::Gvp | Self::MultistageGvp)
    }
}

/// Numeric precision passed to Lightning via `--precision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PrecisionRepr", into = "String")]
pub enum Precision {
    Half,
    Single,
    Double,
    Bf16,
}

impl Precision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Half => "16",
            Self::Single => "32",
            Self::Double => "64",
            Self::Bf16 => "bf16",
        }
    }
}

/// Sweep files may write `precision = 16` or `precision = "bf16"`.
#[derive(Deserialize)]
#[serde(untagged)]
enum PrecisionRepr {
    Int(u32),
    Str(String),
}

impl TryFrom<PrecisionRepr> for Precision {
    type Error = SweepError;

    fn try_from(repr: PrecisionRepr) -> Result<Self, Self::Error> {
        match repr {
            PrecisionRepr::Int(n) => n.to_string().parse(),
            PrecisionRepr::Str(s) => s.parse(),
        }
    }
}

impl From<Precision> for String {
    fn from(p: Precision) -> Self {
        p.as_str().to_string()
    }
}

/// Dataset selected with `--dataset_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DatasetName {
    #[serde(rename = "PDBBind")]
    PdbBind,
    #[serde(rename = "PepBDB")]
    PepBdb,
}

impl DatasetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PdbBind => "PDBBind",
            Self::PepBdb => "PepBDB",
        }
    }
}

/// Graph construction selected with `--input_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputType {
    Complex,
    Polypeptides,
    MultistageHetero,
    MultistageGeometric,
    MultistagePhysical,
}

impl InputType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complex => "complex",
            Self::Polypeptides => "polypeptides",
            Self::MultistageHetero => "multistage-hetero",
            Self::MultistageGeometric => "multistage-geometric",
            Self::MultistagePhysical => "multistage-physical",
        }
    }

    /// Separate protein, ligand, and complex graphs per sample.
    pub fn is_multistage(&self) -> bool {
        matches!(
            self,
            Self::MultistageHetero | Self::MultistageGeometric | Self::MultistagePhysical
        )
    }
}

/// Value of `--fast_dev_run`: a flag or a number of batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FastDevRun {
    Flag(bool),
    Batches(u32),
}

impl fmt::Display for FastDevRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // Lightning parses Python-style booleans for this flag.
            Self::Flag(true) => f.write_str("True"),
            Self::Flag(false) => f.write_str("False"),
            Self::Batches(n) => write!(f, "{n}"),
        }
    }
}

macro_rules! vocab_display_from_str {
    ($ty:ident, $what:literal, [$($variant:ident),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = SweepError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                $(
                    if s == $ty::$variant.as_str() {
                        return Ok($ty::$variant);
                    }
                )+
                let known: Vec<&str> = vec![$($ty::$variant.as_str()),+];
                Err(SweepError::invalid_run(format!(
                    "unknown {} '{s}' (expected one of: {})",
                    $what,
                    known.join(", ")
                )))
            }
        }
    };
}

vocab_display_from_str!(ModelName, "model name", [Gvp, Hgvp, MultistageGvp, MultistageHgvp]);
vocab_display_from_str!(Precision, "precision", [Half, Single, Double, Bf16]);
vocab_display_from_str!(DatasetName, "dataset", [PdbBind, PepBdb]);
vocab_display_from_str!(
    InputType,
    "input type",
    [
        Complex,
        Polypeptides,
        MultistageHetero,
        MultistageGeometric,
        MultistagePhysical,
    ]
);
