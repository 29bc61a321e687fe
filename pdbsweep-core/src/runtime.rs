//! Python environment activation for the trainer.
//!
//! Activation resolves the command prefix that runs the environment's
//! interpreter; nothing is sourced into the current process.

use crate::error::{Result, SweepError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Which Python environment runs the trainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PythonEnvironment {
    /// A named conda environment, run through `conda run`.
    Conda {
        name: String,
        /// Conda executable; falls back to `$CONDA_EXE`, then `conda`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conda_exe: Option<PathBuf>,
    },
    /// A virtualenv directory.
    Venv { path: PathBuf },
    /// An interpreter on `PATH` or at an explicit location.
    System {
        #[serde(default = "default_python")]
        python: PathBuf,
    },
}

impl Default for PythonEnvironment {
    fn default() -> Self {
        Self::System {
            python: default_python(),
        }
    }
}

fn default_python() -> PathBuf {
    PathBuf::from("python3")
}

impl PythonEnvironment {
    /// Program and leading arguments that start the environment's interpreter.
    pub fn interpreter(&self) -> (PathBuf, Vec<String>) {
        match self {
            Self::Conda { name, conda_exe } => {
                let conda = conda_exe
                    .clone()
                    .or_else(|| std::env::var_os("CONDA_EXE").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from("conda"));
                (
                    conda,
                    vec![
                        "run".to_string(),
                        "--no-capture-output".to_string(),
                        "-n".to_string(),
                        name.clone(),
                        "python".to_string(),
                    ],
                )
            }
            Self::Venv { path } => {
                let python = if cfg!(windows) {
                    path.join("Scripts").join("python.exe")
                } else {
                    path.join("bin").join("python")
                };
                (python, Vec::new())
            }
            Self::System { python } => (python.clone(), Vec::new()),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Conda { name, .. } => format!("conda env '{name}'"),
            Self::Venv { path } => format!("venv {}", path.display()),
            Self::System { python } => format!("interpreter {}", python.display()),
        }
    }
}

/// Builds and probes trainer commands for one environment.
#[derive(Debug, Clone)]
pub struct TrainerLauncher {
    environment: PythonEnvironment,
    script: PathBuf,
    workspace: PathBuf,
}

impl TrainerLauncher {
    pub fn new(environment: PythonEnvironment, script: PathBuf, workspace: PathBuf) -> Self {
        Self {
            environment,
            script,
            workspace,
        }
    }

    pub fn environment(&self) -> &PythonEnvironment {
        &self.environment
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Full argv for a run, interpreter first. Used for dry runs and the ledger.
    pub fn command_line(&self, args: &[String]) -> Vec<String> {
        let (program, prefix) = self.environment.interpreter();
        let mut argv = Vec::with_capacity(2 + prefix.len() + args.len());
        argv.push(program.display().to_string());
        argv.extend(prefix);
        argv.push(self.script.display().to_string());
        argv.extend(args.iter().cloned());
        argv
    }

    /// Command for a run with piped stdout/stderr, killed if dropped.
    ///
    /// On unix the trainer leads a new process group so that a timeout can
    /// kill wrappers like `conda run` together with the interpreter they start.
    pub fn command(&self, args: &[String]) -> Command {
        let (program, prefix) = self.environment.interpreter();
        let mut cmd = Command::new(program);
        cmd.args(prefix)
            .arg(&self.script)
            .args(args)
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);
        cmd
    }

    /// Check that the environment's interpreter starts, returning its version string.
    pub async fn probe(&self) -> Result<String> {
        let (program, prefix) = self.environment.interpreter();
        debug!(program = %program.display(), "Probing Python environment");

        let output = Command::new(&program)
            .args(prefix)
            .arg("--version")
            .current_dir(&self.workspace)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                SweepError::spawn(format!(
                    "cannot start {} ({}): {e}",
                    self.environment.describe(),
                    program.display()
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SweepError::spawn(format!(
                "{} failed to start (exit {}): {}",
                self.environment.describe(),
                output.status,
                stderr.trim()
            )));
        }

        // Python 2 printed the version on stderr.
        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if version.is_empty() {
            Ok(String::from_utf8_lossy(&output.stderr).trim().to_string())
        } else {
            Ok(version)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conda_interpreter_uses_conda_run() {
        let env = PythonEnvironment::Conda {
            name: "pytorch_p38".to_string(),
            conda_exe: Some(PathBuf::from("/opt/conda/bin/conda")),
        };
        let (program, prefix) = env.interpreter();
        assert_eq!(program, PathBuf::from("/opt/conda/bin/conda"));
        assert_eq!(
            prefix,
            vec!["run", "--no-capture-output", "-n", "pytorch_p38", "python"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_venv_interpreter_path() {
        let env = PythonEnvironment::Venv {
            path: PathBuf::from("/work/.venv"),
        };
        let (program, prefix) = env.interpreter();
        assert_eq!(program, PathBuf::from("/work/.venv/bin/python"));
        assert!(prefix.is_empty());
    }

    #[test]
    fn test_command_line_orders_interpreter_script_args() {
        let launcher = TrainerLauncher::new(
            PythonEnvironment::default(),
            PathBuf::from("train.py"),
            PathBuf::from("."),
        );
        let argv = launcher.command_line(&["--devices".to_string(), "4".to_string()]);
        assert_eq!(argv, vec!["python3", "train.py", "--devices", "4"]);
    }

    #[test]
    fn test_environment_toml_shape() {
        let env: PythonEnvironment =
            toml::from_str("kind = \"conda\"\nname = \"pytorch_p38\"").unwrap();
        assert_eq!(
            env,
            PythonEnvironment::Conda {
                name: "pytorch_p38".to_string(),
                conda_exe: None
            }
        );
        let env: PythonEnvironment = toml::from_str("kind = \"system\"").unwrap();
        assert_eq!(env, PythonEnvironment::default());
    }

    #[tokio::test]
    async fn test_probe_missing_interpreter_is_an_error() {
        let launcher = TrainerLauncher::new(
            PythonEnvironment::System {
                python: PathBuf::from("/nonexistent/pdbsweep-python"),
            },
            PathBuf::from("train.py"),
            std::env::temp_dir(),
        );
        assert!(launcher.probe().await.is_err());
    }
}
