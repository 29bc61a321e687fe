//! Sequential sweep runner: one trainer subprocess at a time, in sweep order.

use super::experiment::{RunLedger, RunRecord, RunStatus, SweepReport};
use super::run_config::RunConfig;
use super::scores::{log_dir_for_checkpoint, parse_best_checkpoint, TrainerScores};
use super::sweep::Sweep;
use crate::error::Result;
use crate::runtime::TrainerLauncher;
use chrono::Utc;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Knobs for a sweep. The defaults reproduce a plain sequential script:
/// no timeout, keep going after failures.
#[derive(Debug, Clone, Default)]
pub struct RunnerOptions {
    /// Stop after the first run that does not succeed.
    pub fail_fast: bool,
    /// Kill a trainer that runs longer than this.
    pub timeout: Option<Duration>,
    /// Append every finished run to this ledger file.
    pub ledger_path: Option<PathBuf>,
    /// Forward trainer stdout/stderr to this process's stdout/stderr.
    pub echo_output: bool,
}

/// Runs a sweep's trainer invocations one after another.
pub struct SweepRunner {
    launcher: TrainerLauncher,
    options: RunnerOptions,
}

impl SweepRunner {
    pub fn new(launcher: TrainerLauncher, options: RunnerOptions) -> Self {
        Self { launcher, options }
    }

    pub fn launcher(&self) -> &TrainerLauncher {
        &self.launcher
    }

    /// Full command lines for the selected runs without launching anything.
    pub fn plan(&self, sweep: &Sweep, only: &[usize]) -> Result<Vec<(usize, Vec<String>)>> {
        Ok(sweep
            .select(only)?
            .into_iter()
            .map(|(index, run)| (index, self.launcher.command_line(&run.to_args())))
            .collect())
    }

    /// Run the selected runs in order.
    ///
    /// A run that fails, cannot be spawned, or times out is recorded and the
    /// sweep continues, unless `fail_fast` is set. Ctrl-C kills the current
    /// trainer and ends the sweep. A failed environment probe is logged and
    /// does not stop the sweep.
    pub async fn run(&self, sweep: &Sweep, only: &[usize]) -> Result<SweepReport> {
        let selected = sweep.select(only)?;
        let sweep_id = uuid::Uuid::new_v4().to_string();

        info!(
            sweep = %sweep.name,
            sweep_id = %sweep_id,
            runs = selected.len(),
            environment = %self.launcher.environment().describe(),
            "Starting sweep"
        );

        match self.launcher.probe().await {
            Ok(version) => info!(version = %version, "Python environment ready"),
            Err(e) => warn!(error = %e, "Python environment activation failed; continuing"),
        }

        let mut report = SweepReport {
            sweep_id: sweep_id.clone(),
            sweep_name: sweep.name.clone(),
            records: Vec::with_capacity(selected.len()),
            stopped_early: false,
        };

        let total = selected.len();
        for (pos, (index, run)) in selected.into_iter().enumerate() {
            let record = self.run_one(&sweep_id, &sweep.name, index, run).await;

            if let Some(path) = &self.options.ledger_path {
                if let Err(e) = RunLedger::append(path, record.clone()) {
                    warn!(error = %e, ledger = %path.display(), "Failed to record run in ledger");
                }
            }

            let success = record.status.is_success();
            let interrupted = record.status == RunStatus::Interrupted;
            report.records.push(record);

            if interrupted {
                report.stopped_early = pos + 1 < total;
                break;
            }
            if !success && self.options.fail_fast && pos + 1 < total {
                warn!(run = index, "Stopping sweep after failed run (fail-fast)");
                report.stopped_early = true;
                break;
            }
        }

        info!(
            sweep = %sweep.name,
            succeeded = report.succeeded(),
            failed = report.failed(),
            "Sweep finished"
        );
        Ok(report)
    }

    async fn run_one(
        &self,
        sweep_id: &str,
        sweep_name: &str,
        index: usize,
        run: &RunConfig,
    ) -> RunRecord {
        let args = run.to_args();
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut record = RunRecord {
            sweep_id: sweep_id.to_string(),
            sweep_name: sweep_name.to_string(),
            index,
            description: run.describe(),
            fingerprint: run.fingerprint(),
            command: self.launcher.command_line(&args),
            status: RunStatus::SpawnFailed,
            exit_code: None,
            started_at,
            finished_at: started_at,
            duration_secs: 0.0,
            best_checkpoint: None,
            scores: None,
            error: None,
        };

        info!(run = index, model = %run.model_name, description = %record.description, "Launching trainer");
        debug!(command = ?record.command, "Trainer command line");

        match self.launcher.command(&args).spawn() {
            Ok(child) => self.supervise(child, &mut record).await,
            Err(e) => {
                warn!(run = index, error = %e, "Failed to spawn trainer");
                record.error = Some(format!("failed to spawn trainer: {e}"));
            }
        }

        record.finished_at = Utc::now();
        record.duration_secs = clock.elapsed().as_secs_f64();

        if let Some(ckpt) = &record.best_checkpoint {
            if let Some(log_dir) = log_dir_for_checkpoint(ckpt) {
                match TrainerScores::load_from_log_dir(&log_dir) {
                    Ok(scores) => record.scores = scores,
                    Err(e) => warn!(run = index, error = %e, "Unreadable trainer scores"),
                }
            }
        }

        match record.status {
            RunStatus::Succeeded => info!(
                run = index,
                duration_secs = record.duration_secs,
                "Trainer finished"
            ),
            status => warn!(
                run = index,
                status = status.as_str(),
                exit_code = ?record.exit_code,
                duration_secs = record.duration_secs,
                "Trainer did not succeed; continuing"
            ),
        }

        record
    }

    /// Forward the child's output, wait for it, and fill in status and checkpoint.
    async fn supervise(&self, mut child: Child, record: &mut RunRecord) {
        let echo = self.options.echo_output;
        let run = record.index;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            let mut best = None;
            if let Some(pipe) = stdout_pipe {
                forward_lines(pipe, run, |line| {
                    if let Some(path) = parse_best_checkpoint(line) {
                        best = Some(path);
                    }
                    if echo {
                        println!("{line}");
                    }
                })
                .await;
            }
            best
        });

        let stderr_task = tokio::spawn(async move {
            if let Some(pipe) = stderr_pipe {
                forward_lines(pipe, run, |line| {
                    if echo {
                        eprintln!("{line}");
                    }
                })
                .await;
            }
        });

        let waited = tokio::select! {
            status = child.wait() => Waited::Exited(status),
            _ = deadline(self.options.timeout) => Waited::TimedOut,
            Ok(()) = tokio::signal::ctrl_c() => Waited::Interrupted,
        };

        match waited {
            Waited::Exited(Ok(status)) => {
                record.exit_code = status.code();
                record.status = if status.success() {
                    RunStatus::Succeeded
                } else {
                    RunStatus::Failed
                };
            }
            Waited::Exited(Err(e)) => {
                record.status = RunStatus::Failed;
                record.error = Some(format!("failed to wait for trainer: {e}"));
            }
            Waited::TimedOut => {
                let secs = self.options.timeout.map(|t| t.as_secs()).unwrap_or_default();
                warn!(run, timeout_secs = secs, "Trainer timed out; killing");
                kill_trainer(&mut child, run).await;
                record.status = RunStatus::TimedOut;
                record.error = Some(format!("killed after {secs}s"));
            }
            Waited::Interrupted => {
                warn!(run, "Interrupted; killing trainer");
                kill_trainer(&mut child, run).await;
                record.status = RunStatus::Interrupted;
                record.error = Some("interrupted".to_string());
            }
        }

        if matches!(record.status, RunStatus::TimedOut | RunStatus::Interrupted) {
            // A process that left the trainer's group can still hold the pipes.
            stdout_task.abort();
            stderr_task.abort();
            return;
        }

        if let Ok(Some(best)) = stdout_task.await {
            record.best_checkpoint = Some(if best.is_relative() {
                self.launcher.workspace().join(best)
            } else {
                best
            });
        }
        let _ = stderr_task.await;
    }
}

enum Waited {
    Exited(std::io::Result<ExitStatus>),
    TimedOut,
    Interrupted,
}

async fn deadline(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Read `pipe` to EOF and hand each line to `on_line`, decoded lossily.
///
/// The pipe stays open until the trainer closes it; a trainer whose reader
/// went away would die of SIGPIPE on its next write.
async fn forward_lines<R>(pipe: R, run: usize, mut on_line: impl FnMut(&str))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                on_line(line.trim_end_matches(['\n', '\r']));
            }
            Err(e) => {
                warn!(run, error = %e, "Unreadable trainer output; discarding the rest");
                let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
                break;
            }
        }
    }
}

/// Kill the trainer together with everything it started.
async fn kill_trainer(child: &mut Child, run: usize) {
    if let Some(pid) = child.id() {
        kill_process_group(pid);
    }
    if let Err(e) = child.kill().await {
        warn!(run, error = %e, "Failed to kill trainer");
    }
}

/// The trainer leads its own process group; see [`TrainerLauncher::command`].
fn kill_process_group(pid: u32) {
    #[cfg(unix)]
    {
        unsafe {
            libc::killpg(pid as libc::pid_t, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}
