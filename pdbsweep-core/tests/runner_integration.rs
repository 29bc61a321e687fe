//! End-to-end sweeps against a stand-in trainer written in `sh`.
#![cfg(unix)]

use pdbsweep_core::training::{RunStatus, Sweep, SweepDefaults};
use pdbsweep_core::{PythonEnvironment, RunLedger, RunnerOptions, SweepRunner, TrainerLauncher};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// Appends its arguments to `runs.log`, fails for plain `hgvp`, and otherwise
/// behaves like the real trainer's tail: scores file plus checkpoint line.
const FAKE_TRAINER: &str = r#"
echo "$*" >> runs.log
case " $* " in
  *" --model_name hgvp "*)
    echo "hgvp is broken" >&2
    exit 3
    ;;
esac
mkdir -p lightning_logs/version_0/checkpoints
echo '{"R2": 0.5, "rho": 0.7, "MSE": 2.0}' > lightning_logs/version_0/scores.json
echo "Training finished"
echo "checkpoint_callback.best_model_path: lightning_logs/version_0/checkpoints/best.ckpt"
"#;

fn sweep() -> Sweep {
    Sweep::builtin(&SweepDefaults {
        accelerator: "cpu".to_string(),
        devices: 1,
        data_dir: PathBuf::from("/data/pdbbind"),
    })
}

fn runner(ws: &Path, script_body: &str, options: RunnerOptions) -> SweepRunner {
    std::fs::write(ws.join("train.sh"), script_body).unwrap();
    let launcher = TrainerLauncher::new(
        PythonEnvironment::System {
            python: PathBuf::from("sh"),
        },
        PathBuf::from("train.sh"),
        ws.to_path_buf(),
    );
    SweepRunner::new(launcher, options)
}

fn logged_runs(ws: &Path) -> Vec<String> {
    std::fs::read_to_string(ws.join("runs.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_failed_runs_do_not_stop_the_sweep() {
    let ws = TempDir::new().unwrap();
    let ledger = ws.path().join(".pdbsweep").join("ledger.json");
    let options = RunnerOptions {
        ledger_path: Some(ledger.clone()),
        ..Default::default()
    };
    let sweep = sweep();

    let report = runner(ws.path(), FAKE_TRAINER, options)
        .run(&sweep, &[])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 9);
    assert!(!report.stopped_early);
    let indices: Vec<usize> = report.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, (1..=9).collect::<Vec<_>>());

    // Rows 7 and 8 are plain hgvp.
    for record in &report.records {
        if record.index == 7 || record.index == 8 {
            assert_eq!(record.status, RunStatus::Failed);
            assert_eq!(record.exit_code, Some(3));
        } else {
            assert_eq!(record.status, RunStatus::Succeeded, "run {}", record.index);
            assert_eq!(record.exit_code, Some(0));
        }
    }
    assert_eq!(report.succeeded(), 7);

    // Invocations happened in sweep order with the assembled arguments.
    let logged = logged_runs(ws.path());
    assert_eq!(logged.len(), 9);
    for (line, run) in logged.iter().zip(&sweep.runs) {
        assert_eq!(*line, run.to_args().join(" "));
    }

    let ledger = RunLedger::load(&ledger).unwrap();
    assert_eq!(ledger.records.len(), 9);
    assert_eq!(ledger.records[6].status, RunStatus::Failed);
}

#[tokio::test]
async fn test_checkpoint_and_scores_are_collected() {
    let ws = TempDir::new().unwrap();
    let report = runner(ws.path(), FAKE_TRAINER, RunnerOptions::default())
        .run(&sweep(), &[1])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 1);
    let record = &report.records[0];
    assert_eq!(
        record.best_checkpoint,
        Some(
            ws.path()
                .join("lightning_logs/version_0/checkpoints/best.ckpt")
        )
    );
    let scores = record.scores.as_ref().expect("scores.json should be read");
    assert_eq!(scores.get("R2"), Some(0.5));
    assert_eq!(record.command[0], "sh");
    assert_eq!(record.command[1], "train.sh");
}

#[tokio::test]
async fn test_fail_fast_stops_after_first_failure() {
    let ws = TempDir::new().unwrap();
    let options = RunnerOptions {
        fail_fast: true,
        ..Default::default()
    };
    let report = runner(ws.path(), FAKE_TRAINER, options)
        .run(&sweep(), &[])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 7);
    assert!(report.stopped_early);
    assert!(!report.all_succeeded());
    assert_eq!(logged_runs(ws.path()).len(), 7);
}

#[tokio::test]
async fn test_selected_runs_only() {
    let ws = TempDir::new().unwrap();
    let report = runner(ws.path(), FAKE_TRAINER, RunnerOptions::default())
        .run(&sweep(), &[9, 2])
        .await
        .unwrap();

    let indices: Vec<usize> = report.records.iter().map(|r| r.index).collect();
    assert_eq!(indices, vec![2, 9]);
    assert!(report.all_succeeded());
}

#[tokio::test]
async fn test_missing_interpreter_records_spawn_failures_and_continues() {
    let ws = TempDir::new().unwrap();
    let launcher = TrainerLauncher::new(
        PythonEnvironment::System {
            python: PathBuf::from("/nonexistent/pdbsweep-python"),
        },
        PathBuf::from("train.py"),
        ws.path().to_path_buf(),
    );
    let report = SweepRunner::new(launcher, RunnerOptions::default())
        .run(&sweep(), &[])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 9);
    assert!(report
        .records
        .iter()
        .all(|r| r.status == RunStatus::SpawnFailed && r.error.is_some()));
}

#[tokio::test]
async fn test_timeout_kills_trainer() {
    let ws = TempDir::new().unwrap();
    let options = RunnerOptions {
        timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let report = runner(ws.path(), "sleep 5\n", options)
        .run(&sweep(), &[1, 2])
        .await
        .unwrap();

    assert_eq!(report.records.len(), 2);
    for record in &report.records {
        assert_eq!(record.status, RunStatus::TimedOut);
        assert!(record.duration_secs < 5.0);
    }
}

#[tokio::test]
async fn test_timeout_kills_processes_the_trainer_started() {
    let ws = TempDir::new().unwrap();
    let options = RunnerOptions {
        timeout: Some(Duration::from_millis(200)),
        ..Default::default()
    };
    let body = "sh -c 'sleep 1; echo still-running >> orphan.log'\n";
    let report = runner(ws.path(), body, options)
        .run(&sweep(), &[1])
        .await
        .unwrap();
    assert_eq!(report.records[0].status, RunStatus::TimedOut);

    tokio::time::sleep(Duration::from_millis(1800)).await;
    assert!(!ws.path().join("orphan.log").exists());
}

/// Non-UTF-8 output first, then enough lines to fill a pipe buffer, then the
/// checkpoint line.
const BINARY_NOISE_TRAINER: &str = r#"
printf 'epoch 0 \377\n'
i=0
while [ $i -lt 20000 ]; do
  echo "progress line $i"
  i=$((i + 1))
done
mkdir -p lightning_logs/version_0/checkpoints
echo "checkpoint_callback.best_model_path: lightning_logs/version_0/checkpoints/best.ckpt"
exit 0
"#;

#[tokio::test]
async fn test_non_utf8_output_does_not_break_the_run() {
    let ws = TempDir::new().unwrap();
    let report = runner(ws.path(), BINARY_NOISE_TRAINER, RunnerOptions::default())
        .run(&sweep(), &[1])
        .await
        .unwrap();

    let record = &report.records[0];
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.exit_code, Some(0));
    assert_eq!(
        record.best_checkpoint,
        Some(
            ws.path()
                .join("lightning_logs/version_0/checkpoints/best.ckpt")
        )
    );
}

#[tokio::test]
async fn test_nan_scores_are_kept_as_missing() {
    let ws = TempDir::new().unwrap();
    let body = r#"
mkdir -p lightning_logs/version_0/checkpoints
echo '{"R2": NaN, "rho": 0.1, "MSE": 2.0}' > lightning_logs/version_0/scores.json
echo "checkpoint_callback.best_model_path: lightning_logs/version_0/checkpoints/best.ckpt"
"#;
    let report = runner(ws.path(), body, RunnerOptions::default())
        .run(&sweep(), &[1])
        .await
        .unwrap();

    let scores = report.records[0].scores.as_ref().expect("scores.json should be read");
    assert_eq!(scores.get("R2"), None);
    assert_eq!(scores.get("rho"), Some(0.1));
}

#[tokio::test]
async fn test_plan_does_not_launch() {
    let ws = TempDir::new().unwrap();
    let runner = runner(ws.path(), FAKE_TRAINER, RunnerOptions::default());
    let plan = runner.plan(&sweep(), &[]).unwrap();

    assert_eq!(plan.len(), 9);
    assert_eq!(plan[0].0, 1);
    assert_eq!(&plan[0].1[..2], &["sh", "train.sh"]);
    assert!(!ws.path().join("runs.log").exists());
    assert!(runner.plan(&sweep(), &[12]).is_err());
}
