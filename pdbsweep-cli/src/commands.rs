//! CLI subcommand handlers.

use crate::{Commands, ConfigAction, SweepArgs};
use pdbsweep_core::config::{
    load_settings, settings_exist, workspace_config_path, SettingsOverrides,
};
use pdbsweep_core::training::{RunRecord, RunStatus};
use pdbsweep_core::{
    RunLedger, RunnerOptions, Sweep, SweepReport, SweepRunner, SweepSettings, TrainerLauncher,
};
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, warn};

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    config: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Run {
            sweep,
            only,
            dry_run,
            fail_fast,
            timeout,
            force,
        } => {
            let extra = SettingsOverrides {
                fail_fast: fail_fast.then_some(true),
                timeout_secs: timeout,
                ..Default::default()
            };
            handle_run(workspace, config, &sweep, extra, &only, dry_run, force).await
        }
        Commands::List { sweep } => handle_list(workspace, config, &sweep),
        Commands::Show { index, sweep } => handle_show(workspace, config, &sweep, index),
        Commands::Check { sweep } => handle_check(workspace, config, &sweep),
        Commands::History { limit, fingerprint } => {
            handle_history(workspace, config, limit, fingerprint.as_deref())
        }
        Commands::Config { action } => handle_config(action, workspace, config),
    }
}

fn load_sweep(
    workspace: &Path,
    config: Option<&Path>,
    args: &SweepArgs,
    mut overrides: SettingsOverrides,
) -> anyhow::Result<(SweepSettings, Sweep)> {
    overrides.sweep_file = args.sweep.clone();
    overrides.devices = args.devices;
    overrides.pdbbind_data = args.pdbbind_data.clone();
    overrides.trainer_script = args.trainer_script.clone();

    if config.is_none() && !settings_exist(Some(workspace)) {
        info!("No configuration file found; using defaults (see `pdbsweep config init`)");
    }
    let settings = load_settings(Some(workspace), config, Some(&overrides))
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let sweep = match settings.sweep_file_in(workspace) {
        Some(path) => Sweep::load(&path)?,
        None => Sweep::builtin(&settings.sweep_defaults()),
    };
    Ok((settings, sweep))
}

fn launcher_for(settings: &SweepSettings, workspace: &Path) -> TrainerLauncher {
    TrainerLauncher::new(
        settings.environment.clone(),
        settings.trainer_script.clone(),
        workspace.to_path_buf(),
    )
}

async fn handle_run(
    workspace: &Path,
    config: Option<&Path>,
    args: &SweepArgs,
    extra: SettingsOverrides,
    only: &[usize],
    dry_run: bool,
    force: bool,
) -> anyhow::Result<ExitCode> {
    let (settings, sweep) = load_sweep(workspace, config, args, extra)?;

    let findings = sweep.validate();
    let mut errors = 0;
    for (index, finding) in &findings {
        if finding.is_error() {
            errors += 1;
            eprintln!("  run {index}: {finding}");
        } else {
            warn!(run = index, "{}", finding.message);
        }
    }
    if errors > 0 && !force && !dry_run {
        anyhow::bail!(
            "{errors} preflight error(s) in sweep '{}'; fix them or pass --force",
            sweep.name
        );
    }

    let options = RunnerOptions {
        fail_fast: settings.fail_fast,
        timeout: settings.timeout(),
        ledger_path: Some(settings.ledger_path_in(workspace)),
        echo_output: true,
    };
    let runner = SweepRunner::new(launcher_for(&settings, workspace), options);

    if dry_run {
        for (index, argv) in runner.plan(&sweep, only)? {
            println!("[{index}] {}", shell_join(&argv));
        }
        return Ok(ExitCode::SUCCESS);
    }

    let report = runner.run(&sweep, only).await?;
    print_report(&report);

    Ok(if report.all_succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn handle_list(
    workspace: &Path,
    config: Option<&Path>,
    args: &SweepArgs,
) -> anyhow::Result<ExitCode> {
    let (settings, sweep) = load_sweep(workspace, config, args, SettingsOverrides::default())?;
    let launcher = launcher_for(&settings, workspace);

    println!("Sweep '{}' ({} runs)", sweep.name, sweep.len());
    for (i, run) in sweep.runs.iter().enumerate() {
        println!("{:>3}. {}", i + 1, run.describe());
        println!("     {}", shell_join(&launcher.command_line(&run.to_args())));
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_show(
    workspace: &Path,
    config: Option<&Path>,
    args: &SweepArgs,
    index: usize,
) -> anyhow::Result<ExitCode> {
    let (settings, sweep) = load_sweep(workspace, config, args, SettingsOverrides::default())?;
    let selected = sweep.select(&[index])?;
    let Some((_, run)) = selected.first() else {
        anyhow::bail!("run {index} not found");
    };
    let fingerprint = run.fingerprint();

    println!("# run {index} of sweep '{}'", sweep.name);
    println!("# fingerprint {fingerprint}");
    println!("{}", toml::to_string_pretty(run)?);
    for finding in run.validate() {
        println!("# {finding}");
    }

    match RunLedger::load(&settings.ledger_path_in(workspace)) {
        Ok(ledger) => {
            let earlier: Vec<&RunRecord> = ledger.by_fingerprint(&fingerprint).collect();
            match earlier.last() {
                Some(last) => println!(
                    "# ran {} time(s) before; last {} on {}",
                    earlier.len(),
                    last.status.as_str(),
                    last.started_at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => println!("# never run before"),
            }
        }
        Err(e) => warn!(error = %e, "Cannot read ledger"),
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_check(
    workspace: &Path,
    config: Option<&Path>,
    args: &SweepArgs,
) -> anyhow::Result<ExitCode> {
    let (_, sweep) = load_sweep(workspace, config, args, SettingsOverrides::default())?;
    let findings = sweep.validate();

    if findings.is_empty() {
        println!("All {} runs of '{}' passed preflight checks.", sweep.len(), sweep.name);
        return Ok(ExitCode::SUCCESS);
    }

    for (index, finding) in &findings {
        println!("run {index}: {finding}");
    }
    let errors = findings.iter().filter(|(_, f)| f.is_error()).count();
    println!(
        "\n{} error(s), {} warning(s) across {} runs.",
        errors,
        findings.len() - errors,
        sweep.len()
    );
    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn handle_history(
    workspace: &Path,
    config: Option<&Path>,
    limit: usize,
    fingerprint: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let settings = load_settings(Some(workspace), config, None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    let ledger = RunLedger::load(&settings.ledger_path_in(workspace))?;

    let records = history_records(&ledger, limit, fingerprint);
    if records.is_empty() {
        match fingerprint {
            Some(fp) => println!("No runs recorded for fingerprint {fp}."),
            None => println!("No runs recorded yet."),
        }
        return Ok(ExitCode::SUCCESS);
    }
    for record in records {
        println!(
            "{}  {}#{}  {}",
            record.started_at.format("%Y-%m-%d %H:%M:%S"),
            record.sweep_name,
            record.index,
            record_line(record)
        );
    }
    Ok(ExitCode::SUCCESS)
}

/// The newest `limit` records, optionally only those of one configuration.
fn history_records<'a>(
    ledger: &'a RunLedger,
    limit: usize,
    fingerprint: Option<&'a str>,
) -> Vec<&'a RunRecord> {
    let mut records: Vec<&RunRecord> = match fingerprint {
        Some(fp) => ledger.by_fingerprint(fp).collect(),
        None => ledger.records.iter().collect(),
    };
    let start = records.len().saturating_sub(limit);
    records.split_off(start)
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    config: Option<&Path>,
) -> anyhow::Result<ExitCode> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace_config_path(workspace);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(ExitCode::SUCCESS);
            }
            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml_str = toml::to_string_pretty(&SweepSettings::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        ConfigAction::Show => {
            let settings = load_settings(Some(workspace), config, None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", toml::to_string_pretty(&settings)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_report(report: &SweepReport) {
    println!();
    println!("Sweep '{}' ({})", report.sweep_name, report.sweep_id);
    for record in &report.records {
        println!("  [{}] {}", record.index, record_line(record));
    }
    if report.stopped_early {
        println!("  stopped early; later runs were not launched");
    }
    println!(
        "  {} succeeded, {} did not",
        report.succeeded(),
        report.failed()
    );
}

fn record_line(record: &RunRecord) -> String {
    let mut line = format!(
        "{:<12} {:>7.0}s  {}",
        record.status.as_str(),
        record.duration_secs,
        record.description
    );
    if record.status == RunStatus::Failed {
        if let Some(code) = record.exit_code {
            line.push_str(&format!("  (exit {code})"));
        }
    }
    if let Some(scores) = &record.scores {
        line.push_str(&format!("  [{scores}]"));
    }
    line
}

/// Join argv for display, quoting arguments that a shell would split.
fn shell_join(argv: &[String]) -> String {
    argv.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || "'\"$`\\".contains(c)) {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
