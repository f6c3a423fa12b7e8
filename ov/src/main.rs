//! Overseer - agent loop orchestrator
//!
//! CLI entry point for starting loops and operating the control plane.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use queuestore::TaskStore;

use overseer::cli::{Cli, Command, Mode};
use overseer::config::Config;
use overseer::r#loop::{self, Engine, EngineConfig};
use overseer::registry::{LoopKind, ProcessRegistry, ProcessTarget};
use overseer::signals::{ControlSignals, SignalWatcher, StopScope};
use overseer::worker::CommandWorker;
use overseer::worktree::{WorktreeManager, gitops};

fn setup_logging(verbose: bool) -> Result<()> {
    // Log to file, not stdout: the console belongs to command output
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("overseer")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("overseer.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose).context("Failed to setup logging")?;
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Start { mode, foreground, drain } => cmd_start(&config, mode, foreground, drain).await,
        Command::Stop { mode } => cmd_stop(&config, mode),
        Command::Pause => cmd_pause(&config),
        Command::Resume { mode } => cmd_resume(&config, mode),
        Command::Reset => cmd_reset(&config),
        Command::Status => cmd_status(&config),
        Command::Ps => cmd_ps(&config),
        Command::Kill { target } => cmd_kill(&config, &target),
        Command::Whisper { target, message, priority } => cmd_whisper(&config, &target, &message, &priority),
        Command::Logs { id, offset, lines } => cmd_logs(&config, &id, offset, lines),
        Command::Tasks { status } => cmd_tasks(&config, status),
        Command::GitStatus => cmd_git_status(&config).await,
        Command::Push { message } => cmd_push(&config, &message).await,
    }
}

fn engine_config(config: &Config, kind: LoopKind, drain: bool) -> EngineConfig {
    let template = match kind {
        LoopKind::Execution => config.worker.prompt_template.clone(),
        LoopKind::Analysis => config.worker.analysis_template.clone(),
    };
    EngineConfig {
        kind,
        max_retries: config.loop_config.max_retries,
        failure_threshold: config.loop_config.failure_threshold,
        preflight_analysis: config.loop_config.preflight_analysis,
        cooldown: config.cooldown(),
        idle_poll: config.idle_poll(),
        session_dir: config.session_dir(),
        scratch_dir: config.scratch_dir(),
        prompt_template: template,
        exit_on_idle: drain,
        record_id: std::env::var(overseer::registry::RECORD_ID_ENV).ok(),
    }
}

fn build_engine(config: &Config, kind: LoopKind, drain: bool) -> Result<Engine> {
    let store = TaskStore::open(config.queue_dir())?;
    let registry = ProcessRegistry::open(config.registry_dir())?;
    let signals = ControlSignals::open(config.control_dir())?;
    let worktrees = WorktreeManager::new(config.worktree_config());
    let worker = Arc::new(CommandWorker::new(
        &config.worker.command,
        config.worker.args.clone(),
        &config.worker.model,
        config.worker_timeout(),
    ));
    Ok(Engine::new(engine_config(config, kind, drain), store, registry, signals, worktrees, worker))
}

/// Start loops, either in this process or as detached daemons
async fn cmd_start(config: &Config, mode: Mode, foreground: bool, drain: bool) -> Result<()> {
    if foreground {
        let mut handles = Vec::new();
        for kind in mode.kinds() {
            let engine = build_engine(config, kind, drain)?;
            println!("Starting {} loop in foreground...", kind.to_string().cyan());
            handles.push(tokio::spawn(engine.run()));
        }
        for handle in handles {
            let stats = handle.await??;
            println!("{} Loop finished: {}", "✓".green(), stats.summary());
        }
        return Ok(());
    }

    let registry = ProcessRegistry::open(config.registry_dir())?;
    let exe = std::env::current_exe().context("Cannot locate own executable")?;
    for kind in mode.kinds() {
        let mut args = vec![
            "start".to_string(),
            "--foreground".to_string(),
            "--mode".to_string(),
            kind.to_string(),
        ];
        if drain {
            args.push("--drain".to_string());
        }
        let id = registry.launch(kind.into(), &exe.to_string_lossy(), &args)?;
        println!("{} Started {} loop: {}", "✓".green(), kind.to_string().yellow(), id.cyan());
    }
    Ok(())
}

fn cmd_stop(config: &Config, mode: Mode) -> Result<()> {
    let signals = ControlSignals::open(config.control_dir())?;
    match mode {
        Mode::Both => {
            signals.assert_stop(StopScope::Global, "cli");
            println!("{} Global stop requested", "✓".green());
        }
        _ => {
            for kind in mode.kinds() {
                signals.assert_stop(StopScope::Kind(kind), "cli");
                println!("{} Stop requested for {} loop", "✓".green(), kind.to_string().yellow());
            }
        }
    }
    Ok(())
}

fn cmd_pause(config: &Config) -> Result<()> {
    let signals = ControlSignals::open(config.control_dir())?;
    signals.pause("cli");
    println!("{} Paused; loops hold at their next suspension point", "✓".green());
    Ok(())
}

fn cmd_resume(config: &Config, mode: Mode) -> Result<()> {
    let signals = ControlSignals::open(config.control_dir())?;
    for kind in mode.kinds() {
        signals.resume(kind);
    }
    println!("{} Resumed", "✓".green());
    Ok(())
}

/// Full recovery: clear signals, force every process record stopped,
/// clear session locks
fn cmd_reset(config: &Config) -> Result<()> {
    let signals = ControlSignals::open(config.control_dir())?;
    let registry = ProcessRegistry::open(config.registry_dir())?;

    signals.clear_all();
    let stopped = registry.force_stop_all()?;
    for kind in LoopKind::all() {
        r#loop::force_stopped(&config.session_dir(), kind);
    }
    println!("{} Reset complete; {} process records forced stopped", "✓".green(), stopped);
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let store = TaskStore::open(config.queue_dir())?;
    let signals = ControlSignals::open(config.control_dir())?;

    println!("{}", "Queue".bold());
    for status in queuestore::TaskStatus::all() {
        let count = store.list(Some(status))?.len();
        if count > 0 {
            println!("  {:>4}  {}", count, status.to_string().yellow());
        }
    }

    println!("{}", "Signals".bold());
    let mut watcher = SignalWatcher::new(signals);
    watcher.refresh();
    for (name, asserted) in watcher.summary() {
        let state = if asserted { "asserted".red() } else { "clear".dimmed() };
        println!("  {:<16} {}", name, state);
    }

    println!("{}", "Sessions".bold());
    for kind in LoopKind::all() {
        match r#loop::read_status(&config.session_dir(), kind) {
            Some(status) => println!(
                "  {:<10} {:?}  failures={}  {}",
                kind.to_string().yellow(),
                status.state,
                status.consecutive_failures,
                status.stats.summary().dimmed()
            ),
            None => println!("  {:<10} {}", kind.to_string().yellow(), "no session".dimmed()),
        }
    }
    Ok(())
}

fn cmd_ps(config: &Config) -> Result<()> {
    let registry = ProcessRegistry::open(config.registry_dir())?;
    let records = registry.list(None)?;
    if records.is_empty() {
        println!("No registered processes");
        return Ok(());
    }
    for record in records {
        println!(
            "{} {:<10} {:<10} pid={} task={}",
            queuestore::short_id(&record.id).cyan(),
            record.kind.to_string().yellow(),
            record.status.to_string(),
            record.pid,
            record.task_id.as_deref().unwrap_or("-").dimmed()
        );
    }
    Ok(())
}

fn cmd_kill(config: &Config, target: &str) -> Result<()> {
    let registry = ProcessRegistry::open(config.registry_dir())?;
    let target: ProcessTarget = target.parse().unwrap_or(ProcessTarget::All);
    let killed = registry.kill(&target)?;
    println!("{} Killed {} process(es)", "✓".green(), killed);
    Ok(())
}

fn cmd_whisper(config: &Config, target: &str, message: &str, priority: &str) -> Result<()> {
    let registry = ProcessRegistry::open(config.registry_dir())?;
    let target: ProcessTarget = target.parse().unwrap_or(ProcessTarget::All);
    let delivered = registry.whisper(&target, message, priority)?;
    println!("{} Whispered to {} process(es)", "✓".green(), delivered);
    Ok(())
}

fn cmd_logs(config: &Config, id: &str, offset: u64, lines: usize) -> Result<()> {
    let registry = ProcessRegistry::open(config.registry_dir())?;
    let initial = if offset == 0 { Some(lines) } else { None };
    let chunk = registry.logs().tail_activity(id, offset, initial);
    for line in &chunk.lines {
        println!("{line}");
    }
    println!("{}", format!("-- next offset: {}", chunk.next_offset).dimmed());
    Ok(())
}

fn cmd_tasks(config: &Config, status: Option<String>) -> Result<()> {
    let store = TaskStore::open(config.queue_dir())?;
    let status = status.map(|s| s.parse()).transpose().map_err(|e| eyre::eyre!("{e}"))?;
    for task in store.list(status)? {
        println!(
            "{} {} p{} {}",
            task.short_id().cyan(),
            task.status.to_string().yellow(),
            task.priority,
            task.name
        );
    }
    Ok(())
}

async fn cmd_git_status(config: &Config) -> Result<()> {
    let status = gitops::status(&config.paths.project_root).await?;
    println!("On branch {}", status.branch.yellow());
    if status.is_clean() {
        println!("{} Working tree clean", "✓".green());
    } else {
        for file in &status.dirty_files {
            println!("  {} {}", "M".red(), file);
        }
    }
    if status.ahead > 0 || status.behind > 0 {
        println!("{} ahead, {} behind upstream", status.ahead, status.behind);
    }
    Ok(())
}

async fn cmd_push(config: &Config, message: &str) -> Result<()> {
    let head = gitops::commit_and_push(&config.paths.project_root, message).await?;
    println!("{} Pushed; HEAD is {}", "✓".green(), head.cyan());
    Ok(())
}
