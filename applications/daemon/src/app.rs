/// Wiring for each CLI command
use crate::check::run_checks;
use crate::cli::{Cli, Commands};
use crate::commands::spawn_stdin_commands;
use crate::config::ConfigLoader;
use crate::error::DaemonError;
use crate::report::{FanoutReporter, LogReporter};
use anyhow::Context;
use serde::Serialize;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use turbo_core::{EngineRole, SyncConfig, SyncTarget};
use turbo_discovery::DiscoveryScanner;
use turbo_engine::{EngineCoordinator, EngineGate, HttpHealthProbe, ProcessLauncher};
use turbo_sync::{
    RunMode, RunSummary, ScannerSource, Scheduler, SyncExecutor, TargetRegistry, TokioSupervisor,
    WatchStatusReporter,
};

/// Buffered stdin commands
const COMMAND_CAPACITY: usize = 16;

/// Load configuration and run the selected command
pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    // A missing .env file is fine
    dotenvy::dotenv().ok();

    let config = Arc::new(ConfigLoader::new(cli.config.clone()).load()?);

    match cli.selected() {
        Commands::Run {
            status_json,
            stdin_commands,
        } => run_daemon(config, status_json, stdin_commands).await,
        Commands::Scan { json } => scan(&config, json).await,
        Commands::SyncOnce => sync_once(config).await,
        Commands::Check => check(&config).await,
    }
}

/// Run until SIGINT, SIGTERM or a `quit` command
pub async fn run_daemon(
    config: Arc<SyncConfig>,
    status_json: bool,
    stdin_commands: bool,
) -> anyhow::Result<ExitCode> {
    info!("Starting TurboSync");
    info!("Remote root: {}", config.paths.remote_root.display());
    info!("Local root: {}", config.paths.local_root.display());

    let (coordinator, gate) = start_engines(&config).await?;

    let status = WatchStatusReporter::new();
    let reporter = FanoutReporter::new()
        .with(Arc::new(status.clone()))
        .with(Arc::new(LogReporter::new(status_json)));
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);

    let scheduler = build_scheduler(&config, gate)
        .with_reporter(Arc::new(reporter))
        .with_commands(Box::new(command_rx));
    let handle = scheduler.handle();

    let stdin_task = stdin_commands.then(|| spawn_stdin_commands(command_tx.clone(), status));
    drop(command_tx);

    let signal_task = tokio::spawn(async move {
        shutdown_signal().await;
        if handle.shutdown().await.is_err() {
            warn!("Scheduler already stopped");
        }
    });

    let summary = scheduler.run().await;
    info!(
        "Stopped with {}/{} targets in sync",
        summary.succeeded, summary.total
    );

    signal_task.abort();
    if let Some(task) = stdin_task {
        task.abort();
    }
    coordinator.shutdown().await;

    Ok(ExitCode::SUCCESS)
}

/// Discover, sync everything once and report
pub async fn sync_once(config: Arc<SyncConfig>) -> anyhow::Result<ExitCode> {
    let (coordinator, gate) = start_engines(&config).await?;

    let summary = build_scheduler(&config, gate)
        .with_reporter(Arc::new(LogReporter::new(false)))
        .mode(RunMode::UntilIdle)
        .run()
        .await;
    coordinator.shutdown().await;

    println!("{}", summary_line(&summary));
    for id in &summary.failed {
        println!("  failed: {}", id);
    }

    if summary.all_succeeded() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Print the targets a scan would register
pub async fn scan(config: &SyncConfig, json: bool) -> anyhow::Result<ExitCode> {
    let scanner = DiscoveryScanner::from_settings(&config.paths);
    let targets = tokio::task::spawn_blocking(move || scanner.discover())
        .await
        .context("discovery task panicked")??;

    if json {
        let listing: Vec<DiscoveredTarget> = targets.iter().map(DiscoveredTarget::from).collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        print!("{}", render_targets(&targets));
    }

    Ok(ExitCode::SUCCESS)
}

/// Run the dependency checks and print one line each
pub async fn check(config: &SyncConfig) -> anyhow::Result<ExitCode> {
    let results = run_checks(config).await;
    for result in &results {
        println!("{}", result.line());
    }

    let failed = results.iter().filter(|r| !r.ok).count();
    if failed > 0 {
        return Err(DaemonError::ChecksFailed(failed).into());
    }
    Ok(ExitCode::SUCCESS)
}

fn build_scheduler(config: &Arc<SyncConfig>, gate: EngineGate) -> Scheduler {
    let executor = SyncExecutor::new(Arc::clone(config), Arc::new(TokioSupervisor::new()));
    let source = ScannerSource::new(DiscoveryScanner::from_settings(&config.paths));

    Scheduler::new(
        Arc::clone(config),
        TargetRegistry::new(),
        Arc::new(executor),
        Arc::new(source),
    )
    .with_gate(gate)
}

/// Launch the configured engines and wait for their first health check
async fn start_engines(config: &SyncConfig) -> anyhow::Result<(EngineCoordinator, EngineGate)> {
    let probe = HttpHealthProbe::new().context("failed to build health probe")?;
    let coordinator = EngineCoordinator::start(
        &config.engines,
        Arc::new(ProcessLauncher::new()),
        Arc::new(probe),
    );

    if !config.engines.is_empty() {
        let degraded = degraded_roles(coordinator.ensure_all_ready().await);
        if degraded.len() == config.engines.len() {
            error!("No sync engine became ready");
            coordinator.shutdown().await;
            return Err(DaemonError::EnginesDegraded(degraded).into());
        }
        for role in &degraded {
            warn!(role = %role, "Engine not ready, dependent jobs will fail");
        }
    }

    let gate = coordinator.gate(&config.required_roles());
    Ok((coordinator, gate))
}

fn degraded_roles(results: Vec<(EngineRole, turbo_engine::Result<()>)>) -> Vec<EngineRole> {
    results
        .into_iter()
        .filter_map(|(role, result)| match result {
            Ok(()) => None,
            Err(e) => {
                warn!(role = %role, "{}", e);
                Some(role)
            }
        })
        .collect()
}

fn summary_line(summary: &RunSummary) -> String {
    let mut line = format!(
        "{}/{} targets succeeded",
        summary.succeeded, summary.total
    );
    if summary.scan_failed {
        line.push_str(" (remote root unavailable)");
    }
    line
}

/// One row of `turbosync scan --json`
#[derive(Debug, Serialize)]
struct DiscoveredTarget {
    id: String,
    remote: String,
    local: String,
}

impl From<&SyncTarget> for DiscoveredTarget {
    fn from(target: &SyncTarget) -> Self {
        Self {
            id: target.id.to_string(),
            remote: target.remote_path.display().to_string(),
            local: target.local_path.display().to_string(),
        }
    }
}

fn render_targets(targets: &[SyncTarget]) -> String {
    if targets.is_empty() {
        return "No sync targets found\n".to_string();
    }

    let width = targets
        .iter()
        .map(|t| t.id.as_str().len())
        .max()
        .unwrap_or(0)
        .max("TARGET".len());

    let mut out = format!("{:<width$}  {}\n", "TARGET", "LOCAL", width = width);
    for target in targets {
        out.push_str(&format!(
            "{:<width$}  {}\n",
            target.id.as_str(),
            target.local_path.display(),
            width = width
        ));
    }
    out
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}
