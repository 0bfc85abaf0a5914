//! Sync Executor
//!
//! Runs one job for one target: prepares the local directory, invokes the
//! sync engine through a `ProcessSupervisor`, re-runs once with `--resync`
//! when the engine asks for it, and classifies the result.

use crate::command::Invocation;
use crate::supervisor::{ProcessExit, ProcessReport, ProcessSpec, ProcessSupervisor};
use chrono::Utc;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use turbo_core::config::ExecutorSettings;
use turbo_core::{FailureKind, JobOutcome, SyncConfig, SyncJob, SyncTarget};

/// Executes sync jobs
pub struct SyncExecutor {
    config: Arc<SyncConfig>,
    supervisor: Arc<dyn ProcessSupervisor>,
}

impl SyncExecutor {
    pub fn new(config: Arc<SyncConfig>, supervisor: Arc<dyn ProcessSupervisor>) -> Self {
        Self { config, supervisor }
    }

    /// Run `job` against `target` and return it with its outcome recorded
    pub async fn run(
        &self,
        mut job: SyncJob,
        target: &SyncTarget,
        cancel: CancellationToken,
    ) -> SyncJob {
        let settings = &self.config.executor;
        job.started_at = Some(Utc::now());

        info!(
            target_id = %job.target_id,
            trigger = %job.trigger,
            attempt = job.attempt,
            "Starting sync"
        );

        if let Err(e) = tokio::fs::create_dir_all(&target.local_path).await {
            let outcome = JobOutcome::failed(
                FailureKind::Fatal,
                format!(
                    "cannot create local directory {}: {}",
                    target.local_path.display(),
                    e
                ),
            );
            return self.finish(job, outcome);
        }

        let deadline = Instant::now() + settings.job_timeout();
        let mut resync = false;

        let (report, outcome) = loop {
            let invocation = Invocation::build(settings, target, resync);
            let spec = ProcessSpec {
                program: invocation.program.clone(),
                args: invocation.args.clone(),
                target_id: job.target_id.clone(),
                timeout: deadline.saturating_duration_since(Instant::now()),
                kill_grace: settings.kill_grace(),
                tail_lines: settings.output_tail_lines,
                cancel: cancel.clone(),
            };

            tracing::debug!(target_id = %job.target_id, "Running {}", invocation.display());

            let report = match self.supervisor.run(spec).await {
                Ok(report) => report,
                Err(e) => {
                    let outcome = JobOutcome::failed(FailureKind::Fatal, e.to_string());
                    return self.finish(job, outcome);
                }
            };

            if let ProcessExit::Exited(code) = report.exit {
                if !resync && settings.resync_exit_codes.contains(&code) {
                    warn!(
                        target_id = %job.target_id,
                        code,
                        "Sync engine requested a resync, re-running with --resync"
                    );
                    resync = true;
                    continue;
                }
            }

            let outcome = classify(settings, &report);
            break (report, outcome);
        };

        if let ProcessExit::Exited(code) = report.exit {
            job.exit_code = Some(code);
        }

        self.finish(job, outcome)
    }

    fn finish(&self, mut job: SyncJob, outcome: JobOutcome) -> SyncJob {
        match &outcome {
            JobOutcome::Succeeded => {
                info!(target_id = %job.target_id, attempt = job.attempt, "Sync succeeded");
            }
            JobOutcome::Failed { kind, message } => {
                warn!(
                    target_id = %job.target_id,
                    attempt = job.attempt,
                    kind = %kind,
                    "Sync failed: {}",
                    message
                );
            }
        }
        job.finish(outcome);
        job
    }
}

/// Classify how a run ended
pub fn classify(settings: &ExecutorSettings, report: &ProcessReport) -> JobOutcome {
    let detail = |summary: String| match report.tail.last() {
        Some(line) if !line.is_empty() => format!("{}: {}", summary, line),
        _ => summary,
    };

    match report.exit {
        ProcessExit::Exited(0) => JobOutcome::Succeeded,
        ProcessExit::Exited(code) if settings.fatal_exit_codes.contains(&code) => {
            JobOutcome::failed(FailureKind::Fatal, detail(format!("exit code {}", code)))
        }
        ProcessExit::Exited(code) => {
            JobOutcome::failed(FailureKind::Transient, detail(format!("exit code {}", code)))
        }
        ProcessExit::Signaled => JobOutcome::failed(
            FailureKind::Transient,
            detail("terminated by signal".to_string()),
        ),
        ProcessExit::TimedOut => JobOutcome::failed(
            FailureKind::Timeout,
            format!("timed out after {}s", settings.job_timeout_secs),
        ),
        ProcessExit::Cancelled => JobOutcome::failed(FailureKind::Cancelled, "cancelled"),
    }
}
