//! Scheduler behaviour against a fake engine and an in-memory marker tree
//!
//! Most tests run on paused time, so retry backoff and scan intervals elapse
//! instantly while keeping their relative order. The real file watcher test
//! runs on wall-clock time.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use turbo_core::{
    Command, EngineHealth, EngineRole, FailureKind, StatusSnapshot, SyncConfig, SyncStatus,
    TargetId, TargetState, TriggerScope,
};
use turbo_engine::EngineGate;
use turbo_sync::{
    RunMode, RunSummary, Scheduler, SchedulerHandle, SyncExecutor, TargetRegistry,
    WatchStatusReporter,
};

use test_helpers::{test_config, wait_for, FakeSource, FakeSupervisor, Step};

struct Harness {
    _dirs: (TempDir, TempDir),
    source: Arc<FakeSource>,
    supervisor: Arc<FakeSupervisor>,
    registry: TargetRegistry,
    handle: SchedulerHandle,
    status: watch::Receiver<StatusSnapshot>,
    task: JoinHandle<RunSummary>,
}

struct Setup {
    markers: Vec<&'static str>,
    default_step: Step,
    mode: RunMode,
    gate: Option<EngineGate>,
    configure: fn(&mut SyncConfig),
    /// Use the real file watcher instead of injected notifications
    os_watcher: bool,
    /// Point the configured local root below a regular file
    unusable_local_root: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            markers: Vec::new(),
            default_step: Step::ok(1),
            mode: RunMode::Continuous,
            gate: None,
            configure: |_| {},
            os_watcher: false,
            unusable_local_root: false,
        }
    }
}

fn start(setup: Setup, script: impl FnOnce(&FakeSupervisor)) -> Harness {
    let remote = TempDir::new().unwrap();
    let local = TempDir::new().unwrap();

    let mut config = test_config(remote.path(), local.path());
    (setup.configure)(&mut config);
    if setup.unusable_local_root {
        let blocker = local.path().join("blocker");
        std::fs::write(&blocker, b"").unwrap();
        config.paths.local_root = blocker.join("root");
    }
    for marker in &setup.markers {
        std::fs::create_dir_all(local.path().join(marker)).unwrap();
    }
    let config = Arc::new(config);

    let source = FakeSource::new(remote.path(), local.path(), &setup.markers);
    let supervisor = FakeSupervisor::new(setup.default_step);
    script(&supervisor);

    let executor = SyncExecutor::new(Arc::clone(&config), supervisor.clone());
    let registry = TargetRegistry::new();
    let reporter = Arc::new(WatchStatusReporter::new());
    let status = reporter.subscribe();

    let mut scheduler = Scheduler::new(
        config,
        registry.clone(),
        Arc::new(executor),
        source.clone(),
    )
    .with_reporter(reporter)
    .mode(setup.mode);
    if !setup.os_watcher {
        scheduler = scheduler.without_os_watcher();
    }
    if let Some(gate) = setup.gate {
        scheduler = scheduler.with_gate(gate);
    }

    let handle = scheduler.handle();
    let task = tokio::spawn(scheduler.run());

    Harness {
        _dirs: (remote, local),
        source,
        supervisor,
        registry,
        handle,
        status,
        task,
    }
}

/// Poll on wall-clock time, for tests driven by the OS watcher
async fn eventually(what: &str, check: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "timed out: {}", what);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn status_of(snapshot: &StatusSnapshot, id: &str) -> Option<SyncStatus> {
    snapshot.target(&TargetId::new(id)).map(|t| t.last_status)
}

fn settled(snapshot: &StatusSnapshot, id: &str) -> bool {
    snapshot
        .target(&TargetId::new(id))
        .is_some_and(|t| t.state == TargetState::Idle && t.last_status != SyncStatus::Never)
}

#[tokio::test(start_paused = true)]
async fn test_new_marker_synced_on_next_tick() {
    let mut h = start(
        Setup {
            configure: |c| c.schedule.scan_interval_secs = 60,
            ..Setup::default()
        },
        |_| {},
    );

    // Let the first (empty) scan run
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.registry.is_empty().await);
    let start = tokio::time::Instant::now();

    h.source.add("projects/alpha");
    let snapshot = wait_for(&mut h.status, |s| {
        status_of(s, "projects/alpha") == Some(SyncStatus::Succeeded)
    })
    .await;

    let target = snapshot.target(&TargetId::new("projects/alpha")).unwrap();
    assert!(target.last_sync_at.is_some());
    assert!(!target.running);

    let calls = h.supervisor.calls_for("projects/alpha");
    assert_eq!(calls.len(), 1);
    assert!(calls[0].at - start >= Duration::from_secs(59));
    assert!(calls[0].args[1].ends_with("projects/alpha/"));

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_removed_target_ignores_late_watch_event() {
    let mut h = start(
        Setup {
            markers: vec!["a"],
            configure: |c| {
                c.schedule.scan_interval_secs = 60;
                c.watch.enabled = true;
            },
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| status_of(s, "a") == Some(SyncStatus::Succeeded)).await;

    h.source.remove("a");
    wait_for(&mut h.status, |s| s.targets.is_empty()).await;

    h.handle.notify_change(TargetId::new("a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(300)).await;

    assert_eq!(h.supervisor.calls_for("a").len(), 1);
    assert!(!h.registry.contains(&TargetId::new("a")).await);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_readded_target_waits_for_previous_job() {
    let mut h = start(
        Setup {
            markers: vec!["a"],
            default_step: Step::ok(100),
            configure: |c| c.schedule.scan_interval_secs = 10,
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| {
        s.target(&TargetId::new("a"))
            .is_some_and(|t| t.state == TargetState::Running)
    })
    .await;

    h.source.remove("a");
    h.handle.command(Command::Rescan).await.unwrap();
    wait_for(&mut h.status, |s| s.targets.is_empty()).await;

    // Rediscovered while the first process is still running
    h.source.add("a");
    tokio::time::sleep(Duration::from_secs(15)).await;

    assert_eq!(h.supervisor.calls_for("a").len(), 1);
    assert_eq!(h.supervisor.max_per_target(), 1);
    assert_eq!(
        h.registry.get(&TargetId::new("a")).await.map(|t| t.state),
        Some(TargetState::Queued)
    );

    wait_for(&mut h.status, |s| status_of(s, "a") == Some(SyncStatus::Succeeded)).await;

    let calls = h.supervisor.calls_for("a");
    assert_eq!(calls.len(), 2);
    assert_eq!(h.supervisor.max_per_target(), 1);
    assert!(calls[1].at >= calls[0].at + Duration::from_secs(100));

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_stop_after_max_retries() {
    let mut h = start(
        Setup {
            markers: vec!["flaky"],
            default_step: Step::exit(1, 2),
            ..Setup::default()
        },
        |_| {},
    );

    let snapshot = wait_for(&mut h.status, |s| {
        s.target(&TargetId::new("flaky"))
            .is_some_and(|t| t.attempt == 4 && t.state == TargetState::Idle)
    })
    .await;

    let target = snapshot.target(&TargetId::new("flaky")).unwrap();
    assert_eq!(target.last_status, SyncStatus::Failed);
    assert_eq!(target.last_failure, Some(FailureKind::Transient));
    assert!(target.is_idle_failed());

    // Nothing more until the next external trigger
    tokio::time::sleep(Duration::from_secs(1000)).await;
    let calls = h.supervisor.calls_for("flaky");
    assert_eq!(calls.len(), 4);

    // 1s run + 10s, 20s, 40s backoff
    let gaps: Vec<u64> = calls
        .windows(2)
        .map(|w| (w[1].at - w[0].at).as_secs())
        .collect();
    assert_eq!(gaps, vec![11, 21, 41]);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_parallelism_is_bounded() {
    let mut h = start(
        Setup {
            markers: vec!["a", "b", "c", "d", "e", "f"],
            default_step: Step::ok(5),
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| {
        s.targets.len() == 6
            && s.targets.iter().all(|t| t.last_status == SyncStatus::Succeeded)
    })
    .await;

    assert_eq!(h.supervisor.max_total(), 2);
    assert_eq!(h.supervisor.max_per_target(), 1);
    assert_eq!(h.supervisor.calls().len(), 6);

    // FIFO admission in discovery order
    let order: Vec<String> = h.supervisor.calls().into_iter().map(|c| c.target).collect();
    assert_eq!(order, vec!["a", "b", "c", "d", "e", "f"]);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_triggers_while_running_are_dropped() {
    let mut h = start(
        Setup {
            markers: vec!["busy"],
            default_step: Step::ok(30),
            configure: |c| c.watch.enabled = true,
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| s.running_count() == 1).await;

    for _ in 0..3 {
        h.handle.notify_change(TargetId::new("busy")).await.unwrap();
    }
    h.handle
        .command(Command::TriggerSync {
            scope: TriggerScope::Target(TargetId::new("busy")),
        })
        .await
        .unwrap();

    wait_for(&mut h.status, |s| settled(s, "busy")).await;
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert_eq!(h.supervisor.calls_for("busy").len(), 1);
    assert_eq!(h.supervisor.max_per_target(), 1);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_watch_event_syncs_idle_target() {
    let mut h = start(
        Setup {
            markers: vec!["docs"],
            configure: |c| c.watch.enabled = true,
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| settled(s, "docs")).await;

    h.handle.notify_change(TargetId::new("docs")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.supervisor.calls_for("docs").len(), 2);

    h.handle
        .command(Command::ToggleWatch { enabled: false })
        .await
        .unwrap();
    wait_for(&mut h.status, |s| !s.watch_enabled).await;

    h.handle.notify_change(TargetId::new("docs")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(h.supervisor.calls_for("docs").len(), 2);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_resets_retry_backoff() {
    let mut h = start(
        Setup {
            markers: vec!["a"],
            configure: |c| c.schedule.retry_base_delay_secs = 100,
            ..Setup::default()
        },
        |s| s.script("a", &[Step::exit(1, 5)]),
    );

    wait_for(&mut h.status, |s| {
        s.target(&TargetId::new("a"))
            .is_some_and(|t| t.state == TargetState::Retrying)
    })
    .await;

    h.handle
        .command(Command::TriggerSync {
            scope: TriggerScope::Target(TargetId::new("a")),
        })
        .await
        .unwrap();

    let snapshot =
        wait_for(&mut h.status, |s| status_of(s, "a") == Some(SyncStatus::Succeeded)).await;
    assert_eq!(snapshot.target(&TargetId::new("a")).unwrap().attempt, 1);

    let calls = h.supervisor.calls_for("a");
    assert_eq!(calls.len(), 2);
    assert!(calls[1].at - calls[0].at < Duration::from_secs(10));

    // The superseded backoff timer does not start another job
    tokio::time::sleep(Duration::from_secs(500)).await;
    assert_eq!(h.supervisor.calls_for("a").len(), 2);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fatal_failure_is_not_retried() {
    let mut h = start(
        Setup {
            markers: vec!["broken"],
            default_step: Step::exit(1, 3),
            ..Setup::default()
        },
        |_| {},
    );

    let snapshot = wait_for(&mut h.status, |s| settled(s, "broken")).await;
    let target = snapshot.target(&TargetId::new("broken")).unwrap();
    assert_eq!(target.last_failure, Some(FailureKind::Fatal));
    assert!(target.last_message.as_deref().unwrap().contains("exit code 3"));

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.supervisor.calls_for("broken").len(), 1);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_job_timeout_is_retryable() {
    let mut h = start(
        Setup {
            markers: vec!["slow"],
            configure: |c| c.executor.job_timeout_secs = 30,
            ..Setup::default()
        },
        |s| s.script("slow", &[Step::ok(120)]),
    );

    let snapshot = wait_for(&mut h.status, |s| {
        s.target(&TargetId::new("slow"))
            .is_some_and(|t| t.state == TargetState::Retrying)
    })
    .await;
    let target = snapshot.target(&TargetId::new("slow")).unwrap();
    assert_eq!(target.last_failure, Some(FailureKind::Timeout));

    // Retry runs with the default (fast) step and succeeds
    wait_for(&mut h.status, |s| status_of(s, "slow") == Some(SyncStatus::Succeeded)).await;
    assert_eq!(h.supervisor.calls_for("slow").len(), 2);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_degraded_engine_fails_pending_jobs() {
    let (health_tx, health_rx) =
        watch::channel(EngineHealth::starting(EngineRole::Source, "127.0.0.1:28384"));
    let gate = EngineGate::new(vec![health_rx], &[EngineRole::Source]);

    let mut h = start(
        Setup {
            markers: vec!["a", "b"],
            gate: Some(gate),
            ..Setup::default()
        },
        |_| {},
    );

    // Held while the engine is starting
    wait_for(&mut h.status, |s| {
        s.targets.len() == 2 && s.targets.iter().all(|t| t.state == TargetState::Queued)
    })
    .await;
    assert!(h.supervisor.calls().is_empty());

    health_tx.send_modify(|health| {
        health.restart_count = 5;
        health.degraded = true;
    });

    let snapshot = wait_for(&mut h.status, |s| {
        s.targets.iter().all(|t| t.is_idle_failed())
    })
    .await;
    for target in &snapshot.targets {
        assert_eq!(target.last_failure, Some(FailureKind::EngineUnavailable));
        assert!(target.last_message.as_deref().unwrap().contains("source"));
    }
    assert!(snapshot.engines[0].degraded);
    assert!(h.supervisor.calls().is_empty());

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_jobs_start_once_engine_is_healthy() {
    let (health_tx, health_rx) =
        watch::channel(EngineHealth::starting(EngineRole::Destination, "127.0.0.1:28386"));
    let gate = EngineGate::new(vec![health_rx], &[EngineRole::Destination]);

    let mut h = start(
        Setup {
            markers: vec!["a"],
            gate: Some(gate),
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| s.targets.len() == 1).await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(h.supervisor.calls().is_empty());

    health_tx.send_modify(|health| health.healthy = true);
    wait_for(&mut h.status, |s| status_of(s, "a") == Some(SyncStatus::Succeeded)).await;

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_root_keeps_targets() {
    let mut h = start(
        Setup {
            markers: vec!["a"],
            configure: |c| c.schedule.scan_interval_secs = 60,
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| settled(s, "a")).await;
    h.source.set_unavailable(true);

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(h.registry.contains(&TargetId::new("a")).await);
    // No scheduled jobs while the root is unreadable
    assert_eq!(h.supervisor.calls_for("a").len(), 1);

    h.source.set_unavailable(false);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.supervisor.calls_for("a").len(), 2);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_manual_trigger_of_unknown_target_is_ignored() {
    let mut h = start(
        Setup {
            markers: vec!["a"],
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| settled(s, "a")).await;
    h.handle
        .command(Command::TriggerSync {
            scope: TriggerScope::Target(TargetId::new("ghost")),
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(!h.registry.contains(&TargetId::new("ghost")).await);
    assert!(h.supervisor.calls_for("ghost").is_empty());

    h.handle
        .command(Command::TriggerSync {
            scope: TriggerScope::All,
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.supervisor.calls_for("a").len(), 2);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_and_flushes() {
    let mut h = start(
        Setup {
            markers: vec!["a", "b", "c"],
            default_step: Step::ok(10_000),
            configure: |c| c.schedule.max_parallel_jobs = 1,
            ..Setup::default()
        },
        |_| {},
    );

    wait_for(&mut h.status, |s| s.running_count() == 1).await;
    h.handle.command(Command::Shutdown).await.unwrap();
    let summary = h.task.await.unwrap();

    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 0);

    let targets = h.registry.snapshot().await;
    assert!(targets
        .iter()
        .all(|t| t.state == TargetState::Idle && !t.running));

    let a = &targets[0];
    assert_eq!(a.last_status, SyncStatus::Failed);
    assert_eq!(a.last_failure, Some(FailureKind::Cancelled));

    // Queued jobs were never started
    assert_eq!(h.supervisor.calls().len(), 1);
    assert_eq!(targets[1].last_status, SyncStatus::Never);
}

#[tokio::test(start_paused = true)]
async fn test_until_idle_reports_summary() {
    let h = start(
        Setup {
            markers: vec!["a", "b", "c"],
            mode: RunMode::UntilIdle,
            ..Setup::default()
        },
        |s| s.script("c", &[Step::exit(1, 1)]),
    );

    let summary = h.task.await.unwrap();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.failed, vec![TargetId::new("c")]);
    assert!(!summary.all_succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_until_idle_with_nothing_to_do() {
    let h = start(
        Setup {
            mode: RunMode::UntilIdle,
            ..Setup::default()
        },
        |_| {},
    );

    let summary = h.task.await.unwrap();
    assert_eq!(summary.total, 0);
    assert!(summary.all_succeeded());
}

#[tokio::test(start_paused = true)]
async fn test_until_idle_includes_retries() {
    let h = start(
        Setup {
            markers: vec!["a"],
            mode: RunMode::UntilIdle,
            ..Setup::default()
        },
        |s| s.script("a", &[Step::exit(1, 2), Step::exit(1, 2)]),
    );

    let summary = h.task.await.unwrap();
    assert!(summary.all_succeeded());
    assert_eq!(h.supervisor.calls_for("a").len(), 3);
}

fn assert_send<T: Send>(_: &T) {}

#[test]
fn test_run_future_is_send() {
    let dirs = (TempDir::new().unwrap(), TempDir::new().unwrap());
    let config = Arc::new(test_config(dirs.0.path(), dirs.1.path()));
    let executor = SyncExecutor::new(Arc::clone(&config), FakeSupervisor::new(Step::ok(1)));
    let (_tx, rx) = tokio::sync::mpsc::channel::<Command>(1);

    let scheduler = Scheduler::new(
        config,
        TargetRegistry::new(),
        Arc::new(executor),
        FakeSource::new(dirs.0.path(), dirs.1.path(), &[]),
    )
    .with_commands(Box::new(rx));

    let run = scheduler.run();
    assert_send(&run);
}

#[tokio::test(start_paused = true)]
async fn test_unusable_watch_root_falls_back_to_ticks() {
    let mut h = start(
        Setup {
            markers: vec!["a"],
            configure: |c| {
                c.schedule.scan_interval_secs = 60;
                c.watch.enabled = true;
            },
            os_watcher: true,
            unusable_local_root: true,
            ..Setup::default()
        },
        |_| {},
    );

    let snapshot = wait_for(&mut h.status, |s| settled(s, "a")).await;
    assert!(snapshot.watch_enabled);
    assert!(!snapshot.watch_available);
    assert_eq!(status_of(&snapshot, "a"), Some(SyncStatus::Succeeded));

    h.handle
        .command(Command::TriggerSync {
            scope: TriggerScope::All,
        })
        .await
        .unwrap();
    wait_for(&mut h.status, |s| {
        settled(s, "a") && h.supervisor.calls_for("a").len() == 2
    })
    .await;

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}

#[tokio::test]
async fn test_file_change_triggers_one_sync() {
    let h = start(
        Setup {
            markers: vec!["a"],
            default_step: Step::ok(0),
            configure: |c| {
                c.watch.enabled = true;
                c.watch.debounce_ms = 200;
            },
            os_watcher: true,
            ..Setup::default()
        },
        |_| {},
    );

    eventually("first sync", || {
        settled(&h.status.borrow(), "a")
    })
    .await;
    assert!(h.status.borrow().watch_available);
    assert_eq!(h.supervisor.calls_for("a").len(), 1);

    let dir = h._dirs.1.path().join("a");
    for name in ["one.txt", "two.txt", "three.txt"] {
        std::fs::write(dir.join(name), b"changed").unwrap();
    }

    eventually("watch-triggered sync", || {
        h.supervisor.calls_for("a").len() == 2
    })
    .await;

    // The burst is coalesced into that single job
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(h.supervisor.calls_for("a").len(), 2);

    h.handle.shutdown().await.unwrap();
    h.task.await.unwrap();
}
