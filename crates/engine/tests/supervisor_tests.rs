//! Integration tests for the process supervisor, using real child
//! processes (`/bin/sh`) so spawn, signal, and exit-monitor paths are all
//! exercised end to end.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;

use gridpilot_core::error::CoreError;
use gridpilot_core::types::ProcessState;
use gridpilot_engine::{SpawnSpec, Supervisor, SupervisorConfig};
use gridpilot_events::{ScopeKey, StatusHub};

fn sh_spec(dir: &std::path::Path, script: &str) -> SpawnSpec {
    SpawnSpec {
        program: "/bin/sh".into(),
        args: vec!["-c".into(), script.into()],
        working_dir: dir.to_path_buf(),
        config: json!({ "exchange": "binance", "symbol": "BTCUSDT" }),
    }
}

fn supervisor(dir: &std::path::Path, hub: Arc<StatusHub>) -> Supervisor {
    Supervisor::new(
        hub,
        SupervisorConfig::new(dir.join("artifacts")).with_grace_period(Duration::from_millis(300)),
    )
}

/// Poll `status` until it matches, or panic after ~3s.
async fn wait_for_state(sup: &Supervisor, entity: &str, expected: ProcessState) {
    for _ in 0..60 {
        if sup.status(entity).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!(
        "entity {entity} never reached {expected}; last state {}",
        sup.status(entity).await
    );
}

// ---------------------------------------------------------------------------
// Test: start -> Running -> graceful stop -> Stopped, idempotent stop
// ---------------------------------------------------------------------------

#[tokio::test]
async fn start_stop_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), Arc::new(StatusHub::default()));

    sup.start("e1", sh_spec(dir.path(), "sleep 30")).await.unwrap();
    assert_eq!(sup.status("e1").await, ProcessState::Running);
    assert!(sup.pid("e1").await.is_some());
    assert_eq!(sup.running_count().await, 1);

    // The spawn artifact was materialized for the entity.
    assert!(dir.path().join("artifacts").join("e1.json").exists());

    sup.stop("e1").await.unwrap();
    assert_eq!(sup.status("e1").await, ProcessState::Stopped);
    assert_eq!(sup.running_count().await, 0);

    // Stopping an already-stopped entity is a no-op success.
    sup.stop("e1").await.unwrap();
    assert_eq!(sup.status("e1").await, ProcessState::Stopped);
}

// ---------------------------------------------------------------------------
// Test: second start while running is rejected, entity not duplicated
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_start_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), Arc::new(StatusHub::default()));

    sup.start("e1", sh_spec(dir.path(), "sleep 30")).await.unwrap();
    let first_pid = sup.pid("e1").await.unwrap();

    let err = sup.start("e1", sh_spec(dir.path(), "sleep 30")).await;
    assert_matches!(err, Err(CoreError::AlreadyRunning { .. }));

    // Still exactly the one original process.
    assert_eq!(sup.status("e1").await, ProcessState::Running);
    assert_eq!(sup.pid("e1").await, Some(first_pid));
    assert_eq!(sup.running_count().await, 1);

    sup.stop("e1").await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: spawn failure is synchronous and leaves the slot free
// ---------------------------------------------------------------------------

#[tokio::test]
async fn spawn_failure_leaves_no_slot() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), Arc::new(StatusHub::default()));

    let mut spec = sh_spec(dir.path(), "sleep 30");
    spec.program = "/nonexistent/definitely-not-a-binary".into();

    let err = sup.start("e1", spec).await;
    assert_matches!(err, Err(CoreError::Spawn { .. }));
    assert_eq!(sup.running_count().await, 0);
    assert_eq!(sup.status("e1").await, ProcessState::Stopped);

    // The failed attempt must not block a subsequent valid start.
    sup.start("e1", sh_spec(dir.path(), "sleep 30")).await.unwrap();
    assert_eq!(sup.status("e1").await, ProcessState::Running);
    sup.stop("e1").await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: externally killed process is detected and the slot is freed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn external_kill_detected_and_slot_freed() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), Arc::new(StatusHub::default()));

    sup.start("e2", sh_spec(dir.path(), "sleep 30")).await.unwrap();
    let pid = sup.pid("e2").await.unwrap();

    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }

    wait_for_state(&sup, "e2", ProcessState::Failed).await;
    assert_eq!(sup.running_count().await, 0);

    // The slot is free for a fresh start.
    sup.start("e2", sh_spec(dir.path(), "sleep 30")).await.unwrap();
    assert_eq!(sup.status("e2").await, ProcessState::Running);
    sup.stop("e2").await.unwrap();
}

// ---------------------------------------------------------------------------
// Test: clean exit reports Stopped, not Failed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_exit_reports_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), Arc::new(StatusHub::default()));

    sup.start("e3", sh_spec(dir.path(), "exit 0")).await.unwrap();
    wait_for_state(&sup, "e3", ProcessState::Stopped).await;
    assert_eq!(sup.running_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: captured output fans out in order, then the scope closes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn output_fans_out_then_scope_closes() {
    let dir = tempfile::tempdir().unwrap();
    let hub = Arc::new(StatusHub::default());
    let sup = supervisor(dir.path(), Arc::clone(&hub));

    let mut sub = hub.subscribe(ScopeKey::InstanceLogs("e4".into())).await;

    sup.start("e4", sh_spec(dir.path(), "echo alpha; echo beta"))
        .await
        .unwrap();

    let mut log_lines = Vec::new();
    let mut saw_final_state = false;
    loop {
        let event = tokio::time::timeout(Duration::from_secs(3), sub.recv())
            .await
            .expect("stream stalled");
        let Some(event) = event else { break };
        match event.kind.as_str() {
            "log" => log_lines.push(event.payload["line"].as_str().unwrap().to_string()),
            "state" => {
                if event.payload["state"] != "running" {
                    saw_final_state = true;
                }
            }
            other => panic!("unexpected event kind {other}"),
        }
    }

    assert_eq!(log_lines, vec!["alpha", "beta"]);
    assert!(saw_final_state, "terminal state event was not delivered");
}

// ---------------------------------------------------------------------------
// Test: a process ignoring SIGTERM is SIGKILLed after the grace period
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stubborn_process_is_force_killed() {
    let dir = tempfile::tempdir().unwrap();
    let sup = supervisor(dir.path(), Arc::new(StatusHub::default()));

    sup.start("e5", sh_spec(dir.path(), "trap '' TERM; sleep 30"))
        .await
        .unwrap();
    // Give the shell a moment to install the trap.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = std::time::Instant::now();
    sup.stop("e5").await.unwrap();
    let elapsed = started.elapsed();

    // Escalation happened: longer than the 300ms grace, far shorter than
    // the 30s the script would otherwise sleep.
    assert!(elapsed >= Duration::from_millis(250), "stop returned before grace elapsed");
    assert!(elapsed < Duration::from_secs(5), "stop took too long: {elapsed:?}");

    // A stop we requested is a clean stop even when it needed SIGKILL.
    assert_eq!(sup.status("e5").await, ProcessState::Stopped);
    assert_eq!(sup.running_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: a stop racing an in-flight spawn still terminates the child
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_racing_spawn_terminates_child() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Arc::new(Supervisor::new(
        Arc::new(StatusHub::default()),
        SupervisorConfig::new(dir.path().join("artifacts"))
            .with_grace_period(Duration::from_millis(100)),
    ));

    // Repeat to hit the window where stop arrives after the slot is
    // reserved but before the spawn has landed a pid.
    for i in 0..10 {
        let entity = format!("race{i}");
        let pidfile = dir.path().join(format!("{entity}.pid"));
        let script = format!(
            "echo $$ > {}; trap '' TERM; sleep 30",
            pidfile.display()
        );
        let spec = sh_spec(dir.path(), &script);

        let starter = {
            let sup = Arc::clone(&sup);
            let entity = entity.clone();
            tokio::spawn(async move {
                let _ = sup.start(&entity, spec).await;
            })
        };
        let stopper = {
            let sup = Arc::clone(&sup);
            let entity = entity.clone();
            tokio::spawn(async move { sup.stop(&entity).await.unwrap() })
        };
        starter.await.unwrap();
        stopper.await.unwrap();

        // If the stop lost the race entirely (ran before the start reserved
        // the slot), the process legitimately runs; stop it for real now.
        sup.stop(&entity).await.unwrap();
        assert_ne!(sup.status(&entity).await, ProcessState::Running);

        // Whatever the interleaving, no child may survive a completed stop.
        if let Ok(contents) = std::fs::read_to_string(&pidfile) {
            let pid: i32 = contents.trim().parse().unwrap();
            let mut alive = true;
            for _ in 0..40 {
                alive = unsafe { libc::kill(pid, 0) == 0 };
                if !alive {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            assert!(!alive, "iteration {i}: child {pid} survived stop");
        }
    }
}

// ---------------------------------------------------------------------------
// Test: concurrent starts for one entity admit exactly one process
// ---------------------------------------------------------------------------

#[tokio::test]
async fn concurrent_starts_admit_exactly_one() {
    let dir = tempfile::tempdir().unwrap();
    let sup = Arc::new(supervisor(dir.path(), Arc::new(StatusHub::default())));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let sup = Arc::clone(&sup);
        let spec = sh_spec(dir.path(), "sleep 30");
        handles.push(tokio::spawn(async move { sup.start("e6", spec).await }));
    }

    let mut ok = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            ok += 1;
        }
    }

    assert_eq!(ok, 1, "exactly one concurrent start may win");
    assert_eq!(sup.status("e6").await, ProcessState::Running);
    assert_eq!(sup.running_count().await, 1);

    sup.stop("e6").await.unwrap();
    assert_eq!(sup.status("e6").await, ProcessState::Stopped);
}
