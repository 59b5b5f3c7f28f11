//! Concurrent start, stop, and status flows against one executor.
#![cfg(unix)]

use std::time::Duration;

use confirmd::executor::{Executor, ExecutorError, JobState};
use confirmd::settings::Settings;
use serde_json::json;
use tempfile::TempDir;

fn executor(dir: &TempDir, worker_body: &str) -> Executor {
    let script = dir.path().join("worker.sh");
    std::fs::write(&script, worker_body).unwrap();
    std::fs::write(dir.path().join("base.json"), r#"{"a": {"x": 1}}"#).unwrap();

    let mut settings = Settings::default();
    settings.worker.program = "sh".into();
    settings.worker.script = script;
    settings.paths.base_config = dir.path().join("base.json");
    settings.paths.temp_config_dir = dir.path().join("temp_configs");
    settings.supervisor.poll_interval_ms = 5;
    settings.supervisor.graceful_timeout_secs = 1;
    Executor::new(&settings).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_admit_exactly_one() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, "exec sleep 30\n");

    let starts: Vec<_> = (0..8)
        .map(|i| {
            let executor = executor.clone();
            tokio::spawn(async move { executor.start(json!({ "attempt": i })).await })
        })
        .collect();

    let mut winners = Vec::new();
    let mut rejected_for = Vec::new();
    for start in starts {
        match start.await.unwrap() {
            Ok(id) => winners.push(id),
            Err(ExecutorError::AlreadyRunning { execution_id }) => rejected_for.push(execution_id),
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(rejected_for.len(), 7);
    assert!(rejected_for.iter().all(|id| *id == winners[0]));

    let history = executor.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].execution_id, winners[0]);

    assert!(executor.stop(true).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exit_is_finalized_once_under_polling() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, "sleep 0.2\nexit 3\n");
    let id = executor.start(json!({})).await.unwrap();

    // Pollers race each other and the supervisor for the worker's exit.
    let pollers: Vec<_> = (0..6)
        .map(|_| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
                let mut terminal = Vec::new();
                while let Some(report) = executor.status().await {
                    if report.status != JobState::Running {
                        terminal.push(report);
                    }
                    assert!(tokio::time::Instant::now() < deadline, "job never finished");
                    tokio::time::sleep(Duration::from_millis(1)).await;
                }
                terminal
            })
        })
        .collect();

    let mut terminal = Vec::new();
    for poller in pollers {
        terminal.extend(poller.await.unwrap());
    }
    assert!(terminal.len() <= 1, "terminal result reported {} times", terminal.len());
    if let Some(report) = terminal.first() {
        assert_eq!(report.execution_id, id);
        assert_eq!(report.status, JobState::Failed);
        assert_eq!(report.exit_code, Some(3));
    }

    let history = executor.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobState::Failed);
    assert_eq!(history[0].exit_code, Some(3));
    assert!(history[0].end_time.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stops_terminate_once() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, "exec sleep 30\n");
    let id = executor.start(json!({})).await.unwrap();

    let (a, b) = tokio::join!(executor.stop(false), executor.stop(false));
    assert!(a ^ b, "exactly one stop should succeed (got {} and {})", a, b);

    let report = executor.status().await.unwrap();
    assert_eq!(report.execution_id, id);
    assert_eq!(report.status, JobState::Stopped);
    assert!(executor.status().await.is_none());

    let history = executor.history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, JobState::Stopped);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_start_racing_stop_never_overlaps_jobs() {
    let dir = TempDir::new().unwrap();
    let executor = executor(&dir, "exec sleep 30\n");
    let first = executor.start(json!({})).await.unwrap();

    let (stopped, started) = tokio::join!(executor.stop(true), executor.start(json!({})));
    assert!(stopped);

    // Depending on ordering the new start either lost to the running job or
    // took the slot after the stop; never both jobs running at once.
    match started {
        Ok(second) => {
            assert_ne!(second, first);
            let report = executor.status().await.unwrap();
            assert_eq!(report.execution_id, second);
            assert_eq!(report.status, JobState::Running);
            assert!(executor.stop(true).await);
        }
        Err(ExecutorError::AlreadyRunning { execution_id }) => assert_eq!(execution_id, first),
        Err(other) => panic!("unexpected error: {}", other),
    }

    let running = executor
        .history(10)
        .await
        .into_iter()
        .filter(|e| e.status == JobState::Running)
        .count();
    assert_eq!(running, 0);
}
