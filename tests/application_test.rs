use std::time::Duration;

use jobrunner::Application;
use jobrunner_core::{AppConfig, JobDefinition, StoreBackend};
use jobrunner_domain::{TaskRecord, TaskState};
use jobrunner_testing_utils::TestEnv;
use serde_json::json;

fn job(title: &str, code: &str, parameters: serde_json::Value) -> JobDefinition {
    JobDefinition {
        title: title.to_string(),
        authority: "builtin".to_string(),
        code: code.to_string(),
        parameters,
        cron: None,
        end_date: None,
        owner: Some("ops".to_string()),
        task_parameter_id: Some(11),
    }
}

async fn wait_for_terminal(app: &Application, run_id: &str) -> TaskRecord {
    let store = app.store();
    let id = run_id.to_string();
    let finished = TestEnv::wait_for(
        || {
            let store = store.clone();
            let id = id.clone();
            async move {
                matches!(store.get(&id).await, Ok(Some(record)) if record.is_terminal())
            }
        },
        Duration::from_secs(10),
    )
    .await;
    assert!(finished, "run {run_id} did not finish");
    store.get(run_id).await.unwrap().unwrap()
}

#[tokio::test]
async fn test_configured_jobs_run_to_completion() {
    let mut config = AppConfig::default();
    config.jobs = vec![
        job("short nap", "sleep", json!({ "duration_ms": 50, "steps": 2 })),
        job("noisy nap", "sleep", json!({ "duration_ms": 50, "steps": 2, "warn_at_step": 1 })),
        job("missing unit", "teleport", json!({})),
    ];

    let app = Application::new(config).await.unwrap();
    app.scheduler().start().await.unwrap();
    let submitted = app.submit_configured_jobs().await;
    assert_eq!(submitted.len(), 2);

    let quiet = wait_for_terminal(&app, &submitted[0]).await;
    assert_eq!(quiet.state, TaskState::Succeed);
    assert_eq!(quiet.progress, Some(100.0));
    assert_eq!(quiet.owner.as_deref(), Some("ops"));
    assert_eq!(quiet.task_type, "sleep");

    let noisy = wait_for_terminal(&app, &submitted[1]).await;
    assert_eq!(noisy.state, TaskState::Warning);
    assert!(noisy.message.unwrap().contains("步骤 1"));

    let history = app.store().list_by_parameter(11).await.unwrap();
    assert_eq!(history.len(), 2);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_status_events_are_broadcast() {
    let app = Application::new(AppConfig::default()).await.unwrap();
    let mut events = app.subscribe();
    app.scheduler().start().await.unwrap();

    let spec = jobrunner_domain::UnitSpec::new("builtin", "sleep", json!({ "duration_ms": 10, "steps": 1 }));
    let run_id = app
        .scheduler()
        .schedule_unit_now("broadcast check", None, None, &spec)
        .await
        .unwrap();

    let mut states = Vec::new();
    while let Ok(Ok(event)) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
        assert_eq!(event.task.identifier, run_id);
        assert_eq!(event.title, "broadcast check");
        states.push(event.task.state);
        if event.task.state.is_terminal() {
            break;
        }
    }
    assert_eq!(states.first(), Some(&TaskState::Pending));
    assert_eq!(states.last(), Some(&TaskState::Succeed));

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_sqlite_backed_application() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.store.backend = StoreBackend::Sqlite;
    config.store.url = format!("sqlite://{}", dir.path().join("runs.db").display());
    config.jobs = vec![job("echo", "shell", json!({ "command": "echo", "args": ["persisted"] }))];

    let app = Application::new(config).await.unwrap();
    app.scheduler().start().await.unwrap();
    let submitted = app.submit_configured_jobs().await;
    assert_eq!(submitted.len(), 1);

    let record = wait_for_terminal(&app, &submitted[0]).await;
    assert_eq!(record.state, TaskState::Succeed);
    assert_eq!(record.output.as_deref(), Some("persisted"));
    assert!(record.date_end >= record.date_start);

    app.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_run_shuts_down_on_signal() {
    let app = std::sync::Arc::new(Application::new(AppConfig::default()).await.unwrap());
    let manager = jobrunner::ShutdownManager::new();
    let shutdown_rx = manager.subscribe().await;

    let runner = {
        let app = app.clone();
        tokio::spawn(async move { app.run(shutdown_rx).await })
    };

    let scheduler = app.scheduler().clone();
    assert!(
        TestEnv::wait_for(
            move || {
                let scheduler = scheduler.clone();
                async move { scheduler.state() == jobrunner_dispatcher::SchedulerState::Started }
            },
            Duration::from_secs(5),
        )
        .await
    );

    manager.shutdown().await;
    runner.await.unwrap().unwrap();
    assert_eq!(app.scheduler().state(), jobrunner_dispatcher::SchedulerState::ShutDown);
}
