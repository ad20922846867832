use std::sync::Arc;

use jobrunner_dispatcher::StatusTracker;
use jobrunner_domain::{ExecutionOutcome, LifecycleEvent, StatusUpdate, TaskState};
use jobrunner_testing_utils::{
    Events, FailingNotificationSink, FailingTaskStore, FlakyTaskStore, MockTaskStore,
    RecordingNotificationSink,
};
use rand::seq::SliceRandom;
use rand::Rng;

const RUN_ID: &str = "DEFAULT.buffer-1_3f2504e0-4f89-11d3-9a0c-0305e82c3301";

async fn tracker() -> (Arc<StatusTracker>, MockTaskStore, RecordingNotificationSink) {
    let store = MockTaskStore::new();
    let sink = RecordingNotificationSink::new();
    let tracker = Arc::new(StatusTracker::new(
        RUN_ID.to_string(),
        "buffer roads".to_string(),
        Arc::new(store.clone()),
        Arc::new(sink.clone()),
    ));
    tracker
        .before_execution(Some(42), Some("alice".to_string()), "buffer")
        .await;
    (tracker, store, sink)
}

#[tokio::test]
async fn test_before_execution_creates_pending_record() {
    let (tracker, store, sink) = tracker().await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Pending);
    assert_eq!(record.task_parameter_id, Some(42));
    assert_eq!(record.owner.as_deref(), Some("alice"));
    assert_eq!(record.task_type, "buffer");
    assert!(record.date_start.is_none());
    assert_eq!(sink.count(), 1);
    assert_eq!(sink.events()[0].title, "buffer roads");

    // 第二次调用不会重复创建
    tracker.before_execution(None, None, "other").await;
    assert_eq!(store.history(RUN_ID).len(), 1);
    assert_eq!(tracker.snapshot().await.unwrap().task_type, "buffer");
}

#[tokio::test]
async fn test_callbacks_before_record_are_ignored() {
    let store = MockTaskStore::new();
    let tracker = StatusTracker::new(
        RUN_ID.to_string(),
        "t".to_string(),
        Arc::new(store.clone()),
        Arc::new(RecordingNotificationSink::new()),
    );

    tracker.apply(&Events::started(0.0)).await;
    tracker.finalize(&ExecutionOutcome::Completed).await;

    assert!(tracker.snapshot().await.is_none());
    assert_eq!(store.count(), 0);
}

#[tokio::test]
async fn test_immediate_success_sequence() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(0.0)).await;
    tracker.apply(&Events::progressing(50.004)).await;
    assert_eq!(store.record(RUN_ID).unwrap().progress, Some(50.0));

    tracker
        .apply(&Events::completed_with_output(100.0, "{\"features\":12}"))
        .await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Succeed);
    assert_eq!(record.progress, Some(100.0));
    assert_eq!(record.output.as_deref(), Some("{\"features\":12}"));
    let start = record.date_start.unwrap();
    let end = record.date_end.unwrap();
    assert!(end >= start);
}

#[tokio::test]
async fn test_terminal_state_is_sticky() {
    let (tracker, store, sink) = tracker().await;

    tracker.apply(&Events::started(10.0)).await;
    tracker
        .apply(&LifecycleEvent::Completed(
            StatusUpdate::new().with_progress(80.0).with_message("done"),
        ))
        .await;
    let finished = store.record(RUN_ID).unwrap();
    let published = sink.count();

    for event in [
        Events::progressing(90.0),
        Events::paused("pause"),
        Events::resumed("resume"),
        Events::failed("late", "boom"),
        Events::dismissed("cancel", "user"),
        Events::completed(100.0),
    ] {
        tracker.apply(&event).await;
    }
    tracker
        .finalize(&ExecutionOutcome::Panicked("late panic".to_string()))
        .await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record, finished);
    assert_eq!(record.state, TaskState::Succeed);
    assert_eq!(record.message.as_deref(), Some("done"));
    assert_eq!(sink.count(), published);
}

#[tokio::test]
async fn test_warnings_aggregate_into_warning_state() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(0.0)).await;
    tracker
        .apply(&Events::progressing_with_warning(20.0, "tile 3", "no data"))
        .await;
    tracker.apply(&Events::progressing(40.0)).await;
    tracker
        .apply(&Events::progressing_with_warning(60.0, "tile 7", "timeout\n  at fetch"))
        .await;
    assert_eq!(store.record(RUN_ID).unwrap().state, TaskState::Running);

    tracker.apply(&Events::completed(100.0)).await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Warning);
    let message = record.message.unwrap();
    let lines: Vec<&str> = message.lines().collect();
    assert_eq!(lines, vec!["tile 3: no data", "tile 7: timeout"]);
}

#[tokio::test]
async fn test_completed_without_warnings_is_succeed() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(0.0)).await;
    tracker.apply(&Events::progressing(50.0)).await;
    tracker.apply(&Events::completed(100.0)).await;

    assert_eq!(store.record(RUN_ID).unwrap().state, TaskState::Succeed);
}

#[tokio::test]
async fn test_failed_and_dismissed_messages() {
    let (tracker, store, _) = tracker().await;
    tracker.apply(&Events::started(0.0)).await;
    tracker
        .apply(&Events::failed("step 2 of 3", "java.io.IOException: disk full"))
        .await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(
        record.message.as_deref(),
        Some("step 2 of 3\njava.io.IOException: disk full")
    );
    assert!(record.date_end.is_some());

    let (tracker, store, _) = self::tracker().await;
    tracker.apply(&Events::started(0.0)).await;
    tracker.apply(&Events::dismissed("cancelled", "by user")).await;
    assert_eq!(store.record(RUN_ID).unwrap().state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_fallback_failure_after_partial_progress() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(0.0)).await;
    tracker.apply(&Events::progressing(30.0)).await;
    tracker
        .finalize(&ExecutionOutcome::Panicked("index out of bounds".to_string()))
        .await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.progress, Some(30.0));
    assert!(record.date_end.is_some());
    assert!(record.message.unwrap().contains("index out of bounds"));
}

#[tokio::test]
async fn test_fallback_does_not_override_reported_failure() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(0.0)).await;
    tracker.apply(&Events::failed("own failure", "cause")).await;
    tracker
        .finalize(&ExecutionOutcome::Failed("framework failure".to_string()))
        .await;

    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.message.as_deref(), Some("own failure\ncause"));
}

#[tokio::test]
async fn test_completion_hook_outcomes() {
    let (tracker, store, _) = tracker().await;
    tracker.apply(&Events::started(0.0)).await;
    tracker
        .apply(&Events::progressing_with_warning(50.0, "part", "skipped"))
        .await;
    tracker.finalize(&ExecutionOutcome::Completed).await;
    assert_eq!(store.record(RUN_ID).unwrap().state, TaskState::Warning);

    let (tracker, store, _) = self::tracker().await;
    tracker.apply(&Events::started(0.0)).await;
    tracker
        .finalize(&ExecutionOutcome::Interrupted("interrupted".to_string()))
        .await;
    assert_eq!(store.record(RUN_ID).unwrap().state, TaskState::Cancelled);
}

#[tokio::test]
async fn test_pause_and_resume() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(5.0)).await;
    let started_at = store.record(RUN_ID).unwrap().date_start;

    tracker.apply(&Events::paused("waiting for quota")).await;
    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Paused);
    assert_eq!(record.message.as_deref(), Some("waiting for quota"));

    tracker.apply(&Events::resumed("quota available")).await;
    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Running);
    assert_eq!(record.date_start, started_at);
}

#[tokio::test]
async fn test_progress_normalization() {
    let (tracker, store, _) = tracker().await;

    tracker.apply(&Events::started(f64::NAN)).await;
    assert_eq!(store.record(RUN_ID).unwrap().progress, None);

    tracker.apply(&Events::progressing(33.335)).await;
    assert_eq!(store.record(RUN_ID).unwrap().progress, Some(33.34));

    // 未知进度不覆盖已有值，回退的进度被忽略但消息照常更新
    tracker.apply(&Events::progressing(f64::INFINITY)).await;
    assert_eq!(store.record(RUN_ID).unwrap().progress, Some(33.34));

    tracker
        .apply(&LifecycleEvent::Progressing(
            StatusUpdate::new().with_progress(10.0).with_message("retrying"),
        ))
        .await;
    let record = store.record(RUN_ID).unwrap();
    assert_eq!(record.progress, Some(33.34));
    assert_eq!(record.message.as_deref(), Some("retrying"));
}

#[tokio::test]
async fn test_store_and_sink_failures_are_swallowed() {
    let store = FailingTaskStore::new();
    let tracker = StatusTracker::new(
        RUN_ID.to_string(),
        "t".to_string(),
        Arc::new(store.clone()),
        Arc::new(FailingNotificationSink),
    );

    tracker.before_execution(None, None, "buffer").await;
    tracker.apply(&Events::started(0.0)).await;
    tracker.apply(&Events::completed(100.0)).await;

    assert_eq!(store.attempts(), 3);
    let record = tracker.snapshot().await.unwrap();
    assert_eq!(record.state, TaskState::Succeed);
}

#[tokio::test]
async fn test_record_created_once_store_recovers() {
    let store = FlakyTaskStore::down();
    let tracker = StatusTracker::new(
        RUN_ID.to_string(),
        "t".to_string(),
        Arc::new(store.clone()),
        Arc::new(RecordingNotificationSink::new()),
    );

    tracker.before_execution(Some(7), None, "buffer").await;
    assert!(store.inner().record(RUN_ID).is_none());

    store.set_down(false);
    tracker.apply(&Events::started(0.0)).await;
    let record = store.inner().record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Running);
    assert_eq!(record.task_parameter_id, Some(7));

    tracker.apply(&Events::completed(100.0)).await;
    let history = store.inner().history(RUN_ID);
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].state, TaskState::Succeed);
    assert_eq!(store.inner().count(), 1);
}

#[tokio::test]
async fn test_update_failure_keeps_record_persisted() {
    let store = FlakyTaskStore::default();
    let tracker = StatusTracker::new(
        RUN_ID.to_string(),
        "t".to_string(),
        Arc::new(store.clone()),
        Arc::new(RecordingNotificationSink::new()),
    );

    tracker.before_execution(None, None, "buffer").await;
    store.set_down(true);
    tracker.apply(&Events::started(0.0)).await;
    store.set_down(false);
    tracker.apply(&Events::completed(100.0)).await;

    // 恢复后走 update，不会因重复 create 而失败
    let record = store.inner().record(RUN_ID).unwrap();
    assert_eq!(record.state, TaskState::Succeed);
    assert_eq!(store.inner().history(RUN_ID).len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callbacks_converge() {
    for _ in 0..20 {
        let (tracker, store, _) = tracker().await;

        let events = {
            let mut rng = rand::rng();
            let mut events: Vec<LifecycleEvent> = (0..50)
                .map(|_| Events::progressing(rng.random_range(0.0..100.0)))
                .collect();
            events.push(Events::started(0.0));
            events.push(Events::completed(100.0));
            events.shuffle(&mut rng);
            events
        };

        let handles: Vec<_> = events
            .into_iter()
            .map(|event| {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move { tracker.apply(&event).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let record = store.record(RUN_ID).unwrap();
        assert_eq!(record.state, TaskState::Succeed);

        let history = store.history(RUN_ID);
        let terminal_writes = history.iter().filter(|r| r.is_terminal()).count();
        assert_eq!(terminal_writes, 1);
        assert!(history.last().unwrap().is_terminal());

        let progress: Vec<f64> = history.iter().filter_map(|r| r.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");

        let starts: Vec<i64> = history.iter().filter_map(|r| r.date_start).collect();
        assert!(starts.windows(2).all(|w| w[0] == w[1]));
    }
}
