//! Test data builders for creating test entities
//!
//! This module provides builder patterns for creating test data with
//! sensible defaults and easy customization.

use std::sync::Arc;

use jobrunner_core::SchedulerConfig;
use jobrunner_domain::{
    LifecycleEvent, LifecycleListener, StatusUpdate, TaskFault, TaskRecord, TaskState,
    UnitContext,
};
use tokio_util::sync::CancellationToken;

use crate::mocks::RecordingLifecycleListener;

/// Builder for creating test TaskRecord entities
pub struct TaskRecordBuilder {
    record: TaskRecord,
}

impl TaskRecordBuilder {
    pub fn new() -> Self {
        Self {
            record: TaskRecord::new(
                "DEFAULT.test_job-1_3f2504e0-4f89-11d3-9a0c-0305e82c3301".to_string(),
                None,
                None,
                "test".to_string(),
            ),
        }
    }

    pub fn with_identifier(mut self, identifier: &str) -> Self {
        self.record.identifier = identifier.to_string();
        self
    }

    pub fn with_state(mut self, state: TaskState) -> Self {
        self.record.state = state;
        self
    }

    pub fn with_task_parameter_id(mut self, id: i64) -> Self {
        self.record.task_parameter_id = Some(id);
        self
    }

    pub fn with_owner(mut self, owner: &str) -> Self {
        self.record.owner = Some(owner.to_string());
        self
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.record.task_type = task_type.to_string();
        self
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.record.progress = Some(progress);
        self
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.record.message = Some(message.to_string());
        self
    }

    pub fn with_dates(mut self, start: i64, end: Option<i64>) -> Self {
        self.record.date_start = Some(start);
        self.record.date_end = end;
        self
    }

    pub fn running(self) -> Self {
        self.with_state(TaskState::Running)
    }

    pub fn succeeded(self) -> Self {
        self.with_state(TaskState::Succeed)
    }

    pub fn build(self) -> TaskRecord {
        self.record
    }
}

impl Default for TaskRecordBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Scheduler configuration suited for tests
pub fn test_scheduler_config() -> SchedulerConfig {
    SchedulerConfig {
        instance_name: "test-scheduler".to_string(),
        thread_count: 4,
        default_group: "DEFAULT".to_string(),
        shutdown_timeout_seconds: 5,
    }
}

/// Unit context wired to a recording listener, for driving a unit directly
///
/// Cancel the returned token to simulate an interrupt request.
pub fn recording_context(run_id: &str) -> (UnitContext, RecordingLifecycleListener, CancellationToken) {
    let listener = RecordingLifecycleListener::new("recorder");
    let token = CancellationToken::new();
    let ctx = UnitContext::new(
        run_id.to_string(),
        "test job".to_string(),
        vec![Arc::new(listener.clone()) as Arc<dyn LifecycleListener>],
        token.clone(),
    );
    (ctx, listener, token)
}

/// Shorthand constructors for lifecycle events
pub struct Events;

impl Events {
    pub fn started(progress: f64) -> LifecycleEvent {
        LifecycleEvent::Started(StatusUpdate::new().with_progress(progress))
    }

    pub fn progressing(progress: f64) -> LifecycleEvent {
        LifecycleEvent::Progressing(StatusUpdate::new().with_progress(progress))
    }

    pub fn progressing_with_warning(progress: f64, description: &str, cause: &str) -> LifecycleEvent {
        LifecycleEvent::Progressing(
            StatusUpdate::new()
                .with_progress(progress)
                .with_warning(TaskFault::new(description, cause)),
        )
    }

    pub fn paused(message: &str) -> LifecycleEvent {
        LifecycleEvent::Paused(StatusUpdate::new().with_message(message))
    }

    pub fn resumed(message: &str) -> LifecycleEvent {
        LifecycleEvent::Resumed(StatusUpdate::new().with_message(message))
    }

    pub fn completed(progress: f64) -> LifecycleEvent {
        LifecycleEvent::Completed(StatusUpdate::new().with_progress(progress))
    }

    pub fn completed_with_output(progress: f64, output: &str) -> LifecycleEvent {
        LifecycleEvent::Completed(
            StatusUpdate::new()
                .with_progress(progress)
                .with_output(output),
        )
    }

    pub fn failed(description: &str, cause: &str) -> LifecycleEvent {
        LifecycleEvent::Failed(TaskFault::new(description, cause))
    }

    pub fn dismissed(description: &str, cause: &str) -> LifecycleEvent {
        LifecycleEvent::Dismissed(TaskFault::new(description, cause))
    }
}
