use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use jobrunner_domain::TaskState;

pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_job_scheduled(
        job_key: &str,
        run_id: Option<&str>,
        title: &str,
        unit_code: &str,
        next_fire: Option<DateTime<Utc>>,
    ) {
        info!(
            event = "job_scheduled",
            job.key = job_key,
            job.run_id = run_id,
            job.title = title,
            job.unit = unit_code,
            job.next_fire = ?next_fire,
            "Job scheduled"
        );
    }

    pub fn log_submission_rejected(title: &str, reason: &str) {
        warn!(
            event = "job_rejected",
            job.title = title,
            job.error = reason,
            "Job submission rejected"
        );
    }

    pub fn log_run_start(run_id: &str, job_key: &str, title: &str, fire_time: DateTime<Utc>) {
        info!(
            event = "run_start",
            run.id = run_id,
            job.key = job_key,
            job.title = title,
            run.fire_time = %fire_time,
            "Run started"
        );
    }

    pub fn log_run_complete(run_id: &str, title: &str, success: bool, error_message: Option<&str>) {
        if success {
            info!(
                event = "run_complete",
                run.id = run_id,
                job.title = title,
                run.success = success,
                "Run completed"
            );
        } else {
            error!(
                event = "run_failed",
                run.id = run_id,
                job.title = title,
                run.success = success,
                run.error = error_message.unwrap_or("Unknown error"),
                "Run failed"
            );
        }
    }

    pub fn log_state_change(run_id: &str, from: TaskState, to: TaskState, progress: Option<f64>) {
        debug!(
            event = "task_state_change",
            task.id = run_id,
            task.from = from.as_str(),
            task.to = to.as_str(),
            task.progress = progress,
            "Task state changed"
        );
    }

    pub fn log_task_finished(run_id: &str, state: TaskState, duration_ms: Option<i64>) {
        info!(
            event = "task_finished",
            task.id = run_id,
            task.state = state.as_str(),
            task.duration_ms = duration_ms,
            "Task reached terminal state"
        );
    }

    pub fn log_stale_callback(run_id: &str, attempted: &str, current: TaskState) {
        warn!(
            event = "stale_callback",
            task.id = run_id,
            task.attempted = attempted,
            task.state = current.as_str(),
            "state change to {} attempted after task already {}",
            attempted,
            current
        );
    }

    pub fn log_store_failure(run_id: &str, operation: &str, err: &str) {
        error!(
            event = "store_failure",
            task.id = run_id,
            store.operation = operation,
            store.error = err,
            "Task store operation failed"
        );
    }

    pub fn log_notification_failure(run_id: &str, err: &str) {
        error!(
            event = "notification_failure",
            task.id = run_id,
            notification.error = err,
            "Status notification failed"
        );
    }

    pub fn log_interrupt_requested(job_key: &str, instances: usize) {
        info!(
            event = "interrupt_requested",
            job.key = job_key,
            job.instances = instances,
            "Interrupt requested"
        );
    }

    pub fn log_job_deleted(job_key: &str, removed: bool) {
        info!(
            event = "job_deleted",
            job.key = job_key,
            job.removed = removed,
            "Job delete requested"
        );
    }

    pub fn log_scheduler_state(instance: &str, state: &str) {
        info!(
            event = "scheduler_state",
            scheduler.instance = instance,
            scheduler.state = state,
            "Scheduler state changed"
        );
    }
}
