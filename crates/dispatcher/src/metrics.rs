use std::time::Duration;

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

use jobrunner_domain::TaskState;

/// 调度引擎指标
///
/// 没有安装全局recorder时所有记录都是空操作。
pub struct EngineMetrics {
    // Submission metrics
    jobs_submitted_total: Counter,
    submissions_rejected_total: Counter,

    // Run metrics
    runs_started_total: Counter,
    running_jobs: Gauge,
    run_duration: Histogram,

    // Tracker metrics
    stale_callbacks_total: Counter,
    store_failures_total: Counter,
    notification_failures_total: Counter,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            jobs_submitted_total: counter!("jobrunner_jobs_submitted_total"),
            submissions_rejected_total: counter!("jobrunner_submissions_rejected_total"),
            runs_started_total: counter!("jobrunner_runs_started_total"),
            running_jobs: gauge!("jobrunner_running_jobs"),
            run_duration: histogram!("jobrunner_run_duration_seconds"),
            stale_callbacks_total: counter!("jobrunner_stale_callbacks_total"),
            store_failures_total: counter!("jobrunner_store_failures_total"),
            notification_failures_total: counter!("jobrunner_notification_failures_total"),
        }
    }

    pub fn record_job_submitted(&self) {
        self.jobs_submitted_total.increment(1);
    }

    pub fn record_submission_rejected(&self) {
        self.submissions_rejected_total.increment(1);
    }

    pub fn record_run_started(&self) {
        self.runs_started_total.increment(1);
        self.running_jobs.increment(1.0);
    }

    pub fn record_run_exited(&self) {
        self.running_jobs.decrement(1.0);
    }

    /// 任务记录进入终态
    pub fn record_run_finished(&self, state: TaskState, duration: Option<Duration>) {
        counter!("jobrunner_runs_finished_total", "state" => state.as_str()).increment(1);
        if let Some(duration) = duration {
            self.run_duration.record(duration.as_secs_f64());
        }
    }

    pub fn record_stale_callback(&self) {
        self.stale_callbacks_total.increment(1);
    }

    pub fn record_store_failure(&self) {
        self.store_failures_total.increment(1);
    }

    pub fn record_notification_failure(&self) {
        self.notification_failures_total.increment(1);
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
