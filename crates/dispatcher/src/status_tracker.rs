//! 单次运行的状态跟踪器
//!
//! 每个运行实例绑定一个跟踪器，负责把执行单元的生命周期回调翻译成任务记录
//! 的变更，并在同一把锁内完成"检查终态 → 变更 → 持久化 → 发布通知"。
//! 不同运行实例之间互不阻塞。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use jobrunner_domain::{
    normalize_progress, now_millis, ExecutionOutcome, LifecycleEvent, LifecycleListener,
    NotificationSink, StatusChangedEvent, StatusUpdate, TaskFault, TaskRecord, TaskState,
    TaskStore,
};

use crate::metrics::EngineMetrics;
use crate::structured_logger::StructuredLogger;

pub struct StatusTracker {
    run_id: String,
    title: String,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<EngineMetrics>,
    inner: Mutex<TrackedRun>,
}

#[derive(Default)]
struct TrackedRun {
    record: Option<TaskRecord>,
    /// 存储中已有该记录；为假时下次写入改用 create
    persisted: bool,
    /// 进行中上报的异常，完成时决定 SUCCEED 还是 WARNING
    warnings: Vec<TaskFault>,
}

impl StatusTracker {
    pub fn new(
        run_id: String,
        title: String,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        Self::with_metrics(run_id, title, store, sink, Arc::new(EngineMetrics::new()))
    }

    pub fn with_metrics(
        run_id: String,
        title: String,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<EngineMetrics>,
    ) -> Self {
        Self {
            run_id,
            title,
            store,
            sink,
            metrics,
            inner: Mutex::new(TrackedRun::default()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// 创建 PENDING 状态的任务记录
    ///
    /// 在任何运行回调之前调用且只生效一次；这是唯一不做终态检查的入口。
    pub async fn before_execution(
        &self,
        task_parameter_id: Option<i64>,
        owner: Option<String>,
        task_type: &str,
    ) {
        let mut run = self.inner.lock().await;
        if run.record.is_some() {
            debug!("任务记录 {} 已存在，忽略重复创建", self.run_id);
            return;
        }

        let record = TaskRecord::new(
            self.run_id.clone(),
            task_parameter_id,
            owner,
            task_type.to_string(),
        );
        run.persisted = self.persist(false, &record).await;
        run.record = Some(record.clone());
        self.publish(record).await;
    }

    /// 处理一个生命周期回调
    pub async fn apply(&self, event: &LifecycleEvent) {
        let mut guard = self.inner.lock().await;
        let TrackedRun {
            record,
            persisted,
            warnings,
        } = &mut *guard;

        let Some(record) = record.as_mut() else {
            warn!(
                "任务 {} 尚未创建记录，忽略 {} 回调",
                self.run_id,
                event.event_type()
            );
            return;
        };

        if record.is_terminal() {
            self.metrics.record_stale_callback();
            StructuredLogger::log_stale_callback(&self.run_id, event.event_type(), record.state);
            return;
        }

        let previous = record.state;
        match event {
            LifecycleEvent::Started(update) => {
                enter_running(record);
                apply_message(record, update);
                apply_progress(record, update.progress);
            }
            LifecycleEvent::Progressing(update) => {
                enter_running(record);
                if let Some(warning) = &update.warning {
                    debug!("任务 {} 上报告警: {}", self.run_id, warning.to_line());
                    warnings.push(warning.clone());
                }
                apply_message(record, update);
                apply_output(record, update);
                apply_progress(record, update.progress);
            }
            LifecycleEvent::Paused(update) => {
                record.state = TaskState::Paused;
                apply_message(record, update);
                apply_progress(record, update.progress);
            }
            LifecycleEvent::Resumed(update) => {
                enter_running(record);
                apply_message(record, update);
                apply_progress(record, update.progress);
            }
            LifecycleEvent::Completed(update) => {
                if let Some(warning) = &update.warning {
                    warnings.push(warning.clone());
                }
                complete(record, warnings, Some(update));
            }
            LifecycleEvent::Failed(fault) => {
                finish(record, TaskState::Failed, fault.to_message());
            }
            LifecycleEvent::Dismissed(fault) => {
                finish(record, TaskState::Cancelled, fault.to_message());
            }
        }

        let snapshot = record.clone();
        *persisted = self.after_mutation(*persisted, previous, snapshot).await;
    }

    /// 执行框架在单元返回后调用的兜底处理
    ///
    /// 单元自己已经上报终态时什么都不做。
    pub async fn finalize(&self, outcome: &ExecutionOutcome) {
        let mut guard = self.inner.lock().await;
        let TrackedRun {
            record,
            persisted,
            warnings,
        } = &mut *guard;

        let Some(record) = record.as_mut() else {
            warn!("任务 {} 没有记录，无法收尾", self.run_id);
            return;
        };
        if record.is_terminal() {
            debug!("任务 {} 已是终态 {}，无需收尾", self.run_id, record.state);
            return;
        }

        let previous = record.state;
        match outcome {
            ExecutionOutcome::Completed => complete(record, warnings, None),
            ExecutionOutcome::Failed(cause) | ExecutionOutcome::Panicked(cause) => {
                warn!(
                    "任务 {} 未上报失败回调即异常结束，标记为失败: {}",
                    self.run_id, cause
                );
                let fault = TaskFault::new(format!("{} 执行失败", self.title), cause.clone());
                finish(record, TaskState::Failed, fault.to_message());
            }
            ExecutionOutcome::Interrupted(cause) => {
                let fault = TaskFault::new(format!("{} 已被中断", self.title), cause.clone());
                finish(record, TaskState::Cancelled, fault.to_message());
            }
        }

        let snapshot = record.clone();
        *persisted = self.after_mutation(*persisted, previous, snapshot).await;
    }

    /// 当前记录的快照
    pub async fn snapshot(&self) -> Option<TaskRecord> {
        self.inner.lock().await.record.clone()
    }

    /// 返回变更后记录是否已在存储中
    async fn after_mutation(
        &self,
        persisted: bool,
        previous: TaskState,
        record: TaskRecord,
    ) -> bool {
        StructuredLogger::log_state_change(&self.run_id, previous, record.state, record.progress);

        if record.is_terminal() {
            let duration_ms = record
                .date_start
                .zip(record.date_end)
                .map(|(start, end)| end - start);
            StructuredLogger::log_task_finished(&self.run_id, record.state, duration_ms);
            self.metrics.record_run_finished(
                record.state,
                duration_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            );
        }

        let persisted = self.persist(persisted, &record).await;
        self.publish(record).await;
        persisted
    }

    /// 写入存储，失败只记录日志
    ///
    /// 首次创建失败的记录在后续每次变更时重新 create，直到存储恢复。
    async fn persist(&self, persisted: bool, record: &TaskRecord) -> bool {
        let (operation, result) = if persisted {
            ("update", self.store.update(record).await)
        } else {
            ("create", self.store.create(record).await)
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                self.metrics.record_store_failure();
                StructuredLogger::log_store_failure(&self.run_id, operation, &e.to_string());
                persisted
            }
        }
    }

    async fn publish(&self, task: TaskRecord) {
        let event = StatusChangedEvent {
            task,
            title: self.title.clone(),
        };
        if let Err(e) = self.sink.publish(event).await {
            self.metrics.record_notification_failure();
            StructuredLogger::log_notification_failure(&self.run_id, &e.to_string());
        }
    }
}

#[async_trait]
impl LifecycleListener for StatusTracker {
    fn name(&self) -> &str {
        "status-tracker"
    }

    async fn on_event(&self, run_id: &str, event: &LifecycleEvent) {
        if run_id != self.run_id {
            warn!(
                "跟踪器 {} 收到其他运行 {} 的回调，已忽略",
                self.run_id, run_id
            );
            return;
        }
        self.apply(event).await;
    }
}

fn enter_running(record: &mut TaskRecord) {
    record.state = TaskState::Running;
    if record.date_start.is_none() {
        record.date_start = Some(now_millis());
    }
}

fn apply_message(record: &mut TaskRecord, update: &StatusUpdate) {
    if let Some(message) = &update.message {
        record.message = Some(message.clone());
    }
}

fn apply_output(record: &mut TaskRecord, update: &StatusUpdate) {
    if let Some(output) = &update.output {
        record.output = Some(output.clone());
    }
}

/// NaN/无穷不覆盖已有值；非终态期间进度不回退
fn apply_progress(record: &mut TaskRecord, raw: Option<f64>) {
    let Some(progress) = raw.and_then(normalize_progress) else {
        return;
    };
    match record.progress {
        Some(current) if progress < current => {
            debug!(
                "任务 {} 进度回退 {} -> {}，保留原值",
                record.identifier, current, progress
            );
        }
        _ => record.progress = Some(progress),
    }
}

fn complete(record: &mut TaskRecord, warnings: &[TaskFault], update: Option<&StatusUpdate>) {
    let (state, message) = if warnings.is_empty() {
        let message = update
            .and_then(|u| u.message.clone())
            .or_else(|| record.message.clone());
        (TaskState::Succeed, message)
    } else {
        let lines: Vec<String> = warnings.iter().map(TaskFault::to_line).collect();
        (TaskState::Warning, Some(lines.join("\n")))
    };

    if let Some(update) = update {
        apply_output(record, update);
        apply_progress(record, update.progress);
    }
    record.state = state;
    record.message = message;
    stamp_end(record);
}

fn finish(record: &mut TaskRecord, state: TaskState, message: String) {
    record.state = state;
    record.message = Some(message);
    stamp_end(record);
}

fn stamp_end(record: &mut TaskRecord) {
    let now = now_millis();
    record.date_end = Some(record.date_start.map_or(now, |start| now.max(start)));
}
