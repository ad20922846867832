use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use jobrunner_core::{SchedulerConfig, SchedulerError, SchedulerResult};
use jobrunner_domain::{
    ExecutionOutcome, JobDescriptor, JobExecution, JobKey, LifecycleListener, NotificationSink,
    RunnableUnit, TaskStore, TriggerSpec, UnitContext, UnitSource, UnitSpec,
};

use crate::cron_utils::CronTrigger;
use crate::listeners::{Listener, ListenerRegistry};
use crate::metrics::EngineMetrics;
use crate::resolver::UnitResolver;
use crate::status_tracker::StatusTracker;
use crate::structured_logger::StructuredLogger;

/// 调度器生命周期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// 可以注册作业，但不会触发
    Standby,
    Started,
    /// 终态，所有操作都会失败
    ShutDown,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchedulerState::Standby => "standby",
            SchedulerState::Started => "started",
            SchedulerState::ShutDown => "shutdown",
        }
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 进程内作业调度器
///
/// 持有触发表和运行表；每次运行都绑定一个 [`StatusTracker`]。
/// 克隆得到的是同一个调度器的句柄。
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    config: SchedulerConfig,
    /// 配置无效时记录原因，调度器整体不可用
    init_error: Option<String>,
    store: Arc<dyn TaskStore>,
    sink: Arc<dyn NotificationSink>,
    resolver: Arc<UnitResolver>,
    listeners: ListenerRegistry,
    metrics: Arc<EngineMetrics>,
    state: watch::Sender<SchedulerState>,
    jobs: RwLock<HashMap<JobKey, ScheduledJob>>,
    running: RwLock<HashMap<String, RunningInstance>>,
    workers: Arc<Semaphore>,
    tasks: TaskTracker,
    /// 停止所有触发循环
    stop_triggers: CancellationToken,
    /// 所有运行实例中断令牌的父令牌
    kill: CancellationToken,
    sequence: AtomicU64,
}

struct ScheduledJob {
    next_fire: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

struct RunningInstance {
    key: JobKey,
    interrupt: CancellationToken,
    interruptible: bool,
}

impl JobScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn TaskStore>,
        sink: Arc<dyn NotificationSink>,
        resolver: Arc<UnitResolver>,
    ) -> Self {
        let init_error = config.validate().err().map(|e| format!("{e:#}"));
        if let Some(err) = &init_error {
            error!(
                "调度器 {} 初始化失败，所有调度操作将不可用: {}",
                config.instance_name, err
            );
        }

        let (state, _) = watch::channel(SchedulerState::Standby);
        let workers = Arc::new(Semaphore::new(config.thread_count.max(1)));

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                init_error,
                store,
                sink,
                resolver,
                listeners: ListenerRegistry::new(),
                metrics: Arc::new(EngineMetrics::new()),
                state,
                jobs: RwLock::new(HashMap::new()),
                running: RwLock::new(HashMap::new()),
                workers,
                tasks: TaskTracker::new(),
                stop_triggers: CancellationToken::new(),
                kill: CancellationToken::new(),
                sequence: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn state(&self) -> SchedulerState {
        *self.inner.state.borrow()
    }

    /// 启动触发引擎，已注册的作业从此刻开始触发
    pub async fn start(&self) -> SchedulerResult<()> {
        if let Some(err) = &self.inner.init_error {
            return Err(SchedulerError::SchedulerUnavailable(err.clone()));
        }

        let mut shut_down = false;
        let changed = self.inner.state.send_if_modified(|state| match *state {
            SchedulerState::Standby => {
                *state = SchedulerState::Started;
                true
            }
            SchedulerState::Started => false,
            SchedulerState::ShutDown => {
                shut_down = true;
                false
            }
        });

        if shut_down {
            return Err(self.inner.shut_down_error());
        }
        if changed {
            StructuredLogger::log_scheduler_state(
                &self.inner.config.instance_name,
                SchedulerState::Started.as_str(),
            );
        } else {
            debug!("调度器 {} 已经启动", self.inner.config.instance_name);
        }
        Ok(())
    }

    /// 提交立即执行的作业，返回本次运行ID
    ///
    /// 返回时任务记录已经以 PENDING 状态创建。
    pub async fn schedule_now(
        &self,
        title: &str,
        task_parameter_id: Option<i64>,
        owner: Option<String>,
        unit: Arc<dyn RunnableUnit>,
    ) -> SchedulerResult<String> {
        self.inner
            .ensure_available()
            .inspect_err(|e| self.inner.reject(title, e))?;

        let key = self.inner.next_job_key(&unit.descriptor().code);
        let run_id = key.new_run_id();
        let descriptor = JobDescriptor {
            key,
            run_id: Some(run_id.clone()),
            title: title.to_string(),
            unit: UnitSource::Eager(unit),
            trigger: TriggerSpec::Now,
            task_parameter_id,
            owner,
        };

        let tracker = Arc::new(self.inner.new_tracker(&run_id, title));
        tracker
            .before_execution(
                descriptor.task_parameter_id,
                descriptor.owner.clone(),
                descriptor.task_type(),
            )
            .await;

        self.inner.register_now(descriptor, tracker).await;
        Ok(run_id)
    }

    /// 先按 authority/code 立即物化执行单元，再提交立即执行
    pub async fn schedule_unit_now(
        &self,
        title: &str,
        task_parameter_id: Option<i64>,
        owner: Option<String>,
        spec: &UnitSpec,
    ) -> SchedulerResult<String> {
        self.inner
            .ensure_available()
            .inspect_err(|e| self.inner.reject(title, e))?;

        let unit = self
            .inner
            .resolver
            .resolve_spec(spec)
            .await
            .inspect_err(|e| self.inner.reject(title, e))?;

        self.schedule_now(title, task_parameter_id, owner, unit).await
    }

    /// 提交CRON作业，返回逻辑作业键
    ///
    /// 执行单元延迟物化：提交时只校验，每次触发时重新创建实例。
    pub async fn schedule_cron(
        &self,
        title: &str,
        task_parameter_id: Option<i64>,
        owner: Option<String>,
        cron_expression: &str,
        end_date: Option<DateTime<Utc>>,
        spec: UnitSpec,
    ) -> SchedulerResult<JobKey> {
        self.inner
            .submit_cron(title, task_parameter_id, owner, cron_expression, end_date, spec)
            .await
            .inspect_err(|e| self.inner.reject(title, e))
    }

    /// 请求中断该作业正在运行的所有实例
    ///
    /// 接受逻辑键或运行ID。没有运行中的实例时返回 `false`。
    pub async fn interrupt(&self, job_key: &str) -> SchedulerResult<bool> {
        self.inner.ensure_available()?;
        let key = JobKey::parse(job_key, &self.inner.config.default_group)?;

        let running = self.inner.running.read().await;
        let targets: Vec<&RunningInstance> =
            running.values().filter(|run| run.key == key).collect();

        if targets.is_empty() {
            debug!("作业 {} 没有正在运行的实例", key);
            return Ok(false);
        }
        if targets.iter().any(|run| !run.interruptible) {
            return Err(SchedulerError::InterruptUnsupported(key.to_string()));
        }

        for run in &targets {
            run.interrupt.cancel();
        }
        StructuredLogger::log_interrupt_requested(&key.to_string(), targets.len());
        Ok(true)
    }

    /// 删除已注册的作业（不影响正在运行的实例），返回是否确实删除
    pub async fn delete_job(&self, job_key: &str) -> SchedulerResult<bool> {
        self.inner.ensure_available()?;
        let key = JobKey::parse(job_key, &self.inner.config.default_group)?;

        let removed = self.inner.jobs.write().await.remove(&key);
        if let Some(job) = &removed {
            job.cancel.cancel();
        }

        StructuredLogger::log_job_deleted(&key.to_string(), removed.is_some());
        Ok(removed.is_some())
    }

    /// 关闭调度器
    ///
    /// `wait_for_running_jobs` 为真时等待所有运行中的实例结束；
    /// 否则向所有实例发出中断信号后立即返回。
    pub async fn shutdown(&self, wait_for_running_jobs: bool) -> SchedulerResult<()> {
        let previous = self.inner.state.send_replace(SchedulerState::ShutDown);
        if previous == SchedulerState::ShutDown {
            return Err(self.inner.shut_down_error());
        }

        info!(
            "调度器 {} 正在关闭 (等待运行中作业: {})",
            self.inner.config.instance_name, wait_for_running_jobs
        );

        self.inner.stop_triggers.cancel();
        if !wait_for_running_jobs {
            self.inner.kill.cancel();
        }

        self.inner.tasks.close();
        if wait_for_running_jobs {
            self.inner.tasks.wait().await;
        }
        self.inner.jobs.write().await.clear();

        StructuredLogger::log_scheduler_state(
            &self.inner.config.instance_name,
            SchedulerState::ShutDown.as_str(),
        );
        Ok(())
    }

    /// 附加监听器；同名的生命周期监听器只桥接一次
    pub async fn add_listener(&self, listener: Listener) -> SchedulerResult<bool> {
        self.inner.ensure_available()?;
        self.inner.listeners.add(listener).await
    }

    /// 当前已注册（尚未删除或结束）的作业键
    pub async fn job_keys(&self) -> Vec<JobKey> {
        let mut keys: Vec<JobKey> = self.inner.jobs.read().await.keys().cloned().collect();
        keys.sort_by_key(|key| key.to_string());
        keys
    }

    pub async fn running_run_ids(&self, job_key: &str) -> SchedulerResult<Vec<String>> {
        let key = JobKey::parse(job_key, &self.inner.config.default_group)?;
        let mut run_ids: Vec<String> = self
            .inner
            .running
            .read()
            .await
            .iter()
            .filter(|(_, run)| run.key == key)
            .map(|(run_id, _)| run_id.clone())
            .collect();
        run_ids.sort();
        Ok(run_ids)
    }

    pub async fn next_fire_time(&self, job_key: &str) -> SchedulerResult<Option<DateTime<Utc>>> {
        let key = JobKey::parse(job_key, &self.inner.config.default_group)?;
        Ok(self
            .inner
            .jobs
            .read()
            .await
            .get(&key)
            .and_then(|job| job.next_fire))
    }
}

impl SchedulerInner {
    fn ensure_available(&self) -> SchedulerResult<()> {
        if let Some(err) = &self.init_error {
            return Err(SchedulerError::SchedulerUnavailable(err.clone()));
        }
        if *self.state.borrow() == SchedulerState::ShutDown {
            return Err(self.shut_down_error());
        }
        Ok(())
    }

    fn shut_down_error(&self) -> SchedulerError {
        SchedulerError::SchedulerUnavailable(format!("调度器 {} 已关闭", self.config.instance_name))
    }

    fn reject(&self, title: &str, err: &SchedulerError) {
        self.metrics.record_submission_rejected();
        StructuredLogger::log_submission_rejected(title, &err.to_string());
    }

    fn next_job_key(&self, code: &str) -> JobKey {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        JobKey::new(self.config.default_group.clone(), format!("{code}-{seq}"))
    }

    fn new_tracker(&self, run_id: &str, title: &str) -> StatusTracker {
        StatusTracker::with_metrics(
            run_id.to_string(),
            title.to_string(),
            Arc::clone(&self.store),
            Arc::clone(&self.sink),
            Arc::clone(&self.metrics),
        )
    }

    async fn submit_cron(
        self: &Arc<Self>,
        title: &str,
        task_parameter_id: Option<i64>,
        owner: Option<String>,
        cron_expression: &str,
        end_date: Option<DateTime<Utc>>,
        spec: UnitSpec,
    ) -> SchedulerResult<JobKey> {
        self.ensure_available()?;

        let trigger = CronTrigger::new(cron_expression, end_date)?;
        if !trigger.may_fire_again(Utc::now()) {
            return Err(SchedulerError::invalid_cron(
                cron_expression,
                "在结束时间之前不会再触发",
            ));
        }
        self.resolver.validate(&spec).await?;

        let key = self.next_job_key(&spec.code);
        let descriptor = JobDescriptor {
            key: key.clone(),
            run_id: None,
            title: title.to_string(),
            unit: UnitSource::Lazy(spec),
            trigger: TriggerSpec::Cron {
                expression: cron_expression.to_string(),
                end_date,
            },
            task_parameter_id,
            owner,
        };

        self.register_cron(descriptor, trigger).await;
        Ok(key)
    }

    async fn insert_job(
        &self,
        descriptor: &JobDescriptor,
        next_fire: Option<DateTime<Utc>>,
    ) -> CancellationToken {
        let cancel = self.stop_triggers.child_token();
        StructuredLogger::log_job_scheduled(
            &descriptor.key.to_string(),
            descriptor.run_id.as_deref(),
            &descriptor.title,
            descriptor.task_type(),
            next_fire,
        );
        self.metrics.record_job_submitted();

        self.jobs.write().await.insert(
            descriptor.key.clone(),
            ScheduledJob {
                next_fire,
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    async fn register_now(self: &Arc<Self>, descriptor: JobDescriptor, tracker: Arc<StatusTracker>) {
        let cancel = self.insert_job(&descriptor, None).await;
        let inner = Arc::clone(self);
        self.tasks
            .spawn(inner.run_now_loop(descriptor, tracker, cancel));
    }

    async fn register_cron(self: &Arc<Self>, descriptor: JobDescriptor, trigger: CronTrigger) {
        let next_fire = trigger.next_fire_after(Utc::now());
        let cancel = self.insert_job(&descriptor, next_fire).await;
        let inner = Arc::clone(self);
        self.tasks
            .spawn(inner.cron_loop(descriptor, trigger, cancel));
    }

    /// 等待调度器启动；作业被取消或调度器关闭时返回 `false`
    async fn wait_until_started(&self, cancel: &CancellationToken) -> bool {
        let mut state = self.state.subscribe();
        loop {
            let current = *state.borrow_and_update();
            match current {
                SchedulerState::Started => return true,
                SchedulerState::ShutDown => return false,
                SchedulerState::Standby => {}
            }
            tokio::select! {
                changed = state.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = cancel.cancelled() => return false,
            }
        }
    }

    async fn run_now_loop(
        self: Arc<Self>,
        descriptor: JobDescriptor,
        tracker: Arc<StatusTracker>,
        cancel: CancellationToken,
    ) {
        let key = descriptor.key.clone();
        let started = self.wait_until_started(&cancel).await;
        let still_registered = self.jobs.write().await.remove(&key).is_some();

        if !started || !still_registered {
            debug!("立即执行作业 {} 在触发前被取消", key);
            tracker
                .finalize(&ExecutionOutcome::Interrupted(
                    "作业在触发前被删除或调度器已关闭".to_string(),
                ))
                .await;
            return;
        }

        self.execute(descriptor, Some(tracker), Utc::now()).await;
    }

    async fn cron_loop(
        self: Arc<Self>,
        descriptor: JobDescriptor,
        trigger: CronTrigger,
        cancel: CancellationToken,
    ) {
        let key = descriptor.key.clone();
        if !self.wait_until_started(&cancel).await {
            self.jobs.write().await.remove(&key);
            return;
        }

        let mut from = Utc::now();
        loop {
            let Some(next) = trigger.next_fire_after(from) else {
                info!("CRON作业 {} 已没有后续触发，移除", key);
                self.jobs.write().await.remove(&key);
                break;
            };

            {
                let mut jobs = self.jobs.write().await;
                match jobs.get_mut(&key) {
                    Some(job) => job.next_fire = Some(next),
                    None => break,
                }
            }

            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("CRON作业 {} 的触发循环已停止", key);
                    break;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            let inner = Arc::clone(&self);
            let fired = descriptor.clone();
            self.tasks.spawn(async move {
                inner.execute(fired, None, next).await;
            });
            from = next;
        }
    }

    /// 运行一次触发
    ///
    /// CRON作业在这里分配运行ID、创建记录并物化执行单元。
    async fn execute(
        self: Arc<Self>,
        descriptor: JobDescriptor,
        tracker: Option<Arc<StatusTracker>>,
        fire_time: DateTime<Utc>,
    ) {
        let key = descriptor.key.clone();
        let tracker = match tracker {
            Some(tracker) => tracker,
            None => {
                let run_id = key.new_run_id();
                let tracker = Arc::new(self.new_tracker(&run_id, &descriptor.title));
                tracker
                    .before_execution(
                        descriptor.task_parameter_id,
                        descriptor.owner.clone(),
                        descriptor.task_type(),
                    )
                    .await;
                tracker
            }
        };
        let run_id = tracker.run_id().to_string();

        // 触发后立即登记，等待工作线程和物化单元期间也能被中断
        let interrupt = self.kill.child_token();
        self.running.write().await.insert(
            run_id.clone(),
            RunningInstance {
                key: key.clone(),
                interrupt: interrupt.clone(),
                interruptible: true,
            },
        );
        self.dispatch(descriptor, tracker, fire_time, interrupt).await;
        self.running.write().await.remove(&run_id);
    }

    async fn dispatch(
        &self,
        descriptor: JobDescriptor,
        tracker: Arc<StatusTracker>,
        fire_time: DateTime<Utc>,
        interrupt: CancellationToken,
    ) {
        let key = descriptor.key.clone();
        let run_id = tracker.run_id().to_string();

        let permit = tokio::select! {
            permit = Arc::clone(&self.workers).acquire_owned() => permit.ok(),
            _ = interrupt.cancelled() => None,
        };
        let Some(permit) = permit else {
            tracker
                .finalize(&ExecutionOutcome::Interrupted(
                    "作业在获得工作线程前被中断".to_string(),
                ))
                .await;
            return;
        };

        let unit = match &descriptor.unit {
            UnitSource::Eager(unit) => Arc::clone(unit),
            UnitSource::Lazy(spec) => match self.resolver.resolve_spec(spec).await {
                Ok(unit) => unit,
                Err(e) => {
                    error!("作业 {} 物化执行单元失败: {}", key, e);
                    tracker
                        .finalize(&ExecutionOutcome::Failed(e.to_string()))
                        .await;
                    return;
                }
            },
        };

        {
            // 持写锁检查中断并更新可中断性，与 interrupt 互斥
            let mut running = self.running.write().await;
            if interrupt.is_cancelled() {
                drop(running);
                debug!("作业 {} 在执行前被中断", run_id);
                tracker
                    .finalize(&ExecutionOutcome::Interrupted(
                        "作业在执行前被中断".to_string(),
                    ))
                    .await;
                return;
            }
            if let Some(instance) = running.get_mut(&run_id) {
                instance.interruptible = unit.supports_interrupt();
            }
        }

        let execution = JobExecution {
            run_id: run_id.clone(),
            job_key: key.clone(),
            title: descriptor.title.clone(),
            fire_time,
        };
        self.listeners.job_to_be_executed(&execution).await;
        self.metrics.record_run_started();
        StructuredLogger::log_run_start(&run_id, &key.to_string(), &descriptor.title, fire_time);

        let mut listeners: Vec<Arc<dyn LifecycleListener>> =
            vec![tracker.clone() as Arc<dyn LifecycleListener>];
        listeners.extend(self.listeners.lifecycle_listeners().await);
        let ctx = UnitContext::new(
            run_id.clone(),
            descriptor.title.clone(),
            listeners,
            interrupt.clone(),
        );

        // 单元跑在独立任务里，panic 只会体现为 JoinError
        let handle = tokio::spawn(async move { unit.run(ctx).await });
        let outcome = match handle.await {
            Ok(Ok(())) => ExecutionOutcome::Completed,
            Ok(Err(e)) if interrupt.is_cancelled() => ExecutionOutcome::Interrupted(e.to_string()),
            Ok(Err(e)) => ExecutionOutcome::Failed(e.to_string()),
            Err(e) => ExecutionOutcome::Panicked(panic_message(e)),
        };

        tracker.finalize(&outcome).await;
        match &outcome {
            ExecutionOutcome::Completed => {
                StructuredLogger::log_run_complete(&run_id, &descriptor.title, true, None)
            }
            ExecutionOutcome::Failed(cause)
            | ExecutionOutcome::Panicked(cause)
            | ExecutionOutcome::Interrupted(cause) => {
                StructuredLogger::log_run_complete(
                    &run_id,
                    &descriptor.title,
                    false,
                    Some(cause.as_str()),
                )
            }
        }

        self.listeners.job_was_executed(&execution, &outcome).await;
        self.metrics.record_run_exited();
        drop(permit);
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    if err.is_cancelled() {
        warn!("执行任务被运行时取消");
        return "执行任务被运行时取消".to_string();
    }
    let panic = err.into_panic();
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "执行单元发生未知panic".to_string())
}
