//! 外部协作方接口
//!
//! 引擎只通过这些trait访问存储、通知、执行单元注册表和执行运行时，
//! 具体实现由组合根注入。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use jobrunner_core::SchedulerResult;

use crate::entities::TaskRecord;
use crate::events::{ExecutionOutcome, LifecycleEvent, StatusChangedEvent, StatusUpdate, TaskFault};
use crate::job::JobKey;
use crate::unit::{ParameterValues, UnitDescriptor};

/// 任务记录仓储抽象
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &TaskRecord) -> SchedulerResult<()>;
    async fn get(&self, identifier: &str) -> SchedulerResult<Option<TaskRecord>>;
    async fn update(&self, task: &TaskRecord) -> SchedulerResult<()>;
    /// 某个逻辑作业定义的全部运行记录
    async fn list_by_parameter(&self, task_parameter_id: i64) -> SchedulerResult<Vec<TaskRecord>>;
}

/// 状态变更通知出口，发后即忘
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: StatusChangedEvent) -> SchedulerResult<()>;
}

/// 已绑定参数、可直接运行的执行单元
#[async_trait]
pub trait RunnableUnit: Send + Sync {
    fn descriptor(&self) -> &UnitDescriptor;

    /// 是否会在安全点检查中断信号
    fn supports_interrupt(&self) -> bool {
        false
    }

    /// 运行单元，通过 `ctx` 上报生命周期回调
    ///
    /// 返回错误或panic而没有上报 `failed` 时，由执行框架兜底标记失败。
    async fn run(&self, ctx: UnitContext) -> SchedulerResult<()>;
}

/// 执行运行时的 "describe/create" 契约
#[async_trait]
pub trait UnitFactory: Send + Sync {
    fn descriptor(&self) -> &UnitDescriptor;
    async fn create(&self, parameters: ParameterValues) -> SchedulerResult<Arc<dyn RunnableUnit>>;
}

/// 按 (authority, code) 查找执行单元
#[async_trait]
pub trait UnitRegistry: Send + Sync {
    /// 找不到时返回 `Ok(None)`
    async fn describe(&self, authority: &str, code: &str)
        -> SchedulerResult<Option<Arc<dyn UnitFactory>>>;
}

/// 单元级生命周期回调监听器
#[async_trait]
pub trait LifecycleListener: Send + Sync {
    fn name(&self) -> &str;
    async fn on_event(&self, run_id: &str, event: &LifecycleEvent);
}

/// 一次触发对应的执行信息
#[derive(Debug, Clone)]
pub struct JobExecution {
    pub run_id: String,
    pub job_key: JobKey,
    pub title: String,
    pub fire_time: DateTime<Utc>,
}

/// 执行框架级监听器
#[async_trait]
pub trait JobListener: Send + Sync {
    fn name(&self) -> &str;

    async fn job_to_be_executed(&self, _execution: &JobExecution) {}

    async fn job_was_executed(&self, _execution: &JobExecution, _outcome: &ExecutionOutcome) {}
}

/// 传给执行单元的运行上下文
///
/// 持有本次运行的监听器列表和协作式中断信号；克隆开销很小。
#[derive(Clone)]
pub struct UnitContext {
    run_id: String,
    title: String,
    listeners: Arc<Vec<Arc<dyn LifecycleListener>>>,
    interrupt: CancellationToken,
}

impl UnitContext {
    pub fn new(
        run_id: String,
        title: String,
        listeners: Vec<Arc<dyn LifecycleListener>>,
        interrupt: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            title,
            listeners: Arc::new(listeners),
            interrupt,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub async fn emit(&self, event: LifecycleEvent) {
        for listener in self.listeners.iter() {
            listener.on_event(&self.run_id, &event).await;
        }
    }

    pub async fn started(&self, update: StatusUpdate) {
        self.emit(LifecycleEvent::Started(update)).await;
    }

    pub async fn progressing(&self, update: StatusUpdate) {
        self.emit(LifecycleEvent::Progressing(update)).await;
    }

    pub async fn paused(&self, update: StatusUpdate) {
        self.emit(LifecycleEvent::Paused(update)).await;
    }

    pub async fn resumed(&self, update: StatusUpdate) {
        self.emit(LifecycleEvent::Resumed(update)).await;
    }

    pub async fn completed(&self, update: StatusUpdate) {
        self.emit(LifecycleEvent::Completed(update)).await;
    }

    pub async fn failed(&self, fault: TaskFault) {
        self.emit(LifecycleEvent::Failed(fault)).await;
    }

    pub async fn dismissed(&self, fault: TaskFault) {
        self.emit(LifecycleEvent::Dismissed(fault)).await;
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// 等待中断信号，可与单元自身的工作一起 `select!`
    pub async fn interrupted(&self) {
        self.interrupt.cancelled().await;
    }
}
