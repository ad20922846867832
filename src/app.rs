use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobrunner_core::{AppConfig, JobDefinition, StoreBackend};
use jobrunner_dispatcher::{JobScheduler, UnitResolver};
use jobrunner_domain::{NotificationSink, TaskStore, UnitRegistry, UnitSpec};
use jobrunner_infrastructure::{
    BroadcastNotificationSink, InMemoryTaskStore, LocalUnitRegistry, RemoteUnitRegistry,
    SqliteTaskStore,
};
use jobrunner_worker::register_builtin_units;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const NOTIFICATION_CAPACITY: usize = 1024;

/// 组合根：按配置装配存储、通知、注册表和调度器
pub struct Application {
    config: AppConfig,
    scheduler: JobScheduler,
    store: Arc<dyn TaskStore>,
    sink: BroadcastNotificationSink,
    local_registry: LocalUnitRegistry,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化应用程序: {}", config.scheduler.instance_name);

        let store = create_task_store(&config).await?;
        let sink = BroadcastNotificationSink::new(NOTIFICATION_CAPACITY);

        let local_registry = LocalUnitRegistry::new();
        register_builtin_units(&local_registry)
            .await
            .context("注册内置执行单元失败")?;
        let remote_registry =
            RemoteUnitRegistry::new(&config.remote).context("创建远程端点客户端失败")?;

        let resolver = UnitResolver::with_remote(
            Arc::new(local_registry.clone()) as Arc<dyn UnitRegistry>,
            Arc::new(remote_registry) as Arc<dyn UnitRegistry>,
        );

        let scheduler = JobScheduler::new(
            config.scheduler.clone(),
            Arc::clone(&store),
            Arc::new(sink.clone()) as Arc<dyn NotificationSink>,
            Arc::new(resolver),
        );

        Ok(Self {
            config,
            scheduler,
            store,
            sink,
            local_registry,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        Arc::clone(&self.store)
    }

    pub fn local_registry(&self) -> &LocalUnitRegistry {
        &self.local_registry
    }

    pub fn subscribe(&self) -> broadcast::Receiver<jobrunner_domain::StatusChangedEvent> {
        self.sink.subscribe()
    }

    /// 提交配置文件中声明的作业
    ///
    /// 单个作业提交失败只记录错误，不影响其他作业。返回成功提交的运行ID或作业键。
    pub async fn submit_configured_jobs(&self) -> Vec<String> {
        let mut submitted = Vec::with_capacity(self.config.jobs.len());
        for job in &self.config.jobs {
            match self.submit(job).await {
                Ok(id) => {
                    info!("已提交配置作业 '{}': {}", job.title, id);
                    submitted.push(id);
                }
                Err(e) => error!("提交配置作业 '{}' 失败: {e:#}", job.title),
            }
        }
        submitted
    }

    async fn submit(&self, job: &JobDefinition) -> Result<String> {
        let spec = UnitSpec::new(&job.authority, &job.code, job.parameters.clone());
        match &job.cron {
            Some(expression) => {
                let key = self
                    .scheduler
                    .schedule_cron(
                        &job.title,
                        job.task_parameter_id,
                        job.owner.clone(),
                        expression,
                        job.end_date,
                        spec,
                    )
                    .await?;
                Ok(key.to_string())
            }
            None => Ok(self
                .scheduler
                .schedule_unit_now(&job.title, job.task_parameter_id, job.owner.clone(), &spec)
                .await?),
        }
    }

    /// 把每条状态变更通知写入日志，直到收到关闭信号
    pub fn spawn_status_logger(&self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let mut events = self.sink.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    received = events.recv() => match received {
                        Ok(event) => info!(
                            event = "status_changed",
                            task.id = %event.task.identifier,
                            task.state = %event.task.state,
                            task.progress = ?event.task.progress,
                            job.title = %event.title,
                            "{} -> {}",
                            event.title,
                            event.task.state
                        ),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("状态日志处理过慢，丢弃了 {} 条通知", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// 启动调度器、提交配置作业并等待关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.scheduler.start().await.context("启动调度器失败")?;
        let submitted = self.submit_configured_jobs().await;
        info!(
            "调度器已启动，提交了 {}/{} 个配置作业",
            submitted.len(),
            self.config.jobs.len()
        );

        let _ = shutdown_rx.recv().await;
        self.shutdown().await
    }

    /// 等待运行中的作业结束，超过配置的时间后放弃等待
    pub async fn shutdown(&self) -> Result<()> {
        let limit = Duration::from_secs(self.config.scheduler.shutdown_timeout_seconds);
        match tokio::time::timeout(limit, self.scheduler.shutdown(true)).await {
            Ok(result) => {
                result.context("关闭调度器失败")?;
                info!("调度器已优雅关闭");
            }
            Err(_) => warn!("等待运行中作业超时({}s)，强制退出", limit.as_secs()),
        }
        Ok(())
    }
}

async fn create_task_store(config: &AppConfig) -> Result<Arc<dyn TaskStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("使用内存任务存储");
            Ok(Arc::new(InMemoryTaskStore::new()))
        }
        StoreBackend::Sqlite => {
            let store = SqliteTaskStore::connect(&config.store.url, config.store.max_connections)
                .await
                .with_context(|| format!("连接任务记录数据库失败: {}", config.store.url))?;
            Ok(Arc::new(store))
        }
    }
}
