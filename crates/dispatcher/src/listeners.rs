//! 附加监听器的注册与桥接
//!
//! 监听器在注册时按类型区分，不兼容的监听器在这里直接被拒绝，
//! 不会拖到回调触发时才失败。

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, info, trace};

use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{ExecutionOutcome, JobExecution, JobListener, LifecycleEvent, LifecycleListener};

/// 可以附加到调度器上的监听器
pub enum Listener {
    /// 执行框架级：每次执行前后各回调一次
    Job(Arc<dyn JobListener>),
    /// 单元级：接收每次运行的生命周期回调
    Lifecycle(Arc<dyn LifecycleListener>),
    /// 无法适配的监听器协议，携带其描述
    Unsupported(String),
}

impl Listener {
    pub fn name(&self) -> &str {
        match self {
            Listener::Job(listener) => listener.name(),
            Listener::Lifecycle(listener) => listener.name(),
            Listener::Unsupported(kind) => kind,
        }
    }
}

/// 把单元级监听器挂到每次运行上的桥接适配器
pub struct LifecycleBridge {
    inner: Arc<dyn LifecycleListener>,
}

impl LifecycleBridge {
    pub fn new(inner: Arc<dyn LifecycleListener>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl LifecycleListener for LifecycleBridge {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn on_event(&self, run_id: &str, event: &LifecycleEvent) {
        trace!(
            "转发 {} 回调到监听器 {} (运行: {})",
            event.event_type(),
            self.inner.name(),
            run_id
        );
        self.inner.on_event(run_id, event).await;
    }
}

#[derive(Default)]
pub struct ListenerRegistry {
    job_listeners: RwLock<Vec<Arc<dyn JobListener>>>,
    bridges: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    bridged_names: RwLock<HashSet<String>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册监听器，返回是否新增
    ///
    /// 同名的单元级监听器只会被桥接一次，重复注册返回 `false`。
    pub async fn add(&self, listener: Listener) -> SchedulerResult<bool> {
        match listener {
            Listener::Job(listener) => {
                let mut listeners = self.job_listeners.write().await;
                if listeners.iter().any(|l| l.name() == listener.name()) {
                    debug!("作业监听器 {} 已注册", listener.name());
                    return Ok(false);
                }
                info!("注册作业监听器: {}", listener.name());
                listeners.push(listener);
                Ok(true)
            }
            Listener::Lifecycle(listener) => {
                let mut names = self.bridged_names.write().await;
                if !names.insert(listener.name().to_string()) {
                    debug!("生命周期监听器 {} 已有桥接，忽略", listener.name());
                    return Ok(false);
                }
                info!("桥接生命周期监听器: {}", listener.name());
                self.bridges
                    .write()
                    .await
                    .push(Arc::new(LifecycleBridge::new(listener)));
                Ok(true)
            }
            Listener::Unsupported(kind) => Err(SchedulerError::UnsupportedListenerKind(kind)),
        }
    }

    pub async fn lifecycle_listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.bridges.read().await.clone()
    }

    pub async fn job_to_be_executed(&self, execution: &JobExecution) {
        let listeners = self.job_listeners.read().await.clone();
        for listener in listeners {
            listener.job_to_be_executed(execution).await;
        }
    }

    pub async fn job_was_executed(&self, execution: &JobExecution, outcome: &ExecutionOutcome) {
        let listeners = self.job_listeners.read().await.clone();
        for listener in listeners {
            listener.job_was_executed(execution, outcome).await;
        }
    }
}
