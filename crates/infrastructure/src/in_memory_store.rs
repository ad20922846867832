use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{TaskRecord, TaskStore};
use tokio::sync::RwLock;
use tracing::debug;

/// 进程内任务记录仓储
///
/// 嵌入式部署和演示使用，进程退出后记录丢失。
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    records: Arc<RwLock<HashMap<String, TaskRecord>>>,
    /// 插入顺序，`list_by_parameter` 按创建先后返回
    order: Arc<RwLock<Vec<String>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &TaskRecord) -> SchedulerResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&task.identifier) {
            return Err(SchedulerError::store_error(format!(
                "任务记录已存在: {}",
                task.identifier
            )));
        }
        records.insert(task.identifier.clone(), task.clone());
        self.order.write().await.push(task.identifier.clone());
        debug!("创建{}", task.entity_description());
        Ok(())
    }

    async fn get(&self, identifier: &str) -> SchedulerResult<Option<TaskRecord>> {
        Ok(self.records.read().await.get(identifier).cloned())
    }

    async fn update(&self, task: &TaskRecord) -> SchedulerResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&task.identifier) {
            Some(existing) => {
                *existing = task.clone();
                Ok(())
            }
            None => Err(SchedulerError::store_error(format!(
                "任务记录不存在: {}",
                task.identifier
            ))),
        }
    }

    async fn list_by_parameter(&self, task_parameter_id: i64) -> SchedulerResult<Vec<TaskRecord>> {
        let records = self.records.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| records.get(id))
            .filter(|record| record.task_parameter_id == Some(task_parameter_id))
            .cloned()
            .collect())
    }
}
