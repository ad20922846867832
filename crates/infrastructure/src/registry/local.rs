use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{UnitDescriptor, UnitFactory, UnitRegistry};
use tokio::sync::RwLock;
use tracing::{debug, info};

type UnitKey = (String, String);

/// 进程内执行单元注册表，按 (authority, code) 索引
#[derive(Clone, Default)]
pub struct LocalUnitRegistry {
    factories: Arc<RwLock<HashMap<UnitKey, Arc<dyn UnitFactory>>>>,
}

impl LocalUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册执行单元工厂，同一 (authority, code) 只能注册一次
    pub async fn register(&self, factory: Arc<dyn UnitFactory>) -> SchedulerResult<()> {
        let descriptor = factory.descriptor();
        let key = (descriptor.authority.clone(), descriptor.code.clone());

        let mut factories = self.factories.write().await;
        if factories.contains_key(&key) {
            return Err(SchedulerError::Configuration(format!(
                "执行单元重复注册: {}/{}",
                key.0, key.1
            )));
        }

        info!("注册执行单元: {}/{}", key.0, key.1);
        factories.insert(key, factory);
        Ok(())
    }

    pub async fn unregister(&self, authority: &str, code: &str) -> bool {
        let removed = self
            .factories
            .write()
            .await
            .remove(&(authority.to_string(), code.to_string()))
            .is_some();
        if removed {
            info!("注销执行单元: {}/{}", authority, code);
        }
        removed
    }

    pub async fn contains(&self, authority: &str, code: &str) -> bool {
        self.factories
            .read()
            .await
            .contains_key(&(authority.to_string(), code.to_string()))
    }

    /// 已注册单元的描述，按 authority、code 排序
    pub async fn list_units(&self) -> Vec<UnitDescriptor> {
        let factories = self.factories.read().await;
        let mut descriptors: Vec<UnitDescriptor> = factories
            .values()
            .map(|factory| factory.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| (&a.authority, &a.code).cmp(&(&b.authority, &b.code)));
        descriptors
    }

    pub async fn count(&self) -> usize {
        self.factories.read().await.len()
    }
}

#[async_trait]
impl UnitRegistry for LocalUnitRegistry {
    async fn describe(
        &self,
        authority: &str,
        code: &str,
    ) -> SchedulerResult<Option<Arc<dyn UnitFactory>>> {
        let factory = self
            .factories
            .read()
            .await
            .get(&(authority.to_string(), code.to_string()))
            .cloned();
        if factory.is_none() {
            debug!("本地注册表中没有执行单元: {}/{}", authority, code);
        }
        Ok(factory)
    }
}
