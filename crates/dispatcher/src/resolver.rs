use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{ParameterValues, RunnableUnit, UnitFactory, UnitRegistry, UnitSpec};

/// 根据 authority/code 把原始参数解析成可运行的执行单元
///
/// `http://` 或 `https://` 开头的 authority 交给远程注册表，其余走本地注册表。
pub struct UnitResolver {
    local: Arc<dyn UnitRegistry>,
    remote: Option<Arc<dyn UnitRegistry>>,
}

impl UnitResolver {
    pub fn new(local: Arc<dyn UnitRegistry>) -> Self {
        Self {
            local,
            remote: None,
        }
    }

    pub fn with_remote(local: Arc<dyn UnitRegistry>, remote: Arc<dyn UnitRegistry>) -> Self {
        Self {
            local,
            remote: Some(remote),
        }
    }

    pub fn is_remote_authority(authority: &str) -> bool {
        let lower = authority.trim_start().to_ascii_lowercase();
        lower.starts_with("http://") || lower.starts_with("https://")
    }

    /// 立即物化：绑定参数并创建实例
    pub async fn resolve(
        &self,
        authority: &str,
        code: &str,
        raw_parameters: &Value,
    ) -> SchedulerResult<Arc<dyn RunnableUnit>> {
        let (factory, parameters) = self.bind(authority, code, raw_parameters).await?;
        factory.create(parameters).await
    }

    pub async fn resolve_spec(&self, spec: &UnitSpec) -> SchedulerResult<Arc<dyn RunnableUnit>> {
        self.resolve(&spec.authority, &spec.code, &spec.parameters)
            .await
    }

    /// 延迟物化前的校验：单元存在且参数符合输入模式，但不创建实例
    pub async fn validate(&self, spec: &UnitSpec) -> SchedulerResult<()> {
        self.bind(&spec.authority, &spec.code, &spec.parameters)
            .await
            .map(|_| ())
    }

    async fn bind(
        &self,
        authority: &str,
        code: &str,
        raw_parameters: &Value,
    ) -> SchedulerResult<(Arc<dyn UnitFactory>, ParameterValues)> {
        let registry = self.registry_for(authority)?;

        let factory = registry
            .describe(authority, code)
            .await?
            .ok_or_else(|| SchedulerError::unit_not_found(authority, code))?;

        let parameters = factory.descriptor().bind(raw_parameters)?;
        debug!(
            "解析执行单元 {}/{}，绑定参数 {} 个",
            authority,
            code,
            parameters.len()
        );
        Ok((factory, parameters))
    }

    fn registry_for(&self, authority: &str) -> SchedulerResult<&Arc<dyn UnitRegistry>> {
        if Self::is_remote_authority(authority) {
            self.remote.as_ref().ok_or_else(|| {
                SchedulerError::Unreachable(format!("未配置远程执行端点客户端: {authority}"))
            })
        } else {
            Ok(&self.local)
        }
    }
}
