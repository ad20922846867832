use std::sync::Arc;

use async_trait::async_trait;
use jobrunner_core::SchedulerResult;
use jobrunner_domain::{
    ParameterKind, ParameterSpec, ParameterValues, RunnableUnit, UnitDescriptor, UnitFactory,
};
use jobrunner_infrastructure::LocalUnitRegistry;
use serde_json::json;
use tracing::info;

use super::executors::{parse_params, ShellUnit, SleepUnit};

/// 内置执行单元的 authority
pub const BUILTIN_AUTHORITY: &str = "builtin";

pub struct ShellUnitFactory {
    descriptor: UnitDescriptor,
}

impl ShellUnitFactory {
    pub fn new() -> Self {
        let descriptor = UnitDescriptor::new(BUILTIN_AUTHORITY, "shell")
            .with_title("执行Shell命令")
            .with_input(ParameterSpec::required("command", ParameterKind::String))
            .with_input(ParameterSpec::optional("args", ParameterKind::Array, Some(json!([]))))
            .with_input(ParameterSpec::optional("working_dir", ParameterKind::String, None))
            .with_input(ParameterSpec::optional("env_vars", ParameterKind::Object, None))
            .with_input(ParameterSpec::optional("timeout_seconds", ParameterKind::Integer, None));
        Self { descriptor }
    }
}

impl Default for ShellUnitFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitFactory for ShellUnitFactory {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn create(&self, parameters: ParameterValues) -> SchedulerResult<Arc<dyn RunnableUnit>> {
        let params = parse_params(&self.descriptor, parameters)?;
        Ok(Arc::new(ShellUnit::new(self.descriptor.clone(), params)))
    }
}

pub struct SleepUnitFactory {
    descriptor: UnitDescriptor,
}

impl SleepUnitFactory {
    pub fn new() -> Self {
        let descriptor = UnitDescriptor::new(BUILTIN_AUTHORITY, "sleep")
            .with_title("分步计时")
            .with_input(ParameterSpec::required("duration_ms", ParameterKind::Integer))
            .with_input(ParameterSpec::optional("steps", ParameterKind::Integer, Some(json!(10))))
            .with_input(ParameterSpec::optional("warn_at_step", ParameterKind::Integer, None));
        Self { descriptor }
    }
}

impl Default for SleepUnitFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UnitFactory for SleepUnitFactory {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn create(&self, parameters: ParameterValues) -> SchedulerResult<Arc<dyn RunnableUnit>> {
        let params = parse_params(&self.descriptor, parameters)?;
        Ok(Arc::new(SleepUnit::new(self.descriptor.clone(), params)))
    }
}

/// 向本地注册表注册全部内置执行单元
pub async fn register_builtin_units(registry: &LocalUnitRegistry) -> SchedulerResult<()> {
    registry.register(Arc::new(ShellUnitFactory::new())).await?;
    registry.register(Arc::new(SleepUnitFactory::new())).await?;
    info!("内置执行单元注册完成: shell, sleep");
    Ok(())
}
