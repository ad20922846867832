use serde::{Deserialize, Serialize};

/// 触发引擎配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub instance_name: String,
    /// 执行池大小，同一时刻最多运行的作业实例数
    pub thread_count: usize,
    /// 作业键未携带分组时使用的分组名
    pub default_group: String,
    pub shutdown_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_name: "jobrunner".to_string(),
            thread_count: 10,
            default_group: "DEFAULT".to_string(),
            shutdown_timeout_seconds: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.instance_name.trim().is_empty() {
            return Err(anyhow::anyhow!("调度器实例名不能为空"));
        }

        if self.thread_count == 0 {
            return Err(anyhow::anyhow!("执行线程数必须大于0"));
        }

        if self.default_group.is_empty() || self.default_group.contains('.') {
            return Err(anyhow::anyhow!(
                "默认作业分组无效: '{}'，不能为空且不能包含'.'",
                self.default_group
            ));
        }

        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("关闭超时时间必须大于0"));
        }

        Ok(())
    }
}
