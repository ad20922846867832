use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    observability::{ObservabilityConfig, RemoteConfig},
    scheduler::SchedulerConfig,
    store::StoreConfig,
};

/// 启动时提交的声明式作业
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub title: String,
    pub authority: String,
    pub code: String,
    #[serde(default = "default_parameters")]
    pub parameters: serde_json::Value,
    /// 为空时立即执行一次
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub task_parameter_id: Option<i64>,
}

fn default_parameters() -> serde_json::Value {
    serde_json::json!({})
}

impl JobDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(anyhow::anyhow!("作业标题不能为空"));
        }
        if self.authority.is_empty() || self.code.is_empty() {
            return Err(anyhow::anyhow!(
                "作业 '{}' 的authority和code不能为空",
                self.title
            ));
        }
        if !self.parameters.is_object() {
            return Err(anyhow::anyhow!("作业 '{}' 的参数必须是对象", self.title));
        }
        if self.end_date.is_some() && self.cron.is_none() {
            return Err(anyhow::anyhow!(
                "作业 '{}' 设置了结束时间但没有CRON表达式",
                self.title
            ));
        }
        Ok(())
    }
}

/// System configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    pub remote: RemoteConfig,
    pub observability: ObservabilityConfig,
    pub jobs: Vec<JobDefinition>,
}

impl AppConfig {
    /// Load configuration from config file and environment variables
    ///
    /// Load order:
    /// 1. Default configuration
    /// 2. Config file (TOML format)
    /// 3. Environment variable overrides (prefix: JOBRUNNER_, nesting: `__`)
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else {
            let default_paths = ["config/jobrunner.toml", "jobrunner.toml"];
            if let Some(path) = default_paths.iter().find(|p| Path::new(p).exists()) {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("JOBRUNNER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.scheduler.validate().context("调度器配置验证失败")?;
        self.store.validate().context("存储配置验证失败")?;
        self.remote.validate().context("远程端点配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        for job in &self.jobs {
            job.validate().context("作业定义验证失败")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StoreBackend;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheduler.default_group, "DEFAULT");
        assert_eq!(config.store.backend, StoreBackend::Memory);
    }

    #[test]
    fn test_from_toml_partial() {
        let config = AppConfig::from_toml(
            r#"
            [scheduler]
            thread_count = 4

            [[jobs]]
            title = "nightly buffer"
            authority = "builtin"
            code = "sleep"
            cron = "0 0 2 * * ?"
            parameters = { steps = 3 }
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.thread_count, 4);
        assert_eq!(config.scheduler.instance_name, "jobrunner");
        assert_eq!(config.jobs.len(), 1);
        assert_eq!(config.jobs[0].parameters["steps"], 3);
    }

    #[test]
    fn test_invalid_thread_count_rejected() {
        let result = AppConfig::from_toml("[scheduler]\nthread_count = 0\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_end_date_requires_cron() {
        let result = AppConfig::from_toml(
            r#"
            [[jobs]]
            title = "once"
            authority = "builtin"
            code = "sleep"
            end_date = "2030-01-01T00:00:00Z"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[store]\nbackend = \"sqlite\"\nurl = \"sqlite://jobs.db\"").unwrap();

        let config = AppConfig::load(file.path().to_str()).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.url, "sqlite://jobs.db");
    }

    #[test]
    fn test_sample_config_parses() {
        let config =
            AppConfig::from_toml(include_str!("../../../../../config/jobrunner.toml")).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.remote.poll_interval_ms, 1000);
        assert_eq!(config.jobs.len(), 2);
        assert!(config.jobs[0].cron.is_none());
        assert_eq!(config.jobs[1].cron.as_deref(), Some("0 */5 * * * *"));
        assert_eq!(config.jobs[1].task_parameter_id, Some(1));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AppConfig::load(Some("/nonexistent/jobrunner.toml")).is_err());
    }
}
