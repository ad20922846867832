use serde::{Deserialize, Serialize};

/// 远程执行端点客户端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub request_timeout_seconds: u64,
    pub user_agent: String,
    /// 异步执行时轮询状态文档的间隔
    pub poll_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 30,
            user_agent: concat!("jobrunner/", env!("CARGO_PKG_VERSION")).to_string(),
            poll_interval_ms: 1000,
        }
    }
}

impl RemoteConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("远程请求超时时间必须大于0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("远程状态轮询间隔必须大于0"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_bind_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_bind_address: "127.0.0.1:9464".to_string(),
        }
    }
}

impl ObservabilityConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.as_str()) {
            return Err(anyhow::anyhow!(
                "无效的日志级别: {}，支持的级别: {:?}",
                self.log_level,
                valid_levels
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.log_format.as_str()) {
            return Err(anyhow::anyhow!("无效的日志格式: {}", self.log_format));
        }

        if self.metrics_enabled && self.metrics_bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "无效的指标监听地址: {}",
                self.metrics_bind_address
            ));
        }

        Ok(())
    }
}
