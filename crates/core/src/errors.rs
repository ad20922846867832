use thiserror::Error;

/// 调度引擎错误类型定义
///
/// 只有提交阶段的错误需要调用方处理；作业开始运行之后的所有故障
/// 都体现在任务记录的状态和消息字段里。
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("调度器不可用: {0}")]
    SchedulerUnavailable(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCronExpression { expr: String, message: String },

    #[error("无效的作业键: {0}")]
    InvalidJobKey(String),

    #[error("执行单元未找到: authority={authority}, code={code}")]
    UnitNotFound { authority: String, code: String },

    #[error("无效的执行参数: {0}")]
    InvalidParameters(String),

    #[error("远程端点不可达: {0}")]
    Unreachable(String),

    #[error("远程协议错误: {0}")]
    Protocol(String),

    #[error("执行单元不支持中断: {0}")]
    InterruptUnsupported(String),

    #[error("不支持的监听器类型: {0}")]
    UnsupportedListenerKind(String),

    #[error("任务存储错误: {0}")]
    Store(String),

    #[error("通知发布失败: {0}")]
    Notification(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("任务已被中断: {0}")]
    Interrupted(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn store_error<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }
    pub fn invalid_params<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameters(msg.into())
    }
    pub fn unit_not_found<A: Into<String>, C: Into<String>>(authority: A, code: C) -> Self {
        Self::UnitNotFound {
            authority: authority.into(),
            code: code.into(),
        }
    }
    pub fn invalid_cron<E: Into<String>, M: Into<String>>(expr: E, message: M) -> Self {
        Self::InvalidCronExpression {
            expr: expr.into(),
            message: message.into(),
        }
    }

    /// 提交阶段（同步返回给调用方、且不会产生任务记录）的错误
    pub fn is_submission_error(&self) -> bool {
        matches!(
            self,
            SchedulerError::SchedulerUnavailable(_)
                | SchedulerError::InvalidCronExpression { .. }
                | SchedulerError::InvalidJobKey(_)
                | SchedulerError::UnitNotFound { .. }
                | SchedulerError::InvalidParameters(_)
                | SchedulerError::Unreachable(_)
                | SchedulerError::Protocol(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SchedulerError::Store(_) | SchedulerError::Notification(_) | SchedulerError::Unreachable(_)
        )
    }
}

impl From<sqlx::Error> for SchedulerError {
    fn from(err: sqlx::Error) -> Self {
        SchedulerError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(err: serde_json::Error) -> Self {
        SchedulerError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SchedulerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SchedulerError::Protocol(err.to_string())
        } else {
            SchedulerError::Unreachable(err.to_string())
        }
    }
}

impl From<config::ConfigError> for SchedulerError {
    fn from(err: config::ConfigError) -> Self {
        SchedulerError::Configuration(err.to_string())
    }
}

impl From<anyhow::Error> for SchedulerError {
    fn from(err: anyhow::Error) -> Self {
        SchedulerError::Internal(format!("{err:#}"))
    }
}
