//! 执行生命周期事件与状态变更通知

use serde::{Deserialize, Serialize};

use crate::entities::TaskRecord;

/// 执行单元上报的故障（失败、取消或进行中的告警）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskFault {
    /// 出错的子任务描述
    pub description: String,
    /// 原因/堆栈文本
    pub cause: String,
}

impl TaskFault {
    pub fn new<D: Into<String>, C: Into<String>>(description: D, cause: C) -> Self {
        Self {
            description: description.into(),
            cause: cause.into(),
        }
    }

    /// 写入任务消息字段时使用的文本
    pub fn to_message(&self) -> String {
        if self.cause.is_empty() {
            self.description.clone()
        } else if self.description.is_empty() {
            self.cause.clone()
        } else {
            format!("{}\n{}", self.description, self.cause)
        }
    }

    /// 单行形式，用于汇总多个告警
    pub fn to_line(&self) -> String {
        let cause = self.cause.lines().next().unwrap_or_default();
        match (self.description.is_empty(), cause.is_empty()) {
            (false, false) => format!("{}: {}", self.description, cause),
            (false, true) => self.description.clone(),
            _ => cause.to_string(),
        }
    }
}

/// 非终态/成功回调携带的状态信息
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub message: Option<String>,
    /// 原始进度，存储前会被规范化
    pub progress: Option<f64>,
    pub output: Option<String>,
    /// 进行中携带的异常，不立即终止任务，完成时转为 WARNING
    pub warning: Option<TaskFault>,
}

impl StatusUpdate {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }
    pub fn with_output<S: Into<String>>(mut self, output: S) -> Self {
        self.output = Some(output.into());
        self
    }
    pub fn with_warning(mut self, warning: TaskFault) -> Self {
        self.warning = Some(warning);
        self
    }
}

/// 执行运行时针对单个运行实例发出的生命周期回调
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum LifecycleEvent {
    Started(StatusUpdate),
    Progressing(StatusUpdate),
    Paused(StatusUpdate),
    Resumed(StatusUpdate),
    Completed(StatusUpdate),
    Failed(TaskFault),
    Dismissed(TaskFault),
}

impl LifecycleEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            LifecycleEvent::Started(_) => "started",
            LifecycleEvent::Progressing(_) => "progressing",
            LifecycleEvent::Paused(_) => "paused",
            LifecycleEvent::Resumed(_) => "resumed",
            LifecycleEvent::Completed(_) => "completed",
            LifecycleEvent::Failed(_) => "failed",
            LifecycleEvent::Dismissed(_) => "dismissed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LifecycleEvent::Completed(_) | LifecycleEvent::Failed(_) | LifecycleEvent::Dismissed(_)
        )
    }
}

/// 状态变更通知，携带更新后的记录和作业标题
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChangedEvent {
    pub task: TaskRecord,
    pub title: String,
}

/// 一次执行作为整体的结果，由执行框架在单元返回后报告
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// 单元正常返回
    Completed,
    /// 单元返回错误
    Failed(String),
    /// 单元内部出现未捕获的运行时故障
    Panicked(String),
    /// 单元在收到中断请求后返回错误
    Interrupted(String),
}

impl ExecutionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionOutcome::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_message() {
        assert_eq!(TaskFault::new("step 2", "io error").to_message(), "step 2\nio error");
        assert_eq!(TaskFault::new("step 2", "").to_message(), "step 2");
        assert_eq!(TaskFault::new("", "boom").to_message(), "boom");
        assert_eq!(
            TaskFault::new("step 3", "timeout\n  at fetch()").to_line(),
            "step 3: timeout"
        );
    }

    #[test]
    fn test_event_serialization() {
        let event = LifecycleEvent::Progressing(StatusUpdate::new().with_progress(12.5));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "progressing");
        assert_eq!(json["payload"]["progress"], 12.5);
        assert!(!event.is_terminal());
        assert!(LifecycleEvent::Failed(TaskFault::new("a", "b")).is_terminal());
    }
}
