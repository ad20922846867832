use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use jobrunner_core::SchedulerError;

/// 任务执行状态
///
/// `PENDING -> RUNNING <-> PAUSED -> {SUCCEED, WARNING, FAILED, CANCELLED}`，
/// 四个结果状态为终态，进入终态后不允许再转换。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskState {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "SUCCEED")]
    Succeed,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeed | TaskState::Warning | TaskState::Failed | TaskState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Paused => "PAUSED",
            TaskState::Succeed => "SUCCEED",
            TaskState::Warning => "WARNING",
            TaskState::Failed => "FAILED",
            TaskState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "PAUSED" => Ok(TaskState::Paused),
            "SUCCEED" => Ok(TaskState::Succeed),
            "WARNING" => Ok(TaskState::Warning),
            "FAILED" => Ok(TaskState::Failed),
            "CANCELLED" => Ok(TaskState::Cancelled),
            _ => Err(SchedulerError::Serialization(format!("Invalid task state: {s}"))),
        }
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskState {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <str as sqlx::Type<sqlx::Sqlite>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskState {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        s.parse::<TaskState>().map_err(|e| e.to_string().into())
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskState {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        <&str as sqlx::Encode<sqlx::Sqlite>>::encode(self.as_str(), buf)
    }
}

/// 单次执行实例的持久化状态记录
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub identifier: String,
    pub state: TaskState,
    pub task_parameter_id: Option<i64>,
    pub owner: Option<String>,
    #[serde(rename = "type")]
    pub task_type: String,
    /// 毫秒时间戳
    pub date_start: Option<i64>,
    pub date_end: Option<i64>,
    pub progress: Option<f64>,
    pub message: Option<String>,
    pub output: Option<String>,
}

impl TaskRecord {
    pub fn new(
        identifier: String,
        task_parameter_id: Option<i64>,
        owner: Option<String>,
        task_type: String,
    ) -> Self {
        Self {
            identifier,
            state: TaskState::Pending,
            task_parameter_id,
            owner,
            task_type,
            date_start: None,
            date_end: None,
            progress: None,
            message: None,
            output: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn entity_description(&self) -> String {
        format!(
            "任务记录 '{}' (状态: {}, 类型: {})",
            self.identifier, self.state, self.task_type
        )
    }
}

/// 当前时间的毫秒时间戳
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 规范化进度值
///
/// NaN/无穷视为未知返回 `None`；有限值截断到 `[0, 100]` 后按十进制
/// 四舍五入（round-half-up）保留两位小数。
pub fn normalize_progress(raw: f64) -> Option<f64> {
    if !raw.is_finite() {
        return None;
    }
    Some(round_half_up_2(raw.clamp(0.0, 100.0)))
}

fn round_half_up_2(value: f64) -> f64 {
    // 基于最短十进制表示取舍，避免 1.005 这类值因二进制误差被舍掉
    let repr = value.to_string();
    let Some((int_part, frac)) = repr.split_once('.') else {
        return value;
    };
    if frac.len() <= 2 {
        return value;
    }
    let kept: f64 = format!("{int_part}.{}", &frac[..2])
        .parse()
        .unwrap_or(value);
    let bumped = if frac.as_bytes()[2] >= b'5' {
        kept + 0.01
    } else {
        kept
    };
    (bumped * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Running.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
        assert!(TaskState::Succeed.is_terminal());
        assert!(TaskState::Warning.is_terminal());
        assert!(TaskState::Failed.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn test_state_string_conversion() {
        for state in [
            TaskState::Pending,
            TaskState::Running,
            TaskState::Paused,
            TaskState::Succeed,
            TaskState::Warning,
            TaskState::Failed,
            TaskState::Cancelled,
        ] {
            assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
        }
        assert!("DONE".parse::<TaskState>().is_err());
    }

    #[test]
    fn test_normalize_progress_rounding() {
        assert_eq!(normalize_progress(50.004), Some(50.0));
        assert_eq!(normalize_progress(1.005), Some(1.01));
        assert_eq!(normalize_progress(33.335), Some(33.34));
        assert_eq!(normalize_progress(12.344999), Some(12.34));
        assert_eq!(normalize_progress(99.999), Some(100.0));
        assert_eq!(normalize_progress(0.0), Some(0.0));
        assert_eq!(normalize_progress(100.0), Some(100.0));
    }

    #[test]
    fn test_normalize_progress_unknown() {
        assert_eq!(normalize_progress(f64::NAN), None);
        assert_eq!(normalize_progress(f64::INFINITY), None);
        assert_eq!(normalize_progress(f64::NEG_INFINITY), None);
    }

    #[test]
    fn test_normalize_progress_clamps() {
        assert_eq!(normalize_progress(-3.2), Some(0.0));
        assert_eq!(normalize_progress(250.0), Some(100.0));
    }

    #[test]
    fn test_normalize_progress_idempotent() {
        for raw in [0.004, 7.125, 42.42, 50.005, 66.666, 99.994] {
            let once = normalize_progress(raw).unwrap();
            assert_eq!(normalize_progress(once), Some(once));
        }
    }

    #[test]
    fn test_task_record_serialization() {
        let record = TaskRecord::new(
            "DEFAULT.job_1".to_string(),
            Some(7),
            Some("alice".to_string()),
            "sleep".to_string(),
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["state"], "PENDING");
        assert_eq!(json["taskParameterId"], 7);
        assert_eq!(json["type"], "sleep");
        assert!(json["dateStart"].is_null());
    }
}
