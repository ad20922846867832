//! 作业键、运行ID与作业描述

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use jobrunner_core::{SchedulerError, SchedulerResult};

use crate::ports::RunnableUnit;

/// 作业的逻辑地址 `<group>.<name>`，与具体的运行实例无关
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub group: String,
    pub name: String,
}

impl JobKey {
    pub fn new<G: Into<String>, N: Into<String>>(group: G, name: N) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
        }
    }

    /// 解析逻辑键或运行ID
    ///
    /// 接受 `group.name` 与 `group.name_<uuid>` 两种形式：最后一个 `_` 之后
    /// 若是合法UUID则视为运行后缀并去掉。没有分组前缀时使用 `default_group`。
    pub fn parse(input: &str, default_group: &str) -> SchedulerResult<Self> {
        let input = input.trim();
        let logical = strip_run_suffix(input);

        let (group, name) = match logical.split_once('.') {
            Some((group, name)) => (group, name),
            None => (default_group, logical),
        };

        if group.is_empty() || name.is_empty() {
            return Err(SchedulerError::InvalidJobKey(input.to_string()));
        }

        Ok(Self::new(group, name))
    }

    /// 为一次具体执行生成唯一运行ID
    pub fn new_run_id(&self) -> String {
        format!("{self}_{}", Uuid::new_v4())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.group, self.name)
    }
}

fn strip_run_suffix(input: &str) -> &str {
    match input.rsplit_once('_') {
        Some((head, tail)) if Uuid::parse_str(tail).is_ok() => head,
        _ => input,
    }
}

/// 触发方式
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TriggerSpec {
    Now,
    Cron {
        expression: String,
        end_date: Option<DateTime<Utc>>,
    },
}

/// 延迟物化时保存的单元标识三元组
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitSpec {
    pub authority: String,
    pub code: String,
    pub parameters: serde_json::Value,
}

impl UnitSpec {
    pub fn new<A: Into<String>, C: Into<String>>(
        authority: A,
        code: C,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            authority: authority.into(),
            code: code.into(),
            parameters,
        }
    }
}

/// 作业要运行的内容：已绑定参数的实例，或每次触发时重新构造
#[derive(Clone)]
pub enum UnitSource {
    Eager(Arc<dyn RunnableUnit>),
    Lazy(UnitSpec),
}

impl UnitSource {
    pub fn code(&self) -> &str {
        match self {
            UnitSource::Eager(unit) => &unit.descriptor().code,
            UnitSource::Lazy(spec) => &spec.code,
        }
    }
}

impl fmt::Debug for UnitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSource::Eager(unit) => f
                .debug_tuple("Eager")
                .field(&format_args!(
                    "{}/{}",
                    unit.descriptor().authority,
                    unit.descriptor().code
                ))
                .finish(),
            UnitSource::Lazy(spec) => f.debug_tuple("Lazy").field(spec).finish(),
        }
    }
}

/// 每次提交创建的不可变作业描述
#[derive(Debug, Clone)]
pub struct JobDescriptor {
    pub key: JobKey,
    /// 立即执行作业在提交时分配的运行ID；CRON作业每次触发时生成
    pub run_id: Option<String>,
    pub title: String,
    pub unit: UnitSource,
    pub trigger: TriggerSpec,
    pub task_parameter_id: Option<i64>,
    pub owner: Option<String>,
}

impl JobDescriptor {
    /// 写入任务记录的分类字段
    pub fn task_type(&self) -> &str {
        self.unit.code()
    }
}
