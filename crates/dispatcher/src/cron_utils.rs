use chrono::{DateTime, Duration, Utc};
use cron::Schedule;
use std::str::FromStr;
use tracing::debug;

use jobrunner_core::{SchedulerError, SchedulerResult};

/// CRON触发器：表达式加可选的结束时间
///
/// 支持6/7字段语法（秒 分 时 日 月 周 [年]）。
#[derive(Debug, Clone)]
pub struct CronTrigger {
    expression: String,
    schedule: Schedule,
    end_date: Option<DateTime<Utc>>,
}

impl CronTrigger {
    pub fn new(expression: &str, end_date: Option<DateTime<Utc>>) -> SchedulerResult<Self> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| SchedulerError::invalid_cron(expression, e.to_string()))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            end_date,
        })
    }

    /// 验证CRON表达式是否有效
    pub fn validate_cron_expression(expression: &str) -> SchedulerResult<()> {
        Schedule::from_str(expression)
            .map_err(|e| SchedulerError::invalid_cron(expression, e.to_string()))?;
        Ok(())
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    /// `from` 之后的下一次触发时间，超过结束时间则返回 `None`
    pub fn next_fire_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let next = self.schedule.after(&from).next()?;
        match self.end_date {
            Some(end) if next > end => {
                debug!(
                    "CRON触发器 '{}' 已到结束时间: 下次={}, 结束={}",
                    self.expression,
                    next.format("%Y-%m-%d %H:%M:%S UTC"),
                    end.format("%Y-%m-%d %H:%M:%S UTC")
                );
                None
            }
            _ => Some(next),
        }
    }

    /// 获取从指定时间开始的多个触发时间（受结束时间约束）
    pub fn upcoming_times(&self, from: DateTime<Utc>, count: usize) -> Vec<DateTime<Utc>> {
        self.schedule
            .after(&from)
            .take_while(|t| self.end_date.map_or(true, |end| *t <= end))
            .take(count)
            .collect()
    }

    /// 计算下次触发距离现在的时长
    pub fn time_until_next_fire(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.next_fire_after(now).map(|next| next - now)
    }

    /// 在 `from` 之后是否还会触发
    pub fn may_fire_again(&self, from: DateTime<Utc>) -> bool {
        self.next_fire_after(from).is_some()
    }
}
