//! 作业调度与执行状态跟踪引擎
//!
//! 接收立即执行或CRON周期执行的作业，交给执行单元运行，并把生命周期回调
//! 转换成任务记录的状态变更和对外通知。

pub mod cron_utils;
pub mod listeners;
pub mod metrics;
pub mod resolver;
pub mod scheduler;
pub mod status_tracker;
pub mod structured_logger;

pub use cron_utils::CronTrigger;
pub use listeners::{LifecycleBridge, Listener, ListenerRegistry};
pub use metrics::EngineMetrics;
pub use resolver::UnitResolver;
pub use scheduler::{JobScheduler, SchedulerState};
pub use status_tracker::StatusTracker;
pub use structured_logger::StructuredLogger;
