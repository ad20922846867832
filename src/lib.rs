//! 作业调度引擎的组合根
//!
//! 按配置装配任务存储、状态通知、执行单元注册表和调度器。

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
