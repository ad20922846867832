pub mod config;
pub mod errors;
pub mod logging;

pub use config::*;
pub use errors::*;

/// 统一的Result类型
pub type SchedulerResult<T> = std::result::Result<T, SchedulerError>;
