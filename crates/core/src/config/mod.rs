//! 配置模块
//!
//! 加载顺序：默认值 -> TOML配置文件 -> 环境变量覆盖（前缀 `JOBRUNNER`，层级分隔符 `__`）。

pub mod models;

pub use models::*;
