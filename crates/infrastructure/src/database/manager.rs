use std::str::FromStr;
use std::time::Duration;

use jobrunner_core::SchedulerResult;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

const CREATE_TASK_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS task_records (
    identifier TEXT PRIMARY KEY NOT NULL,
    state TEXT NOT NULL,
    task_parameter_id INTEGER,
    owner TEXT,
    task_type TEXT NOT NULL,
    date_start INTEGER,
    date_end INTEGER,
    progress REAL,
    message TEXT,
    output TEXT
)
"#;

const CREATE_PARAMETER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_task_records_parameter ON task_records (task_parameter_id)";

/// SQLite连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// 连接数据库并创建表结构
    ///
    /// 内存库的每个连接都是独立的数据库，因此固定为单连接且不回收。
    pub async fn new(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let in_memory = url.contains(":memory:") || url.contains("mode=memory");

        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new()
                .max_connections(max_connections)
                .max_lifetime(Duration::from_secs(1800))
        };

        let pool = pool_options.connect_with(options).await?;
        let manager = Self { pool };
        manager.migrate().await?;

        info!("任务记录数据库已就绪: {}", url);
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> SchedulerResult<()> {
        sqlx::query(CREATE_TASK_RECORDS).execute(&self.pool).await?;
        sqlx::query(CREATE_PARAMETER_INDEX).execute(&self.pool).await?;
        debug!("task_records 表结构检查完成");
        Ok(())
    }
}
