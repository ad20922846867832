use async_trait::async_trait;
use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{TaskRecord, TaskStore};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::manager::DatabaseManager;

const SELECT_COLUMNS: &str = "SELECT identifier, state, task_parameter_id, owner, task_type, \
     date_start, date_end, progress, message, output FROM task_records";

/// 基于SQLite的任务记录仓储
#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接数据库、建表并返回仓储
    pub async fn connect(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        let manager = DatabaseManager::new(url, max_connections).await?;
        Ok(Self::new(manager.pool().clone()))
    }

    fn row_to_task_record(row: &sqlx::sqlite::SqliteRow) -> SchedulerResult<TaskRecord> {
        Ok(TaskRecord {
            identifier: row.try_get("identifier")?,
            state: row.try_get("state")?,
            task_parameter_id: row.try_get("task_parameter_id")?,
            owner: row.try_get("owner")?,
            task_type: row.try_get("task_type")?,
            date_start: row.try_get("date_start")?,
            date_end: row.try_get("date_end")?,
            progress: row.try_get("progress")?,
            message: row.try_get("message")?,
            output: row.try_get("output")?,
        })
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    #[instrument(skip(self, task), fields(task.id = %task.identifier, task.state = %task.state))]
    async fn create(&self, task: &TaskRecord) -> SchedulerResult<()> {
        sqlx::query(
            r#"
            INSERT INTO task_records (identifier, state, task_parameter_id, owner, task_type,
                                      date_start, date_end, progress, message, output)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&task.identifier)
        .bind(task.state)
        .bind(task.task_parameter_id)
        .bind(&task.owner)
        .bind(&task.task_type)
        .bind(task.date_start)
        .bind(task.date_end)
        .bind(task.progress)
        .bind(&task.message)
        .bind(&task.output)
        .execute(&self.pool)
        .await?;

        debug!("创建{}", task.entity_description());
        Ok(())
    }

    async fn get(&self, identifier: &str) -> SchedulerResult<Option<TaskRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE identifier = $1"))
            .bind(identifier)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Self::row_to_task_record(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, task), fields(task.id = %task.identifier, task.state = %task.state))]
    async fn update(&self, task: &TaskRecord) -> SchedulerResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_records
            SET state = $2, task_parameter_id = $3, owner = $4, task_type = $5, date_start = $6,
                date_end = $7, progress = $8, message = $9, output = $10
            WHERE identifier = $1
            "#,
        )
        .bind(&task.identifier)
        .bind(task.state)
        .bind(task.task_parameter_id)
        .bind(&task.owner)
        .bind(&task.task_type)
        .bind(task.date_start)
        .bind(task.date_end)
        .bind(task.progress)
        .bind(&task.message)
        .bind(&task.output)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::store_error(format!(
                "任务记录不存在: {}",
                task.identifier
            )));
        }

        debug!("更新{}", task.entity_description());
        Ok(())
    }

    async fn list_by_parameter(&self, task_parameter_id: i64) -> SchedulerResult<Vec<TaskRecord>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE task_parameter_id = $1 ORDER BY rowid"
        ))
        .bind(task_parameter_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task_record).collect()
    }
}
