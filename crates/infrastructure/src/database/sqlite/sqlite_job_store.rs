use async_trait::async_trait;
use chrono::Utc;
use renderfarm_core::models::{Job, JobState};
use renderfarm_core::traits::JobStore;
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use sqlx::SqlitePool;
use tracing::debug;

use crate::database::mapping::{MappingHelpers, JOB_COLUMNS};

/// 活跃作业的判定条件
const ACTIVE: &str = "closed = 0 AND canceled = 0 AND failed = 0";

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 仅对活跃作业生效的条件更新
    ///
    /// `$1` 为新状态，`$2` 为当前时间，`$3` 为作业guid，`$4` 为可选的附加参数
    async fn update_active(
        &self,
        guid: &str,
        state: JobState,
        assignments: &str,
        condition: &str,
        extra: Option<String>,
    ) -> RenderFarmResult<Option<Job>> {
        let sql = format!(
            r#"
            UPDATE jobs SET state = $1, updated_at = $2{assignments}
            WHERE guid = $3 AND {ACTIVE}{condition}
            RETURNING {JOB_COLUMNS}
            "#
        );
        let mut query = sqlx::query(&sql)
            .bind(state.as_str())
            .bind(Utc::now())
            .bind(guid);
        if let Some(extra) = extra {
            query = query.bind(extra);
        }
        let row = query
            .fetch_optional(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        let job = row.as_ref().map(MappingHelpers::row_to_job).transpose()?;
        if job.is_some() {
            debug!("作业 {} -> {}", guid, state);
        }
        Ok(job)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_if_worker_idle(&self, job: &Job) -> RenderFarmResult<Option<Job>> {
        let urls = serde_json::to_string(&job.urls)?;

        let sql = format!(
            r#"
            INSERT INTO jobs ({JOB_COLUMNS})
            SELECT ?, ?, ?, ?, ?, ?, NULL, ?, 0, 0, 0, NULL, ?, ?, ?, ?
            WHERE EXISTS (
                SELECT 1 FROM sessions
                WHERE guid = ? AND worker_guid = ? AND closed = 0
            )
            AND NOT EXISTS (
                SELECT 1 FROM jobs WHERE worker_guid = ? AND {ACTIVE}
            )
            "#
        );
        let result = sqlx::query(&sql)
            .bind(&job.guid)
            .bind(&job.api_key)
            .bind(&job.session_guid)
            .bind(&job.worker_guid)
            .bind(job.created_at)
            .bind(job.updated_at)
            .bind(job.state.as_str())
            .bind(urls)
            .bind(&job.camera_name)
            .bind(i64::from(job.render_width))
            .bind(i64::from(job.render_height))
            .bind(&job.session_guid)
            .bind(&job.worker_guid)
            .bind(&job.worker_guid)
            .execute(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        if result.rows_affected() == 0 {
            // 区分会话已终止与Worker忙
            let session_open = sqlx::query(
                "SELECT 1 FROM sessions WHERE guid = ? AND worker_guid = ? AND closed = 0",
            )
            .bind(&job.session_guid)
            .bind(&job.worker_guid)
            .fetch_optional(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?
            .is_some();

            if !session_open {
                return Err(RenderFarmError::session_not_found(&job.session_guid));
            }
            return Ok(None);
        }

        debug!("创建作业 {} -> Worker {}", job.guid, job.worker_guid);
        Ok(Some(job.clone()))
    }

    async fn get(&self, guid: &str) -> RenderFarmResult<Option<Job>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE guid = ?");
        let row = sqlx::query(&sql)
            .bind(guid)
            .fetch_optional(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        row.as_ref().map(MappingHelpers::row_to_job).transpose()
    }

    async fn get_active_jobs(&self, worker_guid: &str) -> RenderFarmResult<Vec<Job>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE worker_guid = ? AND {ACTIVE} ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(worker_guid)
            .fetch_all(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        rows.iter().map(MappingHelpers::row_to_job).collect()
    }

    async fn update_state(&self, guid: &str, state: JobState) -> RenderFarmResult<Option<Job>> {
        let from = match state {
            JobState::Connected => JobState::Pending,
            JobState::Rendering => JobState::Connected,
            other => {
                return Err(RenderFarmError::Internal(format!(
                    "作业状态 {other} 需通过专用操作设置"
                )))
            }
        };

        self.update_active(
            guid,
            state,
            "",
            " AND state = $4",
            Some(from.as_str().to_string()),
        )
        .await
    }

    async fn complete(&self, guid: &str, urls: &[String]) -> RenderFarmResult<Option<Job>> {
        let urls = serde_json::to_string(urls)?;
        self.update_active(
            guid,
            JobState::Completed,
            ", closed = 1, closed_at = $2, urls = $4",
            "",
            Some(urls),
        )
        .await
    }

    async fn fail(&self, guid: &str, error: &str) -> RenderFarmResult<Option<Job>> {
        self.update_active(
            guid,
            JobState::Failed,
            ", failed = 1, closed_at = $2, error = $4",
            "",
            Some(error.to_string()),
        )
        .await
    }

    async fn cancel(&self, guid: &str) -> RenderFarmResult<Option<Job>> {
        self.update_active(
            guid,
            JobState::Canceled,
            ", canceled = 1, closed_at = $2",
            "",
            None,
        )
        .await
    }
}
