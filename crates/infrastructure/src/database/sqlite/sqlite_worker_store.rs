use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renderfarm_core::models::Worker;
use renderfarm_core::traits::WorkerStore;
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::database::mapping::{MappingHelpers, WORKER_COLUMNS};

pub struct SqliteWorkerStore {
    pool: SqlitePool,
}

impl SqliteWorkerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// 条件认领，可在事务内调用
pub(crate) async fn claim_worker(
    conn: &mut SqliteConnection,
    worker_guid: &str,
    session_guid: &str,
    workgroup: &str,
    seen_since: DateTime<Utc>,
) -> RenderFarmResult<Option<Worker>> {
    let sql = format!(
        r#"
        UPDATE workers SET session_guid = ?
        WHERE guid = ? AND workgroup = ? AND session_guid IS NULL AND last_seen >= ?
        RETURNING {WORKER_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(session_guid)
        .bind(worker_guid)
        .bind(workgroup)
        .bind(seen_since)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

    row.as_ref().map(MappingHelpers::row_to_worker).transpose()
}

/// 释放由指定会话持有的认领，可在事务内调用
pub(crate) async fn release_worker(
    conn: &mut SqliteConnection,
    worker_guid: &str,
    session_guid: &str,
) -> RenderFarmResult<Option<Worker>> {
    let sql = format!(
        r#"
        UPDATE workers SET session_guid = NULL
        WHERE guid = ? AND session_guid = ?
        RETURNING {WORKER_COLUMNS}
        "#
    );
    let row = sqlx::query(&sql)
        .bind(worker_guid)
        .bind(session_guid)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

    row.as_ref().map(MappingHelpers::row_to_worker).transpose()
}

pub(crate) async fn fetch_worker(
    conn: &mut SqliteConnection,
    guid: &str,
) -> RenderFarmResult<Option<Worker>> {
    let sql = format!("SELECT {WORKER_COLUMNS} FROM workers WHERE guid = ?");
    let row = sqlx::query(&sql)
        .bind(guid)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

    row.as_ref().map(MappingHelpers::row_to_worker).transpose()
}

#[async_trait]
impl WorkerStore for SqliteWorkerStore {
    async fn upsert_heartbeat(&self, worker: &Worker) -> RenderFarmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workers (guid, mac, ip, port, workgroup, first_seen, last_seen, cpu_usage, ram_usage, total_ram, session_guid)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
            ON CONFLICT(guid) DO UPDATE SET
                ip = excluded.ip,
                port = excluded.port,
                workgroup = excluded.workgroup,
                last_seen = MAX(workers.last_seen, excluded.last_seen),
                cpu_usage = excluded.cpu_usage,
                ram_usage = excluded.ram_usage,
                total_ram = excluded.total_ram
            "#,
        )
        .bind(&worker.guid)
        .bind(&worker.mac)
        .bind(&worker.ip)
        .bind(i64::from(worker.port))
        .bind(&worker.workgroup)
        .bind(worker.first_seen)
        .bind(worker.last_seen)
        .bind(worker.cpu_usage)
        .bind(worker.ram_usage)
        .bind(worker.total_ram)
        .execute(&self.pool)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

        debug!("写入Worker心跳: {} ({})", worker.guid, worker.endpoint());
        Ok(())
    }

    async fn get_by_guid(&self, guid: &str) -> RenderFarmResult<Option<Worker>> {
        let mut conn = self.pool.acquire().await?;
        fetch_worker(&mut conn, guid).await
    }

    async fn get_recent_workers(
        &self,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Vec<Worker>> {
        let sql = format!(
            "SELECT {WORKER_COLUMNS} FROM workers WHERE workgroup = ? AND last_seen >= ? ORDER BY cpu_usage ASC, guid ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(workgroup)
            .bind(seen_since)
            .fetch_all(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        rows.iter().map(MappingHelpers::row_to_worker).collect()
    }

    async fn get_available_workers(
        &self,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Vec<Worker>> {
        let sql = format!(
            r#"
            SELECT {WORKER_COLUMNS} FROM workers
            WHERE workgroup = ? AND session_guid IS NULL AND last_seen >= ?
            ORDER BY cpu_usage ASC, guid ASC
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(workgroup)
            .bind(seen_since)
            .fetch_all(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        rows.iter().map(MappingHelpers::row_to_worker).collect()
    }

    async fn try_claim(
        &self,
        worker_guid: &str,
        session_guid: &str,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Option<Worker>> {
        let mut conn = self.pool.acquire().await?;
        let claimed =
            claim_worker(&mut conn, worker_guid, session_guid, workgroup, seen_since).await?;
        if claimed.is_some() {
            debug!("Worker {} 已被会话 {} 认领", worker_guid, session_guid);
        }
        Ok(claimed)
    }

    async fn release(
        &self,
        worker_guid: &str,
        session_guid: &str,
    ) -> RenderFarmResult<Option<Worker>> {
        let mut conn = self.pool.acquire().await?;
        release_worker(&mut conn, worker_guid, session_guid).await
    }

    async fn delete_dead_workers(&self, seen_before: DateTime<Utc>) -> RenderFarmResult<u64> {
        let result =
            sqlx::query("DELETE FROM workers WHERE last_seen < ? AND session_guid IS NULL")
                .bind(seen_before)
                .execute(&self.pool)
                .await
                .map_err(RenderFarmError::StoreUnavailable)?;

        if result.rows_affected() > 0 {
            debug!("删除失效Worker记录: {}", result.rows_affected());
        }
        Ok(result.rows_affected())
    }
}
