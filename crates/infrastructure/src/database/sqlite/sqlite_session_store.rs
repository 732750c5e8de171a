use async_trait::async_trait;
use chrono::{DateTime, Utc};
use renderfarm_core::models::Session;
use renderfarm_core::traits::SessionStore;
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use super::sqlite_worker_store::{claim_worker, fetch_worker, release_worker};
use super::sqlite_workspace_store::fetch_workspace;
use crate::database::mapping::{MappingHelpers, SESSION_COLUMNS};

/// 会话存储
///
/// 打开的会话即 `closed = 0` 的记录；关闭、过期、失败都会置位 `closed`，
/// 并在同一事务内释放Worker认领。
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 释放会话持有的Worker并填充 `worker_ref`
    async fn release_into(
        conn: &mut SqliteConnection,
        session: &mut Session,
    ) -> RenderFarmResult<()> {
        let released = release_worker(conn, &session.worker_guid, &session.guid).await?;
        if released.is_none() {
            // 认领已不属于该会话，例如Worker记录已被删除
            warn!(
                "会话 {} 终止时Worker {} 不再由其认领",
                session.guid, session.worker_guid
            );
            session.worker_ref = fetch_worker(conn, &session.worker_guid).await?;
        } else {
            session.worker_ref = released;
        }
        Ok(())
    }

    /// 单个打开会话的终止迁移，`assignments` 为额外的SET子句
    async fn terminate(
        &self,
        guid: &str,
        assignments: &str,
        reason: Option<&str>,
    ) -> RenderFarmResult<Option<Session>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE sessions SET closed = 1, closed_at = ?{assignments}
            WHERE guid = ? AND closed = 0
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let mut query = sqlx::query(&sql).bind(Utc::now());
        if let Some(reason) = reason {
            query = query.bind(reason);
        }
        let row = query
            .bind(guid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut session = MappingHelpers::row_to_session(&row)?;
        Self::release_into(&mut tx, &mut session).await?;
        tx.commit().await?;

        Ok(Some(session))
    }
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_with_claim(
        &self,
        session: &Session,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Option<Session>> {
        let mut tx = self.pool.begin().await?;

        let claimed = claim_worker(
            &mut tx,
            &session.worker_guid,
            &session.guid,
            workgroup,
            seen_since,
        )
        .await?;

        let Some(worker) = claimed else {
            tx.rollback().await?;
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (guid, api_key, worker_guid, workspace_guid, scene_filename, first_seen, last_seen, closed, closed_at, expired, failed, fail_reason)
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, NULL, 0, 0, NULL)
            "#,
        )
        .bind(&session.guid)
        .bind(&session.api_key)
        .bind(&session.worker_guid)
        .bind(&session.workspace_guid)
        .bind(&session.scene_filename)
        .bind(session.first_seen)
        .bind(session.last_seen)
        .execute(&mut *tx)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

        tx.commit().await?;
        debug!("创建会话 {} -> Worker {}", session.guid, worker.guid);

        let mut created = session.clone();
        created.worker_ref = Some(worker);
        Ok(Some(created))
    }

    async fn get(
        &self,
        guid: &str,
        allow_closed: bool,
        touch: bool,
    ) -> RenderFarmResult<Option<Session>> {
        let mut conn = self.pool.acquire().await?;

        if touch {
            sqlx::query(
                "UPDATE sessions SET last_seen = MAX(last_seen, ?) WHERE guid = ? AND closed = 0",
            )
            .bind(Utc::now())
            .bind(guid)
            .execute(&mut *conn)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;
        }

        let sql = format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE guid = ?");
        let row = sqlx::query(&sql)
            .bind(guid)
            .fetch_optional(&mut *conn)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut session = MappingHelpers::row_to_session(&row)?;
        if session.closed && !allow_closed {
            return Ok(None);
        }

        session.worker_ref = fetch_worker(&mut conn, &session.worker_guid).await?;
        session.workspace_ref = fetch_workspace(&mut conn, &session.workspace_guid).await?;

        Ok(Some(session))
    }

    async fn close(&self, guid: &str) -> RenderFarmResult<Option<Session>> {
        self.terminate(guid, "", None).await
    }

    async fn fail(&self, guid: &str, reason: &str) -> RenderFarmResult<Option<Session>> {
        self.terminate(guid, ", failed = 1, fail_reason = ?", Some(reason))
            .await
    }

    async fn expire(&self, seen_before: DateTime<Utc>) -> RenderFarmResult<Vec<Session>> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            UPDATE sessions SET closed = 1, closed_at = ?, expired = 1
            WHERE closed = 0 AND last_seen <= ?
            RETURNING {SESSION_COLUMNS}
            "#
        );
        let rows = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(seen_before)
            .fetch_all(&mut *tx)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        let mut expired = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut session = MappingHelpers::row_to_session(row)?;
            Self::release_into(&mut tx, &mut session).await?;
            expired.push(session);
        }

        tx.commit().await?;
        Ok(expired)
    }

    async fn list_open(&self) -> RenderFarmResult<Vec<Session>> {
        let sql = format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE closed = 0 ORDER BY first_seen ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        rows.iter().map(MappingHelpers::row_to_session).collect()
    }
}
