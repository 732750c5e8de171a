use async_trait::async_trait;
use chrono::Utc;
use renderfarm_core::models::Workspace;
use renderfarm_core::traits::WorkspaceStore;
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::database::mapping::{MappingHelpers, WORKSPACE_COLUMNS};

pub struct SqliteWorkspaceStore {
    pool: SqlitePool,
}

impl SqliteWorkspaceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

pub(crate) async fn fetch_workspace(
    conn: &mut SqliteConnection,
    guid: &str,
) -> RenderFarmResult<Option<Workspace>> {
    let sql = format!("SELECT {WORKSPACE_COLUMNS} FROM workspaces WHERE guid = ?");
    let row = sqlx::query(&sql)
        .bind(guid)
        .fetch_optional(&mut *conn)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

    row.as_ref().map(MappingHelpers::row_to_workspace).transpose()
}

#[async_trait]
impl WorkspaceStore for SqliteWorkspaceStore {
    async fn get(&self, guid: &str, workgroup: &str) -> RenderFarmResult<Option<Workspace>> {
        let sql = format!(
            r#"
            UPDATE workspaces SET last_seen = ?
            WHERE guid = ? AND workgroup = ?
            RETURNING {WORKSPACE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(Utc::now())
            .bind(guid)
            .bind(workgroup)
            .fetch_optional(&self.pool)
            .await
            .map_err(RenderFarmError::StoreUnavailable)?;

        row.as_ref().map(MappingHelpers::row_to_workspace).transpose()
    }

    async fn insert(&self, workspace: &Workspace) -> RenderFarmResult<()> {
        sqlx::query(
            r#"
            INSERT INTO workspaces (guid, api_key, workgroup, home_dir, name, last_seen)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&workspace.guid)
        .bind(&workspace.api_key)
        .bind(&workspace.workgroup)
        .bind(&workspace.home_dir)
        .bind(&workspace.name)
        .bind(workspace.last_seen)
        .execute(&self.pool)
        .await
        .map_err(RenderFarmError::StoreUnavailable)?;

        debug!("创建工作空间: {}", workspace.guid);
        Ok(())
    }
}
