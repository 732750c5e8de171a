pub mod mapping;
pub mod schema;
pub mod sqlite;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use renderfarm_core::config::DatabaseConfig;
use renderfarm_core::traits::{JobStore, SessionStore, WorkerStore, WorkspaceStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

pub use sqlite::{SqliteJobStore, SqliteSessionStore, SqliteWorkerStore, SqliteWorkspaceStore};

/// SQLite连接池与各存储的工厂
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(&config.url)
            .with_context(|| format!("无效的数据库URL: {}", config.url))?
            .create_if_missing(true);

        let mut pool_options = SqlitePoolOptions::new()
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds));

        if config.is_in_memory() {
            // 内存库随连接销毁，只保留一个永不回收的连接
            pool_options = pool_options
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None);
        } else {
            options = options.journal_mode(SqliteJournalMode::Wal);
            pool_options = pool_options
                .max_connections(config.max_connections)
                .min_connections(config.min_connections)
                .idle_timeout(Duration::from_secs(config.idle_timeout_seconds))
                .max_lifetime(Duration::from_secs(1800));
        }

        let pool = pool_options
            .connect_with(options)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.url))?;

        info!("数据库连接池已创建: {}", config.url);
        Ok(Self { pool })
    }

    /// 单连接内存库，测试与模拟模式使用
    pub async fn in_memory() -> Result<Self> {
        let manager = Self::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            ..Default::default()
        })
        .await?;
        manager.migrate().await?;
        Ok(manager)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(schema::SCHEMA)
            .execute(&self.pool)
            .await
            .context("应用数据库表结构失败")?;
        debug!("数据库表结构已就绪");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub fn worker_store(&self) -> Arc<dyn WorkerStore> {
        Arc::new(SqliteWorkerStore::new(self.pool.clone()))
    }

    pub fn session_store(&self) -> Arc<dyn SessionStore> {
        Arc::new(SqliteSessionStore::new(self.pool.clone()))
    }

    pub fn job_store(&self) -> Arc<dyn JobStore> {
        Arc::new(SqliteJobStore::new(self.pool.clone()))
    }

    pub fn workspace_store(&self) -> Arc<dyn WorkspaceStore> {
        Arc::new(SqliteWorkspaceStore::new(self.pool.clone()))
    }
}
