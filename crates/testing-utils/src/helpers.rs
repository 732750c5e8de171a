//! 测试环境辅助

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use renderfarm_core::models::{Worker, Workspace};
use renderfarm_core::traits::{JobStore, SessionStore, WorkerStore, WorkspaceStore};
use renderfarm_infrastructure::DatabaseManager;
use tokio::time::sleep;

use crate::builders::{WorkerBuilder, WorkspaceBuilder};

pub struct TestEnv;

impl TestEnv {
    /// 轮询直到条件成立或超时
    pub async fn wait_for<F, Fut>(mut condition: F, timeout: Duration) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let start = std::time::Instant::now();

        while start.elapsed() < timeout {
            if condition().await {
                return true;
            }
            sleep(Duration::from_millis(20)).await;
        }

        false
    }
}

/// 内存数据库及其上的各存储
pub struct TestDatabase {
    pub manager: DatabaseManager,
    pub workers: Arc<dyn WorkerStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub jobs: Arc<dyn JobStore>,
    pub workspaces: Arc<dyn WorkspaceStore>,
}

impl TestDatabase {
    pub async fn new() -> Result<Self> {
        let manager = DatabaseManager::in_memory().await?;
        Ok(Self {
            workers: manager.worker_store(),
            sessions: manager.session_store(),
            jobs: manager.job_store(),
            workspaces: manager.workspace_store(),
            manager,
        })
    }

    pub async fn seed_worker(&self, worker: Worker) -> Result<Worker> {
        self.workers.upsert_heartbeat(&worker).await?;
        Ok(worker)
    }

    /// 按给定cpu负载批量写入空闲Worker，端口依次递增
    pub async fn seed_workers(&self, cpus: &[f64]) -> Result<Vec<Worker>> {
        let mut workers = Vec::with_capacity(cpus.len());
        for (i, cpu) in cpus.iter().enumerate() {
            let worker = WorkerBuilder::new()
                .with_port(40000 + i as u16)
                .with_cpu(*cpu)
                .build();
            workers.push(self.seed_worker(worker).await?);
        }
        Ok(workers)
    }

    /// 绕过存活检查直接认领，用于构造已认领的失效Worker
    pub async fn claim_worker(&self, worker: &Worker, session_guid: &str) -> Result<Worker> {
        let claimed = self
            .workers
            .try_claim(
                &worker.guid,
                session_guid,
                &worker.workgroup,
                Utc::now() - chrono::Duration::days(365),
            )
            .await?
            .ok_or_else(|| anyhow::anyhow!("Worker {} 已被认领", worker.guid))?;
        Ok(claimed)
    }

    pub async fn seed_workspace(&self) -> Result<Workspace> {
        let workspace = WorkspaceBuilder::new().build();
        self.workspaces.insert(&workspace).await?;
        Ok(workspace)
    }
}
