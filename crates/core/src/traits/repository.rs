//! 持久化层接口定义
//!
//! 存储是Worker认领状态的唯一仲裁者。内存中的注册表与资源池只是派生缓存，
//! 任何组件都不能绕过这里的原子条件更新去修改 `Worker::session_guid`。
//!
//! ## 原子性约定
//!
//! - 条件更新：只有在谓词于应用时刻仍成立时才更新文档，返回新值，否则返回 `None`
//! - 批量条件更新：会话过期在一次操作中完成
//! - 会话状态迁移与Worker释放作为一个逻辑单元提交
//!
//! 返回 `Ok(None)` 表示条件不成立（竞争失败或记录已终止），
//! 返回 `Err` 表示存储本身不可用。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Job, Session, Worker, Workspace};
use crate::RenderFarmResult;

/// Worker仓储接口
#[async_trait]
pub trait WorkerStore: Send + Sync {
    /// 按guid写入心跳数据；新记录插入，已有记录只刷新心跳字段，从不修改 `session_guid`
    async fn upsert_heartbeat(&self, worker: &Worker) -> RenderFarmResult<()>;

    async fn get_by_guid(&self, guid: &str) -> RenderFarmResult<Option<Worker>>;

    /// 工作组内最近有心跳的Worker（含已认领），按cpu升序
    async fn get_recent_workers(
        &self,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Vec<Worker>>;

    /// 可认领的Worker：工作组匹配、未认领、`last_seen >= seen_since`，
    /// 按cpu升序，cpu相同按guid升序
    async fn get_available_workers(
        &self,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Vec<Worker>>;

    /// 原子认领：仅当Worker仍未认领且仍存活时设置 `session_guid`
    async fn try_claim(
        &self,
        worker_guid: &str,
        session_guid: &str,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Option<Worker>>;

    /// 释放由指定会话持有的认领
    async fn release(&self, worker_guid: &str, session_guid: &str)
        -> RenderFarmResult<Option<Worker>>;

    /// 删除长时间离线且未被认领的Worker记录
    async fn delete_dead_workers(&self, seen_before: DateTime<Utc>) -> RenderFarmResult<u64>;
}

/// 会话仓储接口
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// 在一个事务中认领Worker并插入会话。认领竞争失败时返回 `None`，不写入任何数据
    async fn create_with_claim(
        &self,
        session: &Session,
        workgroup: &str,
        seen_since: DateTime<Utc>,
    ) -> RenderFarmResult<Option<Session>>;

    /// 读取会话并解析 `worker_ref`/`workspace_ref`；`touch` 仅对打开的会话刷新 `last_seen`
    async fn get(
        &self,
        guid: &str,
        allow_closed: bool,
        touch: bool,
    ) -> RenderFarmResult<Option<Session>>;

    /// 仅在会话仍打开时关闭它并释放Worker
    async fn close(&self, guid: &str) -> RenderFarmResult<Option<Session>>;

    /// 仅在会话仍打开时标记失败并释放Worker
    async fn fail(&self, guid: &str, reason: &str) -> RenderFarmResult<Option<Session>>;

    /// 批量过期 `last_seen <= seen_before` 的打开会话并释放其Worker
    async fn expire(&self, seen_before: DateTime<Utc>) -> RenderFarmResult<Vec<Session>>;

    async fn list_open(&self) -> RenderFarmResult<Vec<Session>>;
}

/// 作业仓储接口
#[async_trait]
pub trait JobStore: Send + Sync {
    /// 仅当会话仍打开并持有该Worker、且Worker没有活跃作业时插入。
    /// 会话已终止时返回 `SessionNotFound`，Worker忙时返回 `None`，两种情况都不创建记录
    async fn create_if_worker_idle(&self, job: &Job) -> RenderFarmResult<Option<Job>>;

    async fn get(&self, guid: &str) -> RenderFarmResult<Option<Job>>;

    async fn get_active_jobs(&self, worker_guid: &str) -> RenderFarmResult<Vec<Job>>;

    /// 将仍活跃的作业推进到 `connected` 或 `rendering`
    async fn update_state(
        &self,
        guid: &str,
        state: crate::models::JobState,
    ) -> RenderFarmResult<Option<Job>>;

    async fn complete(&self, guid: &str, urls: &[String]) -> RenderFarmResult<Option<Job>>;

    async fn fail(&self, guid: &str, error: &str) -> RenderFarmResult<Option<Job>>;

    async fn cancel(&self, guid: &str) -> RenderFarmResult<Option<Job>>;
}

/// 工作空间仓储接口
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// 读取工作组内的工作空间并刷新 `last_seen`
    async fn get(&self, guid: &str, workgroup: &str) -> RenderFarmResult<Option<Workspace>>;

    async fn insert(&self, workspace: &Workspace) -> RenderFarmResult<()>;
}
