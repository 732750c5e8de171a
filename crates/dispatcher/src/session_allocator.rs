//! 会话分配
//!
//! 为调用方的工作空间认领一个空闲且存活的Worker，并管理会话从打开到
//! 关闭、过期或失败的迁移。认领与会话写入在存储的同一事务中完成，
//! 并发创建时同一Worker最多被一个会话拿到；竞争失败时继续尝试下一个候选。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use renderfarm_core::config::AppConfig;
use renderfarm_core::models::Session;
use renderfarm_core::traits::{SessionStore, WorkerStore, WorkspaceStore};
use renderfarm_core::{
    EventBus, EventHandler, RenderFarmError, RenderFarmResult, SessionEvent,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chrono_duration;

#[derive(Debug, Clone)]
pub struct SessionAllocatorConfig {
    pub workgroup: String,
    /// 只有在该窗口内有心跳的Worker才可被认领
    pub liveness_window: Duration,
}

impl Default for SessionAllocatorConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionAllocatorConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            workgroup: config.fleet.workgroup.clone(),
            liveness_window: config.fleet.worker_timeout(),
        }
    }
}

pub struct SessionAllocator {
    config: SessionAllocatorConfig,
    workers: Arc<dyn WorkerStore>,
    sessions: Arc<dyn SessionStore>,
    workspaces: Arc<dyn WorkspaceStore>,
    events: EventBus<SessionEvent>,
}

impl SessionAllocator {
    pub fn new(
        config: SessionAllocatorConfig,
        workers: Arc<dyn WorkerStore>,
        sessions: Arc<dyn SessionStore>,
        workspaces: Arc<dyn WorkspaceStore>,
    ) -> Self {
        Self {
            config,
            workers,
            sessions,
            workspaces,
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<SessionEvent> {
        &self.events
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler<SessionEvent>>) {
        self.events.subscribe(handler).await;
    }

    pub fn event_stream(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.stream()
    }

    /// 创建会话并认领负载最低的可用Worker
    pub async fn create_session(
        &self,
        api_key: &str,
        workspace_guid: &str,
        scene_filename: Option<String>,
    ) -> RenderFarmResult<Session> {
        let workspace = self
            .workspaces
            .get(workspace_guid, &self.config.workgroup)
            .await?
            .ok_or_else(|| RenderFarmError::WorkspaceNotFound {
                guid: workspace_guid.to_string(),
            })?;

        if !workspace.is_owned_by(api_key) {
            return Err(RenderFarmError::WorkspaceMismatch {
                workspace_guid: workspace_guid.to_string(),
            });
        }

        let window = chrono_duration(self.config.liveness_window);
        let candidates = self
            .workers
            .get_available_workers(&self.config.workgroup, Utc::now() - window)
            .await?;

        let session_guid = Uuid::new_v4().to_string();
        for candidate in &candidates {
            let session = Session::open(
                session_guid.clone(),
                api_key,
                &candidate.guid,
                workspace_guid,
                scene_filename.clone(),
            );

            let created = self
                .sessions
                .create_with_claim(&session, &self.config.workgroup, Utc::now() - window)
                .await?;

            match created {
                Some(mut created) => {
                    created.workspace_ref = Some(workspace);
                    info!(
                        "会话 {} 已创建，认领Worker {} (cpu {:.2})",
                        created.guid, candidate.guid, candidate.cpu_usage
                    );
                    metrics::counter!("renderfarm_sessions_created_total").increment(1);
                    self.events.emit(SessionEvent::Created(created.clone())).await;
                    return Ok(created);
                }
                None => {
                    debug!("Worker {} 已被其他会话认领，尝试下一个", candidate.guid);
                }
            }
        }

        warn!(
            "工作组 {} 没有可用Worker ({} 个候选均已被认领)",
            self.config.workgroup,
            candidates.len()
        );
        Err(RenderFarmError::AllWorkersBusy)
    }

    /// 读取会话；`touch` 刷新打开会话的心跳时间
    pub async fn get_session(
        &self,
        guid: &str,
        allow_closed: bool,
        touch: bool,
    ) -> RenderFarmResult<Session> {
        let session = self
            .sessions
            .get(guid, allow_closed, touch)
            .await?
            .ok_or_else(|| RenderFarmError::session_not_found(guid))?;

        if touch && session.is_open() {
            self.events.emit(SessionEvent::Updated(session.clone())).await;
        }
        Ok(session)
    }

    pub async fn keep_session_alive(&self, guid: &str) -> RenderFarmResult<Session> {
        self.get_session(guid, false, true).await
    }

    pub async fn close_session(&self, guid: &str) -> RenderFarmResult<Session> {
        let session = self
            .sessions
            .close(guid)
            .await?
            .ok_or_else(|| RenderFarmError::session_not_found(guid))?;

        info!("会话 {} 已关闭，释放Worker {}", guid, session.worker_guid);
        metrics::counter!("renderfarm_sessions_terminated_total", "reason" => "closed")
            .increment(1);
        self.events.emit(SessionEvent::Closed(session.clone())).await;
        Ok(session)
    }

    pub async fn fail_session(&self, guid: &str, reason: &str) -> RenderFarmResult<Session> {
        let session = self
            .sessions
            .fail(guid, reason)
            .await?
            .ok_or_else(|| RenderFarmError::session_not_found(guid))?;

        warn!("会话 {} 失败: {}", guid, reason);
        metrics::counter!("renderfarm_sessions_terminated_total", "reason" => "failed")
            .increment(1);
        self.events.emit(SessionEvent::Failed(session.clone())).await;
        Ok(session)
    }

    /// 过期 `last_seen` 早于 `timeout_minutes` 的所有打开会话；0 表示全部过期
    pub async fn expire_sessions(&self, timeout_minutes: u64) -> RenderFarmResult<Vec<Session>> {
        let timeout = Duration::from_secs(timeout_minutes.saturating_mul(60));
        let seen_before = Utc::now() - chrono_duration(timeout);
        let expired = self.sessions.expire(seen_before).await?;

        if !expired.is_empty() {
            metrics::counter!("renderfarm_sessions_terminated_total", "reason" => "expired")
                .increment(expired.len() as u64);
        }
        for session in &expired {
            info!("会话 {} 已过期，释放Worker {}", session.guid, session.worker_guid);
            self.events.emit(SessionEvent::Expired(session.clone())).await;
        }
        Ok(expired)
    }
}
