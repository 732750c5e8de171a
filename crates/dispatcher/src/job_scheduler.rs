//! 渲染作业调度
//!
//! 每个作业在会话所认领的Worker上执行一次渲染：
//!
//! ```text
//! pending → connected → rendering → completed
//!    └──────────┴───────────┴──→ failed | canceled
//! ```
//!
//! 执行流程的每个阶段都返回 `RenderFarmResult`，由监督任务统一持久化终止状态。
//! 所有状态迁移都以作业仍活跃为条件，取消之后远端迟到的完成不会覆盖 `canceled`。
//!
//! 调用方传入的 `Session` 只是快照：创建作业与取连接前后都以存储中的会话状态为准，
//! 会话已终止时作业以 `SessionNotFound` 失败，连接池中不留下条目。

use std::collections::HashMap;
use std::sync::Arc;

use renderfarm_core::config::RenderConfig;
use renderfarm_core::models::{Job, JobState, RenderParams, Session};
use renderfarm_core::traits::{JobStore, SessionStore};
use renderfarm_core::{
    EventBus, EventHandler, JobEvent, RenderFarmError, RenderFarmResult,
};
use renderfarm_infrastructure::remote::RemoteCommands;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::pools::ConnectionPool;

pub struct JobScheduler {
    config: RenderConfig,
    jobs: Arc<dyn JobStore>,
    sessions: Arc<dyn SessionStore>,
    connections: Arc<ConnectionPool>,
    active: RwLock<HashMap<String, Job>>,
    events: EventBus<JobEvent>,
}

impl JobScheduler {
    pub fn new(
        config: RenderConfig,
        jobs: Arc<dyn JobStore>,
        sessions: Arc<dyn SessionStore>,
        connections: Arc<ConnectionPool>,
    ) -> Self {
        Self {
            config,
            jobs,
            sessions,
            connections,
            active: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    pub fn events(&self) -> &EventBus<JobEvent> {
        &self.events
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler<JobEvent>>) {
        self.events.subscribe(handler).await;
    }

    pub fn event_stream(&self) -> broadcast::Receiver<JobEvent> {
        self.events.stream()
    }

    pub fn default_params(&self) -> RenderParams {
        RenderParams {
            camera_name: self.config.default_camera.clone(),
            width: self.config.default_width,
            height: self.config.default_height,
        }
    }

    /// 为会话的Worker创建pending作业
    ///
    /// 会话在存储中已终止时返回 `SessionNotFound`，Worker已有活跃作业时返回 `WorkerBusy`，
    /// 两种情况都不写入记录。
    pub async fn create_job(
        &self,
        session: &Session,
        api_key: &str,
        params: Option<RenderParams>,
    ) -> RenderFarmResult<Job> {
        if !session.is_open() {
            return Err(RenderFarmError::session_not_found(&session.guid));
        }

        let params = params.unwrap_or_else(|| self.default_params());
        let job = Job::new(api_key, session, &params);

        match self.jobs.create_if_worker_idle(&job).await? {
            Some(job) => {
                info!("作业 {} 已创建 (会话 {}, Worker {})", job.guid, job.session_guid, job.worker_guid);
                Ok(job)
            }
            None => {
                warn!("Worker {} 已有活跃作业，拒绝新作业", session.worker_guid);
                Err(RenderFarmError::WorkerBusy {
                    worker_guid: session.worker_guid.clone(),
                })
            }
        }
    }

    /// 登记活跃作业并启动受监督的执行任务
    pub async fn start(self: &Arc<Self>, session: Session, job: Job) -> JoinHandle<()> {
        self.active
            .write()
            .await
            .insert(job.guid.clone(), job.clone());
        self.events.emit(JobEvent::Added(job.clone())).await;

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            scheduler.supervise(session, job).await;
        })
    }

    async fn supervise(&self, session: Session, job: Job) {
        let guid = job.guid.clone();
        let outcome = self.execute(&session, &job).await;
        self.active.write().await.remove(&guid);

        match outcome {
            Ok(Some(completed)) => {
                info!("作业 {} 渲染完成: {:?}", guid, completed.urls);
                metrics::counter!("renderfarm_jobs_total", "state" => "completed").increment(1);
                self.events.emit(JobEvent::Completed(completed)).await;
            }
            Ok(None) => {
                debug!("作业 {} 已不再活跃，丢弃执行结果", guid);
            }
            Err(e) => {
                self.persist_failure(&guid, &e).await;
            }
        }
    }

    /// 执行流程；作业在途中被取消时返回 `Ok(None)`
    async fn execute(&self, session: &Session, job: &Job) -> RenderFarmResult<Option<Job>> {
        let session = self.current_session(&session.guid).await?;
        let client = self.connections.get(&session).await?;

        // 取连接期间会话可能已终止，终止事件早于条目写入时由这里清理
        if let Err(e) = self.current_session(&session.guid).await {
            self.connections.evict(&session).await;
            return Err(e);
        }

        let Some(job) = self.transition(&job.guid, JobState::Connected).await? else {
            return Ok(None);
        };
        let Some(job) = self.transition(&job.guid, JobState::Rendering).await? else {
            return Ok(None);
        };

        let params = RenderParams {
            camera_name: job.camera_name.clone(),
            width: job.render_width,
            height: job.render_height,
        };
        let filename = job.output_filename();
        let output_path = format!("{}\\{}", self.config.output_dir.trim_end_matches('\\'), filename);

        client
            .execute(&RemoteCommands::render_scene(&params, &output_path))
            .await?;

        let url = self.config.output_url(&filename);
        Ok(self.jobs.complete(&job.guid, &[url]).await?)
    }

    /// 从存储读取仍打开的会话
    async fn current_session(&self, guid: &str) -> RenderFarmResult<Session> {
        self.sessions
            .get(guid, false, false)
            .await?
            .ok_or_else(|| RenderFarmError::session_not_found(guid))
    }

    async fn transition(&self, guid: &str, state: JobState) -> RenderFarmResult<Option<Job>> {
        let Some(job) = self.jobs.update_state(guid, state).await? else {
            return Ok(None);
        };

        if let Some(entry) = self.active.write().await.get_mut(guid) {
            *entry = job.clone();
        }
        debug!("作业 {} 进入 {}", guid, state);
        self.events.emit(JobEvent::Updated(job.clone())).await;
        Ok(Some(job))
    }

    async fn persist_failure(&self, guid: &str, cause: &RenderFarmError) {
        error!("作业 {} 执行失败: {}", guid, cause);

        match self.jobs.fail(guid, &cause.to_string()).await {
            Ok(Some(job)) => {
                metrics::counter!("renderfarm_jobs_total", "state" => "failed").increment(1);
                self.events.emit(JobEvent::Failed(job)).await;
            }
            Ok(None) => {
                debug!("作业 {} 已终止，不再记录失败", guid);
            }
            Err(e) => {
                error!("持久化作业 {} 的失败状态失败: {}", guid, e);
            }
        }
    }

    /// 取消作业
    ///
    /// 只更新记录并移出活跃集合，远端Worker上的渲染不会被中止。
    pub async fn cancel(&self, guid: &str) -> RenderFarmResult<Job> {
        self.active.write().await.remove(guid);

        let job = self
            .jobs
            .cancel(guid)
            .await?
            .ok_or_else(|| RenderFarmError::JobNotFound {
                guid: guid.to_string(),
            })?;

        info!("作业 {} 已取消，Worker {} 上的渲染可能仍在继续", guid, job.worker_guid);
        metrics::counter!("renderfarm_jobs_total", "state" => "canceled").increment(1);
        self.events.emit(JobEvent::Canceled(job.clone())).await;
        Ok(job)
    }

    pub async fn active_jobs(&self) -> Vec<Job> {
        self.active.read().await.values().cloned().collect()
    }

    pub async fn get_job(&self, guid: &str) -> RenderFarmResult<Job> {
        self.jobs
            .get(guid)
            .await?
            .ok_or_else(|| RenderFarmError::JobNotFound {
                guid: guid.to_string(),
            })
    }
}
