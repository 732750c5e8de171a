//! Worker注册表
//!
//! 监听UDP心跳，维护存活Worker与Spawner的内存视图，并把Worker心跳写入存储。
//! 内存视图只是缓存，认领状态以存储为准。
//!
//! ```text
//! Unknown ──首次心跳──▶ Live ──心跳──▶ Live
//!                        │
//!                        └──超出存活窗口──▶ Offline（同一键的后续心跳生成新记录）
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use renderfarm_core::config::FleetConfig;
use renderfarm_core::models::{
    Heartbeat, HeartbeatSender, Spawner, SpawnerKey, Worker, WorkerKey,
};
use renderfarm_core::traits::WorkerStore;
use renderfarm_core::{
    EventBus, EventHandler, RenderFarmError, RenderFarmResult, WorkerEvent,
};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::chrono_duration;

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Worker注册表配置
#[derive(Debug, Clone)]
pub struct WorkerRegistryConfig {
    pub workgroup: String,
    pub bind_address: String,
    pub port: u16,
    /// 超过该时长没有心跳即离线
    pub liveness_window: Duration,
    pub sweep_interval: Duration,
    pub listener_retry_count: u32,
    pub listener_retry_delay: Duration,
    pub delete_dead_workers: bool,
    pub dead_worker_threshold: Duration,
}

impl Default for WorkerRegistryConfig {
    fn default() -> Self {
        Self::from(&FleetConfig::default())
    }
}

impl From<&FleetConfig> for WorkerRegistryConfig {
    fn from(config: &FleetConfig) -> Self {
        Self {
            workgroup: config.workgroup.clone(),
            bind_address: config.heartbeat_bind_address.clone(),
            port: config.heartbeat_port,
            liveness_window: config.worker_timeout(),
            sweep_interval: config.sweep_interval(),
            listener_retry_count: config.listener_retry_count,
            listener_retry_delay: config.listener_retry_delay(),
            delete_dead_workers: config.delete_dead_workers,
            dead_worker_threshold: config.dead_worker_threshold(),
        }
    }
}

pub struct WorkerRegistry {
    config: WorkerRegistryConfig,
    store: Arc<dyn WorkerStore>,
    workers: RwLock<HashMap<WorkerKey, Worker>>,
    spawners: RwLock<HashMap<SpawnerKey, Spawner>>,
    events: EventBus<WorkerEvent>,
}

impl WorkerRegistry {
    pub fn new(config: WorkerRegistryConfig, store: Arc<dyn WorkerStore>) -> Self {
        Self {
            config,
            store,
            workers: RwLock::new(HashMap::new()),
            spawners: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    pub fn config(&self) -> &WorkerRegistryConfig {
        &self.config
    }

    pub async fn subscribe(&self, handler: Arc<dyn EventHandler<WorkerEvent>>) {
        self.events.subscribe(handler).await;
    }

    pub fn event_stream(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.stream()
    }

    /// 绑定心跳端口，失败时按配置重试
    pub async fn bind(&self) -> RenderFarmResult<UdpSocket> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let mut attempt = 0;

        loop {
            match UdpSocket::bind(&addr).await {
                Ok(socket) => {
                    let local = socket
                        .local_addr()
                        .map_err(|e| RenderFarmError::Network(e.to_string()))?;
                    info!("Worker心跳监听于 {}", local);
                    return Ok(socket);
                }
                Err(e) if attempt < self.config.listener_retry_count => {
                    attempt += 1;
                    warn!(
                        "绑定心跳端口 {} 失败 ({}/{}): {}",
                        addr, attempt, self.config.listener_retry_count, e
                    );
                    tokio::time::sleep(self.config.listener_retry_delay).await;
                }
                Err(e) => {
                    error!("绑定心跳端口 {} 失败，放弃重试: {}", addr, e);
                    return Err(RenderFarmError::Network(format!(
                        "绑定心跳端口 {addr} 失败: {e}"
                    )));
                }
            }
        }
    }

    /// 绑定端口并处理心跳，直到收到关闭信号
    pub async fn listen(
        self: Arc<Self>,
        shutdown: broadcast::Receiver<()>,
    ) -> RenderFarmResult<()> {
        let socket = self.bind().await?;
        self.serve(socket, shutdown).await
    }

    /// 在已绑定的套接字上接收心跳并周期性扫描离线Worker
    pub async fn serve(
        self: Arc<Self>,
        socket: UdpSocket,
        mut shutdown: broadcast::Receiver<()>,
    ) -> RenderFarmResult<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let mut sweep = tokio::time::interval(self.config.sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = socket.recv_from(&mut buf) => {
                    match received {
                        Ok((len, source)) => self.handle_datagram(&buf[..len], source).await,
                        Err(e) => warn!("接收心跳失败: {}", e),
                    }
                }
                _ = sweep.tick() => {
                    self.sweep_offline().await;
                    if self.config.delete_dead_workers {
                        self.cleanup_dead_workers().await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("收到关闭信号，停止Worker心跳监听");
                    break;
                }
            }
        }

        Ok(())
    }

    /// 解析并分发一个心跳数据报；格式错误的数据报记录后丢弃
    pub async fn handle_datagram(&self, payload: &[u8], source: SocketAddr) {
        let heartbeat = match Heartbeat::parse(payload) {
            Ok(heartbeat) => heartbeat,
            Err(e) => {
                warn!("丢弃来自 {} 的无效心跳: {}", source, e);
                return;
            }
        };

        let ip = source.ip().to_string();
        match heartbeat.sender {
            HeartbeatSender::RemoteWorker => self.handle_worker_heartbeat(&heartbeat, &ip).await,
            HeartbeatSender::FleetManager if heartbeat.vray_spawner => {
                self.handle_spawner_heartbeat(&heartbeat, &ip).await
            }
            HeartbeatSender::FleetManager => {
                debug!("忽略未启用spawner的机群管理端心跳: {}", ip);
            }
        }
    }

    async fn handle_worker_heartbeat(&self, heartbeat: &Heartbeat, ip: &str) {
        let key: WorkerKey = (heartbeat.mac.clone(), heartbeat.port);

        let (worker, added, live_count) = {
            let mut workers = self.workers.write().await;
            let (worker, added) = match workers.get_mut(&key) {
                Some(existing) => {
                    existing.apply_heartbeat(heartbeat);
                    existing.ip = ip.to_string();
                    (existing.clone(), false)
                }
                None => {
                    let worker = Worker::from_heartbeat(heartbeat, ip, &self.config.workgroup);
                    info!(
                        "新Worker上线: {} ({}:{}, mac {})",
                        worker.guid, ip, heartbeat.port, heartbeat.mac
                    );
                    workers.insert(key, worker.clone());
                    (worker, true)
                }
            };
            (worker, added, workers.len())
        };

        metrics::gauge!("renderfarm_workers_live").set(live_count as f64);

        if let Err(e) = self.store.upsert_heartbeat(&worker).await {
            error!("持久化Worker {} 心跳失败: {}", worker.guid, e);
        }

        let event = if added {
            WorkerEvent::Added(worker)
        } else {
            WorkerEvent::Updated(worker)
        };
        self.events.emit(event).await;
    }

    async fn handle_spawner_heartbeat(&self, heartbeat: &Heartbeat, ip: &str) {
        let key: SpawnerKey = (ip.to_string(), heartbeat.mac.clone());

        let event = {
            let mut spawners = self.spawners.write().await;
            match spawners.get_mut(&key) {
                Some(existing) => {
                    existing.touch(heartbeat);
                    WorkerEvent::SpawnerUpdated(existing.clone())
                }
                None => {
                    let spawner = Spawner::from_heartbeat(heartbeat, ip, &self.config.workgroup);
                    info!("新Spawner上线: {} (mac {})", ip, heartbeat.mac);
                    spawners.insert(key, spawner.clone());
                    WorkerEvent::SpawnerAdded(spawner)
                }
            }
        };

        self.events.emit(event).await;
    }

    /// 移出超出存活窗口的Worker，返回被移出的记录
    pub async fn sweep_offline(&self) -> Vec<Worker> {
        let now = Utc::now();
        let window = chrono_duration(self.config.liveness_window);

        let (offline, live_count) = {
            let mut workers = self.workers.write().await;
            let stale: Vec<WorkerKey> = workers
                .iter()
                .filter(|(_, worker)| !worker.is_live(now, window))
                .map(|(key, _)| key.clone())
                .collect();

            let offline: Vec<Worker> = stale
                .iter()
                .filter_map(|key| workers.remove(key))
                .collect();
            (offline, workers.len())
        };

        if offline.is_empty() {
            return offline;
        }

        metrics::gauge!("renderfarm_workers_live").set(live_count as f64);
        for worker in &offline {
            info!(
                "Worker离线: {} ({}), 上次心跳 {}",
                worker.guid,
                worker.endpoint(),
                worker.last_seen.format("%Y-%m-%d %H:%M:%S UTC")
            );
            self.events.emit(WorkerEvent::Offline(worker.clone())).await;
        }

        offline
    }

    /// 删除长时间没有心跳且未被认领的存储记录
    pub async fn cleanup_dead_workers(&self) -> u64 {
        let seen_before = Utc::now() - chrono_duration(self.config.dead_worker_threshold);
        match self.store.delete_dead_workers(seen_before).await {
            Ok(count) => {
                if count > 0 {
                    info!("清理了 {} 个失效Worker记录", count);
                }
                count
            }
            Err(e) => {
                error!("清理失效Worker记录时出错: {}", e);
                0
            }
        }
    }

    /// 内存中的存活Worker，按cpu升序
    pub async fn live_workers(&self) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self.workers.read().await.values().cloned().collect();
        workers.sort_by(|a, b| {
            a.cpu_usage
                .partial_cmp(&b.cpu_usage)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.guid.cmp(&b.guid))
        });
        workers
    }

    pub async fn spawners(&self) -> Vec<Spawner> {
        self.spawners.read().await.values().cloned().collect()
    }

    /// 存活窗口内的全部Worker（含已认领），以存储为准
    pub async fn recent_workers(&self) -> RenderFarmResult<Vec<Worker>> {
        let seen_since = Utc::now() - chrono_duration(self.config.liveness_window);
        self.store
            .get_recent_workers(&self.config.workgroup, seen_since)
            .await
    }

    /// 可认领的Worker，以存储为准
    pub async fn available_workers(&self) -> RenderFarmResult<Vec<Worker>> {
        let seen_since = Utc::now() - chrono_duration(self.config.liveness_window);
        self.store
            .get_available_workers(&self.config.workgroup, seen_since)
            .await
    }
}
