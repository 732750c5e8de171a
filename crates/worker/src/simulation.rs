use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use renderfarm_core::config::SimulationConfig;
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use tokio::net::lookup_host;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::heartbeat_emitter::HeartbeatEmitter;
use crate::load::{LoadSampler, RandomLoad};

/// 第一个模拟节点的命令端口，后续节点依次递增
pub const SIMULATED_BASE_PORT: u16 = 34092;

/// 一组模拟节点
pub struct SimulatedFleet {
    config: SimulationConfig,
    heartbeat_port: u16,
    sampler: Arc<dyn LoadSampler>,
    shutdown_tx: Arc<RwLock<Option<broadcast::Sender<()>>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SimulatedFleet {
    pub fn new(config: SimulationConfig, heartbeat_port: u16) -> Self {
        Self::with_sampler(config, heartbeat_port, Arc::new(RandomLoad::default()))
    }

    pub fn with_sampler(
        config: SimulationConfig,
        heartbeat_port: u16,
        sampler: Arc<dyn LoadSampler>,
    ) -> Self {
        Self {
            config,
            heartbeat_port,
            sampler,
            shutdown_tx: Arc::new(RwLock::new(None)),
            handles: Mutex::new(Vec::new()),
        }
    }

    async fn target(&self) -> RenderFarmResult<SocketAddr> {
        let host = format!("{}:{}", self.config.target_host, self.heartbeat_port);
        let addr = lookup_host(&host)
            .await
            .map_err(|e| RenderFarmError::Network(format!("解析 {host} 失败: {e}")))?
            .next()
            .ok_or_else(|| RenderFarmError::Network(format!("{host} 没有可用地址")));
        addr
    }

    pub async fn emitters(&self) -> RenderFarmResult<Vec<HeartbeatEmitter>> {
        let target = self.target().await?;
        let interval = Duration::from_millis(self.config.heartbeat_interval_ms);

        (0..self.config.worker_count)
            .map(|i| -> RenderFarmResult<HeartbeatEmitter> {
                let offset = u16::try_from(i).map_err(|_| {
                    RenderFarmError::Configuration(format!(
                        "模拟节点数量过多: {}",
                        self.config.worker_count
                    ))
                })?;
                let port = SIMULATED_BASE_PORT.checked_add(offset).ok_or_else(|| {
                    RenderFarmError::Configuration("模拟节点端口超出范围".to_string())
                })?;
                Ok(HeartbeatEmitter::new(
                    &self.config.mac,
                    port,
                    target,
                    interval,
                    Arc::clone(&self.sampler),
                ))
            })
            .collect()
    }

    pub async fn is_running(&self) -> bool {
        self.shutdown_tx.read().await.is_some()
    }

    pub async fn start(&self) -> RenderFarmResult<()> {
        let mut shutdown_tx = self.shutdown_tx.write().await;
        if shutdown_tx.is_some() {
            return Err(RenderFarmError::Internal("模拟节点已在运行".to_string()));
        }

        let emitters = self.emitters().await?;
        let (tx, _) = broadcast::channel(1);
        let mut handles = self.handles.lock().await;

        for emitter in emitters {
            let shutdown_rx = tx.subscribe();
            handles.push(tokio::spawn(async move {
                if let Err(e) = emitter.run(shutdown_rx).await {
                    error!("模拟节点 {} 异常退出: {}", emitter.port(), e);
                }
            }));
        }

        info!(
            "启动了 {} 个模拟节点，心跳目标 {}:{}",
            handles.len(),
            self.config.target_host,
            self.heartbeat_port
        );
        *shutdown_tx = Some(tx);
        Ok(())
    }

    pub async fn stop(&self) {
        let Some(tx) = self.shutdown_tx.write().await.take() else {
            return;
        };
        // 没有接收者时send返回错误，忽略
        let _ = tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("等待模拟节点退出失败: {}", e);
            }
        }
        info!("所有模拟节点已停止");
    }
}
