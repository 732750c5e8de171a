use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use renderfarm_core::models::Heartbeat;
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::load::LoadSampler;

/// 周期性发送心跳的单个模拟节点
pub struct HeartbeatEmitter {
    mac: String,
    port: u16,
    target: SocketAddr,
    interval: Duration,
    sampler: Arc<dyn LoadSampler>,
}

impl HeartbeatEmitter {
    pub fn new(
        mac: &str,
        port: u16,
        target: SocketAddr,
        interval: Duration,
        sampler: Arc<dyn LoadSampler>,
    ) -> Self {
        Self {
            mac: mac.to_string(),
            port,
            target,
            interval,
            sampler,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 用当前负载采样构造心跳
    pub fn heartbeat(&self) -> Heartbeat {
        let load = self.sampler.sample();
        Heartbeat::worker(
            &self.mac,
            self.port,
            load.cpu_usage,
            load.ram_usage,
            load.total_ram,
        )
    }

    pub async fn send_once(&self, socket: &UdpSocket) -> RenderFarmResult<usize> {
        let payload = self.heartbeat().to_bytes()?;
        socket
            .send_to(&payload, self.target)
            .await
            .map_err(|e| RenderFarmError::Network(format!("发送心跳到 {} 失败: {e}", self.target)))
    }

    /// 按间隔发送心跳直到收到关闭信号；单次发送失败只记录
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> RenderFarmResult<()> {
        let socket = UdpSocket::bind("0.0.0.0:0")
            .await
            .map_err(|e| RenderFarmError::Network(e.to_string()))?;
        let mut ticker = interval(self.interval);

        info!("模拟节点 {}:{} 开始发送心跳到 {}", self.mac, self.port, self.target);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.send_once(&socket).await {
                        Ok(len) => debug!("模拟节点 {} 发送心跳 {} 字节", self.port, len),
                        Err(e) => warn!("{}", e),
                    }
                }
                _ = shutdown.recv() => {
                    info!("模拟节点 {}:{} 停止", self.mac, self.port);
                    break;
                }
            }
        }

        Ok(())
    }
}
