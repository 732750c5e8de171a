use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use renderfarm_core::traits::{RemoteClient, RemoteClientFactory};
use renderfarm_core::{RenderFarmError, RenderFarmResult};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// 远端响应中出现即视为失败的标记
const FAILURE_MARKERS: [&str; 2] = ["FAIL", "Exception"];

/// 基于TCP的远程脚本客户端
///
/// 每条命令写出后读取一次响应；同一连接上的命令串行执行。
pub struct TcpRemoteClient {
    stream: Mutex<Option<TcpStream>>,
    connect_timeout: Duration,
}

impl TcpRemoteClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            stream: Mutex::new(None),
            connect_timeout,
        }
    }

    pub fn check_response(response: &str) -> RenderFarmResult<()> {
        if FAILURE_MARKERS.iter().any(|marker| response.contains(marker)) {
            return Err(RenderFarmError::RemoteCommandFailed(response.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteClient for TcpRemoteClient {
    async fn connect(&self, ip: &str, port: u16) -> RenderFarmResult<()> {
        let endpoint = format!("{ip}:{port}");
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&endpoint))
            .await
            .map_err(|_| RenderFarmError::ConnectFailed {
                endpoint: endpoint.clone(),
                message: "连接超时".to_string(),
            })?
            .map_err(|e| RenderFarmError::ConnectFailed {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        stream
            .set_nodelay(true)
            .map_err(|e| RenderFarmError::Network(e.to_string()))?;

        *self.stream.lock().await = Some(stream);
        debug!("已连接远程脚本端口: {}", endpoint);
        Ok(())
    }

    async fn execute(&self, command: &str) -> RenderFarmResult<String> {
        if command.is_empty() {
            return Err(RenderFarmError::RemoteCommandFailed("空命令".to_string()));
        }

        let mut guard = self.stream.lock().await;
        let stream = guard
            .as_mut()
            .ok_or_else(|| RenderFarmError::Network("远程客户端未连接".to_string()))?;

        stream
            .write_all(command.as_bytes())
            .await
            .map_err(|e| RenderFarmError::Network(format!("发送命令失败: {e}")))?;

        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        let n = stream
            .read(&mut buf)
            .await
            .map_err(|e| RenderFarmError::Network(format!("读取响应失败: {e}")))?;

        if n == 0 {
            *guard = None;
            return Err(RenderFarmError::Network("远端关闭了连接".to_string()));
        }

        let response = String::from_utf8_lossy(&buf[..n]).to_string();
        if response != "OK" {
            debug!("远程命令返回: {}", response);
        }

        if let Err(e) = Self::check_response(&response) {
            warn!("远程命令失败: {}", command);
            return Err(e);
        }
        Ok(response)
    }

    async fn disconnect(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.shutdown().await;
        }
    }

    async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }
}

pub struct TcpRemoteClientFactory {
    connect_timeout: Duration,
}

impl TcpRemoteClientFactory {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl RemoteClientFactory for TcpRemoteClientFactory {
    fn create(&self) -> Arc<dyn RemoteClient> {
        Arc::new(TcpRemoteClient::new(self.connect_timeout))
    }
}
