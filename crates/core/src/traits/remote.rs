use std::sync::Arc;

use async_trait::async_trait;

use crate::RenderFarmResult;

/// 远程命令通道
///
/// 线上编码对调用方不透明，只暴露 connect/execute/disconnect 三个能力。
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn connect(&self, ip: &str, port: u16) -> RenderFarmResult<()>;

    /// 执行一条命令并返回远端响应；远端报告失败时返回 `RemoteCommandFailed`
    async fn execute(&self, command: &str) -> RenderFarmResult<String>;

    async fn disconnect(&self);

    async fn is_connected(&self) -> bool;
}

pub trait RemoteClientFactory: Send + Sync {
    fn create(&self) -> Arc<dyn RemoteClient>;
}
