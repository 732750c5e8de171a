use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 节点心跳与注册表配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetConfig {
    /// 本实例所属工作组，所有上报心跳的节点都归入该组
    pub workgroup: String,
    pub heartbeat_bind_address: String,
    /// 0 表示不接收心跳
    pub heartbeat_port: u16,
    /// 超过该时长没有心跳的Worker视为离线
    pub worker_timeout_seconds: u64,
    pub sweep_interval_ms: u64,
    pub listener_retry_count: u32,
    pub listener_retry_delay_ms: u64,
    pub delete_dead_workers: bool,
    pub dead_worker_threshold_seconds: u64,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            workgroup: "default".to_string(),
            heartbeat_bind_address: "0.0.0.0".to_string(),
            heartbeat_port: 3000,
            worker_timeout_seconds: 3,
            sweep_interval_ms: 1000,
            listener_retry_count: 100,
            listener_retry_delay_ms: 250,
            delete_dead_workers: true,
            dead_worker_threshold_seconds: 30,
        }
    }
}

impl FleetConfig {
    pub fn listener_enabled(&self) -> bool {
        self.heartbeat_port > 0
    }

    pub fn worker_timeout(&self) -> Duration {
        Duration::from_secs(self.worker_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn listener_retry_delay(&self) -> Duration {
        Duration::from_millis(self.listener_retry_delay_ms)
    }

    pub fn dead_worker_threshold(&self) -> Duration {
        Duration::from_secs(self.dead_worker_threshold_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.workgroup.is_empty() {
            return Err(anyhow::anyhow!("工作组名称不能为空"));
        }

        if self.worker_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("Worker超时时间必须大于0"));
        }

        if self.sweep_interval_ms == 0 {
            return Err(anyhow::anyhow!("离线扫描间隔必须大于0"));
        }

        if self.delete_dead_workers
            && self.dead_worker_threshold_seconds < self.worker_timeout_seconds
        {
            return Err(anyhow::anyhow!("失效Worker清理阈值不能小于Worker超时时间"));
        }

        Ok(())
    }
}
