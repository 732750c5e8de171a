use serde::{Deserialize, Serialize};

/// 模拟Worker配置，用于在没有真实渲染节点时联调
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub target_host: String,
    pub worker_count: usize,
    pub heartbeat_interval_ms: u64,
    pub mac: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            target_host: "127.0.0.1".to_string(),
            worker_count: 2,
            heartbeat_interval_ms: 1000,
            mac: "00112233445566".to_string(),
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.target_host.is_empty() {
            return Err(anyhow::anyhow!("模拟目标主机不能为空"));
        }

        if self.heartbeat_interval_ms == 0 {
            return Err(anyhow::anyhow!("心跳间隔必须大于0"));
        }

        Ok(())
    }
}
