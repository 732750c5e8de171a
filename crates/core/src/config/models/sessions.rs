use std::time::Duration;

use serde::{Deserialize, Serialize};

/// 会话过期配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// 关闭时不启动过期看门狗
    pub expire_sessions: bool,
    pub session_timeout_minutes: u64,
    pub watchdog_interval_seconds: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            expire_sessions: true,
            session_timeout_minutes: 30,
            watchdog_interval_seconds: 5,
        }
    }
}

impl SessionsConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_minutes * 60)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_seconds)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.session_timeout_minutes == 0 {
            return Err(anyhow::anyhow!("会话超时时间必须大于0"));
        }

        if self.watchdog_interval_seconds == 0 {
            return Err(anyhow::anyhow!("看门狗间隔必须大于0"));
        }

        Ok(())
    }
}
