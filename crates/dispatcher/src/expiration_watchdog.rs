use std::sync::Arc;
use std::time::Duration;

use renderfarm_core::config::SessionsConfig;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::session_allocator::SessionAllocator;

/// 会话过期看门狗配置
#[derive(Debug, Clone)]
pub struct ExpirationWatchdogConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub session_timeout_minutes: u64,
}

impl Default for ExpirationWatchdogConfig {
    fn default() -> Self {
        Self::from(&SessionsConfig::default())
    }
}

impl From<&SessionsConfig> for ExpirationWatchdogConfig {
    fn from(config: &SessionsConfig) -> Self {
        Self {
            enabled: config.expire_sessions,
            interval: config.watchdog_interval(),
            session_timeout_minutes: config.session_timeout_minutes,
        }
    }
}

/// 周期性过期长时间无心跳的会话，回收其Worker
pub struct ExpirationWatchdog {
    allocator: Arc<SessionAllocator>,
    config: ExpirationWatchdogConfig,
}

impl ExpirationWatchdog {
    pub fn new(allocator: Arc<SessionAllocator>, config: ExpirationWatchdogConfig) -> Self {
        Self { allocator, config }
    }

    /// 执行一次过期检查，返回过期的会话数；错误只记录
    pub async fn tick(&self) -> usize {
        match self
            .allocator
            .expire_sessions(self.config.session_timeout_minutes)
            .await
        {
            Ok(expired) => {
                if !expired.is_empty() {
                    info!("过期了 {} 个会话", expired.len());
                }
                expired.len()
            }
            Err(e) => {
                error!("会话过期检查失败: {}", e);
                0
            }
        }
    }

    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("会话过期已禁用，看门狗不启动");
            return;
        }

        info!(
            "启动会话过期看门狗: 间隔 {:?}, 超时 {} 分钟",
            self.config.interval, self.config.session_timeout_minutes
        );

        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!("执行会话过期检查");
                    self.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("收到停止信号，退出会话过期看门狗");
                    break;
                }
            }
        }
    }
}
