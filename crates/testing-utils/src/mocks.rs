//! 远程客户端的测试替身
//!
//! 工厂创建的所有客户端共享同一份行为配置与命令记录，
//! 测试可以在作业跑完后检查发到Worker上的命令序列。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use renderfarm_core::traits::{RemoteClient, RemoteClientFactory};
use renderfarm_core::{RenderFarmError, RenderFarmResult};

#[derive(Debug, Default)]
struct MockBehavior {
    refuse_connect: bool,
    fail_on: Option<String>,
    execute_delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct MockState {
    behavior: Mutex<MockBehavior>,
    commands: Mutex<Vec<String>>,
    connects: Mutex<Vec<String>>,
    disconnects: AtomicUsize,
}

pub struct MockRemoteClient {
    state: Arc<MockState>,
    connected: AtomicBool,
}

#[async_trait]
impl RemoteClient for MockRemoteClient {
    async fn connect(&self, ip: &str, port: u16) -> RenderFarmResult<()> {
        let endpoint = format!("{ip}:{port}");
        if self.state.behavior.lock().unwrap().refuse_connect {
            return Err(RenderFarmError::ConnectFailed {
                endpoint,
                message: "connection refused".to_string(),
            });
        }
        self.state.connects.lock().unwrap().push(endpoint);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn execute(&self, command: &str) -> RenderFarmResult<String> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(RenderFarmError::Network("远程客户端未连接".to_string()));
        }

        let (delay, fail_on) = {
            let behavior = self.state.behavior.lock().unwrap();
            (behavior.execute_delay, behavior.fail_on.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        self.state
            .commands
            .lock()
            .unwrap()
            .push(command.to_string());

        match fail_on {
            Some(marker) if command.contains(&marker) => Err(
                RenderFarmError::RemoteCommandFailed(format!("FAIL | {marker}")),
            ),
            _ => Ok("OK".to_string()),
        }
    }

    async fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct MockRemoteClientFactory {
    state: Arc<MockState>,
    created: Arc<AtomicUsize>,
}

impl MockRemoteClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refuse_connections(self) -> Self {
        self.state.behavior.lock().unwrap().refuse_connect = true;
        self
    }

    /// 命令包含该片段时返回失败
    pub fn fail_on(self, marker: &str) -> Self {
        self.state.behavior.lock().unwrap().fail_on = Some(marker.to_string());
        self
    }

    pub fn with_execute_delay(self, delay: Duration) -> Self {
        self.state.behavior.lock().unwrap().execute_delay = Some(delay);
        self
    }

    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.commands.lock().unwrap().clone()
    }

    pub fn connected_endpoints(&self) -> Vec<String> {
        self.state.connects.lock().unwrap().clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state.disconnects.load(Ordering::SeqCst)
    }
}

impl RemoteClientFactory for MockRemoteClientFactory {
    fn create(&self) -> Arc<dyn RemoteClient> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Arc::new(MockRemoteClient {
            state: Arc::clone(&self.state),
            connected: AtomicBool::new(false),
        })
    }
}
