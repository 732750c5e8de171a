//! 测试数据构造器

use chrono::{DateTime, Duration, Utc};
use renderfarm_core::models::{Heartbeat, RenderParams, Worker, Workspace};
use uuid::Uuid;

pub const TEST_WORKGROUP: &str = "default";
pub const TEST_API_KEY: &str = "test-api-key";

/// Worker构造器，默认是刚发过心跳的空闲节点
pub struct WorkerBuilder {
    worker: Worker,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            worker: Worker {
                guid: Uuid::new_v4().to_string(),
                mac: "001122334455".to_string(),
                ip: "127.0.0.1".to_string(),
                port: 34092,
                workgroup: TEST_WORKGROUP.to_string(),
                first_seen: now,
                last_seen: now,
                cpu_usage: 0.1,
                ram_usage: 0.2,
                total_ram: 32.0,
                session_guid: None,
            },
        }
    }

    pub fn with_guid(mut self, guid: &str) -> Self {
        self.worker.guid = guid.to_string();
        self
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.worker.mac = mac.to_string();
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.worker.ip = ip.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.worker.port = port;
        self
    }

    pub fn with_workgroup(mut self, workgroup: &str) -> Self {
        self.worker.workgroup = workgroup.to_string();
        self
    }

    pub fn with_cpu(mut self, cpu_usage: f64) -> Self {
        self.worker.cpu_usage = cpu_usage;
        self
    }

    pub fn with_last_seen(mut self, last_seen: DateTime<Utc>) -> Self {
        self.worker.last_seen = last_seen;
        self
    }

    /// 最后心跳在若干秒前
    pub fn seen_seconds_ago(self, seconds: i64) -> Self {
        self.with_last_seen(Utc::now() - Duration::seconds(seconds))
    }

    pub fn build(self) -> Worker {
        self.worker
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct WorkspaceBuilder {
    workspace: Workspace,
}

impl WorkspaceBuilder {
    pub fn new() -> Self {
        Self {
            workspace: Workspace {
                guid: Uuid::new_v4().to_string(),
                api_key: TEST_API_KEY.to_string(),
                workgroup: TEST_WORKGROUP.to_string(),
                home_dir: "C:\\RenderFarm".to_string(),
                name: "test-workspace".to_string(),
                last_seen: Utc::now(),
            },
        }
    }

    pub fn with_guid(mut self, guid: &str) -> Self {
        self.workspace.guid = guid.to_string();
        self
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.workspace.api_key = api_key.to_string();
        self
    }

    pub fn with_workgroup(mut self, workgroup: &str) -> Self {
        self.workspace.workgroup = workgroup.to_string();
        self
    }

    pub fn build(self) -> Workspace {
        self.workspace
    }
}

impl Default for WorkspaceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub struct HeartbeatBuilder {
    heartbeat: Heartbeat,
}

impl HeartbeatBuilder {
    pub fn new() -> Self {
        Self {
            heartbeat: Heartbeat::worker("001122334455", 34092, 0.1, 0.2, 32.0),
        }
    }

    pub fn with_mac(mut self, mac: &str) -> Self {
        self.heartbeat.mac = mac.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.heartbeat.port = port;
        self
    }

    pub fn with_cpu(mut self, cpu_usage: f64) -> Self {
        self.heartbeat.cpu_usage = cpu_usage;
        self
    }

    /// 机群管理端心跳
    pub fn fleet_manager(mut self, vray_spawner: bool) -> Self {
        self.heartbeat.sender = renderfarm_core::models::HeartbeatSender::FleetManager;
        self.heartbeat.vray_spawner = vray_spawner;
        self
    }

    pub fn build(self) -> Heartbeat {
        self.heartbeat
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.heartbeat
            .to_bytes()
            .unwrap_or_else(|e| panic!("序列化测试心跳失败: {e}"))
    }
}

impl Default for HeartbeatBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn default_render_params() -> RenderParams {
    RenderParams {
        camera_name: "Camera001".to_string(),
        width: 640,
        height: 480,
    }
}
