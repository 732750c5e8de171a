use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::heartbeat::Heartbeat;

/// 渲染节点
///
/// 由首次心跳创建，每次心跳刷新。`session_guid` 非空表示已被某个打开的会话认领，
/// 只有存储层的原子条件更新可以修改它。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Worker {
    pub guid: String,
    pub mac: String,
    pub ip: String,
    pub port: u16,
    pub workgroup: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub total_ram: f64,
    pub session_guid: Option<String>,
}

/// Worker在注册表中的标识键: (mac, port)
pub type WorkerKey = (String, u16);

impl Worker {
    /// 根据首次心跳创建新的Worker记录，分配新的GUID
    pub fn from_heartbeat(heartbeat: &Heartbeat, ip: &str, workgroup: &str) -> Self {
        let now = Utc::now();
        Self {
            guid: Uuid::new_v4().to_string(),
            mac: heartbeat.mac.clone(),
            ip: ip.to_string(),
            port: heartbeat.port,
            workgroup: workgroup.to_string(),
            first_seen: now,
            last_seen: now,
            cpu_usage: heartbeat.cpu_usage,
            ram_usage: heartbeat.ram_usage,
            total_ram: heartbeat.total_ram,
            session_guid: None,
        }
    }

    /// 刷新心跳信息
    pub fn apply_heartbeat(&mut self, heartbeat: &Heartbeat) {
        let now = Utc::now();
        // lastSeen只增不减
        if now > self.last_seen {
            self.last_seen = now;
        }
        self.cpu_usage = heartbeat.cpu_usage;
        self.ram_usage = heartbeat.ram_usage;
        self.total_ram = heartbeat.total_ram;
    }

    pub fn key(&self) -> WorkerKey {
        (self.mac.clone(), self.port)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn is_claimed(&self) -> bool {
        self.session_guid.is_some()
    }

    /// 检查心跳是否在存活窗口内
    pub fn is_live(&self, now: DateTime<Utc>, liveness_window: Duration) -> bool {
        now - self.last_seen <= liveness_window
    }
}

/// 机群管理端（spawner）记录，仅保存在内存中
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Spawner {
    pub mac: String,
    pub ip: String,
    pub workgroup: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub total_ram: f64,
}

/// Spawner标识键: (ip, mac)
pub type SpawnerKey = (String, String);

impl Spawner {
    pub fn from_heartbeat(heartbeat: &Heartbeat, ip: &str, workgroup: &str) -> Self {
        let now = Utc::now();
        Self {
            mac: heartbeat.mac.clone(),
            ip: ip.to_string(),
            workgroup: workgroup.to_string(),
            first_seen: now,
            last_seen: now,
            cpu_usage: heartbeat.cpu_usage,
            ram_usage: heartbeat.ram_usage,
            total_ram: heartbeat.total_ram,
        }
    }

    pub fn touch(&mut self, heartbeat: &Heartbeat) {
        self.last_seen = Utc::now();
        self.cpu_usage = heartbeat.cpu_usage;
        self.ram_usage = heartbeat.ram_usage;
        self.total_ram = heartbeat.total_ram;
    }

    pub fn key(&self) -> SpawnerKey {
        (self.ip.clone(), self.mac.clone())
    }
}
