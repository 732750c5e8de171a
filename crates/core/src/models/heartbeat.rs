use serde::{Deserialize, Serialize};

use crate::errors::RenderFarmError;
use crate::RenderFarmResult;

/// 心跳发送方
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HeartbeatSender {
    /// 渲染节点本身
    #[serde(rename = "remote-worker", alias = "remote-maxscript")]
    RemoteWorker,
    /// 机群管理端
    #[serde(rename = "fleet-manager", alias = "worker-manager")]
    FleetManager,
}

/// 心跳数据报（JSON）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    #[serde(rename = "type")]
    pub kind: String,
    pub sender: HeartbeatSender,
    #[serde(default)]
    pub mac: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub cpu_usage: f64,
    #[serde(default)]
    pub ram_usage: f64,
    #[serde(default)]
    pub total_ram: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default)]
    pub vray_spawner: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

pub const HEARTBEAT_TYPE: &str = "heartbeat";

impl Heartbeat {
    /// 渲染节点心跳
    pub fn worker(mac: &str, port: u16, cpu_usage: f64, ram_usage: f64, total_ram: f64) -> Self {
        Self {
            kind: HEARTBEAT_TYPE.to_string(),
            sender: HeartbeatSender::RemoteWorker,
            mac: mac.to_string(),
            port,
            cpu_usage,
            ram_usage,
            total_ram,
            ip: None,
            vray_spawner: false,
            id: None,
            pid: None,
            version: None,
        }
    }

    /// 解析心跳数据报
    pub fn parse(payload: &[u8]) -> RenderFarmResult<Self> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| RenderFarmError::HeartbeatParse(format!("非UTF-8数据: {e}")))?;
        let heartbeat: Heartbeat = serde_json::from_str(text)
            .map_err(|e| RenderFarmError::HeartbeatParse(format!("{e}: {text}")))?;

        if heartbeat.kind != HEARTBEAT_TYPE {
            return Err(RenderFarmError::HeartbeatParse(format!(
                "未知的消息类型: {}",
                heartbeat.kind
            )));
        }
        if heartbeat.sender == HeartbeatSender::RemoteWorker {
            if heartbeat.mac.is_empty() {
                return Err(RenderFarmError::HeartbeatParse("缺少mac字段".to_string()));
            }
            // 端口0的节点无法建立命令连接
            if heartbeat.port == 0 {
                return Err(RenderFarmError::HeartbeatParse(format!(
                    "缺少有效的port字段: mac {}",
                    heartbeat.mac
                )));
            }
        }

        Ok(heartbeat)
    }

    pub fn to_bytes(&self) -> RenderFarmResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worker_heartbeat() {
        let payload = br#"{"type":"heartbeat","sender":"remote-worker","mac":"001122334455","port":34092,"cpu_usage":0.19,"ram_usage":0.51,"total_ram":15.9}"#;
        let heartbeat = Heartbeat::parse(payload).unwrap();

        assert_eq!(heartbeat.sender, HeartbeatSender::RemoteWorker);
        assert_eq!(heartbeat.port, 34092);
        assert_eq!(heartbeat.cpu_usage, 0.19);
        assert!(!heartbeat.vray_spawner);
    }

    #[test]
    fn test_parse_legacy_sender_names() {
        let payload = br#"{"type":"heartbeat","sender":"worker-manager","mac":"aa","vray_spawner":true}"#;
        let heartbeat = Heartbeat::parse(payload).unwrap();
        assert_eq!(heartbeat.sender, HeartbeatSender::FleetManager);
        assert!(heartbeat.vray_spawner);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Heartbeat::parse(b"not json").is_err());
        assert!(Heartbeat::parse(&[0xff, 0xfe]).is_err());
        assert!(Heartbeat::parse(br#"{"type":"status","sender":"remote-worker","mac":"aa"}"#).is_err());
        assert!(Heartbeat::parse(br#"{"type":"heartbeat","sender":"someone-else"}"#).is_err());
        assert!(Heartbeat::parse(br#"{"type":"heartbeat","sender":"remote-worker"}"#).is_err());
    }

    #[test]
    fn test_worker_heartbeat_requires_port() {
        let missing = br#"{"type":"heartbeat","sender":"remote-worker","mac":"001122334455","cpu_usage":0.2}"#;
        assert!(matches!(
            Heartbeat::parse(missing),
            Err(RenderFarmError::HeartbeatParse(_))
        ));

        let zero = br#"{"type":"heartbeat","sender":"remote-worker","mac":"001122334455","port":0}"#;
        assert!(Heartbeat::parse(zero).is_err());

        // 机群管理端心跳不携带端口
        let spawner = br#"{"type":"heartbeat","sender":"fleet-manager","mac":"aa","vray_spawner":true}"#;
        assert_eq!(Heartbeat::parse(spawner).unwrap().port, 0);
    }
}
