use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Worker, Workspace};

/// 会话：调用方对一个Worker的租约
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub guid: String,
    pub api_key: String,
    pub worker_guid: String,
    pub workspace_guid: String,
    pub scene_filename: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub closed: bool,
    pub closed_at: Option<DateTime<Utc>>,
    pub expired: bool,
    pub failed: bool,
    pub fail_reason: Option<String>,

    /// 读取时解析的引用
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_ref: Option<Worker>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_ref: Option<Workspace>,
}

/// 会话状态，四者互斥
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Open,
    Closed,
    Expired,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Open => "open",
            SessionState::Closed => "closed",
            SessionState::Expired => "expired",
            SessionState::Failed => "failed",
        }
    }
}

impl Session {
    /// 创建新的打开会话
    pub fn open(
        guid: String,
        api_key: &str,
        worker_guid: &str,
        workspace_guid: &str,
        scene_filename: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            guid,
            api_key: api_key.to_string(),
            worker_guid: worker_guid.to_string(),
            workspace_guid: workspace_guid.to_string(),
            scene_filename,
            first_seen: now,
            last_seen: now,
            closed: false,
            closed_at: None,
            expired: false,
            failed: false,
            fail_reason: None,
            worker_ref: None,
            workspace_ref: None,
        }
    }

    /// 终止类型按 failed > expired > closed 的优先级判定
    pub fn state(&self) -> SessionState {
        if self.failed {
            SessionState::Failed
        } else if self.expired {
            SessionState::Expired
        } else if self.closed {
            SessionState::Closed
        } else {
            SessionState::Open
        }
    }

    pub fn is_open(&self) -> bool {
        self.state() == SessionState::Open
    }
}
