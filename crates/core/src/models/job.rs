use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Session;

/// 作业状态
///
/// ```text
/// pending → connected → rendering → completed
///    └──────────┴───────────┴──→ failed | canceled
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Connected,
    Rendering,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Connected => "connected",
            JobState::Rendering => "rendering",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Canceled
        )
    }

    /// 检查状态迁移是否合法
    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Pending, JobState::Connected) => true,
            (JobState::Connected, JobState::Rendering) => true,
            (JobState::Rendering, JobState::Completed) => true,
            (from, JobState::Failed) => !from.is_terminal(),
            (from, JobState::Canceled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "connected" => Ok(JobState::Connected),
            "rendering" => Ok(JobState::Rendering),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            "canceled" => Ok(JobState::Canceled),
            _ => Err(format!("Invalid job state: {s}")),
        }
    }
}

/// 渲染参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RenderParams {
    pub camera_name: String,
    pub width: u32,
    pub height: u32,
}

/// 在会话所认领Worker上执行的一次渲染
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub guid: String,
    pub api_key: String,
    pub session_guid: String,
    pub worker_guid: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub state: JobState,
    pub closed: bool,
    pub canceled: bool,
    pub failed: bool,
    pub error: Option<String>,
    pub urls: Vec<String>,
    pub camera_name: String,
    pub render_width: u32,
    pub render_height: u32,
}

impl Job {
    pub fn new(api_key: &str, session: &Session, params: &RenderParams) -> Self {
        let now = Utc::now();
        Self {
            guid: Uuid::new_v4().to_string(),
            api_key: api_key.to_string(),
            session_guid: session.guid.clone(),
            worker_guid: session.worker_guid.clone(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            state: JobState::Pending,
            closed: false,
            canceled: false,
            failed: false,
            error: None,
            urls: Vec::new(),
            camera_name: params.camera_name.clone(),
            render_width: params.width,
            render_height: params.height,
        }
    }

    /// 未关闭、未取消、未失败
    pub fn is_active(&self) -> bool {
        !self.closed && !self.canceled && !self.failed
    }

    pub fn output_filename(&self) -> String {
        format!("{}.png", self.guid)
    }
}
