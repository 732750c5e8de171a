use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 调用方拥有的工作空间
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Workspace {
    pub guid: String,
    pub api_key: String,
    pub workgroup: String,
    pub home_dir: String,
    pub name: String,
    pub last_seen: DateTime<Utc>,
}

impl Workspace {
    pub fn is_owned_by(&self, api_key: &str) -> bool {
        self.api_key == api_key
    }
}
