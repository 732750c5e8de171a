use thiserror::Error;

/// 渲染农场错误类型定义
#[derive(Debug, Error)]
pub enum RenderFarmError {
    /// 持久化层I/O失败，向调用方传播，不吞掉
    #[error("存储不可用: {0}")]
    StoreUnavailable(#[from] sqlx::Error),

    /// 认领时没有空闲的存活Worker，调用方稍后可重试
    #[error("所有Worker都忙")]
    AllWorkersBusy,

    /// 会话不存在或已终止
    #[error("会话未找到: {guid}")]
    SessionNotFound { guid: String },

    #[error("工作空间未找到: {guid}")]
    WorkspaceNotFound { guid: String },

    /// 工作空间不属于请求方的api key
    #[error("工作空间 {workspace_guid} 不属于当前api key")]
    WorkspaceMismatch { workspace_guid: String },

    #[error("Worker未找到: {guid}")]
    WorkerNotFound { guid: String },

    #[error("作业未找到: {guid}")]
    JobNotFound { guid: String },

    /// Worker上已有活跃作业
    #[error("Worker {worker_guid} 已有活跃作业")]
    WorkerBusy { worker_guid: String },

    #[error("连接Worker {endpoint} 失败: {message}")]
    ConnectFailed { endpoint: String, message: String },

    #[error("远程命令执行失败: {0}")]
    RemoteCommandFailed(String),

    #[error("会话 {session_guid} 的资源未被接纳")]
    PoolAdmissionRejected { session_guid: String },

    #[error("心跳解析失败: {0}")]
    HeartbeatParse(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl RenderFarmError {
    /// 调用方稍后重试是否可能成功
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RenderFarmError::AllWorkersBusy
                | RenderFarmError::StoreUnavailable(_)
                | RenderFarmError::WorkerBusy { .. }
        )
    }

    pub fn session_not_found(guid: impl Into<String>) -> Self {
        RenderFarmError::SessionNotFound { guid: guid.into() }
    }
}

impl From<serde_json::Error> for RenderFarmError {
    fn from(err: serde_json::Error) -> Self {
        RenderFarmError::Serialization(err.to_string())
    }
}
