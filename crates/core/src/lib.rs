//! 渲染农场核心库：领域模型、事件、存储与远程通道接口、配置

pub mod config;
pub mod errors;
pub mod events;
pub mod models;
pub mod traits;

pub use config::AppConfig;
pub use errors::*;
pub use events::{
    handler_fn, DomainEvent, EventBus, EventHandler, JobEvent, SessionEvent, WorkerEvent,
};

/// 统一的Result类型
pub type RenderFarmResult<T> = std::result::Result<T, RenderFarmError>;
