//! 渲染农场调度核心
//!
//! - [`worker_registry`]：心跳接收、存活Worker视图与离线清理
//! - [`session_allocator`]：会话创建、保活、关闭、过期与失败
//! - [`expiration_watchdog`]：周期性过期无心跳的会话
//! - [`session_pool`] / [`pools`]：随会话生命周期创建和销毁的资源缓存
//! - [`job_scheduler`]：渲染作业的执行与状态持久化

pub mod expiration_watchdog;
pub mod job_scheduler;
pub mod pools;
pub mod session_allocator;
pub mod session_pool;
pub mod worker_registry;

pub use expiration_watchdog::{ExpirationWatchdog, ExpirationWatchdogConfig};
pub use job_scheduler::JobScheduler;
pub use pools::{
    connection_pool, geometry_cache_pool, material_cache_pool, BindingCache, BindingCachePool,
    ConnectionHooks, ConnectionPool,
};
pub use session_allocator::{SessionAllocator, SessionAllocatorConfig};
pub use session_pool::{SessionResourceHooks, SessionScopedResourcePool};
pub use worker_registry::{WorkerRegistry, WorkerRegistryConfig};

pub(crate) fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}
