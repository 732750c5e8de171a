//! # 数据模型
//!
//! 渲染农场的核心数据结构：Worker（渲染节点）、Session（会话租约）、
//! Job（渲染作业）、Workspace（工作空间）以及心跳数据报。
//!
//! 所有时间字段使用 `DateTime<Utc>`；持久化由 [`crate::traits`] 中的存储接口负责，
//! 内存中的副本只是可重建的缓存。
//!
//! ## 状态流转
//!
//! ### Worker
//! ```text
//! Unknown → Live (首次心跳) → Live (每次心跳刷新) → Offline (超出存活窗口)
//! ```
//!
//! ### Session
//! ```text
//! Open → Closed | Expired | Failed
//! ```

pub mod heartbeat;
pub mod job;
pub mod session;
pub mod worker;
pub mod workspace;

pub use heartbeat::*;
pub use job::*;
pub use session::*;
pub use worker::*;
pub use workspace::*;
