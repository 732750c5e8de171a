//! # Render Farm Testing Utils
//!
//! 各crate共用的测试工具：
//!
//! - **Builders**：带合理默认值的测试数据构造器
//! - **Mocks**：可编排响应的远程客户端
//! - **Helpers**：内存数据库、条件等待
//!
//! ```toml
//! [dev-dependencies]
//! renderfarm-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
