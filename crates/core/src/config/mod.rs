//! 配置管理
//!
//! 配置按 默认值 → TOML文件 → 环境变量 的顺序合并，加载后统一校验。
//! 每个配置段都提供 `validate()`，由 [`AppConfig::validate`] 汇总。

pub mod models;

pub use models::{
    AppConfig, DatabaseConfig, FleetConfig, ObservabilityConfig, RenderConfig, SessionsConfig,
    SimulationConfig,
};
