use anyhow::{Context, Result};
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;

use super::{
    database::DatabaseConfig, fleet::FleetConfig, observability::ObservabilityConfig,
    render::RenderConfig, sessions::SessionsConfig, simulation::SimulationConfig,
};

/// 未显式指定配置文件时按顺序查找
pub const DEFAULT_CONFIG_PATHS: [&str; 3] = [
    "config/renderfarm.toml",
    "renderfarm.toml",
    "/etc/renderfarm/config.toml",
];

pub const ENV_PREFIX: &str = "RENDERFARM";

/// 服务配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub fleet: FleetConfig,
    pub sessions: SessionsConfig,
    pub render: RenderConfig,
    pub observability: ObservabilityConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    ///
    /// 加载顺序：
    /// 1. 默认值
    /// 2. 配置文件（TOML）
    /// 3. 环境变量覆盖，如 `RENDERFARM_FLEET__HEARTBEAT_PORT=3001`
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        Self::load_with_env(config_path, Self::environment())
    }

    fn environment() -> Environment {
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(config_path: Option<&str>, env: Environment) -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(File::new(path, FileFormat::Toml));
            } else {
                return Err(anyhow::anyhow!("配置文件不存在: {}", path));
            }
        } else if let Some(path) = DEFAULT_CONFIG_PATHS
            .iter()
            .find(|path| Path::new(path).exists())
        {
            builder = builder.add_source(File::new(path, FileFormat::Toml));
        }

        builder = builder.add_source(env);

        let config: AppConfig = builder
            .build()
            .context("构建配置失败")?
            .try_deserialize()
            .context("反序列化配置失败")?;

        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(toml_str).context("解析TOML配置失败")?;

        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("序列化配置为TOML失败")
    }

    pub fn validate(&self) -> Result<()> {
        self.database.validate().context("数据库配置验证失败")?;
        self.fleet.validate().context("节点配置验证失败")?;
        self.sessions.validate().context("会话配置验证失败")?;
        self.render.validate().context("渲染配置验证失败")?;
        self.observability
            .validate()
            .context("可观测性配置验证失败")?;
        self.simulation.validate().context("模拟配置验证失败")?;

        Ok(())
    }
}
