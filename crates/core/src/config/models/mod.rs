pub mod app_config;
pub mod database;
pub mod fleet;
pub mod observability;
pub mod render;
pub mod sessions;
pub mod simulation;

pub use app_config::AppConfig;
pub use database::DatabaseConfig;
pub use fleet::FleetConfig;
pub use observability::ObservabilityConfig;
pub use render::RenderConfig;
pub use sessions::SessionsConfig;
pub use simulation::SimulationConfig;
