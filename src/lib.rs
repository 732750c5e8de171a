pub mod app;
pub mod shutdown;

pub use app::{AppMode, Application, FleetServices};
pub use shutdown::ShutdownManager;
