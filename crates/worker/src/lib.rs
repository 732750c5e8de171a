//! 模拟渲染节点
//!
//! 在没有真实渲染节点时向调度端发送与真实节点相同格式的UDP心跳，
//! 用于本地联调和集成测试。

pub mod heartbeat_emitter;
pub mod load;
pub mod simulation;

pub use heartbeat_emitter::HeartbeatEmitter;
pub use load::{FixedLoad, LoadSample, LoadSampler, RandomLoad};
pub use simulation::{SimulatedFleet, SIMULATED_BASE_PORT};
