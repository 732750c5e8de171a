//! 与Worker上远程脚本端口的通信

pub mod commands;
pub mod tcp_client;

pub use commands::RemoteCommands;
pub use tcp_client::{TcpRemoteClient, TcpRemoteClientFactory};
