//! 国际跳棋服务端
//!
//! 包含:
//! - 房间系统（每个房间独立加锁）
//! - 会话协调（座位、回合把关、广播）
//! - TCP 服务器与连接注册表
//! - 配置加载

pub mod config;
pub mod room;
pub mod server;
pub mod session;

pub use config::{ServerConfig, CONFIG_ENV};
pub use room::{Room, RoomPhase, RoomStore};
pub use server::{ConnectionRegistry, MessageHandler, Server, ServerState};
pub use session::{Broadcaster, SessionCoordinator};
