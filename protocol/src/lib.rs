//! 国际跳棋（8x8）共享协议库
//!
//! 包含:
//! - 棋子、棋盘、位置等核心数据结构
//! - 规则引擎：走法生成、验证、执行、连吃和终局判定
//! - 消息类型定义 (ClientMessage, ServerMessage, Snapshot)
//! - 传输层抽象 (Connector, Connection, Listener traits) 和帧编解码

mod board;
mod constants;
mod error;
mod message;
mod moves;
mod piece;
mod transport;

pub use board::{Board, Parity};
pub use constants::*;
pub use error::{BoardError, ProtocolError, RejectReason, Result};
pub use message::{ClientMessage, ConnectionId, RoomId, ServerMessage, Snapshot};
pub use moves::{EndReason, GameOutcome, Move, RuleEngine, Rules, StalematePolicy};
pub use piece::{Cell, Color, Piece, Position, Rank};
pub use transport::{
    encode_frame, Connection, Connector, FrameReader, FrameWriter, Listener, TcpConnection,
    TcpConnector, TcpListener,
};
