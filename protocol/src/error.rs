//! 错误类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 命令被拒绝的原因
///
/// 全部是调用方可恢复的预期结果，只回复给发起请求的连接，从不广播。
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum RejectReason {
    // === 房间相关 (1xx) ===
    /// 房间不存在
    #[error("Room not found")]
    RoomNotFound = 100,
    /// 房间已满
    #[error("Room is full")]
    RoomFull = 101,
    /// 不在房间中
    #[error("Not seated in this room")]
    NotInRoom = 103,
    /// 已在房间中
    #[error("Already seated in a room")]
    AlreadyInRoom = 104,

    // === 对局相关 (2xx) ===
    /// 不是你的回合
    #[error("Not your turn")]
    NotYourTurn = 200,
    /// 非法走法
    #[error("Illegal move")]
    IllegalMove = 201,
    /// 对局未开始（等待对手）
    #[error("Game has not started")]
    GameNotStarted = 202,
    /// 对局已结束
    #[error("Game is already over")]
    GameOver = 203,
    /// 连吃途中只能移动指定棋子
    #[error("Another piece must continue capturing")]
    NotForcedPiece = 205,
    /// 有吃必吃
    #[error("A capture is available and mandatory")]
    CaptureMandatory = 206,
}

impl RejectReason {
    /// 稳定的数字错误码
    pub fn code(self) -> u16 {
        self as u16
    }
}

/// 棋盘构造错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// 坐标越界
    #[error("Invalid position: ({row}, {col})")]
    InvalidPosition { row: u8, col: u8 },

    /// 棋子放在了不可落子的格子上
    #[error("Square ({row}, {col}) is not playable on this board")]
    UnplayableSquare { row: u8, col: u8 },
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 序列化错误（bincode）
    #[error("Bincode serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
