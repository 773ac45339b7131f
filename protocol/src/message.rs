//! 消息类型定义

use serde::{Deserialize, Serialize};

use crate::board::{Board, Parity};
use crate::constants::BOARD_SIZE;
use crate::error::RejectReason;
use crate::moves::EndReason;
use crate::piece::{Cell, Color, Position};

/// 连接 ID（每个参与者唯一，对核心逻辑不透明）
pub type ConnectionId = u64;

/// 房间 ID
pub type RoomId = String;

/// 房间快照
///
/// 每次成功的变更完成之后生成，与传输方式无关。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub room_id: RoomId,
    /// 8x8 格子，board[row][col]
    pub board: [[Cell; BOARD_SIZE]; BOARD_SIZE],
    /// 当前行棋方
    pub turn_color: Color,
    /// 连吃途中必须继续移动的棋子
    pub forced_from: Option<Position>,
    /// 双方是否都已入座
    pub started: bool,
    pub over: bool,
    /// 胜方，未结束或和棋为 None
    pub winner: Option<Color>,
    /// 结束原因
    pub end_reason: Option<EndReason>,
}

impl Snapshot {
    /// 读取快照中的格子
    pub fn cell(&self, pos: Position) -> Cell {
        self.board[pos.row as usize][pos.col as usize]
    }

    /// 从快照还原棋盘（客户端和测试使用）
    pub fn to_board(&self, parity: Parity) -> Board {
        let mut board = Board::empty(parity);
        for (row, cells) in self.board.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                board.set(Position::new_unchecked(row as u8, col as u8), *cell);
            }
        }
        board
    }
}

/// 客户端发送给服务端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    // === 房间操作 ===
    /// 创建房间
    CreateRoom,
    /// 加入房间
    JoinRoom { room_id: RoomId },
    /// 离开房间
    LeaveRoom,

    // === 对局操作 ===
    /// 走棋（原始坐标，服务端负责范围校验）
    SubmitMove {
        room_id: RoomId,
        from_row: u8,
        from_col: u8,
        to_row: u8,
        to_col: u8,
    },

    // === 心跳 ===
    /// 心跳请求
    Ping,
}

/// 服务端发送给客户端的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    // === 房间事件 ===
    /// 房间创建成功（仅发送给创建者）
    RoomCreated {
        room_id: RoomId,
        your_color: Color,
        snapshot: Snapshot,
    },
    /// 加入房间成功（仅发送给加入者）
    RoomJoined { room_id: RoomId, your_color: Color },
    /// 对手离开，房间进入终止状态
    OpponentLeft { snapshot: Snapshot },

    // === 对局事件 ===
    /// 双方就位，对局开始
    GameStarted { snapshot: Snapshot },
    /// 走棋被接受后的最新状态
    BoardUpdated { snapshot: Snapshot },

    // === 心跳 ===
    /// 心跳响应
    Pong,

    // === 错误 ===
    /// 命令被拒绝（仅发送给请求方）
    Rejected { reason: RejectReason, message: String },
}

impl ServerMessage {
    /// 由拒绝原因构造错误回复
    pub fn rejected(reason: RejectReason) -> Self {
        ServerMessage::Rejected {
            reason,
            message: reason.to_string(),
        }
    }

    /// 消息携带的快照（如果有）
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            ServerMessage::RoomCreated { snapshot, .. }
            | ServerMessage::OpponentLeft { snapshot }
            | ServerMessage::GameStarted { snapshot }
            | ServerMessage::BoardUpdated { snapshot } => Some(snapshot),
            _ => None,
        }
    }
}
