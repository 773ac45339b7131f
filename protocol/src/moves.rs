//! 走法生成和验证
//!
//! 所有函数都是纯函数：输入棋盘和阵营，输出派生数据，不保存隐藏状态。
//! 有吃必吃和连吃判定在每一步之后从头重新扫描，棋盘只有 64 格，开销可以忽略。

use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::error::RejectReason;
use crate::piece::{Color, Position};

/// 走法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Move {
    /// 起始位置
    pub from: Position,
    /// 目标位置
    pub to: Position,
    /// 被吃棋子所在格（验证后填写）
    pub captured: Option<Position>,
}

impl Move {
    /// 创建新走法
    pub fn new(from: Position, to: Position) -> Self {
        Self {
            from,
            to,
            captured: None,
        }
    }

    /// 创建吃子走法
    pub fn capture(from: Position, to: Position) -> Self {
        Self {
            from,
            to,
            captured: Some(from.midpoint(to)),
        }
    }

    /// 从原始坐标创建，任意坐标越界返回 None
    pub fn from_coords(from_row: u8, from_col: u8, to_row: u8, to_col: u8) -> Option<Self> {
        Some(Self::new(
            Position::new(from_row, from_col)?,
            Position::new(to_row, to_col)?,
        ))
    }

    /// 是否为跳吃走法（行跨度为 2）
    pub fn is_jump(&self) -> bool {
        self.from.row.abs_diff(self.to.row) == 2
    }

    /// 起点和终点是否相同（忽略吃子标注）
    pub fn same_path(&self, other: &Move) -> bool {
        self.from == other.from && self.to == other.to
    }
}

impl std::fmt::Display for Move {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {}", self.from, self.to)
    }
}

/// 无子可走时的判定策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StalematePolicy {
    /// 无子可走的一方判负
    #[default]
    Loss,
    /// 无子可走判和
    Draw,
}

/// 规则变体配置
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rules {
    /// 仍有棋子但无子可走时的处理
    pub stalemate: StalematePolicy,
    /// 普通兵是否可以向后吃子
    pub men_capture_backward: bool,
}

/// 对局结束原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// 对方棋子被吃光
    NoPieces,
    /// 对方无子可走
    NoMoves,
    /// 有玩家离开房间
    Abandoned,
}

/// 终局结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameOutcome {
    /// 胜方，和棋为 None
    pub winner: Option<Color>,
    pub reason: EndReason,
}

/// 规则引擎
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleEngine {
    rules: Rules,
}

impl RuleEngine {
    pub fn new(rules: Rules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &Rules {
        &self.rules
    }

    /// 指定阵营所有的吃子走法
    pub fn legal_captures(&self, board: &Board, color: Color) -> Vec<Move> {
        let mut moves = Vec::new();
        for (pos, _) in board.pieces(color) {
            self.collect_captures(board, pos, &mut moves);
        }
        moves
    }

    /// 指定阵营所有的普通走法（一步斜走到空格）
    pub fn legal_simple_moves(&self, board: &Board, color: Color) -> Vec<Move> {
        let mut moves = Vec::new();
        for (pos, piece) in board.pieces(color) {
            for &dr in piece.row_directions() {
                for dc in [-1, 1] {
                    if let Some(to) = pos.offset(dr, dc) {
                        if board.get(to).is_none() {
                            moves.push(Move::new(pos, to));
                        }
                    }
                }
            }
        }
        moves
    }

    /// 指定格子上的棋子可以进行的吃子走法
    pub fn captures_from(&self, board: &Board, pos: Position) -> Vec<Move> {
        let mut moves = Vec::new();
        self.collect_captures(board, pos, &mut moves);
        moves
    }

    fn collect_captures(&self, board: &Board, pos: Position, moves: &mut Vec<Move>) {
        let Some(piece) = board.get(pos) else {
            return;
        };

        let row_dirs: &[i8] = if self.rules.men_capture_backward {
            &[-1, 1]
        } else {
            piece.row_directions()
        };

        for &dr in row_dirs {
            for dc in [-1, 1] {
                let (Some(over), Some(to)) = (pos.offset(dr, dc), pos.offset(dr * 2, dc * 2)) else {
                    continue;
                };
                let jumps_opponent = matches!(board.get(over), Some(p) if p.color != piece.color);
                if jumps_opponent && board.get(to).is_none() {
                    moves.push(Move::capture(pos, to));
                }
            }
        }
    }

    /// 当前行棋方此刻可以走的全部走法
    ///
    /// 连吃途中只返回被指定棋子的吃子走法；有吃子时只返回吃子走法。
    pub fn legal_moves(
        &self,
        board: &Board,
        color: Color,
        forced_from: Option<Position>,
    ) -> Vec<Move> {
        let captures = match forced_from {
            Some(pos) => self.captures_from(board, pos),
            None => self.legal_captures(board, color),
        };
        if !captures.is_empty() || forced_from.is_some() {
            return captures;
        }
        self.legal_simple_moves(board, color)
    }

    /// 验证走法
    ///
    /// 成功时返回带吃子标注的走法。
    pub fn validate(
        &self,
        board: &Board,
        color: Color,
        forced_from: Option<Position>,
        mv: Move,
    ) -> Result<Move, RejectReason> {
        if let Some(forced) = forced_from {
            if mv.from != forced {
                return Err(RejectReason::NotForcedPiece);
            }
        }

        let captures = self.legal_captures(board, color);
        if !captures.is_empty() {
            return captures
                .into_iter()
                .find(|c| c.same_path(&mv))
                .ok_or(RejectReason::CaptureMandatory);
        }

        self.legal_simple_moves(board, color)
            .into_iter()
            .find(|m| m.same_path(&mv))
            .ok_or(RejectReason::IllegalMove)
    }

    /// 执行已验证的走法，返回被吃棋子所在格
    ///
    /// 落在底线的普通兵立即升变为王棋，连吃途中同样生效。
    pub fn apply(&self, board: &mut Board, mv: Move) -> Option<Position> {
        let Some(piece) = board.get(mv.from) else {
            unreachable!("apply called on empty square {}", mv.from);
        };

        board.set(mv.from, None);
        let piece = if mv.to.row == piece.color.promotion_row() {
            piece.promoted()
        } else {
            piece
        };
        board.set(mv.to, Some(piece));

        let captured = mv.is_jump().then(|| mv.from.midpoint(mv.to));
        if let Some(pos) = captured {
            board.set(pos, None);
        }
        captured
    }

    /// 落点上的棋子是否还能继续吃子
    pub fn continues_capture(&self, board: &Board, landing: Position, color: Color) -> bool {
        matches!(board.get(landing), Some(p) if p.color == color)
            && !self.captures_from(board, landing).is_empty()
    }

    /// 判断行棋方是否已输，返回胜方
    ///
    /// 行棋方没有棋子，或者没有任何吃子和普通走法时判负。
    pub fn is_terminal(&self, board: &Board, to_move: Color) -> Option<Color> {
        let no_pieces = board.count(to_move) == 0;
        let no_moves = self.legal_captures(board, to_move).is_empty()
            && self.legal_simple_moves(board, to_move).is_empty();
        (no_pieces || no_moves).then(|| to_move.opponent())
    }

    /// 按配置的困毙策略判定终局
    pub fn outcome(&self, board: &Board, to_move: Color) -> Option<GameOutcome> {
        let winner = self.is_terminal(board, to_move)?;

        if board.count(to_move) == 0 {
            return Some(GameOutcome {
                winner: Some(winner),
                reason: EndReason::NoPieces,
            });
        }

        Some(GameOutcome {
            winner: match self.rules.stalemate {
                StalematePolicy::Loss => Some(winner),
                StalematePolicy::Draw => None,
            },
            reason: EndReason::NoMoves,
        })
    }
}
