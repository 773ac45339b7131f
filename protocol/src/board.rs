//! 棋盘状态
//!
//! 只负责存放格子内容，不包含任何规则知识。

use serde::{Deserialize, Serialize};

use crate::constants::{BOARD_SIZE, STARTING_ROWS};
use crate::error::BoardError;
use crate::piece::{Cell, Color, Piece, Position};

/// 可落子格子的奇偶性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    /// (row + col) 为奇数的格子可落子（标准开局）
    Odd,
    /// (row + col) 为偶数的格子可落子
    Even,
}

impl Parity {
    /// 检查位置是否属于可落子格子
    pub fn is_playable(&self, pos: Position) -> bool {
        let odd = (pos.row + pos.col) % 2 == 1;
        match self {
            Parity::Odd => odd,
            Parity::Even => !odd,
        }
    }
}

/// 8x8 棋盘
///
/// 不可落子的格子永远为空。该约束只在构造时检查，运行期不再重复校验。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    squares: [[Cell; BOARD_SIZE]; BOARD_SIZE],
    parity: Parity,
}

impl Board {
    /// 创建空棋盘
    pub fn empty(parity: Parity) -> Self {
        Self {
            squares: [[None; BOARD_SIZE]; BOARD_SIZE],
            parity,
        }
    }

    /// 创建标准开局棋盘
    ///
    /// 黑方占据第 0-2 行的可落子格，白方占据第 5-7 行。
    pub fn initial() -> Self {
        let mut board = Self::empty(Parity::Odd);

        for row in 0..BOARD_SIZE {
            let color = if row < STARTING_ROWS {
                Color::Black
            } else if row >= BOARD_SIZE - STARTING_ROWS {
                Color::White
            } else {
                continue;
            };

            for col in 0..BOARD_SIZE {
                let pos = Position::new_unchecked(row as u8, col as u8);
                if board.parity.is_playable(pos) {
                    board.set(pos, Some(Piece::man(color)));
                }
            }
        }

        board
    }

    /// 按给定摆放创建棋盘，检查坐标范围和奇偶性
    pub fn from_placements(
        parity: Parity,
        placements: &[(u8, u8, Piece)],
    ) -> Result<Self, BoardError> {
        let mut board = Self::empty(parity);
        for &(row, col, piece) in placements {
            let pos = Position::new(row, col).ok_or(BoardError::InvalidPosition { row, col })?;
            if !parity.is_playable(pos) {
                return Err(BoardError::UnplayableSquare { row, col });
            }
            board.set(pos, Some(piece));
        }
        Ok(board)
    }

    /// 可落子格子的奇偶性
    pub fn parity(&self) -> Parity {
        self.parity
    }

    /// 获取指定位置的格子内容
    ///
    /// 越界属于上游校验缺陷，直接 panic。
    pub fn get(&self, pos: Position) -> Cell {
        assert!(pos.is_valid(), "board access out of range: {}", pos);
        self.squares[pos.row as usize][pos.col as usize]
    }

    /// 设置指定位置的格子内容
    pub fn set(&mut self, pos: Position, cell: Cell) {
        assert!(pos.is_valid(), "board access out of range: {}", pos);
        self.squares[pos.row as usize][pos.col as usize] = cell;
    }

    /// 遍历指定阵营的所有棋子
    pub fn pieces(&self, color: Color) -> impl Iterator<Item = (Position, Piece)> + '_ {
        self.occupied().filter(move |(_, piece)| piece.color == color)
    }

    /// 遍历所有棋子
    pub fn occupied(&self) -> impl Iterator<Item = (Position, Piece)> + '_ {
        self.squares.iter().enumerate().flat_map(|(row, cells)| {
            cells.iter().enumerate().filter_map(move |(col, cell)| {
                cell.map(|piece| (Position::new_unchecked(row as u8, col as u8), piece))
            })
        })
    }

    /// 指定阵营的棋子数量
    pub fn count(&self, color: Color) -> usize {
        self.pieces(color).count()
    }

    /// 棋盘上的棋子总数
    pub fn total_pieces(&self) -> usize {
        self.occupied().count()
    }

    /// 导出 8x8 格子数组（用于快照）
    pub fn rows(&self) -> [[Cell; BOARD_SIZE]; BOARD_SIZE] {
        self.squares
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::initial()
    }
}
