//! 房间系统
//!
//! 每个房间是一个独立的互斥单元：对棋盘和回合状态的读写都必须通过
//! [`RoomStore::with_room`] 在该房间自己的锁内完成，不同房间之间没有全局锁。

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;

use protocol::{
    Board, Color, ConnectionId, EndReason, GameOutcome, Move, Position, RejectReason, RoomId,
    RuleEngine, Snapshot, ROOM_ID_LEN,
};

/// 房间所处阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// 等待对手加入
    WaitingForOpponent,
    /// 对局进行中，`forced` 表示处于连吃途中
    InProgress { forced: bool },
    /// 对局结束（包括有人离开）
    GameOver,
}

/// 房间
#[derive(Debug)]
pub struct Room {
    pub id: RoomId,
    pub board: Board,
    /// 当前行棋方
    pub turn_color: Color,
    /// 连吃途中必须继续移动的棋子
    pub forced_from: Option<Position>,
    /// 白方座位（创建者）
    pub slot_a: Option<ConnectionId>,
    /// 黑方座位（加入者）
    pub slot_b: Option<ConnectionId>,
    pub started: bool,
    pub over: bool,
    pub winner: Option<Color>,
    pub end_reason: Option<EndReason>,
    /// 对局因玩家离开而终止
    pub abandoned: bool,
    /// 最近一次被访问的时间（用于空闲过期）
    pub last_activity: Instant,
}

impl Room {
    /// 创建新房间，创建者坐白方
    pub fn new(id: RoomId, creator: ConnectionId) -> Self {
        Self {
            id,
            board: Board::initial(),
            turn_color: Color::White,
            forced_from: None,
            slot_a: Some(creator),
            slot_b: None,
            started: false,
            over: false,
            winner: None,
            end_reason: None,
            abandoned: false,
            last_activity: Instant::now(),
        }
    }

    /// 检查房间是否已满
    pub fn is_full(&self) -> bool {
        self.slot_a.is_some() && self.slot_b.is_some()
    }

    /// 房间内已没有任何参与者
    pub fn is_empty(&self) -> bool {
        self.slot_a.is_none() && self.slot_b.is_none()
    }

    /// 获取连接对应的颜色
    pub fn color_of(&self, conn_id: ConnectionId) -> Option<Color> {
        if self.slot_a == Some(conn_id) {
            Some(Color::White)
        } else if self.slot_b == Some(conn_id) {
            Some(Color::Black)
        } else {
            None
        }
    }

    /// 当前仍在房间中的连接
    pub fn participants(&self) -> Vec<ConnectionId> {
        self.slot_a.into_iter().chain(self.slot_b).collect()
    }

    /// 当前阶段
    pub fn phase(&self) -> RoomPhase {
        if self.over {
            RoomPhase::GameOver
        } else if !self.started {
            RoomPhase::WaitingForOpponent
        } else {
            RoomPhase::InProgress {
                forced: self.forced_from.is_some(),
            }
        }
    }

    /// 第二名玩家入座，成功后对局开始
    ///
    /// 已结束的房间正在被拆除，视为不存在。
    pub fn seat_opponent(&mut self, conn_id: ConnectionId) -> Result<Color, RejectReason> {
        if self.over {
            return Err(RejectReason::RoomNotFound);
        }
        if self.started || self.slot_b.is_some() {
            return Err(RejectReason::RoomFull);
        }
        self.slot_b = Some(conn_id);
        self.started = true;
        Ok(Color::Black)
    }

    /// 执行走棋：验证、落子、连吃判定、换手、终局判定
    ///
    /// 返回被吃棋子所在格。
    pub fn make_move(
        &mut self,
        engine: &RuleEngine,
        mv: Move,
    ) -> Result<Option<Position>, RejectReason> {
        let mover = self.turn_color;
        let mv = engine.validate(&self.board, mover, self.forced_from, mv)?;
        let captured = engine.apply(&mut self.board, mv);

        // 连吃未结束，同一方继续走
        if captured.is_some() && engine.continues_capture(&self.board, mv.to, mover) {
            self.forced_from = Some(mv.to);
            return Ok(captured);
        }

        self.forced_from = None;
        self.turn_color = mover.opponent();

        if let Some(outcome) = engine.outcome(&self.board, self.turn_color) {
            self.finish(outcome);
        }

        Ok(captured)
    }

    /// 结束对局
    pub fn finish(&mut self, outcome: GameOutcome) {
        self.over = true;
        self.winner = outcome.winner;
        self.end_reason = Some(outcome.reason);
    }

    /// 移除参与者
    ///
    /// 对局未结束时房间进入终止状态：已开局则留下的一方获胜。
    pub fn remove_participant(&mut self, conn_id: ConnectionId) -> Option<Color> {
        let color = self.color_of(conn_id)?;

        if !self.over {
            self.abandoned = true;
            self.finish(GameOutcome {
                winner: self.started.then(|| color.opponent()),
                reason: EndReason::Abandoned,
            });
        }

        match color {
            Color::White => self.slot_a = None,
            Color::Black => self.slot_b = None,
        }
        Some(color)
    }

    /// 生成快照
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            room_id: self.id.clone(),
            board: self.board.rows(),
            turn_color: self.turn_color,
            forced_from: self.forced_from,
            started: self.started,
            over: self.over,
            winner: self.winner,
            end_reason: self.end_reason,
        }
    }
}

/// 房间注册表
///
/// 房间只归注册表所有，其他组件不持有房间可变状态的长期引用。
pub struct RoomStore {
    rooms: DashMap<RoomId, Arc<Mutex<Room>>>,
}

impl RoomStore {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// 生成随机房间 ID（8 位大写十六进制）
    fn generate_id() -> RoomId {
        let value: u64 = rand::random();
        let hex = format!("{:016X}", value);
        hex[..ROOM_ID_LEN].to_string()
    }

    /// 创建房间并注册，返回房间 ID 和初始快照
    pub fn create_room(&self, creator: ConnectionId) -> (RoomId, Snapshot) {
        loop {
            let id = Self::generate_id();
            // ID 冲突时重新生成
            if let Entry::Vacant(slot) = self.rooms.entry(id.clone()) {
                let room = Room::new(id.clone(), creator);
                let snapshot = room.snapshot();
                slot.insert(Arc::new(Mutex::new(room)));
                return (id, snapshot);
            }
        }
    }

    /// 加入房间
    ///
    /// 检查并占用第二个座位在房间锁内原子完成，并发加入时只有一个成功。
    pub fn join_room(
        &self,
        room_id: &str,
        joiner: ConnectionId,
    ) -> Result<Snapshot, RejectReason> {
        self.with_room(room_id, |room| {
            room.seat_opponent(joiner)?;
            Ok(room.snapshot())
        })?
    }

    /// 在房间锁内执行 `f`
    ///
    /// 这是读写房间状态的唯一入口，同一房间的变更不会交错执行。
    pub fn with_room<R>(
        &self,
        room_id: &str,
        f: impl FnOnce(&mut Room) -> R,
    ) -> Result<R, RejectReason> {
        // 先克隆 Arc 再加锁，避免持有分片锁时等待房间锁
        let room = self
            .rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RejectReason::RoomNotFound)?;

        let mut room = room.lock();
        room.last_activity = Instant::now();
        Ok(f(&mut room))
    }

    /// 在房间锁内只读访问，不刷新活跃时间
    pub fn peek<R>(&self, room_id: &str, f: impl FnOnce(&Room) -> R) -> Result<R, RejectReason> {
        let room = self
            .rooms
            .get(room_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(RejectReason::RoomNotFound)?;

        let room = room.lock();
        Ok(f(&room))
    }

    /// 房间当前的参与者
    pub fn participants(&self, room_id: &str) -> Vec<ConnectionId> {
        self.peek(room_id, Room::participants).unwrap_or_default()
    }

    /// 移除房间
    pub fn remove(&self, room_id: &str) -> bool {
        self.rooms.remove(room_id).is_some()
    }

    /// 检查房间是否存在
    pub fn contains(&self, room_id: &str) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// 获取房间数量
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// 移除空闲超过 `ttl` 的房间，返回被移除房间及其参与者
    ///
    /// 正被其他请求持有锁的房间视为活跃，跳过。
    pub fn expire_idle(&self, ttl: Duration) -> Vec<(RoomId, Vec<ConnectionId>)> {
        let candidates: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .is_some_and(|room| room.last_activity.elapsed() >= ttl)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut expired = Vec::new();
        for id in candidates {
            let mut participants = Vec::new();
            let removed = self.rooms.remove_if(&id, |_, room| match room.try_lock() {
                Some(room) if room.last_activity.elapsed() >= ttl => {
                    participants = room.participants();
                    true
                }
                _ => false,
            });
            if removed.is_some() {
                expired.push((id, participants));
            }
        }
        expired
    }
}

impl Default for RoomStore {
    fn default() -> Self {
        Self::new()
    }
}
