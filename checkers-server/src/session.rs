//! 会话协调
//!
//! 把连接映射到房间里的座位，按回合和连吃规则把关走棋，
//! 在房间锁释放之后再广播结果。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use protocol::{
    Color, ConnectionId, Move, RejectReason, RoomId, RuleEngine, ServerMessage, Snapshot,
};

use crate::room::RoomStore;

/// 广播原语
#[async_trait]
pub trait Broadcaster: Send + Sync {
    /// 发送给单个连接
    async fn send_to(&self, conn_id: ConnectionId, msg: ServerMessage);

    /// 发送给房间内所有参与者
    async fn send_to_room(&self, room_id: &str, msg: ServerMessage);
}

/// 会话协调器
pub struct SessionCoordinator {
    rooms: Arc<RoomStore>,
    engine: RuleEngine,
    /// 连接 ID -> 所在房间
    memberships: DashMap<ConnectionId, RoomId>,
    broadcaster: Arc<dyn Broadcaster>,
}

impl SessionCoordinator {
    pub fn new(
        rooms: Arc<RoomStore>,
        engine: RuleEngine,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        Self {
            rooms,
            engine,
            memberships: DashMap::new(),
            broadcaster,
        }
    }

    pub fn rooms(&self) -> &Arc<RoomStore> {
        &self.rooms
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    /// 连接当前所在的房间
    pub fn room_of(&self, conn_id: ConnectionId) -> Option<RoomId> {
        self.memberships.get(&conn_id).map(|entry| entry.value().clone())
    }

    /// 读取房间快照
    pub fn snapshot(&self, room_id: &str) -> Result<Snapshot, RejectReason> {
        self.rooms.with_room(room_id, |room| room.snapshot())
    }

    /// 创建房间，创建者执白
    pub async fn create_room(
        &self,
        conn_id: ConnectionId,
    ) -> Result<(RoomId, Snapshot), RejectReason> {
        self.ensure_free(conn_id).await?;

        let (room_id, snapshot) = self.rooms.create_room(conn_id);
        self.memberships.insert(conn_id, room_id.clone());
        info!(conn_id, room_id = %room_id, "room created");

        self.broadcaster
            .send_to(
                conn_id,
                ServerMessage::RoomCreated {
                    room_id: room_id.clone(),
                    your_color: Color::White,
                    snapshot: snapshot.clone(),
                },
            )
            .await;

        Ok((room_id, snapshot))
    }

    /// 加入房间，加入者执黑，成功后对局开始
    pub async fn join_room(
        &self,
        conn_id: ConnectionId,
        room_id: &str,
    ) -> Result<Snapshot, RejectReason> {
        self.ensure_free(conn_id).await?;

        let snapshot = self.rooms.join_room(room_id, conn_id).inspect_err(|reason| {
            warn!(conn_id, room_id, %reason, "join rejected");
        })?;
        self.memberships.insert(conn_id, room_id.to_string());
        info!(conn_id, room_id, "player joined, game started");

        self.broadcaster
            .send_to(
                conn_id,
                ServerMessage::RoomJoined {
                    room_id: room_id.to_string(),
                    your_color: Color::Black,
                },
            )
            .await;
        self.broadcaster
            .send_to_room(room_id, ServerMessage::GameStarted { snapshot: snapshot.clone() })
            .await;

        Ok(snapshot)
    }

    /// 提交走棋
    ///
    /// 整个变更（包括终局判定）在房间锁内完成，锁释放后再广播快照。
    pub async fn submit_move(
        &self,
        conn_id: ConnectionId,
        room_id: &str,
        from_row: u8,
        from_col: u8,
        to_row: u8,
        to_col: u8,
    ) -> Result<Snapshot, RejectReason> {
        let engine = &self.engine;
        let result = self
            .rooms
            .with_room(room_id, |room| {
                let color = room.color_of(conn_id).ok_or(RejectReason::NotInRoom)?;
                if room.over {
                    return Err(RejectReason::GameOver);
                }
                if !room.started {
                    return Err(RejectReason::GameNotStarted);
                }
                if color != room.turn_color {
                    return Err(RejectReason::NotYourTurn);
                }

                let mv = Move::from_coords(from_row, from_col, to_row, to_col)
                    .ok_or(RejectReason::IllegalMove)?;
                room.make_move(engine, mv)?;
                Ok(room.snapshot())
            })
            .and_then(|result| result);

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(reason) => {
                warn!(
                    conn_id,
                    room_id,
                    from = ?(from_row, from_col),
                    to = ?(to_row, to_col),
                    %reason,
                    "move rejected"
                );
                return Err(reason);
            }
        };

        debug!(
            conn_id,
            room_id,
            from = ?(from_row, from_col),
            to = ?(to_row, to_col),
            forced = ?snapshot.forced_from,
            "move applied"
        );
        if snapshot.over {
            info!(room_id, winner = ?snapshot.winner, reason = ?snapshot.end_reason, "game over");
        }

        self.broadcaster
            .send_to_room(room_id, ServerMessage::BoardUpdated { snapshot: snapshot.clone() })
            .await;

        Ok(snapshot)
    }

    /// 离开当前房间
    ///
    /// 对局未结束时房间终止，剩下的一方收到最终快照；房间空了就移除。
    pub async fn leave(&self, conn_id: ConnectionId) -> Option<Snapshot> {
        let (_, room_id) = self.memberships.remove(&conn_id)?;

        let (snapshot, empty) = match self.rooms.with_room(&room_id, |room| {
            room.remove_participant(conn_id);
            (room.snapshot(), room.is_empty())
        }) {
            Ok(result) => result,
            // 房间已被过期清理
            Err(_) => return None,
        };

        if empty {
            self.rooms.remove(&room_id);
            info!(conn_id, room_id = %room_id, "room closed");
        } else {
            info!(conn_id, room_id = %room_id, winner = ?snapshot.winner, "player left");
            self.broadcaster
                .send_to_room(&room_id, ServerMessage::OpponentLeft { snapshot: snapshot.clone() })
                .await;
        }

        Some(snapshot)
    }

    /// 连接断开
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        if let Some(snapshot) = self.leave(conn_id).await {
            debug!(conn_id, room_id = %snapshot.room_id, "disconnected from room");
        }
    }

    /// 清理空闲超时的房间，返回被清理的房间 ID
    pub fn expire_idle_rooms(&self, ttl: Duration) -> Vec<RoomId> {
        let expired = self.rooms.expire_idle(ttl);

        expired
            .into_iter()
            .map(|(room_id, participants)| {
                for conn_id in participants {
                    self.memberships.remove_if(&conn_id, |_, current| *current == room_id);
                }
                info!(room_id = %room_id, "idle room expired");
                room_id
            })
            .collect()
    }

    /// 已在未结束的对局中则拒绝；所在房间已结束则先自动离开
    async fn ensure_free(&self, conn_id: ConnectionId) -> Result<(), RejectReason> {
        let Some(current) = self.room_of(conn_id) else {
            return Ok(());
        };

        // 只读，被拒绝的请求不算房间活跃
        let over = self.rooms.peek(&current, |room| room.over).unwrap_or(true);
        if !over {
            warn!(conn_id, room_id = %current, "already in a room");
            return Err(RejectReason::AlreadyInRoom);
        }

        self.leave(conn_id).await;
        Ok(())
    }
}
