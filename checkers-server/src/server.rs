//! 服务器主逻辑

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, Notify};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use protocol::{
    ClientMessage, Connection, ConnectionId, Listener, ProtocolError, RejectReason, RuleEngine,
    ServerMessage, TcpConnection, TcpListener,
};

use crate::config::ServerConfig;
use crate::room::RoomStore;
use crate::session::{Broadcaster, SessionCoordinator};

/// 每个连接的发送队列长度
const OUTBOUND_QUEUE_SIZE: usize = 64;

/// 空闲房间清理间隔
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// 断开时等待发送队列写完的最长时间
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// 已注册连接的发送端
struct Outbound {
    tx: mpsc::Sender<ServerMessage>,
    /// 发送队列满时通知连接任务断开
    kick: Arc<Notify>,
}

/// 新注册连接的接收端
pub struct Registration {
    pub conn_id: ConnectionId,
    pub outbound: mpsc::Receiver<ServerMessage>,
    /// 被注册表踢出时触发
    pub kicked: Arc<Notify>,
}

/// 连接注册表
///
/// 保存每个连接的发送通道，实现广播原语。发送从不等待：
/// 队列已满的连接被视为掉队，直接注销并通知其连接任务断开。
pub struct ConnectionRegistry {
    /// 连接 ID -> 消息发送通道
    senders: DashMap<ConnectionId, Outbound>,
    rooms: Arc<RoomStore>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(rooms: Arc<RoomStore>) -> Self {
        Self {
            senders: DashMap::new(),
            rooms,
            next_id: AtomicU64::new(1),
        }
    }

    /// 注册新连接
    pub fn register(&self) -> Registration {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, outbound) = mpsc::channel(OUTBOUND_QUEUE_SIZE);
        let kicked = Arc::new(Notify::new());
        self.senders.insert(
            conn_id,
            Outbound {
                tx,
                kick: Arc::clone(&kicked),
            },
        );
        Registration {
            conn_id,
            outbound,
            kicked,
        }
    }

    pub fn unregister(&self, conn_id: ConnectionId) {
        self.senders.remove(&conn_id);
    }

    /// 当前连接数
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[async_trait]
impl Broadcaster for ConnectionRegistry {
    async fn send_to(&self, conn_id: ConnectionId, msg: ServerMessage) {
        let result = match self.senders.get(&conn_id) {
            Some(entry) => entry.value().tx.try_send(msg),
            None => {
                debug!(conn_id, "connection gone, message dropped");
                return;
            }
        };

        match result {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id, "outbound queue full, dropping lagging connection");
                if let Some((_, outbound)) = self.senders.remove(&conn_id) {
                    outbound.kick.notify_one();
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(conn_id, "writer closed, message dropped");
            }
        }
    }

    async fn send_to_room(&self, room_id: &str, msg: ServerMessage) {
        for conn_id in self.rooms.participants(room_id) {
            self.send_to(conn_id, msg.clone()).await;
        }
    }
}

/// 服务器状态
pub struct ServerState {
    pub config: ServerConfig,
    pub registry: Arc<ConnectionRegistry>,
    pub coordinator: SessionCoordinator,
}

impl ServerState {
    pub fn new(config: ServerConfig) -> Self {
        let rooms = Arc::new(RoomStore::new());
        let registry = Arc::new(ConnectionRegistry::new(Arc::clone(&rooms)));
        let coordinator =
            SessionCoordinator::new(rooms, RuleEngine::new(config.rules), registry.clone());

        Self {
            config,
            registry,
            coordinator,
        }
    }
}

/// 消息处理器
pub struct MessageHandler;

impl MessageHandler {
    /// 处理客户端消息，返回只发给请求方的回复
    ///
    /// 成功产生的事件已由会话协调器发出。
    pub async fn handle(
        state: &ServerState,
        conn_id: ConnectionId,
        msg: ClientMessage,
    ) -> Option<ServerMessage> {
        let coordinator = &state.coordinator;

        let result = match msg {
            ClientMessage::CreateRoom => coordinator.create_room(conn_id).await.map(drop),
            ClientMessage::JoinRoom { room_id } => {
                coordinator.join_room(conn_id, &room_id).await.map(drop)
            }
            ClientMessage::LeaveRoom => coordinator
                .leave(conn_id)
                .await
                .map(drop)
                .ok_or(RejectReason::NotInRoom),
            ClientMessage::SubmitMove {
                room_id,
                from_row,
                from_col,
                to_row,
                to_col,
            } => coordinator
                .submit_move(conn_id, &room_id, from_row, from_col, to_row, to_col)
                .await
                .map(drop),
            ClientMessage::Ping => return Some(ServerMessage::Pong),
        };

        result.err().map(ServerMessage::rejected)
    }
}

/// TCP 服务器
pub struct Server {
    listener: TcpListener,
    state: Arc<ServerState>,
}

impl Server {
    /// 按配置绑定监听地址
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.bind_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("无法监听 {}", addr))?;

        Ok(Self {
            listener,
            state: Arc::new(ServerState::new(config)),
        })
    }

    pub fn local_addr(&self) -> Option<String> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> Arc<ServerState> {
        Arc::clone(&self.state)
    }

    /// 运行接受循环
    pub async fn run(mut self) -> Result<()> {
        info!(addr = ?self.local_addr(), "server listening");

        if let Some(ttl) = self.state.config.idle_room_ttl() {
            tokio::spawn(sweep_idle_rooms(Arc::clone(&self.state), ttl));
        }

        loop {
            let conn = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };

            if self.state.registry.len() >= self.state.config.max_connections {
                warn!(peer = ?conn.peer_addr(), "connection limit reached, rejecting");
                continue;
            }

            // 先注册再启动任务，连接计数不会漏算
            let registration = self.state.registry.register();
            tokio::spawn(serve_connection(Arc::clone(&self.state), conn, registration));
        }
    }
}

/// 定期清理空闲房间
async fn sweep_idle_rooms(state: Arc<ServerState>, ttl: Duration) {
    let period = IDLE_SWEEP_INTERVAL.min(ttl).max(Duration::from_secs(1));
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        let expired = state.coordinator.expire_idle_rooms(ttl);
        if !expired.is_empty() {
            info!(count = expired.len(), "idle rooms expired");
        }
    }
}

/// 处理单个连接：读循环在当前任务，写循环在独立任务
async fn serve_connection(
    state: Arc<ServerState>,
    conn: TcpConnection,
    registration: Registration,
) {
    let Registration {
        conn_id,
        mut outbound,
        kicked,
    } = registration;
    let peer = conn.peer_addr().unwrap_or_default();
    info!(conn_id, peer = %peer, "client connected");

    let (mut reader, mut writer) = conn.split();

    let mut writer_task = tokio::spawn(async move {
        while let Some(msg) = outbound.recv().await {
            if let Err(e) = writer.write_frame(&msg).await {
                debug!(conn_id, error = %e, "write failed");
                break;
            }
        }
    });

    let heartbeat = state.config.heartbeat_timeout();
    loop {
        let read = tokio::select! {
            read = timeout(heartbeat, reader.read_frame()) => read,
            _ = kicked.notified() => {
                info!(conn_id, "dropped by registry");
                break;
            }
        };

        let msg: ClientMessage = match read {
            Ok(Ok(msg)) => msg,
            Ok(Err(ProtocolError::ConnectionClosed)) => break,
            Ok(Err(e)) => {
                warn!(conn_id, error = %e, "read failed");
                break;
            }
            Err(_) => {
                info!(conn_id, "heartbeat timeout");
                break;
            }
        };

        if let Some(reply) = MessageHandler::handle(&state, conn_id, msg).await {
            state.registry.send_to(conn_id, reply).await;
        }
    }

    state.coordinator.disconnect(conn_id).await;
    // 注销后发送端全部释放，写任务写完队列中剩余的消息后退出
    state.registry.unregister(conn_id);
    if timeout(WRITER_DRAIN_TIMEOUT, &mut writer_task).await.is_err() {
        writer_task.abort();
    }
    info!(conn_id, peer = %peer, "client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{Color, Connector, EndReason, Position, Snapshot, TcpConnector};

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        }
    }

    async fn start(config: ServerConfig) -> String {
        let server = Server::bind(config).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    async fn recv(conn: &mut TcpConnection) -> ServerMessage {
        timeout(Duration::from_secs(5), conn.recv()).await.unwrap().unwrap()
    }

    fn expect_snapshot(msg: ServerMessage) -> Snapshot {
        msg.snapshot().cloned().unwrap_or_else(|| panic!("no snapshot in {:?}", msg))
    }

    #[tokio::test]
    async fn test_handle_ping_and_reject() {
        let state = ServerState::new(ServerConfig::default());
        let conn_id = state.registry.register().conn_id;

        let reply = MessageHandler::handle(&state, conn_id, ClientMessage::Ping).await;
        assert_eq!(reply, Some(ServerMessage::Pong));

        let reply = MessageHandler::handle(
            &state,
            conn_id,
            ClientMessage::JoinRoom {
                room_id: "NOSUCHID".to_string(),
            },
        )
        .await;
        assert_eq!(reply, Some(ServerMessage::rejected(RejectReason::RoomNotFound)));

        let reply = MessageHandler::handle(&state, conn_id, ClientMessage::LeaveRoom).await;
        assert_eq!(reply, Some(ServerMessage::rejected(RejectReason::NotInRoom)));
    }

    #[tokio::test]
    async fn test_registry_delivers_to_room() {
        let state = ServerState::new(ServerConfig::default());
        let Registration {
            conn_id: white,
            outbound: mut white_rx,
            ..
        } = state.registry.register();
        let Registration {
            conn_id: black,
            outbound: mut black_rx,
            ..
        } = state.registry.register();

        let (room_id, _) = state.coordinator.create_room(white).await.unwrap();
        state.coordinator.join_room(black, &room_id).await.unwrap();

        assert!(matches!(white_rx.recv().await, Some(ServerMessage::RoomCreated { .. })));
        assert!(matches!(white_rx.recv().await, Some(ServerMessage::GameStarted { .. })));
        assert!(matches!(black_rx.recv().await, Some(ServerMessage::RoomJoined { .. })));
        assert!(matches!(black_rx.recv().await, Some(ServerMessage::GameStarted { .. })));

        // 已注销的连接不再接收消息
        state.registry.unregister(black);
        state.coordinator.submit_move(white, &room_id, 5, 0, 4, 1).await.unwrap();
        assert!(matches!(white_rx.recv().await, Some(ServerMessage::BoardUpdated { .. })));
        assert!(black_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_lagging_peer_does_not_block_moves() {
        let state = ServerState::new(ServerConfig::default());
        let white = state.registry.register();
        let black = state.registry.register();

        let (room_id, _) = state.coordinator.create_room(white.conn_id).await.unwrap();
        state.coordinator.join_room(black.conn_id, &room_id).await.unwrap();

        // 黑方从不读取，队列里已有 RoomJoined 和 GameStarted
        for _ in 0..OUTBOUND_QUEUE_SIZE - 2 {
            state.registry.send_to(black.conn_id, ServerMessage::Pong).await;
        }

        let result = timeout(
            Duration::from_secs(2),
            state.coordinator.submit_move(white.conn_id, &room_id, 5, 0, 4, 1),
        )
        .await;
        assert!(matches!(result, Ok(Ok(_))));

        // 掉队的连接被注销并收到断开通知
        assert_eq!(state.registry.len(), 1);
        assert!(timeout(Duration::from_secs(1), black.kicked.notified()).await.is_ok());

        let mut white_rx = white.outbound;
        while let Ok(msg) = white_rx.try_recv() {
            if matches!(msg, ServerMessage::BoardUpdated { .. }) {
                return;
            }
        }
        panic!("white never received the board update");
    }

    #[tokio::test]
    async fn test_pending_replies_flushed_on_close() {
        use protocol::{encode_frame, FrameReader};
        use tokio::io::AsyncWriteExt;

        let addr = start(local_config()).await;
        let stream = tokio::net::TcpStream::connect(&addr).await.unwrap();
        let (read_half, mut write_half) = stream.into_split();

        let join = ClientMessage::JoinRoom {
            room_id: "NOSUCHID".to_string(),
        };
        write_half.write_all(&encode_frame(&join).unwrap()).await.unwrap();
        write_half.write_all(&encode_frame(&ClientMessage::Ping).unwrap()).await.unwrap();
        // 发完即关闭写端，服务端读到 EOF 后断开
        write_half.shutdown().await.unwrap();

        let mut reader = FrameReader::new(read_half);
        let first: ServerMessage = timeout(Duration::from_secs(5), reader.read_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first, ServerMessage::rejected(RejectReason::RoomNotFound));
        let second: ServerMessage = timeout(Duration::from_secs(5), reader.read_frame())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second, ServerMessage::Pong);
    }

    #[tokio::test]
    async fn test_two_clients_over_tcp() {
        let addr = start(local_config()).await;

        let mut white = TcpConnector.connect(&addr).await.unwrap();
        white.send(&ClientMessage::CreateRoom).await.unwrap();
        let room_id = match recv(&mut white).await {
            ServerMessage::RoomCreated {
                room_id,
                your_color,
                ..
            } => {
                assert_eq!(your_color, Color::White);
                room_id
            }
            other => panic!("unexpected {:?}", other),
        };

        let mut black = TcpConnector.connect(&addr).await.unwrap();
        black
            .send(&ClientMessage::JoinRoom {
                room_id: room_id.clone(),
            })
            .await
            .unwrap();
        assert_eq!(
            recv(&mut black).await,
            ServerMessage::RoomJoined {
                room_id: room_id.clone(),
                your_color: Color::Black,
            }
        );
        assert!(expect_snapshot(recv(&mut black).await).started);
        assert!(expect_snapshot(recv(&mut white).await).started);

        white
            .send(&ClientMessage::SubmitMove {
                room_id: room_id.clone(),
                from_row: 5,
                from_col: 0,
                to_row: 4,
                to_col: 1,
            })
            .await
            .unwrap();
        let seen_by_white = expect_snapshot(recv(&mut white).await);
        let seen_by_black = expect_snapshot(recv(&mut black).await);
        assert_eq!(seen_by_white, seen_by_black);
        assert_eq!(seen_by_white.turn_color, Color::Black);
        assert!(seen_by_white.cell(Position::new_unchecked(4, 1)).is_some());

        // 不是自己的回合
        white
            .send(&ClientMessage::SubmitMove {
                room_id: room_id.clone(),
                from_row: 5,
                from_col: 2,
                to_row: 4,
                to_col: 3,
            })
            .await
            .unwrap();
        assert_eq!(
            recv(&mut white).await,
            ServerMessage::rejected(RejectReason::NotYourTurn)
        );

        white.send(&ClientMessage::Ping).await.unwrap();
        assert_eq!(recv(&mut white).await, ServerMessage::Pong);

        // 白方断线，黑方获胜
        drop(white);
        match recv(&mut black).await {
            ServerMessage::OpponentLeft { snapshot } => {
                assert!(snapshot.over);
                assert_eq!(snapshot.winner, Some(Color::Black));
                assert_eq!(snapshot.end_reason, Some(EndReason::Abandoned));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let addr = start(ServerConfig {
            max_connections: 1,
            ..local_config()
        })
        .await;

        let mut first = TcpConnector.connect(&addr).await.unwrap();
        first.send(&ClientMessage::Ping).await.unwrap();
        assert_eq!(recv(&mut first).await, ServerMessage::Pong);

        let mut second = TcpConnector.connect(&addr).await.unwrap();
        let _ = second.send(&ClientMessage::Ping).await;
        let result: protocol::Result<ServerMessage> =
            timeout(Duration::from_secs(5), second.recv()).await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_closes_connection() {
        let addr = start(ServerConfig {
            heartbeat_timeout_secs: 1,
            ..local_config()
        })
        .await;

        let mut idle = TcpConnector.connect(&addr).await.unwrap();
        let result: protocol::Result<ServerMessage> =
            timeout(Duration::from_secs(5), idle.recv()).await.unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed) | Err(ProtocolError::Io(_))));
    }
}
