//! Process-wide owner of the transport, the peer table, and the room
//! registry
//!
//! The worker never mutates room state directly: every room-scoped
//! operation is routed into the owning room's command channel, keeping
//! each room single-writer.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::auth::AuthApi;
use crate::codec::{BytesReader, CodecError, GameCode};
use crate::config::Config;
use crate::game::room::{Room, RoomCommand, RoomHandle};
use crate::game::RoomRegistry;
use crate::metrics::Metrics;
use crate::net::connection::{Identity, SweepStatus};
use crate::net::transport::InboundDisposition;
use crate::net::Connection;
use crate::protocol::disconnect::DisconnectReason;
use crate::protocol::root::RootMessage;
use crate::protocol::settings::GameSettings;
use crate::protocol::{Hello, PacketKind, PROTOCOL_VERSION};

/// Cadence of the retransmit/keepalive sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Datagrams larger than this are nonsense for our protocol.
const MAX_DATAGRAM: usize = 2048;

/// The worker: one per process.
pub struct Worker {
    config: Arc<Config>,
    socket: Arc<UdpSocket>,
    peers: Arc<DashMap<SocketAddr, Arc<Connection>>>,
    rooms: RoomRegistry,
    auth: AuthApi,
    metrics: Metrics,
    next_client_id: AtomicU32,
    code_rng: Mutex<ChaCha8Rng>,
}

impl Worker {
    pub async fn bind(config: Arc<Config>) -> std::io::Result<Arc<Self>> {
        let socket = Arc::new(UdpSocket::bind(config.server_addr).await?);
        info!(addr = %config.server_addr, "Transport listening");

        let auth = AuthApi::new(&config);
        let metrics = Metrics::new(&config);

        Ok(Arc::new(Self {
            config,
            socket,
            peers: Arc::new(DashMap::new()),
            rooms: Arc::new(DashMap::new()),
            auth,
            metrics,
            next_client_id: AtomicU32::new(1),
            code_rng: Mutex::new(ChaCha8Rng::seed_from_u64(rand::random())),
        }))
    }

    pub fn rooms(&self) -> RoomRegistry {
        self.rooms.clone()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Receive loop plus the sweep task. Runs until the process exits.
    pub async fn run(self: Arc<Self>) {
        self.clone().spawn_sweeper();

        let mut buffer = [0u8; MAX_DATAGRAM];
        loop {
            match self.socket.recv_from(&mut buffer).await {
                Ok((len, addr)) => {
                    let bytes = buffer[..len].to_vec();
                    self.handle_datagram(addr, &bytes).await;
                }
                Err(error) => {
                    warn!(%error, "recv failed");
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }

    /// Periodic retransmit, keepalive, and timeout handling for every
    /// peer.
    fn spawn_sweeper(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                interval.tick().await;
                let now = Instant::now();

                let peers: Vec<(SocketAddr, Arc<Connection>)> = self
                    .peers
                    .iter()
                    .map(|entry| (*entry.key(), entry.value().clone()))
                    .collect();

                for (addr, conn) in peers {
                    if conn.is_disconnected() {
                        if !conn.in_lame_duck().await {
                            self.peers.remove(&addr);
                        }
                        continue;
                    }

                    match conn.sweep(now).await {
                        SweepStatus::Alive => {}
                        SweepStatus::TimedOut | SweepStatus::Silent => {
                            debug!(client_id = conn.client_id, %addr, "peer timed out");
                            self.drop_peer(&conn, DisconnectReason::Error).await;
                        }
                    }
                }
            }
        });
    }

    /// Tear a peer down and run the normal leave flow in its room.
    async fn drop_peer(&self, conn: &Arc<Connection>, reason: DisconnectReason) {
        conn.mark_disconnected().await;
        if let Some(code) = conn.room_code().await {
            let handle = self.rooms.get(&code).map(|h| h.value().clone());
            if let Some(handle) = handle {
                let _ = handle
                    .cmd_tx
                    .send(RoomCommand::Leave { client_id: conn.client_id, reason })
                    .await;
            }
        }
        self.auth.forget(conn.client_id);
    }

    async fn handle_datagram(&self, addr: SocketAddr, bytes: &[u8]) {
        let mut reader = BytesReader::new(bytes);
        let kind = match reader.read_u8().map(PacketKind::from_wire) {
            Ok(Ok(kind)) => kind,
            _ => {
                debug!(%addr, "datagram with unknown packet kind");
                return;
            }
        };

        if kind == PacketKind::Hello {
            self.handle_hello(addr, reader).await;
            return;
        }

        let Some(conn) = self.peers.get(&addr).map(|e| e.value().clone()) else {
            // Everything except Hello requires an established peer.
            return;
        };

        if !conn.limiter.check_packet() {
            debug!(client_id = conn.client_id, "inbound rate limit hit");
            return;
        }

        match kind {
            PacketKind::Reliable => {
                let nonce = match reader.read_u16_be() {
                    Ok(nonce) => nonce,
                    Err(_) => return,
                };
                // Ack first, even for duplicates and lame ducks.
                let _ = conn.send_ack(&[nonce]).await;
                if conn.is_disconnected() {
                    return;
                }
                if conn.register_inbound(nonce).await == InboundDisposition::Duplicate {
                    return;
                }
                self.handle_root_stream(&conn, reader).await;
            }
            PacketKind::Unreliable => {
                conn.note_inbound().await;
                if conn.is_disconnected() {
                    return;
                }
                self.handle_root_stream(&conn, reader).await;
            }
            PacketKind::Ack => {
                while let Ok(nonce) = reader.read_u16_be() {
                    conn.handle_ack(nonce).await;
                }
            }
            PacketKind::Ping => {
                if let Ok(nonce) = reader.read_u16_be() {
                    conn.register_inbound(nonce).await;
                    let _ = conn.send_ack(&[nonce]).await;
                }
            }
            PacketKind::Disconnect => {
                let reason = if reader.read_bool().unwrap_or(false) {
                    let value = reader.read_u8().unwrap_or(0);
                    let message = reader.read_string().ok();
                    DisconnectReason::from_wire(value, message)
                        .unwrap_or(DisconnectReason::ExitGame)
                } else {
                    DisconnectReason::ExitGame
                };
                info!(client_id = conn.client_id, %addr, ?reason, "peer disconnected");
                self.drop_peer(&conn, reason).await;
            }
            PacketKind::Hello => unreachable!("handled above"),
        }
    }

    async fn handle_hello(&self, addr: SocketAddr, mut reader: BytesReader<'_>) {
        let hello = match Hello::decode(&mut reader) {
            Ok(hello) => hello,
            Err(error) => {
                debug!(%addr, %error, "malformed hello");
                return;
            }
        };

        // The guard from `get` must drop before any insert on the map.
        let existing = self.peers.get(&addr).map(|e| e.value().clone());
        let conn = match existing {
            Some(conn) => conn,
            None => {
                let client_id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
                let conn =
                    Arc::new(Connection::new(client_id, addr, self.socket.clone(), 0));
                self.peers.insert(addr, conn.clone());
                info!(client_id, %addr, username = %hello.username, "peer connected");
                conn
            }
        };

        // Hellos retransmit too; always re-ack.
        conn.register_inbound(hello.nonce).await;
        let _ = conn.send_ack(&[hello.nonce]).await;

        if conn.identity().is_some() {
            return;
        }

        if hello.version != PROTOCOL_VERSION {
            let _ = conn.send_disconnect(&DisconnectReason::IncorrectVersion).await;
            return;
        }

        conn.set_identity(Identity::from_hello(&hello));

        // Resolve the account off the hot path; anti-cheat reads the
        // cached result later.
        let auth = self.auth.clone();
        let client_id = conn.client_id;
        let token = hello.auth_token.clone();
        tokio::spawn(async move {
            if let Err(error) = auth.connection_user(client_id, &token).await {
                warn!(client_id, %error, "auth lookup failed");
            }
        });
    }

    async fn handle_root_stream(&self, conn: &Arc<Connection>, mut reader: BytesReader<'_>) {
        loop {
            if !reader.has_remaining() {
                break;
            }
            match RootMessage::decode_client(&mut reader) {
                Ok(message) => self.route_root(conn, message).await,
                Err(error) => {
                    self.register_malformed(conn, &error).await;
                    break;
                }
            }
        }
    }

    async fn register_malformed(&self, conn: &Arc<Connection>, error: &CodecError) {
        debug!(client_id = conn.client_id, %error, "malformed root message");
        if !conn.limiter.strike_malformed() {
            warn!(client_id = conn.client_id, "malformed strike budget spent, dropping peer");
            let _ = conn.send_disconnect(&DisconnectReason::Error).await;
            self.drop_peer(conn, DisconnectReason::Error).await;
        }
    }

    async fn route_root(&self, conn: &Arc<Connection>, message: RootMessage) {
        match message {
            RootMessage::HostGame { settings } => self.host_game(conn, settings).await,
            RootMessage::JoinGame { code } => self.join_game(conn, code).await,
            RootMessage::GameData { code, messages } => {
                self.forward(conn, code, RoomCommand::GameData {
                    sender: conn.client_id,
                    target: None,
                    messages,
                })
                .await;
            }
            RootMessage::GameDataTo { code, target, messages } => {
                self.forward(conn, code, RoomCommand::GameData {
                    sender: conn.client_id,
                    target: Some(target),
                    messages,
                })
                .await;
            }
            RootMessage::StartGame { code } => {
                self.forward(conn, code, RoomCommand::Start { sender: conn.client_id }).await;
            }
            RootMessage::EndGame { code, reason, .. } => {
                self.forward(conn, code, RoomCommand::End { sender: conn.client_id, reason })
                    .await;
            }
            RootMessage::AlterGame { code, privacy } => {
                self.forward(conn, code, RoomCommand::AlterPrivacy {
                    sender: conn.client_id,
                    privacy,
                })
                .await;
            }
            RootMessage::KickPlayer { code, target, banned } => {
                self.forward(conn, code, RoomCommand::Kick {
                    sender: conn.client_id,
                    target,
                    ban: banned,
                })
                .await;
            }
            other => {
                debug!(client_id = conn.client_id, ?other, "unroutable root message");
            }
        }
    }

    /// Create a room and hand its code back.
    async fn host_game(&self, conn: &Arc<Connection>, settings: GameSettings) {
        let code = self.allocate_code().await;
        let (room, handle) = Room::create(
            code,
            settings,
            self.config.rooms.clone(),
            self.auth.clone(),
            self.metrics.clone(),
            self.rooms.clone(),
        );
        self.rooms.insert(code, handle);
        tokio::spawn(room.run());

        info!(room = %code, client_id = conn.client_id, "room created");
        let _ = conn.send_reliable(&[RootMessage::HostGameAck { code }]).await;
    }

    /// Admin-facing room creation (no hosting client yet).
    pub async fn create_room(&self, settings: GameSettings) -> GameCode {
        let code = self.allocate_code().await;
        let (room, handle) = Room::create(
            code,
            settings,
            self.config.rooms.clone(),
            self.auth.clone(),
            self.metrics.clone(),
            self.rooms.clone(),
        );
        self.rooms.insert(code, handle);
        tokio::spawn(room.run());
        info!(room = %code, "room created by admin");
        code
    }

    async fn allocate_code(&self) -> GameCode {
        let mut rng = self.code_rng.lock().await;
        loop {
            let code = GameCode::random(&mut *rng);
            if !self.rooms.contains_key(&code) {
                return code;
            }
        }
    }

    async fn join_game(&self, conn: &Arc<Connection>, code: GameCode) {
        // Joining a new room implies leaving the old one.
        if let Some(previous) = conn.room_code().await {
            if previous != code {
                let handle = self.rooms.get(&previous).map(|h| h.value().clone());
                if let Some(handle) = handle {
                    let _ = handle
                        .cmd_tx
                        .send(RoomCommand::Leave {
                            client_id: conn.client_id,
                            reason: DisconnectReason::ExitGame,
                        })
                        .await;
                }
            }
        }

        match self.rooms.get(&code).map(|h| h.value().clone()) {
            Some(handle) => {
                let _ = handle.cmd_tx.send(RoomCommand::Join { conn: conn.clone() }).await;
            }
            None => {
                debug!(client_id = conn.client_id, room = %code, "join for unknown room");
                let _ = conn.send_disconnect(&DisconnectReason::GameNotFound).await;
            }
        }
    }

    async fn forward(&self, conn: &Arc<Connection>, code: GameCode, command: RoomCommand) {
        // The client's own room pointer is authoritative; a spoofed
        // code in the message cannot reach another room.
        let Some(own_code) = conn.room_code().await else {
            debug!(client_id = conn.client_id, "room-scoped message while roomless");
            return;
        };
        if own_code != code {
            debug!(
                client_id = conn.client_id,
                claimed = %code,
                actual = %own_code,
                "room code mismatch"
            );
            return;
        }
        let handle = self.rooms.get(&code).map(|h| h.value().clone());
        if let Some(handle) = handle {
            let _ = handle.cmd_tx.send(command).await;
        }
    }

    /// Destroy every room; used on graceful shutdown.
    pub async fn shutdown(&self) {
        let handles: Vec<RoomHandle> =
            self.rooms.iter().map(|entry| entry.value().clone()).collect();
        for handle in handles {
            let _ = handle
                .cmd_tx
                .send(RoomCommand::Destroy { reason: DisconnectReason::ServerRequest })
                .await;
        }
        // Give room tasks a moment to flush and say goodbye.
        tokio::time::sleep(Duration::from_millis(200)).await;
        info!("worker shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RoomsConfig;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            server_addr: "127.0.0.1:0".parse().expect("test addr"),
            admin_addr: "127.0.0.1:0".parse().expect("test addr"),
            log_level: "info".into(),
            auth_base_url: "http://localhost:0".into(),
            auth_api_token: "t".into(),
            metrics_base_url: "http://localhost:0".into(),
            metrics_api_token: "t".into(),
            rooms: RoomsConfig::default(),
        })
    }

    #[tokio::test]
    async fn admin_room_creation_registers_a_room() {
        let worker = Worker::bind(test_config()).await.unwrap();
        let code = worker.create_room(GameSettings::default()).await;
        assert!(worker.rooms.contains_key(&code));
    }

    #[tokio::test]
    async fn allocated_codes_are_unique_and_v2() {
        let worker = Worker::bind(test_config()).await.unwrap();
        let a = worker.create_room(GameSettings::default()).await;
        let b = worker.create_room(GameSettings::default()).await;
        assert_ne!(a, b);
        assert!(a.is_v2());
        assert!(b.is_v2());
    }

    #[tokio::test]
    async fn hello_registers_a_peer_and_acks() {
        let worker = Worker::bind(test_config()).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = client.local_addr().unwrap();

        let mut hello = crate::codec::BytesWriter::new();
        hello.write_u8(PacketKind::Hello as u8);
        hello.write_u16_be(1);
        hello.write_u8(0);
        hello.write_i32(PROTOCOL_VERSION);
        hello.write_string("Alice");
        hello.write_u32(0);
        hello.write_u8(1);

        worker.handle_datagram(addr, hello.as_slice()).await;
        assert_eq!(worker.peer_count(), 1);

        let conn = worker.peers.get(&addr).unwrap().value().clone();
        assert_eq!(conn.username(), "Alice");

        // The hello nonce was acked back to the client socket.
        let mut buf = [0u8; 16];
        let (len, _) = client.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..len], &[PacketKind::Ack as u8, 0, 1]);
    }

    #[tokio::test]
    async fn version_mismatch_is_rejected() {
        let worker = Worker::bind(test_config()).await.unwrap();

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = client.local_addr().unwrap();

        let mut hello = crate::codec::BytesWriter::new();
        hello.write_u8(PacketKind::Hello as u8);
        hello.write_u16_be(1);
        hello.write_u8(0);
        hello.write_i32(12345);
        hello.write_string("Old");
        hello.write_u32(0);
        hello.write_u8(1);

        worker.handle_datagram(addr, hello.as_slice()).await;
        let conn = worker.peers.get(&addr).unwrap().value().clone();
        assert!(conn.is_disconnected());
    }
}
