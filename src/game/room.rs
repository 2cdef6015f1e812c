//! Room state machine and authoritative tick loop

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::anticheat::{check_rpc, InfractionBuffer, RpcContext, RpcVerdict};
use crate::auth::AuthApi;
use crate::codec::{BytesReader, BytesWriter, GameCode, Vector2};
use crate::config::RoomsConfig;
use crate::game::events::{EventHub, RoomEvent};
use crate::game::objects::{
    components::{ComponentBody, RosterEntry},
    ComponentClass, ObjectGraph, SpawnType, ROOM_OWNER,
};
use crate::game::player::Player;
use crate::metrics::Metrics;
use crate::net::Connection;
use crate::protocol::disconnect::DisconnectReason;
use crate::protocol::game_data::{GameDataMessage, SpawnComponent};
use crate::protocol::root::{GamePrivacy, RootMessage};
use crate::protocol::rpc::RpcTag;
use crate::protocol::settings::GameSettings;
use crate::protocol::SERVER_CLIENT_ID;
use crate::util::time::{tick_delta, TICK_DURATION};

/// How long the server waits for Ready packets after a start.
pub const START_READY_WINDOW: Duration = Duration::from_secs(3);

/// Movement forwarding ignores deltas at or below this magnitude.
const MOVEMENT_COUNT_THRESHOLD: f32 = 0.5;

/// Vision check radius for movement forwarding.
const MOVEMENT_VISION_RADIUS: f32 = 7.0;

/// End-game reasons on the wire.
pub mod game_over {
    pub const HUMANS_BY_VOTE: u8 = 0;
    pub const HUMANS_BY_TASK: u8 = 1;
    pub const IMPOSTOR_BY_VOTE: u8 = 2;
    pub const IMPOSTOR_BY_KILL: u8 = 3;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    NotStarted,
    Started,
    Ended,
    Destroyed,
}

/// Who holds host authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostId {
    Server,
    Client(u32),
}

impl HostId {
    pub fn wire_id(self) -> u32 {
        match self {
            Self::Server => SERVER_CLIENT_ID,
            Self::Client(id) => id,
        }
    }

    pub fn is_client(self, client_id: u32) -> bool {
        matches!(self, Self::Client(id) if id == client_id)
    }
}

/// A queued reason to end the game; the first intent the event hub does
/// not cancel wins.
#[derive(Debug, Clone, Copy)]
pub struct EndGameIntent {
    pub name: &'static str,
    pub reason: u8,
}

/// What changed the roster right before a win check ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WinCheckCause {
    /// A meeting vote exiled someone.
    Exile,
    /// A murder landed.
    Kill,
    /// A task was completed.
    Task,
}

/// One entry of the per-tick outbound stream.
#[derive(Debug, Clone)]
pub struct OutboundEntry {
    pub message: GameDataMessage,
    pub include: Option<Vec<u32>>,
    pub exclude: Vec<u32>,
    pub reliable: bool,
}

/// Commands routed into the room task by the worker.
pub enum RoomCommand {
    Join { conn: Arc<Connection> },
    Leave { client_id: u32, reason: DisconnectReason },
    GameData { sender: u32, target: Option<u32>, messages: Vec<GameDataMessage> },
    AlterPrivacy { sender: u32, privacy: GamePrivacy },
    Start { sender: u32 },
    End { sender: u32, reason: u8 },
    Kick { sender: u32, target: u32, ban: bool },
    /// Admin/plugin host-policy switch.
    SetSaah { enabled: bool, keep_previous_host: bool },
    Destroy { reason: DisconnectReason },
}

/// Handle to a running room, kept in the worker registry.
#[derive(Clone)]
pub struct RoomHandle {
    pub code: GameCode,
    pub cmd_tx: mpsc::Sender<RoomCommand>,
    pub player_count: Arc<AtomicUsize>,
    pub created_at: Instant,
}

/// Registry of all active rooms, keyed by code.
pub type RoomRegistry = Arc<DashMap<GameCode, RoomHandle>>;

/// The authoritative room. All state is exclusively owned by the room
/// task; the worker talks to it through the command channel only.
pub struct Room {
    pub(crate) code: GameCode,
    pub(crate) state: RoomState,
    pub(crate) settings: GameSettings,
    pub(crate) privacy: GamePrivacy,
    pub(crate) host: HostId,
    pub(crate) acting_hosts_enabled: bool,
    pub(crate) acting_host_ids: HashSet<u32>,
    pub(crate) waiting_for_host: HashSet<u32>,
    pub(crate) acting_host_waiting_for: Vec<u32>,
    pub(crate) finished_acting_host_transaction: bool,
    pub(crate) connections: HashMap<u32, Arc<Connection>>,
    pub(crate) players: HashMap<u32, Player>,
    /// Host id each connection was last told about.
    pub(crate) shown_host: HashMap<u32, u32>,
    pub(crate) objects: ObjectGraph,
    pub(crate) outbound: Vec<OutboundEntry>,
    pub(crate) end_game_intents: Vec<EndGameIntent>,
    pub(crate) created_at: Instant,
    pub(crate) ever_joined: bool,
    pub(crate) start_ready_deadline: Option<Instant>,
    pub(crate) banned_addresses: HashSet<IpAddr>,
    pub(crate) movement_counters: HashMap<u32, u32>,
    pub(crate) infractions: InfractionBuffer,
    pub(crate) events: EventHub,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) config: RoomsConfig,
    pub(crate) auth: AuthApi,
    pub(crate) metrics: Metrics,
    pub(crate) game_id: Option<Uuid>,
    pub(crate) registry: RoomRegistry,
    cmd_rx: mpsc::Receiver<RoomCommand>,
    player_count: Arc<AtomicUsize>,
}

impl Room {
    pub fn create(
        code: GameCode,
        settings: GameSettings,
        config: RoomsConfig,
        auth: AuthApi,
        metrics: Metrics,
        registry: RoomRegistry,
    ) -> (Self, RoomHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let player_count = Arc::new(AtomicUsize::new(0));

        let handle = RoomHandle {
            code,
            cmd_tx,
            player_count: player_count.clone(),
            created_at: Instant::now(),
        };

        let settings = config.enforce_settings.clone().unwrap_or(settings);
        let acting_hosts_enabled = config.server_as_host;
        let host = if acting_hosts_enabled { HostId::Server } else { HostId::Client(0) };

        let room = Self {
            code,
            state: RoomState::NotStarted,
            settings,
            privacy: GamePrivacy::Private,
            host,
            acting_hosts_enabled,
            acting_host_ids: HashSet::new(),
            waiting_for_host: HashSet::new(),
            acting_host_waiting_for: Vec::new(),
            finished_acting_host_transaction: false,
            connections: HashMap::new(),
            players: HashMap::new(),
            shown_host: HashMap::new(),
            objects: ObjectGraph::new(),
            outbound: Vec::new(),
            end_game_intents: Vec::new(),
            created_at: Instant::now(),
            ever_joined: false,
            start_ready_deadline: None,
            banned_addresses: HashSet::new(),
            movement_counters: HashMap::new(),
            infractions: InfractionBuffer::new(),
            events: EventHub::new(),
            rng: ChaCha8Rng::seed_from_u64(rand::random()),
            config,
            auth,
            metrics,
            game_id: None,
            registry,
            cmd_rx,
            player_count,
        };

        (room, handle)
    }

    /// Run the room task: command handling interleaved with the fixed
    /// tick, single writer over all room state.
    pub async fn run(mut self) {
        info!(room = %self.code, "Room started");

        let mut tick = tokio::time::interval(TICK_DURATION);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                _ = tick.tick() => self.fixed_update().await,
            }

            if self.state == RoomState::Destroyed {
                break;
            }
        }

        // The buffer is flushed on destroy, but a dropped channel can
        // land us here with stragglers.
        if !self.infractions.is_empty() {
            let batch = self.infractions.take();
            if let Err(error) = self.metrics.flush_infractions(&batch).await {
                warn!(room = %self.code, %error, "final infraction flush failed");
            }
        }

        self.registry.remove(&self.code);
        info!(room = %self.code, "Room task finished");
    }

    pub(crate) async fn handle_command(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { conn } => self.handle_join(conn).await,
            RoomCommand::Leave { client_id, reason } => {
                self.handle_leave(client_id, reason).await;
            }
            RoomCommand::GameData { sender, target, messages } => {
                self.handle_game_data(sender, target, messages).await;
            }
            RoomCommand::AlterPrivacy { sender, privacy } => {
                self.handle_alter_privacy(sender, privacy).await;
            }
            RoomCommand::Start { sender } => self.handle_start(sender).await,
            RoomCommand::End { sender, reason } => {
                if self.is_authorized_host(sender) {
                    self.end_game(reason).await;
                }
            }
            RoomCommand::Kick { sender, target, ban } => {
                self.handle_kick(sender, target, ban).await;
            }
            RoomCommand::SetSaah { enabled, keep_previous_host } => {
                if enabled {
                    self.enable_saah(keep_previous_host).await;
                } else {
                    self.disable_saah().await;
                }
            }
            RoomCommand::Destroy { reason } => {
                self.destroy(reason).await;
            }
        }
    }

    // ---- join / leave -------------------------------------------------

    pub(crate) async fn handle_join(&mut self, conn: Arc<Connection>) {
        let client_id = conn.client_id;

        if self.banned_addresses.contains(&conn.remote.ip()) {
            let _ = conn.send_disconnect(&DisconnectReason::Banned).await;
            return;
        }

        // A client already in the room is rejoining after an end-game.
        let rejoin = self.players.contains_key(&client_id);

        if !rejoin {
            if self.state == RoomState::Started {
                let _ = conn.send_disconnect(&DisconnectReason::GameStarted).await;
                return;
            }
            if self.players.len() >= self.settings.max_players as usize {
                let _ = conn.send_disconnect(&DisconnectReason::GameFull).await;
                return;
            }

            let player_id = self.allocate_player_id();
            let mut player = Player::new(client_id, player_id);
            player.name = conn.username().to_string();
            self.players.insert(client_id, player);
            self.connections.insert(client_id, conn.clone());
            conn.set_room(Some(self.code)).await;
            self.ever_joined = true;
            self.player_count.store(self.players.len(), Ordering::Relaxed);

            if self.connections.len() == 1 {
                self.select_host(client_id).await;
            }
        }

        if self.state == RoomState::Ended {
            if !self.acting_hosts_enabled && self.host.is_client(client_id) {
                // The host came back: reopen the lobby and let the
                // parked clients in.
                self.state = RoomState::NotStarted;
                self.send_joined_game(&conn).await;
                self.broadcast_join(client_id).await;
                self.join_other_clients().await;
            } else {
                self.waiting_for_host.insert(client_id);
                let _ = conn
                    .send_reliable(&[RootMessage::WaitForHost { code: self.code, client_id }])
                    .await;
                return;
            }
        } else {
            self.send_joined_game(&conn).await;
            let _ = conn
                .send_reliable(&[RootMessage::AlterGame {
                    code: self.code,
                    privacy: self.privacy,
                }])
                .await;
            self.broadcast_join(client_id).await;
        }

        if self.acting_hosts_enabled {
            if self.acting_host_ids.is_empty() {
                let mut event = RoomEvent::SelectHost { candidate: client_id };
                if self.events.emit_serial(&mut event) {
                    if let RoomEvent::SelectHost { candidate } = event {
                        self.acting_host_ids.insert(candidate);
                    }
                }
            }
            self.acting_host_waiting_for.push(client_id);
            self.finished_acting_host_transaction = false;

            if self.host == HostId::Server {
                self.ensure_room_objects().await;
            }
        }

        self.update_host_views().await;

        info!(
            room = %self.code,
            client_id,
            players = self.players.len(),
            "Client joined room"
        );
    }

    pub(crate) async fn handle_leave(&mut self, client_id: u32, reason: DisconnectReason) {
        if !self.players.contains_key(&client_id) {
            return;
        }

        let mut event = RoomEvent::ClientLeave { client_id };
        self.events.emit(&mut event);

        self.waiting_for_host.remove(&client_id);
        self.acting_host_waiting_for.retain(|id| *id != client_id);
        let was_acting_host = self.acting_host_ids.remove(&client_id);
        let was_host = self.host.is_client(client_id);
        self.movement_counters.remove(&client_id);
        self.shown_host.remove(&client_id);

        for net_id in self.objects.despawn_owned(client_id as i32) {
            self.outbound.push(OutboundEntry {
                message: GameDataMessage::Despawn { net_id },
                include: None,
                exclude: vec![client_id],
                reliable: true,
            });
        }

        if let Some(conn) = self.connections.remove(&client_id) {
            conn.set_room(None).await;
        }
        self.players.remove(&client_id);
        self.auth.forget(client_id);
        self.player_count.store(self.players.len(), Ordering::Relaxed);

        info!(room = %self.code, client_id, reason = ?reason, "Client left room");

        if self.connections.is_empty() && self.waiting_for_host.is_empty() {
            self.destroy(DisconnectReason::Destroy).await;
            return;
        }

        if was_host && !self.acting_hosts_enabled {
            self.migrate_host().await;
        }
        if self.acting_hosts_enabled && was_acting_host && self.acting_host_ids.is_empty() {
            self.promote_first_acting_host().await;
        }

        self.broadcast_remove_player(client_id, reason.to_wire()).await;
    }

    /// Release everyone parked on the Ended room once the host is back.
    pub(crate) async fn join_other_clients(&mut self) {
        let waiting: Vec<u32> = self.waiting_for_host.drain().collect();
        for client_id in waiting {
            if let Some(conn) = self.connections.get(&client_id).cloned() {
                self.send_joined_game(&conn).await;
            }
        }
    }

    fn allocate_player_id(&self) -> u8 {
        let taken: HashSet<u8> = self.players.values().map(|p| p.player_id).collect();
        (0..=u8::MAX).find(|id| !taken.contains(id)).unwrap_or(0)
    }

    async fn send_joined_game(&mut self, conn: &Arc<Connection>) {
        let client_id = conn.client_id;
        let others: Vec<u32> = self
            .connections
            .keys()
            .copied()
            .filter(|id| *id != client_id)
            .collect();
        let host_id = self.host.wire_id();
        self.shown_host.insert(client_id, host_id);
        let _ = conn
            .send_reliable(&[RootMessage::JoinedGame {
                code: self.code,
                client_id,
                host_id,
                others,
            }])
            .await;
    }

    async fn broadcast_join(&mut self, joiner: u32) {
        let mut sends = Vec::new();
        for (client_id, conn) in &self.connections {
            if *client_id == joiner {
                continue;
            }
            let host_id = self.shown_host.get(client_id).copied().unwrap_or(self.host.wire_id());
            let message =
                RootMessage::JoinGameBroadcast { code: self.code, client_id: joiner, host_id };
            let conn = conn.clone();
            sends.push(async move { conn.send_reliable(&[message]).await });
        }
        join_all(sends).await;
    }

    async fn broadcast_remove_player(&mut self, removed: u32, reason: u8) {
        let mut sends = Vec::new();
        for (client_id, conn) in &self.connections {
            let host_id = self.shown_host.get(client_id).copied().unwrap_or(self.host.wire_id());
            let message = RootMessage::RemovePlayer {
                code: self.code,
                client_id: removed,
                host_id,
                reason,
            };
            let conn = conn.clone();
            sends.push(async move { conn.send_reliable(&[message]).await });
        }
        join_all(sends).await;
    }

    /// Make sure the room-scoped lobby and roster objects exist.
    async fn ensure_room_objects(&mut self) {
        if self.objects.find_class(ComponentClass::LobbyBehaviour).is_none() {
            self.spawn_and_broadcast(SpawnType::LobbyBehaviour, ROOM_OWNER, 0).await;
        }
        if self.objects.find_class(ComponentClass::GameData).is_none() {
            self.spawn_and_broadcast(SpawnType::GameData, ROOM_OWNER, 0).await;
        }
    }

    pub(crate) async fn spawn_and_broadcast(
        &mut self,
        spawn_type: SpawnType,
        owner_id: i32,
        flags: u8,
    ) -> Vec<u32> {
        let ids = self.objects.spawn(spawn_type, owner_id, flags);
        let components: Vec<SpawnComponent> =
            ids.iter().filter_map(|id| self.objects.spawn_payload(*id)).collect();
        let message = GameDataMessage::Spawn {
            spawn_type: spawn_type.to_wire(),
            owner_id,
            flags,
            components,
        };
        self.broadcast_game_data(vec![message], Vec::new(), None, &[], true).await;
        ids
    }

    // ---- privacy / kick ----------------------------------------------

    async fn handle_alter_privacy(&mut self, sender: u32, privacy: GamePrivacy) {
        if !self.is_authorized_host(sender) {
            warn!(room = %self.code, sender, "privacy change from non-host ignored");
            return;
        }
        self.privacy = privacy;
        let message = RootMessage::AlterGame { code: self.code, privacy };
        let mut sends = Vec::new();
        for conn in self.connections.values() {
            let conn = conn.clone();
            let message = message.clone();
            sends.push(async move { conn.send_reliable(&[message]).await });
        }
        join_all(sends).await;
    }

    async fn handle_kick(&mut self, sender: u32, target: u32, ban: bool) {
        if !self.is_authorized_host(sender) {
            warn!(room = %self.code, sender, target, "kick from non-host ignored");
            return;
        }
        if ban {
            if let Some(conn) = self.connections.get(&target) {
                self.banned_addresses.insert(conn.remote.ip());
            }
        }

        let message = RootMessage::KickPlayer { code: self.code, target, banned: ban };
        let mut sends = Vec::new();
        for conn in self.connections.values() {
            let conn = conn.clone();
            let message = message.clone();
            sends.push(async move { conn.send_reliable(&[message]).await });
        }
        join_all(sends).await;

        let reason = if ban { DisconnectReason::Banned } else { DisconnectReason::Kicked };
        if let Some(conn) = self.connections.get(&target).cloned() {
            let _ = conn.send_disconnect(&reason).await;
        }
        self.handle_leave(target, reason).await;
    }

    pub(crate) fn is_authorized_host(&self, client_id: u32) -> bool {
        self.host.is_client(client_id)
            || (self.acting_hosts_enabled && self.acting_host_ids.contains(&client_id))
    }

    // ---- start / end --------------------------------------------------

    pub(crate) async fn handle_start(&mut self, sender: u32) {
        if !self.is_authorized_host(sender) {
            warn!(room = %self.code, sender, "start from non-host ignored");
            return;
        }
        if self.state == RoomState::Started {
            return;
        }

        self.state = RoomState::Started;
        for player in self.players.values_mut() {
            player.is_ready = false;
        }

        self.game_id = match self.metrics.current_game_id(self.code).await {
            Ok(id) => id,
            Err(error) => {
                debug!(room = %self.code, %error, "game id lookup failed");
                None
            }
        };

        let message = RootMessage::StartGame { code: self.code };
        let mut sends = Vec::new();
        for conn in self.connections.values() {
            let conn = conn.clone();
            let message = message.clone();
            sends.push(async move { conn.send_reliable(&[message]).await });
        }
        join_all(sends).await;

        if self.host == HostId::Server {
            self.start_ready_deadline = Some(Instant::now() + START_READY_WINDOW);
        }

        info!(room = %self.code, sender, "Game starting");
    }

    pub(crate) fn all_ready(&self) -> bool {
        self.players.values().all(|p| p.is_ready)
    }

    /// Force-remove clients that never sent Ready, then begin the game.
    pub(crate) async fn finish_start(&mut self) {
        self.start_ready_deadline = None;

        let unready: Vec<u32> = self
            .players
            .values()
            .filter(|p| !p.is_ready)
            .map(|p| p.client_id)
            .collect();
        for client_id in unready {
            warn!(room = %self.code, client_id, "removing client that never readied");
            if let Some(conn) = self.connections.get(&client_id).cloned() {
                let _ = conn.send_disconnect(&DisconnectReason::Error).await;
            }
            self.handle_leave(client_id, DisconnectReason::Error).await;
        }
        if self.state != RoomState::Started {
            // Everyone got removed and the room died underneath us.
            return;
        }
        self.begin_game().await;
    }

    /// Despawn the lobby, spawn the ship, hand out roles and tasks.
    async fn begin_game(&mut self) {
        if let Some(net_id) = self.objects.find_class(ComponentClass::LobbyBehaviour) {
            self.objects.despawn(net_id);
            self.broadcast_game_data(
                vec![GameDataMessage::Despawn { net_id }],
                Vec::new(),
                None,
                &[],
                true,
            )
            .await;
        }

        let ship_type = SpawnType::for_map(self.settings.map);
        self.spawn_and_broadcast(ship_type, ROOM_OWNER, 0).await;

        self.assign_impostors().await;
        self.assign_tasks().await;
        self.place_players_on_ship();
        self.sync_roster();

        info!(room = %self.code, map = ?self.settings.map, "Game began");
    }

    async fn assign_impostors(&mut self) {
        let mut candidates: Vec<u32> = self.players.keys().copied().collect();
        candidates.sort_unstable();
        let impostor_count = (self.settings.impostors as usize).min(candidates.len());

        let mut impostors = Vec::new();
        for _ in 0..impostor_count {
            let index = self.rng.gen_range(0..candidates.len());
            impostors.push(candidates.swap_remove(index));
        }

        let mut payload = BytesWriter::new();
        payload.write_u8(impostors.len() as u8);
        for client_id in &impostors {
            if let Some(player) = self.players.get_mut(client_id) {
                player.is_impostor = true;
                payload.write_u8(player.player_id);
            }
        }

        // The infected list rides on the first impostor's control.
        let Some(net_id) = impostors
            .first()
            .and_then(|id| self.objects.find_owned(*id as i32, ComponentClass::PlayerControl))
        else {
            return;
        };
        self.broadcast_game_data(
            vec![GameDataMessage::Rpc {
                net_id,
                tag: RpcTag::SetInfected,
                payload: payload.into_bytes(),
            }],
            Vec::new(),
            None,
            &[],
            true,
        )
        .await;
    }

    async fn assign_tasks(&mut self) {
        let total = self.settings.common_tasks
            + self.settings.long_tasks
            + self.settings.short_tasks;
        let mut rpcs = Vec::new();
        for player in self.players.values_mut() {
            let tasks: Vec<u32> =
                (0..total).map(|_| self.rng.gen_range(0..32u32)).collect();
            player.assign_tasks(&tasks);

            let Some(net_id) = self
                .objects
                .find_owned(player.client_id as i32, ComponentClass::PlayerControl)
            else {
                continue;
            };
            let mut payload = BytesWriter::new();
            payload.write_u8(player.player_id);
            payload.write_u8(tasks.len() as u8);
            for task in &tasks {
                payload.write_packed_u32(*task);
            }
            rpcs.push(GameDataMessage::Rpc {
                net_id,
                tag: RpcTag::SetTasks,
                payload: payload.into_bytes(),
            });
        }
        if !rpcs.is_empty() {
            self.broadcast_game_data(rpcs, Vec::new(), None, &[], true).await;
        }
    }

    fn place_players_on_ship(&mut self) {
        let spawn_radius = 1.5f32;
        let count = self.players.len().max(1) as f32;
        let mut index = 0f32;
        let mut ids: Vec<u32> = self.players.keys().copied().collect();
        ids.sort_unstable();
        for client_id in ids {
            let angle = index / count * std::f32::consts::TAU;
            index += 1.0;
            let position = Vector2::new(angle.cos() * spawn_radius, angle.sin() * spawn_radius);
            if let Some(net_id) = self
                .objects
                .find_owned(client_id as i32, ComponentClass::CustomNetworkTransform)
            {
                if let Some(component) = self.objects.get_mut(net_id) {
                    if let ComponentBody::CustomNetworkTransform(t) = &mut component.body {
                        t.position = position;
                        t.velocity = Vector2::ZERO;
                        component.dirty |= 1;
                    }
                }
            }
        }
    }

    /// Mirror the player table into the replicated roster component.
    pub(crate) fn sync_roster(&mut self) {
        let Some(net_id) = self.objects.find_class(ComponentClass::GameData) else {
            return;
        };
        let players = &self.players;
        if let Some(component) = self.objects.get_mut(net_id) {
            if let ComponentBody::GameData(data) = &mut component.body {
                data.roster.clear();
                for player in players.values() {
                    data.roster.insert(player.player_id, RosterEntry {
                        player_id: player.player_id,
                        name: player.name.clone(),
                        color: player.color,
                        hat: player.hat,
                        pet: player.pet,
                        skin: player.skin,
                        is_dead: player.is_dead,
                        is_impostor: player.is_impostor,
                        tasks: player.tasks.iter().map(|t| (t.task_id, t.complete)).collect(),
                    });
                }
                component.dirty |= 1;
            }
        }
    }

    pub(crate) async fn end_game(&mut self, reason: u8) {
        if self.state != RoomState::Started {
            return;
        }
        self.state = RoomState::Ended;
        self.start_ready_deadline = None;
        self.end_game_intents.clear();

        let message = RootMessage::EndGame { code: self.code, reason, show_ad: false };
        let mut sends = Vec::new();
        for conn in self.connections.values() {
            let conn = conn.clone();
            let message = message.clone();
            sends.push(async move { conn.send_reliable(&[message]).await });
        }
        join_all(sends).await;

        self.objects = ObjectGraph::new();
        self.outbound.clear();
        for player in self.players.values_mut() {
            player.reset_for_lobby();
        }

        self.flush_infractions().await;

        info!(room = %self.code, reason, "Game ended");
    }

    pub(crate) async fn flush_infractions(&mut self) {
        if self.infractions.is_empty() {
            return;
        }
        let batch = self.infractions.take();
        if let Err(error) = self.metrics.flush_infractions(&batch).await {
            warn!(room = %self.code, %error, count = batch.len(), "infraction flush failed");
        }
    }

    pub(crate) async fn destroy(&mut self, reason: DisconnectReason) {
        if self.state == RoomState::Destroyed {
            return;
        }

        let mut event = RoomEvent::BeforeDestroy { reason: reason.to_wire() };
        if !self.events.emit_serial(&mut event) {
            debug!(room = %self.code, "destroy cancelled by listener");
            return;
        }

        let message = RootMessage::RemoveGame { code: self.code, reason: reason.to_wire() };
        let mut sends = Vec::new();
        for conn in self.connections.values() {
            let conn = conn.clone();
            let message = message.clone();
            sends.push(async move {
                let _ = conn.send_reliable(&[message]).await;
                let _ = conn.send_disconnect(&DisconnectReason::Destroy).await;
            });
        }
        join_all(sends).await;

        for conn in self.connections.values() {
            conn.set_room(None).await;
        }
        self.connections.clear();
        self.players.clear();
        self.player_count.store(0, Ordering::Relaxed);

        self.flush_infractions().await;
        self.state = RoomState::Destroyed;
        self.registry.remove(&self.code);

        let mut event = RoomEvent::Destroy;
        self.events.emit(&mut event);

        info!(room = %self.code, "Room destroyed");
    }

    // ---- fixed tick ---------------------------------------------------

    pub(crate) async fn fixed_update(&mut self) {
        if self.state == RoomState::Destroyed {
            return;
        }

        if self.connections.is_empty() {
            let timeout = Duration::from_secs(self.config.create_timeout);
            if self.ever_joined || self.created_at.elapsed() >= timeout {
                self.destroy(DisconnectReason::Destroy).await;
            }
            return;
        }

        if let Some(deadline) = self.start_ready_deadline {
            if Instant::now() >= deadline {
                self.finish_start().await;
                if self.state == RoomState::Destroyed {
                    return;
                }
            }
        }

        // Tick work never suspends.
        let dt = tick_delta();
        let dirty = {
            let ids: Vec<u32> = self.objects.iter().map(|c| c.net_id).collect();
            for net_id in ids {
                if let Some(component) = self.objects.get_mut(net_id) {
                    component.fixed_update(dt);
                }
            }
            self.objects.dirty_ids()
        };
        for net_id in dirty {
            if let Some(component) = self.objects.get_mut(net_id) {
                component.pre_serialize();
                let mut writer = BytesWriter::new();
                if component.serialize(&mut writer, false) {
                    self.outbound.push(OutboundEntry {
                        message: GameDataMessage::Data {
                            net_id,
                            payload: writer.into_bytes(),
                        },
                        include: None,
                        exclude: Vec::new(),
                        reliable: true,
                    });
                }
                component.dirty = 0;
            }
        }

        // First uncancelled intent ends the game.
        let intents = std::mem::take(&mut self.end_game_intents);
        for intent in intents {
            let mut event = RoomEvent::EndGameIntent { name: intent.name, reason: intent.reason };
            if self.events.emit_serial(&mut event) {
                self.end_game(intent.reason).await;
                break;
            }
        }

        let mut event = RoomEvent::FixedUpdate;
        if self.events.emit_serial(&mut event) {
            let stream = std::mem::take(&mut self.outbound);
            for entry in stream {
                self.broadcast_game_data(
                    vec![entry.message],
                    Vec::new(),
                    entry.include,
                    &entry.exclude,
                    entry.reliable,
                )
                .await;
            }
        }
    }

    // ---- broadcast ----------------------------------------------------

    /// Fan a set of game-data messages (plus extra root payloads) out to
    /// recipients, honoring per-recipient event rewrites. Everything is
    /// awaited in parallel.
    pub(crate) async fn broadcast_game_data(
        &mut self,
        game_data: Vec<GameDataMessage>,
        payloads: Vec<RootMessage>,
        include: Option<Vec<u32>>,
        exclude: &[u32],
        reliable: bool,
    ) {
        let targeted = include.is_some();
        let recipients: Vec<u32> = match include {
            Some(list) => list,
            None => self.connections.keys().copied().collect(),
        };

        let mut sends = Vec::new();
        for recipient in recipients {
            if exclude.contains(&recipient) {
                continue;
            }
            let Some(conn) = self.connections.get(&recipient).cloned() else {
                continue;
            };

            let mut event =
                RoomEvent::ClientBroadcast { recipient, game_data: game_data.clone() };
            if !self.events.emit_serial(&mut event) {
                continue;
            }
            let RoomEvent::ClientBroadcast { game_data: altered, .. } = event else {
                continue;
            };
            if altered.is_empty() && payloads.is_empty() {
                continue;
            }

            let wrapped = if targeted {
                RootMessage::GameDataTo { code: self.code, target: recipient, messages: altered }
            } else {
                RootMessage::GameData { code: self.code, messages: altered }
            };
            let mut messages = vec![wrapped];
            messages.extend(payloads.iter().cloned());

            sends.push(async move {
                if reliable {
                    let _ = conn.send_reliable(&messages).await;
                } else {
                    let _ = conn.send_unreliable(&messages).await;
                }
            });
        }
        join_all(sends).await;
    }

    // ---- inbound game data -------------------------------------------

    pub(crate) async fn handle_game_data(
        &mut self,
        sender: u32,
        target: Option<u32>,
        messages: Vec<GameDataMessage>,
    ) {
        if !self.connections.contains_key(&sender) {
            return;
        }

        for message in messages {
            match message {
                GameDataMessage::Data { net_id, payload } => {
                    self.handle_data(sender, target, net_id, payload).await;
                }
                GameDataMessage::Rpc { net_id, tag, payload } => {
                    self.handle_rpc(sender, target, net_id, tag, payload).await;
                }
                GameDataMessage::Spawn { spawn_type, owner_id, flags, components } => {
                    self.handle_spawn(sender, spawn_type, owner_id, flags, components).await;
                }
                GameDataMessage::Despawn { net_id } => {
                    self.handle_despawn(sender, net_id).await;
                }
                GameDataMessage::SceneChange { client_id, scene } => {
                    self.handle_scene_change(sender, client_id, scene).await;
                }
                GameDataMessage::Ready { client_id } => {
                    self.handle_ready(sender, client_id).await;
                }
            }
        }
    }

    async fn handle_data(
        &mut self,
        sender: u32,
        target: Option<u32>,
        net_id: u32,
        payload: Vec<u8>,
    ) {
        let component_class = self.objects.get(net_id).map(|c| (c.class(), c.owner_id));
        match component_class {
            Some((ComponentClass::CustomNetworkTransform, owner))
                if owner == sender as i32 && target.is_none() =>
            {
                self.handle_movement_data(sender, net_id, payload).await;
            }
            Some(_) => {
                if let Err(error) = self.objects.deserialize_into(net_id, &payload) {
                    debug!(room = %self.code, sender, net_id, %error, "bad data update");
                    return;
                }
                self.relay(sender, target, GameDataMessage::Data { net_id, payload }, true)
                    .await;
            }
            None => {
                // Legitimate race against a despawn.
                warn!(room = %self.code, sender, net_id, "data update for unknown net id");
            }
        }
    }

    /// Movement fast path: loss-tolerant, rate-limited, distance and
    /// death filtered, serialized once. Returns whether the update was
    /// forwarded.
    pub(crate) async fn handle_movement_data(
        &mut self,
        sender: u32,
        net_id: u32,
        payload: Vec<u8>,
    ) -> bool {
        let before = self.transform_position(net_id);
        if let Err(error) = self.objects.deserialize_into(net_id, &payload) {
            debug!(room = %self.code, sender, net_id, %error, "bad movement update");
            return false;
        }
        let after = self.transform_position(net_id);

        let movement = &self.config.optimizations.movement;
        let rate = movement.update_rate.max(1);
        if rate > 1 {
            let delta = match (before, after) {
                (Some(a), Some(b)) => a.distance(&b),
                _ => 0.0,
            };
            if delta > MOVEMENT_COUNT_THRESHOLD {
                let counter = self.movement_counters.entry(sender).or_insert(0);
                *counter += 1;
                if *counter % rate != 0 {
                    return false;
                }
            }
        }

        let sender_dead =
            self.players.get(&sender).map(|p| p.is_dead).unwrap_or(false);
        let sender_position = after;

        // Serialized once; every recipient gets the same bytes.
        let reuse = movement.reuse_buffer;
        let mut shared_bytes: Option<Vec<u8>> = None;

        let recipients: Vec<u32> = self
            .connections
            .keys()
            .copied()
            .filter(|id| *id != sender)
            .collect();
        let mut sends = Vec::new();
        for recipient in recipients {
            if movement.dead_checks && sender_dead {
                let recipient_alive =
                    self.players.get(&recipient).map(|p| !p.is_dead).unwrap_or(true);
                if recipient_alive {
                    continue;
                }
            }
            if movement.vision_checks {
                let recipient_position = self
                    .objects
                    .find_owned(recipient as i32, ComponentClass::CustomNetworkTransform)
                    .and_then(|id| self.transform_position(id));
                if let (Some(a), Some(b)) = (sender_position, recipient_position) {
                    if a.distance(&b) > MOVEMENT_VISION_RADIUS {
                        continue;
                    }
                }
            }

            let Some(conn) = self.connections.get(&recipient).cloned() else {
                continue;
            };

            let bytes = if reuse {
                shared_bytes
                    .get_or_insert_with(|| {
                        let mut writer = BytesWriter::new();
                        RootMessage::GameData {
                            code: self.code,
                            messages: vec![GameDataMessage::Data {
                                net_id,
                                payload: payload.clone(),
                            }],
                        }
                        .encode(&mut writer);
                        writer.into_bytes()
                    })
                    .clone()
            } else {
                let mut writer = BytesWriter::new();
                RootMessage::GameData {
                    code: self.code,
                    messages: vec![GameDataMessage::Data { net_id, payload: payload.clone() }],
                }
                .encode(&mut writer);
                writer.into_bytes()
            };

            sends.push(async move {
                let _ = conn.send_unreliable_bytes(&bytes).await;
            });
        }
        join_all(sends).await;
        true
    }

    fn transform_position(&self, net_id: u32) -> Option<Vector2> {
        match self.objects.get(net_id).map(|c| &c.body) {
            Some(ComponentBody::CustomNetworkTransform(t)) => Some(t.position),
            _ => None,
        }
    }

    async fn handle_spawn(
        &mut self,
        sender: u32,
        spawn_type: u32,
        owner_id: i32,
        flags: u8,
        components: Vec<SpawnComponent>,
    ) {
        // Only a host authority may instantiate objects.
        if !self.is_authorized_host(sender) && self.host != HostId::Server {
            warn!(room = %self.code, sender, spawn_type, "spawn from non-host ignored");
            return;
        }

        match SpawnType::from_wire(spawn_type) {
            Some(known) => {
                if let Err(error) =
                    self.objects.apply_remote_spawn(known, owner_id, flags, &components)
                {
                    warn!(room = %self.code, sender, spawn_type, %error, "spawn rejected");
                    return;
                }
            }
            None => {
                if !self.config.advanced.unknown_objects.allows(spawn_type) {
                    warn!(
                        room = %self.code,
                        sender, spawn_type, "unknown spawn type rejected by policy"
                    );
                    return;
                }
                self.objects.apply_unknown_spawn(spawn_type, owner_id, flags, &components);
            }
        }

        self.relay(
            sender,
            None,
            GameDataMessage::Spawn { spawn_type, owner_id, flags, components },
            true,
        )
        .await;
    }

    async fn handle_despawn(&mut self, sender: u32, net_id: u32) {
        let Some(component) = self.objects.get(net_id) else {
            warn!(room = %self.code, sender, net_id, "despawn for unknown net id");
            return;
        };
        if component.owner_id != sender as i32 && !self.is_authorized_host(sender) {
            warn!(room = %self.code, sender, net_id, "despawn of foreign component ignored");
            return;
        }
        self.objects.despawn(net_id);
        self.relay(sender, None, GameDataMessage::Despawn { net_id }, true).await;
    }

    async fn handle_scene_change(&mut self, sender: u32, client_id: u32, scene: String) {
        if sender != client_id {
            warn!(room = %self.code, sender, client_id, "scene change for another client");
            return;
        }
        if let Some(player) = self.players.get_mut(&sender) {
            player.in_scene = true;
        }

        if self.host == HostId::Server {
            // As host we own spawning: give the client the current
            // graph, then spawn their player for everyone.
            let mut catch_up = Vec::new();
            let mut spawned: HashMap<(u32, i32, u8), Vec<SpawnComponent>> = HashMap::new();
            for component in self.objects.iter() {
                spawned
                    .entry((component.spawn_type, component.owner_id, component.flags))
                    .or_default()
                    .push(SpawnComponent {
                        net_id: component.net_id,
                        data: self
                            .objects
                            .spawn_payload(component.net_id)
                            .map(|p| p.data)
                            .unwrap_or_default(),
                    });
            }
            for ((spawn_type, owner_id, flags), mut components) in spawned {
                components.sort_by_key(|c| c.net_id);
                catch_up.push(GameDataMessage::Spawn { spawn_type, owner_id, flags, components });
            }
            if !catch_up.is_empty() {
                self.broadcast_game_data(catch_up, Vec::new(), Some(vec![sender]), &[], true)
                    .await;
            }

            if self.objects.find_owned(sender as i32, ComponentClass::PlayerControl).is_none() {
                let ids = self.spawn_and_broadcast(SpawnType::Player, sender as i32, 1).await;
                if let (Some(player), Some(net_id)) = (self.players.get(&sender), ids.first()) {
                    let player_id = player.player_id;
                    if let Some(component) = self.objects.get_mut(*net_id) {
                        if let ComponentBody::PlayerControl(pc) = &mut component.body {
                            pc.player_id = player_id;
                            pc.is_new = true;
                            component.dirty |= 1;
                        }
                    }
                }
            }
            self.sync_roster();
        }

        self.relay(sender, None, GameDataMessage::SceneChange { client_id, scene }, true).await;
    }

    async fn handle_ready(&mut self, sender: u32, client_id: u32) {
        if sender != client_id {
            return;
        }
        if let Some(player) = self.players.get_mut(&sender) {
            player.is_ready = true;
        }
        if self.start_ready_deadline.is_some() && self.all_ready() {
            self.finish_start().await;
        }
    }

    /// Forward an applied message to the other clients.
    async fn relay(
        &mut self,
        sender: u32,
        target: Option<u32>,
        message: GameDataMessage,
        reliable: bool,
    ) {
        let include = target.map(|t| vec![t]);
        self.broadcast_game_data(vec![message], Vec::new(), include, &[sender], reliable).await;
    }

    // ---- rpc ----------------------------------------------------------

    async fn handle_rpc(
        &mut self,
        sender: u32,
        target: Option<u32>,
        net_id: u32,
        tag: RpcTag,
        payload: Vec<u8>,
    ) {
        let component = self.objects.get(net_id).map(|c| (c.class(), c.owner_id));
        let auth_user = self.auth.cached_user(sender);
        let sender_player = self.players.get(&sender);
        let already_voted = sender_player.map(|p| p.has_voted).unwrap_or(false);
        let ping = self
            .connections
            .get(&sender)
            .map(|c| c.round_trip_ping())
            .unwrap_or(0);

        let ctx = RpcContext {
            tag,
            net_id,
            component,
            sender_client_id: sender,
            sender_player_id: sender_player.map(|p| p.player_id),
            sender_role: sender_player
                .map(|p| p.role())
                .unwrap_or(crate::game::player::PlayerRole::Crewmate),
            sender_ping: ping,
            server_as_host: self.host == HostId::Server,
            sender_is_acting_host: self.acting_host_ids.contains(&sender),
            map: self.settings.map,
            auth_user: auth_user.as_deref(),
            payload: &payload,
            already_voted,
        };

        let players = &self.players;
        let alive = |player_id: u8| -> Option<bool> {
            players
                .values()
                .find(|p| p.player_id == player_id)
                .map(|p| !p.is_dead)
        };

        match check_rpc(&ctx, &alive) {
            RpcVerdict::Allow => {}
            RpcVerdict::Observe(name, severity, details) => {
                self.infractions.record(&ctx, self.game_id, name, severity, details);
            }
            RpcVerdict::Swallow(name, severity, details) => {
                debug!(room = %self.code, sender, ?tag, ?name, "rpc swallowed");
                self.infractions.record(&ctx, self.game_id, name, severity, details);
                if self.infractions.needs_flush() {
                    self.flush_infractions().await;
                }
                return;
            }
        }
        if self.infractions.needs_flush() {
            self.flush_infractions().await;
        }

        let relay = self.apply_rpc(sender, net_id, tag, &payload).await;
        if relay {
            self.relay(sender, target, GameDataMessage::Rpc { net_id, tag, payload }, true)
                .await;
        }
    }

    /// Apply a vetted RPC. Returns whether it should be relayed.
    async fn apply_rpc(&mut self, sender: u32, net_id: u32, tag: RpcTag, payload: &[u8]) -> bool {
        let mut reader = BytesReader::new(payload);
        match tag {
            RpcTag::CheckName => {
                let Ok(name) = reader.read_string() else { return false };
                if let Some(player) = self.players.get_mut(&sender) {
                    player.name = name.clone();
                }
                self.sync_roster();
                self.run_acting_host_transaction(sender).await;

                // As host the server answers with the authoritative name.
                if self.host == HostId::Server {
                    let mut response = BytesWriter::new();
                    response.write_string(&name);
                    self.broadcast_game_data(
                        vec![GameDataMessage::Rpc {
                            net_id,
                            tag: RpcTag::SetName,
                            payload: response.into_bytes(),
                        }],
                        Vec::new(),
                        None,
                        &[],
                        true,
                    )
                    .await;
                }
                false
            }
            RpcTag::CheckColor => {
                let Ok(requested) = reader.read_u8() else { return false };
                let taken: HashSet<u8> = self
                    .players
                    .values()
                    .filter(|p| p.client_id != sender)
                    .map(|p| p.color)
                    .collect();
                let mut color = requested;
                while taken.contains(&color) {
                    color = (color + 1) % 18;
                }
                if let Some(player) = self.players.get_mut(&sender) {
                    player.color = color;
                }
                self.sync_roster();

                if self.host == HostId::Server {
                    self.broadcast_game_data(
                        vec![GameDataMessage::Rpc {
                            net_id,
                            tag: RpcTag::SetColor,
                            payload: vec![color],
                        }],
                        Vec::new(),
                        None,
                        &[],
                        true,
                    )
                    .await;
                }
                false
            }
            RpcTag::SetHat => {
                if let (Ok(item), Some(player)) =
                    (reader.read_packed_u32(), self.players.get_mut(&sender))
                {
                    player.hat = item;
                    self.sync_roster();
                }
                true
            }
            RpcTag::SetPet => {
                if let (Ok(item), Some(player)) =
                    (reader.read_packed_u32(), self.players.get_mut(&sender))
                {
                    player.pet = item;
                    self.sync_roster();
                }
                true
            }
            RpcTag::SetSkin => {
                if let (Ok(item), Some(player)) =
                    (reader.read_packed_u32(), self.players.get_mut(&sender))
                {
                    player.skin = item;
                    self.sync_roster();
                }
                true
            }
            RpcTag::SyncSettings => {
                let Ok(settings) = GameSettings::decode(&mut reader) else {
                    return false;
                };
                self.adopt_settings(settings);
                self.finish_acting_host_handshake(sender).await;
                true
            }
            RpcTag::SendChat => {
                let Ok(text) = reader.read_string() else { return false };
                if let Some(prefix) = self.config.chat_commands.prefix() {
                    if let Some(stripped) = text.strip_prefix(prefix) {
                        let command = stripped.to_string();
                        self.handle_chat_command(sender, net_id, &command).await;
                        return false;
                    }
                }
                let mut event = RoomEvent::PlayerChat { client_id: sender, message: text };
                self.events.emit(&mut event);
                true
            }
            RpcTag::CompleteTask => {
                let Ok(task_id) = reader.read_packed_u32() else { return false };
                if let Some(player) = self.players.get_mut(&sender) {
                    player.complete_task(task_id);
                }
                self.sync_roster();
                self.queue_win_checks(WinCheckCause::Task);
                true
            }
            RpcTag::EnterVent => {
                let Ok(vent) = reader.read_packed_u32() else { return false };
                if let Some(component) = self.objects.get_mut(net_id) {
                    if let ComponentBody::PlayerPhysics(phys) = &mut component.body {
                        phys.in_vent = Some(vent);
                    }
                }
                true
            }
            RpcTag::ExitVent => {
                if let Some(component) = self.objects.get_mut(net_id) {
                    if let ComponentBody::PlayerPhysics(phys) = &mut component.body {
                        phys.in_vent = None;
                    }
                }
                true
            }
            RpcTag::SnapTo => {
                if let Ok(position) = reader.read_vector2() {
                    if let Some(component) = self.objects.get_mut(net_id) {
                        if let ComponentBody::CustomNetworkTransform(t) = &mut component.body {
                            t.position = position;
                        }
                    }
                }
                true
            }
            RpcTag::StartMeeting | RpcTag::ReportDeadBody => {
                if self.host == HostId::Server
                    && self.objects.find_class(ComponentClass::MeetingHud).is_none()
                {
                    for player in self.players.values_mut() {
                        player.has_voted = false;
                    }
                    self.spawn_and_broadcast(SpawnType::MeetingHud, ROOM_OWNER, 0).await;
                }
                true
            }
            RpcTag::CastVote => {
                let (Ok(voter), Ok(suspect)) = (reader.read_u8(), reader.read_u8()) else {
                    return false;
                };
                if let Some(player) = self.players.get_mut(&sender) {
                    player.has_voted = true;
                }
                let all_voted = {
                    let Some(component) = self.objects.get_mut(net_id) else { return false };
                    let ComponentBody::MeetingHud(hud) = &mut component.body else {
                        return false;
                    };
                    hud.cast(voter, suspect);
                    component.dirty |= 1;
                    let voters_needed =
                        self.players.values().filter(|p| !p.is_dead).count();
                    component_votes(component) >= voters_needed
                };
                if all_voted {
                    self.complete_voting(net_id).await;
                }
                true
            }
            RpcTag::AddVote => {
                let Ok(target) = reader.read_packed_u32() else { return false };
                let kicked = {
                    let Some(component) = self.objects.get_mut(net_id) else { return false };
                    let ComponentBody::VoteBanSystem(bans) = &mut component.body else {
                        return false;
                    };
                    bans.add_vote(sender, target)
                };
                if kicked && self.host == HostId::Server {
                    self.handle_kick(sender, target, false).await;
                    return false;
                }
                true
            }
            // Host-authoritative relays with roster side effects.
            RpcTag::MurderPlayer => {
                let Ok(victim) = reader.read_packed_u32() else { return false };
                let victim_id = victim as u32;
                if let Some(player) = self
                    .players
                    .values_mut()
                    .find(|p| u32::from(p.player_id) == victim_id)
                {
                    player.is_dead = true;
                }
                self.sync_roster();
                self.queue_win_checks(WinCheckCause::Kill);
                true
            }
            _ => true,
        }
    }

    async fn complete_voting(&mut self, hud_net_id: u32) {
        let exiled = {
            let Some(component) = self.objects.get(hud_net_id) else { return };
            let ComponentBody::MeetingHud(hud) = &component.body else { return };
            hud.tally()
        };

        let mut payload = BytesWriter::new();
        match exiled {
            Some(player_id) => {
                payload.write_bool(true);
                payload.write_u8(player_id);
            }
            None => payload.write_bool(false),
        }
        self.broadcast_game_data(
            vec![GameDataMessage::Rpc {
                net_id: hud_net_id,
                tag: RpcTag::VotingComplete,
                payload: payload.into_bytes(),
            }],
            Vec::new(),
            None,
            &[],
            true,
        )
        .await;

        if let Some(player_id) = exiled {
            if let Some(player) =
                self.players.values_mut().find(|p| p.player_id == player_id)
            {
                player.is_dead = true;
            }
        }
        self.sync_roster();

        self.objects.despawn(hud_net_id);
        self.broadcast_game_data(
            vec![GameDataMessage::Despawn { net_id: hud_net_id }],
            Vec::new(),
            None,
            &[],
            true,
        )
        .await;

        for player in self.players.values_mut() {
            player.has_voted = false;
        }
        self.queue_win_checks(WinCheckCause::Exile);
    }

    /// Queue end-game intents for any met win condition; the tick loop
    /// arbitrates. The cause decides which reason code an impostor
    /// majority gets: a vote that exiled crew into minority is not the
    /// same outcome as a kill.
    pub(crate) fn queue_win_checks(&mut self, cause: WinCheckCause) {
        if self.state != RoomState::Started {
            return;
        }
        let impostors_alive =
            self.players.values().filter(|p| p.is_impostor && !p.is_dead).count();
        let crew_alive =
            self.players.values().filter(|p| !p.is_impostor && !p.is_dead).count();
        let impostors_assigned = self.players.values().any(|p| p.is_impostor);

        if impostors_assigned && impostors_alive == 0 {
            self.end_game_intents.push(EndGameIntent {
                name: "crew eliminated impostors",
                reason: game_over::HUMANS_BY_VOTE,
            });
        } else if impostors_assigned && crew_alive <= impostors_alive {
            let intent = match cause {
                WinCheckCause::Exile => EndGameIntent {
                    name: "exile left impostors in majority",
                    reason: game_over::IMPOSTOR_BY_VOTE,
                },
                WinCheckCause::Kill | WinCheckCause::Task => EndGameIntent {
                    name: "impostors outnumber crew",
                    reason: game_over::IMPOSTOR_BY_KILL,
                },
            };
            self.end_game_intents.push(intent);
        }

        let tasks_done = !self.players.is_empty()
            && self.players.values().filter(|p| !p.is_impostor).all(|p| {
                !p.tasks.is_empty() && p.tasks.iter().all(|t| t.complete)
            });
        if tasks_done && impostors_assigned {
            self.end_game_intents.push(EndGameIntent {
                name: "all tasks complete",
                reason: game_over::HUMANS_BY_TASK,
            });
        }
    }

    pub(crate) fn adopt_settings(&mut self, settings: GameSettings) {
        self.settings = self.config.enforce_settings.clone().unwrap_or(settings);
    }

    async fn handle_chat_command(&mut self, sender: u32, net_id: u32, command: &str) {
        let response = match command.split_whitespace().next() {
            Some("ping") => format!(
                "pong ({} ms)",
                self.connections.get(&sender).map(|c| c.round_trip_ping()).unwrap_or(0)
            ),
            Some("players") => format!("{} player(s) in this room", self.players.len()),
            Some(other) => format!("unknown command: {}", other),
            None => "usage: <command> [args]".to_string(),
        };
        self.send_server_chat(sender, net_id, &response).await;
    }

    /// Speak as the configured server player, to one client only.
    pub(crate) async fn send_server_chat(&mut self, recipient: u32, net_id: u32, text: &str) {
        let mut payload = BytesWriter::new();
        payload.write_string(&format!("{}: {}", self.config.server_player.name, text));
        self.broadcast_game_data(
            vec![GameDataMessage::Rpc {
                net_id,
                tag: RpcTag::SendChat,
                payload: payload.into_bytes(),
            }],
            Vec::new(),
            Some(vec![recipient]),
            &[],
            true,
        )
        .await;
    }
}

/// Vote count helper kept outside the impl so the borrow in CastVote
/// stays local.
fn component_votes(component: &crate::game::objects::NetComponent) -> usize {
    match &component.body {
        ComponentBody::MeetingHud(hud) => hud.votes.len(),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::events::{EventFlow, EventKind};
    use crate::net::connection::Identity;
    use crate::protocol::{Language, Platform, SERVER_CLIENT_ID};
    use tokio::net::UdpSocket;

    fn test_config(server_as_host: bool) -> Config {
        let mut rooms = RoomsConfig::default();
        rooms.server_as_host = server_as_host;
        Config {
            server_addr: "127.0.0.1:0".parse().expect("test addr"),
            admin_addr: "127.0.0.1:0".parse().expect("test addr"),
            log_level: "info".into(),
            auth_base_url: "http://127.0.0.1:1".into(),
            auth_api_token: "t".into(),
            metrics_base_url: "http://127.0.0.1:1".into(),
            metrics_api_token: "t".into(),
            rooms,
        }
    }

    fn test_room_with(config: Config) -> (Room, RoomHandle, RoomRegistry) {
        let registry: RoomRegistry = Arc::new(DashMap::new());
        let (room, handle) = Room::create(
            GameCode::parse("QWERTY").expect("test code"),
            GameSettings::default(),
            config.rooms.clone(),
            AuthApi::new(&config),
            Metrics::new(&config),
            registry.clone(),
        );
        registry.insert(handle.code, handle.clone());
        (room, handle, registry)
    }

    fn saah_room() -> (Room, RoomHandle, RoomRegistry) {
        test_room_with(test_config(true))
    }

    fn classic_room() -> (Room, RoomHandle, RoomRegistry) {
        test_room_with(test_config(false))
    }

    async fn test_conn(client_id: u32, name: &str) -> Arc<Connection> {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind"));
        let remote = socket.local_addr().expect("addr");
        let conn = Arc::new(Connection::new(client_id, remote, socket, 0));
        conn.set_identity(Identity {
            username: name.to_string(),
            language: Language::English,
            platform: Platform::StandaloneSteam,
            auth_token: String::new(),
            version: crate::protocol::PROTOCOL_VERSION,
        });
        conn
    }

    fn rpc(net_id: u32, tag: RpcTag, payload: Vec<u8>) -> GameDataMessage {
        GameDataMessage::Rpc { net_id, tag, payload }
    }

    async fn scene_change(room: &mut Room, client_id: u32) {
        room.handle_game_data(
            client_id,
            None,
            vec![GameDataMessage::SceneChange {
                client_id,
                scene: "OnlineGame".to_string(),
            }],
        )
        .await;
    }

    fn control_of(room: &Room, client_id: u32) -> u32 {
        room.objects
            .find_owned(client_id as i32, ComponentClass::PlayerControl)
            .expect("player control")
    }

    #[tokio::test]
    async fn saah_join_promotes_first_acting_host() {
        let (mut room, _, _) = saah_room();
        let conn = test_conn(1001, "Alice").await;
        room.handle_join(conn).await;

        assert_eq!(room.state, RoomState::NotStarted);
        assert_eq!(room.host, HostId::Server);
        assert!(room.acting_host_ids.contains(&1001));
        // I-law: acting hosts see themselves as host, nobody else does.
        assert_eq!(room.host_view_for(1001), 1001);
        assert_eq!(room.shown_host.get(&1001), Some(&1001));

        // Lobby and roster objects exist because the server is host.
        assert!(room.objects.find_class(ComponentClass::LobbyBehaviour).is_some());
        assert!(room.objects.find_class(ComponentClass::GameData).is_some());

        let second = test_conn(1002, "Bob").await;
        room.handle_join(second).await;
        assert!(!room.acting_host_ids.contains(&1002));
        assert_eq!(room.host_view_for(1002), SERVER_CLIENT_ID);
    }

    #[tokio::test]
    async fn acting_host_handshake_latches_and_adopts_settings() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        scene_change(&mut room, 1001).await;

        let control = control_of(&room, 1001);
        assert!(!room.finished_acting_host_transaction);
        assert_eq!(room.acting_host_waiting_for, vec![1001]);

        let mut name = BytesWriter::new();
        name.write_string("Alice");
        room.handle_game_data(1001, None, vec![rpc(control, RpcTag::CheckName, name.into_bytes())])
            .await;

        assert!(room.finished_acting_host_transaction);
        assert_eq!(room.players.get(&1001).map(|p| p.name.as_str()), Some("Alice"));

        let mut proposed = GameSettings::default();
        proposed.impostors = 2;
        proposed.map = crate::protocol::settings::GameMap::Polus;
        let mut payload = BytesWriter::new();
        proposed.encode(&mut payload);
        room.handle_game_data(
            1001,
            None,
            vec![rpc(control, RpcTag::SyncSettings, payload.into_bytes())],
        )
        .await;

        assert_eq!(room.settings, proposed);
        assert!(room.acting_host_waiting_for.is_empty());
        assert_eq!(room.host_view_for(1001), 1001);
    }

    #[tokio::test]
    async fn start_force_removes_unready_players() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        scene_change(&mut room, 1001).await;
        scene_change(&mut room, 1002).await;

        room.handle_start(1001).await;
        assert_eq!(room.state, RoomState::Started);
        assert!(room.start_ready_deadline.is_some());

        room.handle_game_data(1001, None, vec![GameDataMessage::Ready { client_id: 1001 }])
            .await;
        assert!(room.players.get(&1001).map(|p| p.is_ready).unwrap_or(false));
        // Bob never readies; the window elapses.
        room.start_ready_deadline = Some(Instant::now() - Duration::from_millis(10));
        room.fixed_update().await;

        assert!(!room.players.contains_key(&1002));
        assert!(room.players.contains_key(&1001));
        assert!(room.objects.find_class(ComponentClass::ShipStatus).is_some());
        assert!(room.objects.find_class(ComponentClass::LobbyBehaviour).is_none());
        // One impostor got assigned among the survivors.
        assert_eq!(room.players.values().filter(|p| p.is_impostor).count(), 1);
        assert!(room.players.values().all(|p| !p.tasks.is_empty()));
    }

    #[tokio::test]
    async fn vent_rpc_from_crewmate_is_swallowed_and_recorded() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        scene_change(&mut room, 1001).await;
        scene_change(&mut room, 1002).await;
        room.state = RoomState::Started;
        if let Some(p) = room.players.get_mut(&1001) {
            p.is_impostor = true;
        }

        let physics = room
            .objects
            .find_owned(1002, ComponentClass::PlayerPhysics)
            .expect("physics");
        let mut payload = BytesWriter::new();
        payload.write_packed_u32(0);
        room.handle_game_data(1002, None, vec![rpc(physics, RpcTag::EnterVent, payload.into_bytes())])
            .await;

        // No state change, one high-severity infraction.
        match &room.objects.get(physics).expect("component").body {
            ComponentBody::PlayerPhysics(phys) => assert_eq!(phys.in_vent, None),
            _ => unreachable!(),
        }
        assert_eq!(room.infractions.len(), 1);
        let infraction = &room.infractions.peek()[0];
        assert_eq!(infraction.name, crate::anticheat::InfractionName::ForbiddenRpcVent);
        assert_eq!(infraction.severity, crate::anticheat::InfractionSeverity::High);
        assert_eq!(infraction.client_id, 1002);

        // The impostor's own vent RPC goes through.
        let impostor_physics = room
            .objects
            .find_owned(1001, ComponentClass::PlayerPhysics)
            .expect("physics");
        let mut payload = BytesWriter::new();
        payload.write_packed_u32(2);
        room.handle_game_data(
            1001,
            None,
            vec![rpc(impostor_physics, RpcTag::EnterVent, payload.into_bytes())],
        )
        .await;
        match &room.objects.get(impostor_physics).expect("component").body {
            ComponentBody::PlayerPhysics(phys) => assert_eq!(phys.in_vent, Some(2)),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn classic_host_migrates_on_leave() {
        let (mut room, _, _) = classic_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        assert_eq!(room.host, HostId::Client(1001));

        let seen = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen_by_listener = seen.clone();
        room.events.listen(EventKind::SelectHost, move |event| {
            if let RoomEvent::SelectHost { candidate } = event {
                seen_by_listener.store(*candidate, Ordering::Relaxed);
            }
            EventFlow::Continue
        });

        room.handle_leave(1001, DisconnectReason::ExitGame).await;
        assert_eq!(seen.load(Ordering::Relaxed), 1002);
        assert_eq!(room.host, HostId::Client(1002));
        assert_eq!(room.host_view_for(1002), 1002);
        assert!(room.players.contains_key(&1002));
    }

    #[tokio::test]
    async fn last_leave_destroys_room_and_unregisters() {
        let (mut room, _, registry) = classic_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        assert_eq!(registry.len(), 1);

        let destroyed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = destroyed.clone();
        room.events.listen(EventKind::Destroy, move |_| {
            flag.store(true, Ordering::Relaxed);
            EventFlow::Continue
        });

        room.handle_leave(1001, DisconnectReason::ExitGame).await;
        assert_eq!(room.state, RoomState::Destroyed);
        assert!(destroyed.load(Ordering::Relaxed));
        assert_eq!(registry.len(), 0);
    }

    #[tokio::test]
    async fn empty_room_with_past_timeout_is_destroyed_on_tick() {
        let mut config = test_config(false);
        config.rooms.create_timeout = 0;
        let (mut room, _, _) = test_room_with(config);
        room.fixed_update().await;
        assert_eq!(room.state, RoomState::Destroyed);
    }

    #[tokio::test]
    async fn fresh_room_within_timeout_survives_tick() {
        let (mut room, _, _) = classic_room();
        room.fixed_update().await;
        assert_eq!(room.state, RoomState::NotStarted);
    }

    #[tokio::test]
    async fn abandoned_room_is_destroyed_within_one_tick() {
        let (mut room, _, _) = classic_room();
        // Simulates the invariant directly: connections emptied by some
        // path that skipped the leave handler.
        room.ever_joined = true;
        room.fixed_update().await;
        assert_eq!(room.state, RoomState::Destroyed);
    }

    #[tokio::test]
    async fn movement_update_rate_forwards_every_nth_packet() {
        let mut config = test_config(true);
        config.rooms.optimizations.movement.update_rate = 3;
        let (mut room, _, _) = test_room_with(config);
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        scene_change(&mut room, 1001).await;
        scene_change(&mut room, 1002).await;

        let transform = room
            .objects
            .find_owned(1001, ComponentClass::CustomNetworkTransform)
            .expect("transform");

        let mut forwarded = 0;
        for step in 1..=9u16 {
            let mut payload = BytesWriter::new();
            payload.write_u16(step);
            payload.write_vector2(Vector2::new(step as f32, 0.0));
            payload.write_vector2(Vector2::ZERO);
            if room.handle_movement_data(1001, transform, payload.into_bytes()).await {
                forwarded += 1;
            }
        }
        // updateRate=3 with unit-magnitude motion: floor(9 / 3).
        assert_eq!(forwarded, 3);
    }

    #[tokio::test]
    async fn small_movement_bypasses_the_counter() {
        let mut config = test_config(true);
        config.rooms.optimizations.movement.update_rate = 3;
        let (mut room, _, _) = test_room_with(config);
        room.handle_join(test_conn(1001, "Alice").await).await;
        scene_change(&mut room, 1001).await;

        let transform = room
            .objects
            .find_owned(1001, ComponentClass::CustomNetworkTransform)
            .expect("transform");
        let mut payload = BytesWriter::new();
        payload.write_u16(1);
        payload.write_vector2(Vector2::new(0.1, 0.0));
        payload.write_vector2(Vector2::ZERO);
        assert!(room.handle_movement_data(1001, transform, payload.into_bytes()).await);
    }

    #[tokio::test]
    async fn late_joiner_on_ended_room_waits_for_host() {
        let (mut room, _, _) = classic_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        room.state = RoomState::Ended;

        room.handle_join(test_conn(1003, "Carol").await).await;
        assert!(room.waiting_for_host.contains(&1003));
        assert_eq!(room.state, RoomState::Ended);
    }

    #[tokio::test]
    async fn rejoining_host_reopens_ended_room_and_releases_waiters() {
        let (mut room, _, _) = classic_room();
        let host_conn = test_conn(1001, "Alice").await;
        room.handle_join(host_conn.clone()).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        room.state = RoomState::Ended;
        room.waiting_for_host.insert(1002);

        room.handle_join(host_conn).await;
        assert_eq!(room.state, RoomState::NotStarted);
        assert!(room.waiting_for_host.is_empty());
    }

    #[tokio::test]
    async fn kick_with_ban_blocks_the_address() {
        let (mut room, _, _) = classic_room();
        let host = test_conn(1001, "Alice").await;
        let target = test_conn(1002, "Bob").await;
        let banned_ip = target.remote.ip();
        room.handle_join(host).await;
        room.handle_join(target.clone()).await;

        room.handle_kick(1001, 1002, true).await;
        assert!(!room.players.contains_key(&1002));
        assert!(room.banned_addresses.contains(&banned_ip));

        // The banned address bounces straight off the join path.
        let again = Arc::new(Connection::new(
            1003,
            target.remote,
            Arc::new(UdpSocket::bind("127.0.0.1:0").await.expect("bind")),
            0,
        ));
        room.handle_join(again).await;
        assert!(!room.players.contains_key(&1003));
    }

    #[tokio::test]
    async fn dead_impostors_queue_a_crew_win_intent() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        room.state = RoomState::Started;
        if let Some(p) = room.players.get_mut(&1001) {
            p.is_impostor = true;
            p.is_dead = true;
        }

        room.queue_win_checks(WinCheckCause::Exile);
        assert_eq!(room.end_game_intents.len(), 1);
        assert_eq!(room.end_game_intents[0].reason, game_over::HUMANS_BY_VOTE);

        room.fixed_update().await;
        assert_eq!(room.state, RoomState::Ended);
    }

    #[tokio::test]
    async fn impostor_majority_reason_tracks_its_cause() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        room.state = RoomState::Started;
        if let Some(p) = room.players.get_mut(&1001) {
            p.is_impostor = true;
        }
        // Bob is the last crewmate; his death puts impostors in
        // majority however it happened.
        if let Some(p) = room.players.get_mut(&1002) {
            p.is_dead = true;
        }

        room.queue_win_checks(WinCheckCause::Exile);
        assert_eq!(room.end_game_intents.len(), 1);
        assert_eq!(room.end_game_intents[0].reason, game_over::IMPOSTOR_BY_VOTE);

        room.end_game_intents.clear();
        room.queue_win_checks(WinCheckCause::Kill);
        assert_eq!(room.end_game_intents[0].reason, game_over::IMPOSTOR_BY_KILL);
    }

    #[tokio::test]
    async fn cancelled_end_game_intent_keeps_the_game_running() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.state = RoomState::Started;
        room.events.listen(EventKind::EndGameIntent, |_| EventFlow::Cancel);
        room.end_game_intents.push(EndGameIntent {
            name: "test intent",
            reason: game_over::IMPOSTOR_BY_KILL,
        });

        room.fixed_update().await;
        assert_eq!(room.state, RoomState::Started);
    }

    #[tokio::test]
    async fn despawn_of_foreign_component_is_ignored() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        scene_change(&mut room, 1001).await;

        let control = control_of(&room, 1001);
        room.handle_game_data(1002, None, vec![GameDataMessage::Despawn { net_id: control }])
            .await;
        assert!(room.objects.get(control).is_some());

        // The owner may despawn their own component.
        room.handle_game_data(1001, None, vec![GameDataMessage::Despawn { net_id: control }])
            .await;
        assert!(room.objects.get(control).is_none());
    }

    #[tokio::test]
    async fn leave_despawns_owned_components() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        scene_change(&mut room, 1002).await;
        assert!(!room.objects.owned_by(1002).is_empty());

        room.handle_leave(1002, DisconnectReason::ExitGame).await;
        assert!(room.objects.owned_by(1002).is_empty());
    }

    #[tokio::test]
    async fn saah_can_be_toggled_at_runtime() {
        let (mut room, _, _) = classic_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        assert_eq!(room.host, HostId::Client(1001));

        room.handle_command(RoomCommand::SetSaah { enabled: true, keep_previous_host: true })
            .await;
        assert_eq!(room.host, HostId::Server);
        assert!(room.acting_hosts_enabled);
        assert!(room.acting_host_ids.contains(&1001));
        assert_eq!(room.host_view_for(1001), 1001);
        assert_eq!(room.host_view_for(1002), SERVER_CLIENT_ID);

        room.handle_command(RoomCommand::SetSaah { enabled: false, keep_previous_host: false })
            .await;
        assert_eq!(room.host, HostId::Client(1001));
        assert!(!room.acting_hosts_enabled);
        assert!(room.acting_host_ids.is_empty());
        assert_eq!(room.host_view_for(1002), 1001);
    }

    #[tokio::test]
    async fn room_task_processes_commands_and_unregisters_on_destroy() {
        let (room, handle, registry) = saah_room();
        tokio::spawn(room.run());

        let conn = test_conn(1001, "Alice").await;
        handle.cmd_tx.send(RoomCommand::Join { conn }).await.expect("send join");
        for _ in 0..100 {
            if handle.player_count.load(Ordering::Relaxed) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(handle.player_count.load(Ordering::Relaxed), 1);

        handle
            .cmd_tx
            .send(RoomCommand::Destroy { reason: DisconnectReason::ServerRequest })
            .await
            .expect("send destroy");
        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn meeting_votes_resolve_an_exile() {
        let (mut room, _, _) = saah_room();
        room.handle_join(test_conn(1001, "Alice").await).await;
        room.handle_join(test_conn(1002, "Bob").await).await;
        scene_change(&mut room, 1001).await;
        scene_change(&mut room, 1002).await;
        room.state = RoomState::Started;
        if let Some(p) = room.players.get_mut(&1001) {
            p.is_impostor = true;
        }

        let control = control_of(&room, 1001);
        room.handle_game_data(1001, None, vec![rpc(control, RpcTag::StartMeeting, Vec::new())])
            .await;
        let hud = room
            .objects
            .find_class(ComponentClass::MeetingHud)
            .expect("meeting hud");

        let bob_pid = room.players.get(&1002).expect("bob").player_id;
        let alice_pid = room.players.get(&1001).expect("alice").player_id;

        // Both vote Bob out.
        let mut vote = BytesWriter::new();
        vote.write_u8(alice_pid);
        vote.write_u8(bob_pid);
        room.handle_game_data(1001, None, vec![rpc(hud, RpcTag::CastVote, vote.into_bytes())])
            .await;
        let mut vote = BytesWriter::new();
        vote.write_u8(bob_pid);
        vote.write_u8(bob_pid);
        room.handle_game_data(1002, None, vec![rpc(hud, RpcTag::CastVote, vote.into_bytes())])
            .await;

        assert!(room.players.get(&1002).map(|p| p.is_dead).unwrap_or(false));
        // The meeting closed itself.
        assert!(room.objects.find_class(ComponentClass::MeetingHud).is_none());
    }
}

impl std::fmt::Debug for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut out = f.debug_struct("Room");
        for field in &self.config.logging.rooms.format {
            match field.as_str() {
                "code" => {
                    out.field("code", &self.code.to_string());
                }
                "players" => {
                    out.field("players", &self.players.len());
                }
                "state" => {
                    out.field("state", &self.state);
                }
                "host" => {
                    out.field("host", &self.host);
                }
                _ => {}
            }
        }
        out.finish()
    }
}
