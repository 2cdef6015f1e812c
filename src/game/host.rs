//! Host policy
//!
//! Two regimes: classic (one client is host, migrated on leave) and
//! server-as-a-host (the server holds authority and delegates to acting
//! hosts). Every mutation ends with a per-connection host view update:
//! the paired temp join/remove forces clients to reconcile the host
//! field without a rejoin.

use futures::future::join_all;
use tracing::{debug, info};

use crate::game::events::RoomEvent;
use crate::game::room::{HostId, Room, RoomState};
use crate::protocol::game_data::GameDataMessage;
use crate::protocol::root::RootMessage;
use crate::protocol::TEMP_CLIENT_ID;

impl Room {
    /// Pick the host for a fresh room. Fires the select-host event so
    /// listeners can substitute a candidate; under SaaH the server
    /// itself takes the seat.
    pub(crate) async fn select_host(&mut self, candidate: u32) {
        if self.acting_hosts_enabled {
            self.host = HostId::Server;
            return;
        }

        let mut event = RoomEvent::SelectHost { candidate };
        let proceed = self.events.emit_serial(&mut event);
        let chosen = match event {
            RoomEvent::SelectHost { candidate } => candidate,
            _ => candidate,
        };
        if proceed {
            self.host = HostId::Client(chosen);
            info!(room = %self.code, host = chosen, "host selected");
        } else {
            // Veto falls back to the original joiner; a room cannot sit
            // hostless in classic mode.
            self.host = HostId::Client(candidate);
        }
    }

    /// Classic-mode migration after the host left: first acting host if
    /// any, else the lowest-id connection.
    pub(crate) async fn migrate_host(&mut self) {
        let candidate = self
            .acting_host_ids
            .iter()
            .min()
            .copied()
            .or_else(|| self.connections.keys().min().copied());
        let Some(candidate) = candidate else { return };

        let mut event = RoomEvent::SelectHost { candidate };
        self.events.emit_serial(&mut event);
        let chosen = match event {
            RoomEvent::SelectHost { candidate } => candidate,
            _ => candidate,
        };

        self.acting_host_ids.remove(&chosen);
        self.host = HostId::Client(chosen);
        info!(room = %self.code, host = chosen, "host migrated");

        if self.state == RoomState::Ended && self.waiting_for_host.contains(&chosen) {
            self.waiting_for_host.remove(&chosen);
            self.state = RoomState::NotStarted;
            self.join_other_clients().await;
        }

        self.update_host_views().await;
    }

    /// SaaH: grant the first connection acting-host authority, subject
    /// to the select-host veto.
    pub(crate) async fn promote_first_acting_host(&mut self) {
        let Some(candidate) = self.connections.keys().min().copied() else { return };
        let mut event = RoomEvent::SelectHost { candidate };
        if !self.events.emit_serial(&mut event) {
            debug!(room = %self.code, candidate, "acting host promotion vetoed");
            return;
        }
        let chosen = match event {
            RoomEvent::SelectHost { candidate } => candidate,
            _ => candidate,
        };
        self.acting_host_ids.insert(chosen);
        self.update_host_views().await;
    }

    /// Switch the room to server-as-a-host, optionally keeping the
    /// previous host around as an acting host.
    pub(crate) async fn enable_saah(&mut self, keep_previous_host: bool) {
        let previous = match self.host {
            HostId::Client(id) => Some(id),
            HostId::Server => None,
        };
        self.host = HostId::Server;
        self.acting_hosts_enabled = true;
        if keep_previous_host {
            if let Some(id) = previous {
                self.acting_host_ids.insert(id);
            }
        }
        self.update_host_views().await;
    }

    /// Leave SaaH: the first acting host (else the first connection)
    /// becomes a classic host.
    pub(crate) async fn disable_saah(&mut self) {
        let candidate = self
            .acting_host_ids
            .iter()
            .min()
            .copied()
            .or_else(|| self.connections.keys().min().copied());
        self.acting_hosts_enabled = false;
        self.acting_host_ids.clear();
        if let Some(id) = candidate {
            self.host = HostId::Client(id);
        }
        self.update_host_views().await;
    }

    /// The host a given connection is supposed to see right now.
    pub(crate) fn host_view_for(&self, client_id: u32) -> u32 {
        if self.acting_hosts_enabled && self.acting_host_ids.contains(&client_id) {
            client_id
        } else {
            self.host.wire_id()
        }
    }

    /// Reconcile every connection's perceived host with the policy
    /// state, using the paired temp join/remove idiom.
    pub(crate) async fn update_host_views(&mut self) {
        let mut sends = Vec::new();
        for (client_id, conn) in &self.connections {
            let desired = self.host_view_for(*client_id);
            if self.shown_host.get(client_id) == Some(&desired) {
                continue;
            }
            let pair = vec![
                RootMessage::JoinGameBroadcast {
                    code: self.code,
                    client_id: TEMP_CLIENT_ID,
                    host_id: desired,
                },
                RootMessage::RemovePlayer {
                    code: self.code,
                    client_id: TEMP_CLIENT_ID,
                    host_id: desired,
                    reason: 0,
                },
            ];
            let conn = conn.clone();
            sends.push(async move { conn.send_reliable(&pair).await });
        }
        join_all(sends).await;

        let views: Vec<(u32, u32)> = self
            .connections
            .keys()
            .map(|id| (*id, self.host_view_for(*id)))
            .collect();
        for (client_id, desired) in views {
            self.shown_host.insert(client_id, desired);
        }
    }

    /// The acting-host scene transaction. Runs when the first parked
    /// player's CheckName arrives; each acting host gets the temp join
    /// plus a targeted scene change exactly once.
    pub(crate) async fn run_acting_host_transaction(&mut self, sender: u32) {
        if !self.acting_hosts_enabled || self.finished_acting_host_transaction {
            return;
        }
        if self.acting_host_waiting_for.first() != Some(&sender) {
            return;
        }

        let acting_hosts: Vec<u32> = self.acting_host_ids.iter().copied().collect();
        let mut sends = Vec::new();
        for acting_host in acting_hosts {
            let Some(conn) = self.connections.get(&acting_host).cloned() else { continue };
            let join = RootMessage::JoinGameBroadcast {
                code: self.code,
                client_id: TEMP_CLIENT_ID,
                host_id: acting_host,
            };
            let scene = RootMessage::GameDataTo {
                code: self.code,
                target: acting_host,
                messages: vec![GameDataMessage::SceneChange {
                    client_id: TEMP_CLIENT_ID,
                    scene: "OnlineGame".to_string(),
                }],
            };
            sends.push(async move { conn.send_reliable(&[join, scene]).await });
        }
        join_all(sends).await;

        self.finished_acting_host_transaction = true;
        debug!(room = %self.code, sender, "acting host transaction sent");
    }

    /// Settings arrived from an acting host: the handshake for the
    /// player at the head of the queue is complete; restore views.
    pub(crate) async fn finish_acting_host_handshake(&mut self, sender: u32) {
        if !self.acting_hosts_enabled || !self.acting_host_ids.contains(&sender) {
            return;
        }
        if !self.acting_host_waiting_for.is_empty() {
            self.acting_host_waiting_for.remove(0);
        }
        // Force a refresh so the acting host stops seeing the server.
        for id in self.acting_host_ids.clone() {
            self.shown_host.remove(&id);
        }
        self.update_host_views().await;
    }
}
