//! Per-client session binding a transport peer to a protocol identity

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio::sync::{oneshot, Mutex};
use tracing::trace;

use crate::codec::{BytesWriter, GameCode};
use crate::protocol::disconnect::DisconnectReason;
use crate::protocol::root::RootMessage;
use crate::protocol::{Hello, Language, PacketKind, Platform};
use crate::util::rate_limit::PeerRateLimiter;

use super::transport::{
    AckOutcome, InboundDisposition, ReliabilityState, SweepOutcome, LAME_DUCK,
};

/// Identity established by the Hello packet.
#[derive(Debug, Clone)]
pub struct Identity {
    pub username: String,
    pub language: Language,
    pub platform: Platform,
    pub auth_token: String,
    pub version: i32,
}

impl Identity {
    pub fn from_hello(hello: &Hello) -> Self {
        Self {
            username: hello.username.clone(),
            language: hello.language,
            platform: hello.platform,
            auth_token: hello.auth_token.clone(),
            version: hello.version,
        }
    }
}

/// What the sweep decided for this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepStatus {
    Alive,
    /// A reliable packet exhausted its attempts.
    TimedOut,
    /// Nothing heard from the peer for too long.
    Silent,
}

/// One connected peer. Everything mutable sits behind the reliability
/// lock so the worker and room tasks can share the handle freely.
pub struct Connection {
    pub client_id: u32,
    pub remote: SocketAddr,
    /// Index of the listen socket this peer arrived on.
    pub listen_socket: usize,
    socket: Arc<UdpSocket>,
    state: Mutex<ReliabilityState>,
    identity: OnceLock<Identity>,
    room: Mutex<Option<GameCode>>,
    ping_ms: AtomicU32,
    pub limiter: PeerRateLimiter,
    disconnected: AtomicBool,
    lame_duck_until: Mutex<Option<Instant>>,
}

impl Connection {
    pub fn new(
        client_id: u32,
        remote: SocketAddr,
        socket: Arc<UdpSocket>,
        listen_socket: usize,
    ) -> Self {
        Self {
            client_id,
            remote,
            listen_socket,
            socket,
            state: Mutex::new(ReliabilityState::new(Instant::now())),
            identity: OnceLock::new(),
            room: Mutex::new(None),
            ping_ms: AtomicU32::new(0),
            limiter: PeerRateLimiter::new(),
            disconnected: AtomicBool::new(false),
            lame_duck_until: Mutex::new(None),
        }
    }

    pub fn set_identity(&self, identity: Identity) {
        let _ = self.identity.set(identity);
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.get()
    }

    pub fn username(&self) -> &str {
        self.identity.get().map_or("<hello pending>", |i| i.username.as_str())
    }

    pub async fn room_code(&self) -> Option<GameCode> {
        *self.room.lock().await
    }

    pub async fn set_room(&self, code: Option<GameCode>) {
        *self.room.lock().await = code;
    }

    pub fn round_trip_ping(&self) -> u32 {
        self.ping_ms.load(Ordering::Relaxed)
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Relaxed)
    }

    /// Coalesce root messages into one reliable packet. The returned
    /// receiver resolves when the peer acks or the packet times out.
    pub async fn send_reliable(
        &self,
        messages: &[RootMessage],
    ) -> io::Result<oneshot::Receiver<AckOutcome>> {
        let mut payload = BytesWriter::new();
        for message in messages {
            message.encode(&mut payload);
        }
        self.send_reliable_bytes(payload.as_slice()).await
    }

    pub async fn send_reliable_bytes(
        &self,
        payload: &[u8],
    ) -> io::Result<oneshot::Receiver<AckOutcome>> {
        let (tx, rx) = oneshot::channel();
        let bytes = {
            let mut state = self.state.lock().await;
            let nonce = state.allocate_nonce();
            let mut w = BytesWriter::with_capacity(payload.len() + 3);
            w.write_u8(PacketKind::Reliable as u8);
            w.write_u16_be(nonce);
            w.write_raw(payload);
            let bytes = w.into_bytes();
            state.record_send(nonce, bytes.clone(), Some(tx), Instant::now());
            bytes
        };
        self.socket.send_to(&bytes, self.remote).await?;
        Ok(rx)
    }

    pub async fn send_unreliable(&self, messages: &[RootMessage]) -> io::Result<()> {
        let mut w = BytesWriter::new();
        w.write_u8(PacketKind::Unreliable as u8);
        for message in messages {
            message.encode(&mut w);
        }
        self.send_unreliable_bytes_framed(w.into_bytes()).await
    }

    pub async fn send_unreliable_bytes(&self, payload: &[u8]) -> io::Result<()> {
        let mut w = BytesWriter::with_capacity(payload.len() + 1);
        w.write_u8(PacketKind::Unreliable as u8);
        w.write_raw(payload);
        self.send_unreliable_bytes_framed(w.into_bytes()).await
    }

    async fn send_unreliable_bytes_framed(&self, bytes: Vec<u8>) -> io::Result<()> {
        {
            let mut state = self.state.lock().await;
            state.record_unreliable_send(Instant::now());
        }
        self.socket.send_to(&bytes, self.remote).await?;
        Ok(())
    }

    pub async fn send_ack(&self, nonces: &[u16]) -> io::Result<()> {
        let mut w = BytesWriter::with_capacity(1 + nonces.len() * 2);
        w.write_u8(PacketKind::Ack as u8);
        for nonce in nonces {
            w.write_u16_be(*nonce);
        }
        // Acks do not count as traffic for keepalive purposes on our
        // side, so the state clock is left alone.
        self.socket.send_to(w.as_slice(), self.remote).await?;
        Ok(())
    }

    pub async fn send_ping(&self) -> io::Result<()> {
        let bytes = {
            let mut state = self.state.lock().await;
            let nonce = state.allocate_nonce();
            let mut w = BytesWriter::with_capacity(3);
            w.write_u8(PacketKind::Ping as u8);
            w.write_u16_be(nonce);
            let bytes = w.into_bytes();
            state.record_send(nonce, bytes.clone(), None, Instant::now());
            bytes
        };
        self.socket.send_to(&bytes, self.remote).await?;
        Ok(())
    }

    /// Tell the peer to go away. The connection enters its lame-duck
    /// window so in-flight reliable packets still get acked.
    pub async fn send_disconnect(&self, reason: &DisconnectReason) -> io::Result<()> {
        let mut w = BytesWriter::new();
        w.write_u8(PacketKind::Disconnect as u8);
        w.write_bool(true);
        w.write_u8(reason.to_wire());
        if let Some(text) = reason.custom_message() {
            w.write_string(text);
        }
        self.socket.send_to(w.as_slice(), self.remote).await?;

        self.disconnected.store(true, Ordering::Relaxed);
        *self.lame_duck_until.lock().await = Some(Instant::now() + LAME_DUCK);
        self.state.lock().await.abandon();
        Ok(())
    }

    /// Mark a peer-initiated disconnect; no packet is sent back.
    pub async fn mark_disconnected(&self) {
        self.disconnected.store(true, Ordering::Relaxed);
        *self.lame_duck_until.lock().await = Some(Instant::now() + LAME_DUCK);
        self.state.lock().await.abandon();
    }

    /// True while the peer should still get acks after disconnecting.
    pub async fn in_lame_duck(&self) -> bool {
        match *self.lame_duck_until.lock().await {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    pub async fn handle_ack(&self, nonce: u16) {
        let mut state = self.state.lock().await;
        state.handle_ack(nonce, Instant::now());
        self.ping_ms.store(state.rtt_ms(), Ordering::Relaxed);
    }

    pub async fn register_inbound(&self, nonce: u16) -> InboundDisposition {
        self.state.lock().await.register_inbound(nonce, Instant::now())
    }

    pub async fn note_inbound(&self) {
        self.state.lock().await.note_inbound(Instant::now());
    }

    /// Retransmit due packets and keep the link alive. Returns whether
    /// the peer survived the sweep.
    pub async fn sweep(&self, now: Instant) -> SweepStatus {
        let outcome: SweepOutcome = {
            let mut state = self.state.lock().await;
            let outcome = state.sweep(now);
            self.ping_ms.store(state.rtt_ms(), Ordering::Relaxed);
            outcome
        };

        if outcome.silent {
            return SweepStatus::Silent;
        }
        if outcome.timed_out {
            return SweepStatus::TimedOut;
        }

        for bytes in &outcome.resends {
            if let Err(error) = self.socket.send_to(bytes, self.remote).await {
                trace!(client_id = self.client_id, %error, "resend failed");
            }
        }
        if outcome.wants_ping {
            if let Err(error) = self.send_ping().await {
                trace!(client_id = self.client_id, %error, "keepalive failed");
            }
        }
        SweepStatus::Alive
    }
}
