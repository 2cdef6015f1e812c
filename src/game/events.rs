//! Room event hub
//!
//! Plugins and the chat subsystem observe rooms through typed listeners.
//! Emission is serial for events listeners may veto; cancelling stops
//! the default behavior. Listeners run inside the room task, so they
//! never observe another room's state.

use std::collections::HashMap;

use crate::protocol::game_data::GameDataMessage;

/// Events a room emits during its lifecycle.
#[derive(Debug)]
pub enum RoomEvent {
    /// A host candidate is about to be picked. Listeners may substitute
    /// their own candidate or veto the promotion entirely.
    SelectHost { candidate: u32 },
    /// Fired before teardown; cancelling keeps the room alive.
    BeforeDestroy { reason: u8 },
    /// The room is gone. Informational.
    Destroy,
    /// Fired each tick before the outbound stream is broadcast;
    /// cancelling suppresses the broadcast for this tick.
    FixedUpdate,
    /// Fired once per recipient during a broadcast. Listeners may
    /// rewrite the per-recipient copy of the game data.
    ClientBroadcast { recipient: u32, game_data: Vec<GameDataMessage> },
    /// A queued end-game intent is being considered; the first
    /// uncancelled intent ends the game.
    EndGameIntent { name: &'static str, reason: u8 },
    ClientLeave { client_id: u32 },
    /// A chat line arrived, after command stripping.
    PlayerChat { client_id: u32, message: String },
}

/// Discriminant used to key listener lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    SelectHost,
    BeforeDestroy,
    Destroy,
    FixedUpdate,
    ClientBroadcast,
    EndGameIntent,
    ClientLeave,
    PlayerChat,
}

impl RoomEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::SelectHost { .. } => EventKind::SelectHost,
            Self::BeforeDestroy { .. } => EventKind::BeforeDestroy,
            Self::Destroy => EventKind::Destroy,
            Self::FixedUpdate => EventKind::FixedUpdate,
            Self::ClientBroadcast { .. } => EventKind::ClientBroadcast,
            Self::EndGameIntent { .. } => EventKind::EndGameIntent,
            Self::ClientLeave { .. } => EventKind::ClientLeave,
            Self::PlayerChat { .. } => EventKind::PlayerChat,
        }
    }
}

/// Listener verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventFlow {
    Continue,
    Cancel,
}

type Listener = Box<dyn FnMut(&mut RoomEvent) -> EventFlow + Send>;

/// Ordered listener lists per event kind.
#[derive(Default)]
pub struct EventHub {
    listeners: HashMap<EventKind, Vec<Listener>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(
        &mut self,
        kind: EventKind,
        listener: impl FnMut(&mut RoomEvent) -> EventFlow + Send + 'static,
    ) {
        self.listeners.entry(kind).or_default().push(Box::new(listener));
    }

    /// Serial emission for cancellable events. Returns false when any
    /// listener cancelled; later listeners still run so observers stay
    /// consistent.
    pub fn emit_serial(&mut self, event: &mut RoomEvent) -> bool {
        let mut proceed = true;
        if let Some(list) = self.listeners.get_mut(&event.kind()) {
            for listener in list.iter_mut() {
                if listener(event) == EventFlow::Cancel {
                    proceed = false;
                }
            }
        }
        proceed
    }

    /// Best-effort emission for informational events.
    pub fn emit(&mut self, event: &mut RoomEvent) {
        if let Some(list) = self.listeners.get_mut(&event.kind()) {
            for listener in list.iter_mut() {
                let _ = listener(event);
            }
        }
    }
}
