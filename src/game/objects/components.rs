//! Networked component kinds
//!
//! The replicated object model is a tagged union: every component kind
//! knows how to serialize itself for spawns and for incremental data
//! updates, and exposes the mutators the RPC dispatch needs. Dirty bits
//! are per-component masks; any non-zero mask queues a data message on
//! the room's outbound stream at the next tick.

use std::collections::BTreeMap;

use crate::codec::{BytesReader, BytesWriter, CodecError, Vector2};
use crate::protocol::settings::GameMap;

/// Owner id used for room-scoped objects.
pub const ROOM_OWNER: i32 = -2;

/// Spawn-type ids. Wire values are client contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpawnType {
    SkeldShipStatus,
    MeetingHud,
    LobbyBehaviour,
    GameData,
    Player,
    MiraShipStatus,
    PolusShipStatus,
    AirshipStatus,
}

impl SpawnType {
    pub fn to_wire(self) -> u32 {
        match self {
            Self::SkeldShipStatus => 0,
            Self::MeetingHud => 1,
            Self::LobbyBehaviour => 2,
            Self::GameData => 3,
            Self::Player => 4,
            Self::MiraShipStatus => 5,
            Self::PolusShipStatus => 6,
            Self::AirshipStatus => 8,
        }
    }

    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::SkeldShipStatus,
            1 => Self::MeetingHud,
            2 => Self::LobbyBehaviour,
            3 => Self::GameData,
            4 => Self::Player,
            5 => Self::MiraShipStatus,
            6 => Self::PolusShipStatus,
            8 => Self::AirshipStatus,
            _ => return None,
        })
    }

    pub fn for_map(map: GameMap) -> Self {
        match map {
            GameMap::TheSkeld => Self::SkeldShipStatus,
            GameMap::MiraHq => Self::MiraShipStatus,
            GameMap::Polus => Self::PolusShipStatus,
            GameMap::Airship => Self::AirshipStatus,
        }
    }

    /// Ordered component kinds making up this spawn type.
    pub fn prefab(self) -> &'static [ComponentTemplate] {
        match self {
            Self::Player => &[
                ComponentTemplate::PlayerControl,
                ComponentTemplate::PlayerPhysics,
                ComponentTemplate::CustomNetworkTransform,
            ],
            Self::LobbyBehaviour => &[ComponentTemplate::LobbyBehaviour],
            Self::GameData => &[ComponentTemplate::GameData, ComponentTemplate::VoteBanSystem],
            Self::MeetingHud => &[ComponentTemplate::MeetingHud],
            Self::SkeldShipStatus
            | Self::MiraShipStatus
            | Self::PolusShipStatus
            | Self::AirshipStatus => &[ComponentTemplate::ShipStatus],
        }
    }

    pub fn ship_map(self) -> Option<GameMap> {
        Some(match self {
            Self::SkeldShipStatus => GameMap::TheSkeld,
            Self::MiraShipStatus => GameMap::MiraHq,
            Self::PolusShipStatus => GameMap::Polus,
            Self::AirshipStatus => GameMap::Airship,
            _ => return None,
        })
    }
}

/// Component slots a prefab lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentTemplate {
    PlayerControl,
    PlayerPhysics,
    CustomNetworkTransform,
    ShipStatus,
    MeetingHud,
    GameData,
    LobbyBehaviour,
    VoteBanSystem,
}

/// Compact discriminant used by the anti-cheat component-class check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentClass {
    PlayerControl,
    PlayerPhysics,
    CustomNetworkTransform,
    ShipStatus,
    MeetingHud,
    GameData,
    LobbyBehaviour,
    VoteBanSystem,
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerControl {
    pub is_new: bool,
    pub player_id: u8,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerPhysics {
    pub in_vent: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CustomNetworkTransform {
    pub sequence: u16,
    pub position: Vector2,
    pub velocity: Vector2,
}

impl Default for CustomNetworkTransform {
    fn default() -> Self {
        Self { sequence: 0, position: Vector2::ZERO, velocity: Vector2::ZERO }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShipStatus {
    pub map: GameMap,
    pub sabotage_active: bool,
    pub sabotage_timer: f32,
    pub doors: u32,
}

impl ShipStatus {
    pub fn new(map: GameMap) -> Self {
        Self { map, sabotage_active: false, sabotage_timer: 0.0, doors: 0 }
    }
}

/// Vote tally for one open meeting. Keyed by voter player id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeetingHud {
    pub votes: BTreeMap<u8, u8>,
}

impl MeetingHud {
    /// The player-id value meaning "skipped".
    pub const SKIP: u8 = 255;

    pub fn has_voted(&self, voter: u8) -> bool {
        self.votes.contains_key(&voter)
    }

    pub fn cast(&mut self, voter: u8, suspect: u8) {
        self.votes.insert(voter, suspect);
    }

    /// Plurality winner, or None on a tie/skip outcome.
    pub fn tally(&self) -> Option<u8> {
        let mut counts: BTreeMap<u8, usize> = BTreeMap::new();
        for suspect in self.votes.values() {
            *counts.entry(*suspect).or_default() += 1;
        }
        let mut best: Option<(u8, usize)> = None;
        let mut tied = false;
        for (suspect, count) in counts {
            match best {
                Some((_, n)) if count > n => {
                    best = Some((suspect, count));
                    tied = false;
                }
                Some((_, n)) if count == n => tied = true,
                None => best = Some((suspect, count)),
                _ => {}
            }
        }
        match best {
            Some((suspect, _)) if !tied && suspect != Self::SKIP => Some(suspect),
            _ => None,
        }
    }
}

/// Per-player roster entry replicated through the GameData component.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RosterEntry {
    pub player_id: u8,
    pub name: String,
    pub color: u8,
    pub hat: u32,
    pub pet: u32,
    pub skin: u32,
    pub is_dead: bool,
    pub is_impostor: bool,
    pub tasks: Vec<(u32, bool)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GameDataComponent {
    pub roster: BTreeMap<u8, RosterEntry>,
}

/// Kick-vote bookkeeping. Keyed by target client id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VoteBanSystem {
    pub votes: BTreeMap<u32, Vec<u32>>,
}

impl VoteBanSystem {
    /// Returns true when the third distinct vote lands.
    pub fn add_vote(&mut self, voter: u32, target: u32) -> bool {
        let voters = self.votes.entry(target).or_default();
        if !voters.contains(&voter) {
            voters.push(voter);
        }
        voters.len() >= 3
    }
}

/// Opaque stand-in for spawn types we have no prefab for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnknownComponent {
    pub spawn_type: u32,
    pub payload: Vec<u8>,
}

/// The tagged union behind every net id.
#[derive(Debug, Clone, PartialEq)]
pub enum ComponentBody {
    PlayerControl(PlayerControl),
    PlayerPhysics(PlayerPhysics),
    CustomNetworkTransform(CustomNetworkTransform),
    ShipStatus(ShipStatus),
    MeetingHud(MeetingHud),
    GameData(GameDataComponent),
    LobbyBehaviour,
    VoteBanSystem(VoteBanSystem),
    Unknown(UnknownComponent),
}

impl ComponentBody {
    pub fn from_template(template: ComponentTemplate, map: Option<GameMap>) -> Self {
        match template {
            ComponentTemplate::PlayerControl => Self::PlayerControl(PlayerControl::default()),
            ComponentTemplate::PlayerPhysics => Self::PlayerPhysics(PlayerPhysics::default()),
            ComponentTemplate::CustomNetworkTransform => {
                Self::CustomNetworkTransform(CustomNetworkTransform::default())
            }
            ComponentTemplate::ShipStatus => {
                Self::ShipStatus(ShipStatus::new(map.unwrap_or(GameMap::TheSkeld)))
            }
            ComponentTemplate::MeetingHud => Self::MeetingHud(MeetingHud::default()),
            ComponentTemplate::GameData => Self::GameData(GameDataComponent::default()),
            ComponentTemplate::LobbyBehaviour => Self::LobbyBehaviour,
            ComponentTemplate::VoteBanSystem => Self::VoteBanSystem(VoteBanSystem::default()),
        }
    }

    pub fn class(&self) -> ComponentClass {
        match self {
            Self::PlayerControl(_) => ComponentClass::PlayerControl,
            Self::PlayerPhysics(_) => ComponentClass::PlayerPhysics,
            Self::CustomNetworkTransform(_) => ComponentClass::CustomNetworkTransform,
            Self::ShipStatus(_) => ComponentClass::ShipStatus,
            Self::MeetingHud(_) => ComponentClass::MeetingHud,
            Self::GameData(_) => ComponentClass::GameData,
            Self::LobbyBehaviour => ComponentClass::LobbyBehaviour,
            Self::VoteBanSystem(_) => ComponentClass::VoteBanSystem,
            Self::Unknown(_) => ComponentClass::Unknown,
        }
    }
}

/// One live networked component.
#[derive(Debug, Clone, PartialEq)]
pub struct NetComponent {
    pub net_id: u32,
    pub owner_id: i32,
    pub spawn_type: u32,
    pub flags: u8,
    pub dirty: u32,
    pub body: ComponentBody,
}

impl NetComponent {
    pub fn class(&self) -> ComponentClass {
        self.body.class()
    }

    /// Per-tick update hook. Must not suspend.
    pub fn fixed_update(&mut self, dt: f32) {
        if let ComponentBody::ShipStatus(ship) = &mut self.body {
            if ship.sabotage_active {
                ship.sabotage_timer -= dt;
                if ship.sabotage_timer <= 0.0 {
                    ship.sabotage_active = false;
                    ship.sabotage_timer = 0.0;
                    self.dirty |= 1;
                }
            }
        }
    }

    /// Hook before serialization; kinds with derived state finalize it
    /// here.
    pub fn pre_serialize(&mut self) {}

    /// Serialize state. `spawn` selects the full-spawn layout. Returns
    /// false when the kind has nothing to write.
    pub fn serialize(&self, writer: &mut BytesWriter, spawn: bool) -> bool {
        match &self.body {
            ComponentBody::PlayerControl(pc) => {
                if spawn {
                    writer.write_bool(pc.is_new);
                }
                writer.write_u8(pc.player_id);
                true
            }
            ComponentBody::PlayerPhysics(phys) => {
                match phys.in_vent {
                    Some(vent) => {
                        writer.write_bool(true);
                        writer.write_packed_u32(vent);
                    }
                    None => writer.write_bool(false),
                }
                true
            }
            ComponentBody::CustomNetworkTransform(t) => {
                writer.write_u16(t.sequence);
                writer.write_vector2(t.position);
                writer.write_vector2(t.velocity);
                true
            }
            ComponentBody::ShipStatus(ship) => {
                writer.write_bool(ship.sabotage_active);
                writer.write_f32(ship.sabotage_timer);
                writer.write_u32(ship.doors);
                true
            }
            ComponentBody::MeetingHud(hud) => {
                writer.write_packed_u32(hud.votes.len() as u32);
                for (voter, suspect) in &hud.votes {
                    writer.write_u8(*voter);
                    writer.write_u8(*suspect);
                }
                true
            }
            ComponentBody::GameData(data) => {
                writer.write_packed_u32(data.roster.len() as u32);
                for entry in data.roster.values() {
                    writer.write_u8(entry.player_id);
                    writer.write_string(&entry.name);
                    writer.write_u8(entry.color);
                    writer.write_packed_u32(entry.hat);
                    writer.write_packed_u32(entry.pet);
                    writer.write_packed_u32(entry.skin);
                    let mut flags = 0u8;
                    if entry.is_dead {
                        flags |= 1;
                    }
                    if entry.is_impostor {
                        flags |= 2;
                    }
                    writer.write_u8(flags);
                    writer.write_u8(entry.tasks.len() as u8);
                    for (task_id, complete) in &entry.tasks {
                        writer.write_packed_u32(*task_id);
                        writer.write_bool(*complete);
                    }
                }
                true
            }
            ComponentBody::LobbyBehaviour => false,
            ComponentBody::VoteBanSystem(bans) => {
                writer.write_u8(bans.votes.len() as u8);
                for (target, voters) in &bans.votes {
                    writer.write_packed_u32(*target);
                    writer.write_u8(voters.len() as u8);
                    for voter in voters {
                        writer.write_packed_u32(*voter);
                    }
                }
                true
            }
            ComponentBody::Unknown(unknown) => {
                // Forwarded verbatim for forward compatibility.
                writer.write_raw(&unknown.payload);
                !unknown.payload.is_empty()
            }
        }
    }

    /// Apply a state update from the wire.
    pub fn deserialize(&mut self, reader: &mut BytesReader<'_>, spawn: bool) -> Result<(), CodecError> {
        match &mut self.body {
            ComponentBody::PlayerControl(pc) => {
                if spawn {
                    pc.is_new = reader.read_bool()?;
                }
                pc.player_id = reader.read_u8()?;
            }
            ComponentBody::PlayerPhysics(phys) => {
                phys.in_vent = if reader.read_bool()? {
                    Some(reader.read_packed_u32()?)
                } else {
                    None
                };
            }
            ComponentBody::CustomNetworkTransform(t) => {
                let sequence = reader.read_u16()?;
                // Stale movement updates lose against the newer state.
                if !spawn && !sequence_newer(sequence, t.sequence) {
                    return Ok(());
                }
                t.sequence = sequence;
                t.position = reader.read_vector2()?;
                t.velocity = reader.read_vector2()?;
            }
            ComponentBody::ShipStatus(ship) => {
                ship.sabotage_active = reader.read_bool()?;
                ship.sabotage_timer = reader.read_f32()?;
                ship.doors = reader.read_u32()?;
            }
            ComponentBody::MeetingHud(hud) => {
                let count = reader.read_packed_u32()? as usize;
                if count > 256 {
                    return Err(CodecError::InvalidValue { context: "vote count" });
                }
                hud.votes.clear();
                for _ in 0..count {
                    let voter = reader.read_u8()?;
                    let suspect = reader.read_u8()?;
                    hud.votes.insert(voter, suspect);
                }
            }
            ComponentBody::GameData(data) => {
                let count = reader.read_packed_u32()? as usize;
                if count > 256 {
                    return Err(CodecError::InvalidValue { context: "roster count" });
                }
                data.roster.clear();
                for _ in 0..count {
                    let mut entry = RosterEntry {
                        player_id: reader.read_u8()?,
                        name: reader.read_string()?,
                        color: reader.read_u8()?,
                        hat: reader.read_packed_u32()?,
                        pet: reader.read_packed_u32()?,
                        skin: reader.read_packed_u32()?,
                        ..RosterEntry::default()
                    };
                    let flags = reader.read_u8()?;
                    entry.is_dead = flags & 1 != 0;
                    entry.is_impostor = flags & 2 != 0;
                    let tasks = reader.read_u8()? as usize;
                    for _ in 0..tasks {
                        let task_id = reader.read_packed_u32()?;
                        let complete = reader.read_bool()?;
                        entry.tasks.push((task_id, complete));
                    }
                    data.roster.insert(entry.player_id, entry);
                }
            }
            ComponentBody::LobbyBehaviour => {}
            ComponentBody::VoteBanSystem(bans) => {
                let count = reader.read_u8()? as usize;
                bans.votes.clear();
                for _ in 0..count {
                    let target = reader.read_packed_u32()?;
                    let voter_count = reader.read_u8()? as usize;
                    let mut voters = Vec::with_capacity(voter_count);
                    for _ in 0..voter_count {
                        voters.push(reader.read_packed_u32()?);
                    }
                    bans.votes.insert(target, voters);
                }
            }
            ComponentBody::Unknown(unknown) => {
                unknown.payload = reader.read_remaining().to_vec();
            }
        }
        Ok(())
    }
}

/// Wrap-aware comparison for transform sequence numbers.
pub fn sequence_newer(a: u16, b: u16) -> bool {
    a != b && a.wrapping_sub(b) < 0x8000
}
