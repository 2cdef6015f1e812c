//! Lobby settings blob
//!
//! Settings travel as a length-prefixed blob so old servers can relay
//! newer layouts opaquely. We decode version 2 and newer.

use serde::{Deserialize, Serialize};

use crate::codec::{BytesReader, BytesWriter, CodecError};

/// Map identifier. Wire values are fixed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMap {
    TheSkeld,
    MiraHq,
    Polus,
    Airship,
}

impl GameMap {
    pub fn to_wire(self) -> u8 {
        match self {
            Self::TheSkeld => 0,
            Self::MiraHq => 1,
            Self::Polus => 2,
            Self::Airship => 4,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => Self::TheSkeld,
            1 => Self::MiraHq,
            2 => Self::Polus,
            4 => Self::Airship,
            _ => return Err(CodecError::UnknownTag { tag: value, context: "game map" }),
        })
    }
}

/// Host-proposed lobby settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSettings {
    pub version: u8,
    pub max_players: u8,
    pub keywords: u32,
    pub map: GameMap,
    pub player_speed: f32,
    pub crew_vision: f32,
    pub impostor_vision: f32,
    pub kill_cooldown: f32,
    pub common_tasks: u8,
    pub long_tasks: u8,
    pub short_tasks: u8,
    pub emergency_meetings: i32,
    pub impostors: u8,
    pub kill_distance: u8,
    pub discussion_time: i32,
    pub voting_time: i32,
    pub is_defaults: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            version: 2,
            max_players: 10,
            keywords: 1,
            map: GameMap::TheSkeld,
            player_speed: 1.0,
            crew_vision: 1.0,
            impostor_vision: 1.5,
            kill_cooldown: 45.0,
            common_tasks: 1,
            long_tasks: 1,
            short_tasks: 2,
            emergency_meetings: 1,
            impostors: 1,
            kill_distance: 1,
            discussion_time: 15,
            voting_time: 120,
            is_defaults: true,
        }
    }
}

impl GameSettings {
    pub fn encode(&self, writer: &mut BytesWriter) {
        let mut body = BytesWriter::with_capacity(48);
        body.write_u8(self.version);
        body.write_u8(self.max_players);
        body.write_u32(self.keywords);
        body.write_u8(self.map.to_wire());
        body.write_f32(self.player_speed);
        body.write_f32(self.crew_vision);
        body.write_f32(self.impostor_vision);
        body.write_f32(self.kill_cooldown);
        body.write_u8(self.common_tasks);
        body.write_u8(self.long_tasks);
        body.write_u8(self.short_tasks);
        body.write_i32(self.emergency_meetings);
        body.write_u8(self.impostors);
        body.write_u8(self.kill_distance);
        body.write_i32(self.discussion_time);
        body.write_i32(self.voting_time);
        body.write_bool(self.is_defaults);
        writer.write_bytes(body.as_slice());
    }

    pub fn decode(reader: &mut BytesReader<'_>) -> Result<Self, CodecError> {
        let blob = reader.read_bytes()?;
        let mut r = BytesReader::new(blob);
        Ok(Self {
            version: r.read_u8()?,
            max_players: r.read_u8()?,
            keywords: r.read_u32()?,
            map: GameMap::from_wire(r.read_u8()?)?,
            player_speed: r.read_f32()?,
            crew_vision: r.read_f32()?,
            impostor_vision: r.read_f32()?,
            kill_cooldown: r.read_f32()?,
            common_tasks: r.read_u8()?,
            long_tasks: r.read_u8()?,
            short_tasks: r.read_u8()?,
            emergency_meetings: r.read_i32()?,
            impostors: r.read_u8()?,
            kill_distance: r.read_u8()?,
            discussion_time: r.read_i32()?,
            voting_time: r.read_i32()?,
            is_defaults: r.read_bool()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_roundtrip() {
        let settings = GameSettings {
            version: 2,
            max_players: 15,
            keywords: 256,
            map: GameMap::Polus,
            player_speed: 1.25,
            crew_vision: 0.75,
            impostor_vision: 1.75,
            kill_cooldown: 22.5,
            common_tasks: 2,
            long_tasks: 3,
            short_tasks: 5,
            emergency_meetings: 2,
            impostors: 3,
            kill_distance: 2,
            discussion_time: 30,
            voting_time: 90,
            is_defaults: false,
        };

        let mut w = BytesWriter::new();
        settings.encode(&mut w);
        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        assert_eq!(GameSettings::decode(&mut r).unwrap(), settings);
        assert!(!r.has_remaining());
    }

    #[test]
    fn default_settings_roundtrip() {
        let settings = GameSettings::default();
        let mut w = BytesWriter::new();
        settings.encode(&mut w);
        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        assert_eq!(GameSettings::decode(&mut r).unwrap(), settings);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let mut w = BytesWriter::new();
        w.write_bytes(&[2, 10]);
        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        assert!(GameSettings::decode(&mut r).is_err());
    }
}
