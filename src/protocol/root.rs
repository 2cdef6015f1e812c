//! Root messages
//!
//! Root messages ride inside reliable/unreliable packets using the
//! `[len u16][tag u8][payload]` frame. A handful of tags mean different
//! things per direction (`HostGame` is a request from clients and a code
//! acknowledgement from the server); the enum carries both shapes and
//! the decode path only accepts the client-side ones.

use crate::codec::{BytesReader, BytesWriter, CodecError, GameCode};

use super::game_data::GameDataMessage;
use super::settings::GameSettings;

mod tag {
    pub const HOST_GAME: u8 = 0;
    pub const JOIN_GAME: u8 = 1;
    pub const START_GAME: u8 = 2;
    pub const REMOVE_GAME: u8 = 3;
    pub const REMOVE_PLAYER: u8 = 4;
    pub const GAME_DATA: u8 = 5;
    pub const GAME_DATA_TO: u8 = 6;
    pub const JOINED_GAME: u8 = 7;
    pub const END_GAME: u8 = 8;
    pub const ALTER_GAME: u8 = 10;
    pub const KICK_PLAYER: u8 = 11;
    pub const WAIT_FOR_HOST: u8 = 12;
    pub const REDIRECT: u8 = 13;
}

/// Room privacy toggled through `AlterGame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GamePrivacy {
    Private,
    Public,
}

const ALTER_GAME_PRIVACY: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum RootMessage {
    /// c2s: create a room with these settings.
    HostGame { settings: GameSettings },
    /// s2c: room created, here is its code.
    HostGameAck { code: GameCode },
    /// c2s: join the room with this code.
    JoinGame { code: GameCode },
    /// s2c: someone joined; receivers reconcile the host field.
    JoinGameBroadcast { code: GameCode, client_id: u32, host_id: u32 },
    /// s2c: join accepted, with the current member list.
    JoinedGame { code: GameCode, client_id: u32, host_id: u32, others: Vec<u32> },
    StartGame { code: GameCode },
    /// s2c: the room is gone.
    RemoveGame { code: GameCode, reason: u8 },
    /// s2c: member left; receivers reconcile the host field.
    RemovePlayer { code: GameCode, client_id: u32, host_id: u32, reason: u8 },
    GameData { code: GameCode, messages: Vec<GameDataMessage> },
    GameDataTo { code: GameCode, target: u32, messages: Vec<GameDataMessage> },
    EndGame { code: GameCode, reason: u8, show_ad: bool },
    AlterGame { code: GameCode, privacy: GamePrivacy },
    KickPlayer { code: GameCode, target: u32, banned: bool },
    /// s2c: parked until the host returns to the lobby.
    WaitForHost { code: GameCode, client_id: u32 },
    /// s2c: connect to another endpoint instead.
    Redirect { ip: [u8; 4], port: u16 },
}

impl RootMessage {
    pub fn encode(&self, writer: &mut BytesWriter) {
        match self {
            Self::HostGame { settings } => {
                let m = writer.begin_message(tag::HOST_GAME);
                settings.encode(writer);
                writer.end_message(m);
            }
            Self::HostGameAck { code } => {
                let m = writer.begin_message(tag::HOST_GAME);
                writer.write_i32(code.0);
                writer.end_message(m);
            }
            Self::JoinGame { code } => {
                let m = writer.begin_message(tag::JOIN_GAME);
                writer.write_i32(code.0);
                writer.end_message(m);
            }
            Self::JoinGameBroadcast { code, client_id, host_id } => {
                let m = writer.begin_message(tag::JOIN_GAME);
                writer.write_i32(code.0);
                writer.write_packed_u32(*client_id);
                writer.write_packed_u32(*host_id);
                writer.end_message(m);
            }
            Self::JoinedGame { code, client_id, host_id, others } => {
                let m = writer.begin_message(tag::JOINED_GAME);
                writer.write_i32(code.0);
                writer.write_packed_u32(*client_id);
                writer.write_packed_u32(*host_id);
                writer.write_packed_u32(others.len() as u32);
                for other in others {
                    writer.write_packed_u32(*other);
                }
                writer.end_message(m);
            }
            Self::StartGame { code } => {
                let m = writer.begin_message(tag::START_GAME);
                writer.write_i32(code.0);
                writer.end_message(m);
            }
            Self::RemoveGame { code, reason } => {
                let m = writer.begin_message(tag::REMOVE_GAME);
                writer.write_i32(code.0);
                writer.write_u8(*reason);
                writer.end_message(m);
            }
            Self::RemovePlayer { code, client_id, host_id, reason } => {
                let m = writer.begin_message(tag::REMOVE_PLAYER);
                writer.write_i32(code.0);
                writer.write_packed_u32(*client_id);
                writer.write_packed_u32(*host_id);
                writer.write_u8(*reason);
                writer.end_message(m);
            }
            Self::GameData { code, messages } => {
                let m = writer.begin_message(tag::GAME_DATA);
                writer.write_i32(code.0);
                for message in messages {
                    message.encode(writer);
                }
                writer.end_message(m);
            }
            Self::GameDataTo { code, target, messages } => {
                let m = writer.begin_message(tag::GAME_DATA_TO);
                writer.write_i32(code.0);
                writer.write_packed_u32(*target);
                for message in messages {
                    message.encode(writer);
                }
                writer.end_message(m);
            }
            Self::EndGame { code, reason, show_ad } => {
                let m = writer.begin_message(tag::END_GAME);
                writer.write_i32(code.0);
                writer.write_u8(*reason);
                writer.write_bool(*show_ad);
                writer.end_message(m);
            }
            Self::AlterGame { code, privacy } => {
                let m = writer.begin_message(tag::ALTER_GAME);
                writer.write_i32(code.0);
                writer.write_u8(ALTER_GAME_PRIVACY);
                writer.write_bool(matches!(privacy, GamePrivacy::Public));
                writer.end_message(m);
            }
            Self::KickPlayer { code, target, banned } => {
                let m = writer.begin_message(tag::KICK_PLAYER);
                writer.write_i32(code.0);
                writer.write_packed_u32(*target);
                writer.write_bool(*banned);
                writer.end_message(m);
            }
            Self::WaitForHost { code, client_id } => {
                let m = writer.begin_message(tag::WAIT_FOR_HOST);
                writer.write_i32(code.0);
                writer.write_packed_u32(*client_id);
                writer.end_message(m);
            }
            Self::Redirect { ip, port } => {
                let m = writer.begin_message(tag::REDIRECT);
                writer.write_raw(ip);
                writer.write_u16(*port);
                writer.end_message(m);
            }
        }
    }

    /// Decode one client-originated root message.
    pub fn decode_client(reader: &mut BytesReader<'_>) -> Result<Self, CodecError> {
        let (message_tag, mut inner) = reader.read_message()?;
        match message_tag {
            tag::HOST_GAME => Ok(Self::HostGame { settings: GameSettings::decode(&mut inner)? }),
            tag::JOIN_GAME => Ok(Self::JoinGame { code: GameCode(inner.read_i32()?) }),
            tag::START_GAME => Ok(Self::StartGame { code: GameCode(inner.read_i32()?) }),
            tag::GAME_DATA => {
                let code = GameCode(inner.read_i32()?);
                let messages = GameDataMessage::decode_all(&mut inner)?;
                Ok(Self::GameData { code, messages })
            }
            tag::GAME_DATA_TO => {
                let code = GameCode(inner.read_i32()?);
                let target = inner.read_packed_u32()?;
                let messages = GameDataMessage::decode_all(&mut inner)?;
                Ok(Self::GameDataTo { code, target, messages })
            }
            tag::END_GAME => {
                let code = GameCode(inner.read_i32()?);
                let reason = inner.read_u8()?;
                let show_ad = inner.read_bool().unwrap_or(false);
                Ok(Self::EndGame { code, reason, show_ad })
            }
            tag::ALTER_GAME => {
                let code = GameCode(inner.read_i32()?);
                let alter_tag = inner.read_u8()?;
                if alter_tag != ALTER_GAME_PRIVACY {
                    return Err(CodecError::UnknownTag { tag: alter_tag, context: "alter game" });
                }
                let privacy = if inner.read_bool()? {
                    GamePrivacy::Public
                } else {
                    GamePrivacy::Private
                };
                Ok(Self::AlterGame { code, privacy })
            }
            tag::KICK_PLAYER => {
                let code = GameCode(inner.read_i32()?);
                let target = inner.read_packed_u32()?;
                let banned = inner.read_bool()?;
                Ok(Self::KickPlayer { code, target, banned })
            }
            other => Err(CodecError::UnknownTag { tag: other, context: "root message" }),
        }
    }

    /// Decode every root message remaining in a packet body.
    pub fn decode_client_all(reader: &mut BytesReader<'_>) -> Result<Vec<Self>, CodecError> {
        let mut messages = Vec::new();
        while reader.has_remaining() {
            messages.push(Self::decode_client(reader)?);
        }
        Ok(messages)
    }
}
