//! Wire protocol: packet kinds, root messages, room-scoped messages

pub mod disconnect;
pub mod game_data;
pub mod root;
pub mod rpc;
pub mod settings;

use serde::{Deserialize, Serialize};

use crate::codec::{BytesReader, CodecError};

/// Client id the wire uses when the server itself is the host.
pub const SERVER_CLIENT_ID: u32 = 0xFFFF_FFFE;

/// Throwaway client id used by the paired join/remove idiom that forces
/// clients to reconcile their host field without a rejoin.
pub const TEMP_CLIENT_ID: u32 = 0xFFFF_FFFD;

/// Protocol version accepted from clients.
pub const PROTOCOL_VERSION: i32 = 50_537_300;

/// Datagram-level packet classes. Values are client contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketKind {
    Unreliable = 0,
    Reliable = 1,
    Hello = 8,
    Disconnect = 9,
    Ack = 10,
    Ping = 12,
}

impl PacketKind {
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => Self::Unreliable,
            1 => Self::Reliable,
            8 => Self::Hello,
            9 => Self::Disconnect,
            10 => Self::Ack,
            12 => Self::Ping,
            _ => return Err(CodecError::UnknownTag { tag: value, context: "packet kind" }),
        })
    }
}

/// Client language reported in the Hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    English,
    SpanishLatam,
    PortugueseBrazil,
    Portuguese,
    Korean,
    Russian,
    Dutch,
    Filipino,
    French,
    German,
    Italian,
    Japanese,
    Spanish,
    ChineseSimplified,
    ChineseTraditional,
    Irish,
    Other,
}

impl Language {
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => Self::English,
            1 => Self::SpanishLatam,
            2 => Self::PortugueseBrazil,
            3 => Self::Portuguese,
            4 => Self::Korean,
            5 => Self::Russian,
            6 => Self::Dutch,
            7 => Self::Filipino,
            8 => Self::French,
            9 => Self::German,
            10 => Self::Italian,
            11 => Self::Japanese,
            12 => Self::Spanish,
            13 => Self::ChineseSimplified,
            14 => Self::ChineseTraditional,
            15 => Self::Irish,
            _ => Self::Other,
        }
    }
}

/// Client platform reported in the Hello.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Unknown,
    StandaloneSteam,
    StandaloneItch,
    StandaloneEpic,
    StandaloneMac,
    Android,
    Ios,
    Switch,
    Xbox,
    Playstation,
}

impl Platform {
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => Self::StandaloneSteam,
            2 => Self::StandaloneItch,
            3 => Self::StandaloneEpic,
            4 => Self::StandaloneMac,
            5 => Self::Android,
            6 => Self::Ios,
            7 => Self::Switch,
            8 => Self::Xbox,
            9 => Self::Playstation,
            _ => Self::Unknown,
        }
    }
}

/// Parsed body of a Hello packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Hello {
    pub nonce: u16,
    pub version: i32,
    pub username: String,
    pub language: Language,
    pub platform: Platform,
    /// Opaque token forwarded to the auth collaborator; empty when the
    /// client connected anonymously.
    pub auth_token: String,
}

impl Hello {
    pub fn decode(reader: &mut BytesReader<'_>) -> Result<Self, CodecError> {
        let nonce = reader.read_u16_be()?;
        // Hazel compatibility byte before the version field.
        let _hazel_version = reader.read_u8()?;
        let version = reader.read_i32()?;
        let username = reader.read_string()?;
        let language = Language::from_wire(reader.read_u32()?);
        let platform = Platform::from_wire(reader.read_u8()?);
        let auth_token = if reader.has_remaining() {
            reader.read_string()?
        } else {
            String::new()
        };
        Ok(Self { nonce, version, username, language, platform, auth_token })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BytesWriter;

    #[test]
    fn packet_kind_values_are_stable() {
        assert_eq!(PacketKind::from_wire(0).unwrap(), PacketKind::Unreliable);
        assert_eq!(PacketKind::from_wire(1).unwrap(), PacketKind::Reliable);
        assert_eq!(PacketKind::from_wire(8).unwrap(), PacketKind::Hello);
        assert_eq!(PacketKind::from_wire(9).unwrap(), PacketKind::Disconnect);
        assert_eq!(PacketKind::from_wire(10).unwrap(), PacketKind::Ack);
        assert_eq!(PacketKind::from_wire(12).unwrap(), PacketKind::Ping);
        assert!(PacketKind::from_wire(2).is_err());
    }

    #[test]
    fn hello_decodes_with_and_without_token() {
        let mut w = BytesWriter::new();
        w.write_u16_be(7);
        w.write_u8(0);
        w.write_i32(PROTOCOL_VERSION);
        w.write_string("Alice");
        w.write_u32(9);
        w.write_u8(1);
        let buf = w.into_bytes();
        let hello = Hello::decode(&mut BytesReader::new(&buf)).unwrap();
        assert_eq!(hello.nonce, 7);
        assert_eq!(hello.username, "Alice");
        assert_eq!(hello.language, Language::German);
        assert_eq!(hello.platform, Platform::StandaloneSteam);
        assert!(hello.auth_token.is_empty());

        let mut w = BytesWriter::new();
        w.write_u16_be(8);
        w.write_u8(0);
        w.write_i32(PROTOCOL_VERSION);
        w.write_string("Bob");
        w.write_u32(0);
        w.write_u8(5);
        w.write_string("tok_123");
        let buf = w.into_bytes();
        let hello = Hello::decode(&mut BytesReader::new(&buf)).unwrap();
        assert_eq!(hello.auth_token, "tok_123");
    }
}
