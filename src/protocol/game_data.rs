//! Messages nested inside `GameData` / `GameDataTo`

use crate::codec::{BytesReader, BytesWriter, CodecError};

use super::rpc::RpcTag;

mod tag {
    pub const DATA: u8 = 1;
    pub const RPC: u8 = 2;
    pub const SPAWN: u8 = 4;
    pub const DESPAWN: u8 = 5;
    pub const SCENE_CHANGE: u8 = 6;
    pub const READY: u8 = 7;
}

/// One component blob inside a spawn message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnComponent {
    pub net_id: u32,
    pub data: Vec<u8>,
}

/// A room-scoped message. Payloads stay opaque bytes here; the object
/// graph interprets them per component kind.
#[derive(Debug, Clone, PartialEq)]
pub enum GameDataMessage {
    Data {
        net_id: u32,
        payload: Vec<u8>,
    },
    Rpc {
        net_id: u32,
        tag: RpcTag,
        payload: Vec<u8>,
    },
    Spawn {
        spawn_type: u32,
        owner_id: i32,
        flags: u8,
        components: Vec<SpawnComponent>,
    },
    Despawn {
        net_id: u32,
    },
    SceneChange {
        client_id: u32,
        scene: String,
    },
    Ready {
        client_id: u32,
    },
}

impl GameDataMessage {
    pub fn encode(&self, writer: &mut BytesWriter) {
        match self {
            Self::Data { net_id, payload } => {
                let m = writer.begin_message(tag::DATA);
                writer.write_packed_u32(*net_id);
                writer.write_raw(payload);
                writer.end_message(m);
            }
            Self::Rpc { net_id, tag: rpc, payload } => {
                let m = writer.begin_message(tag::RPC);
                writer.write_packed_u32(*net_id);
                writer.write_u8(rpc.to_wire());
                writer.write_raw(payload);
                writer.end_message(m);
            }
            Self::Spawn { spawn_type, owner_id, flags, components } => {
                let m = writer.begin_message(tag::SPAWN);
                writer.write_packed_u32(*spawn_type);
                writer.write_packed_i32(*owner_id);
                writer.write_u8(*flags);
                writer.write_packed_u32(components.len() as u32);
                for component in components {
                    writer.write_packed_u32(component.net_id);
                    writer.write_u16(component.data.len() as u16);
                    writer.write_raw(&component.data);
                }
                writer.end_message(m);
            }
            Self::Despawn { net_id } => {
                let m = writer.begin_message(tag::DESPAWN);
                writer.write_packed_u32(*net_id);
                writer.end_message(m);
            }
            Self::SceneChange { client_id, scene } => {
                let m = writer.begin_message(tag::SCENE_CHANGE);
                writer.write_packed_u32(*client_id);
                writer.write_string(scene);
                writer.end_message(m);
            }
            Self::Ready { client_id } => {
                let m = writer.begin_message(tag::READY);
                writer.write_packed_u32(*client_id);
                writer.end_message(m);
            }
        }
    }

    /// Decode one framed message.
    pub fn decode(reader: &mut BytesReader<'_>) -> Result<Self, CodecError> {
        let (message_tag, mut inner) = reader.read_message()?;
        match message_tag {
            tag::DATA => Ok(Self::Data {
                net_id: inner.read_packed_u32()?,
                payload: inner.read_remaining().to_vec(),
            }),
            tag::RPC => Ok(Self::Rpc {
                net_id: inner.read_packed_u32()?,
                tag: RpcTag::from_wire(inner.read_u8()?)?,
                payload: inner.read_remaining().to_vec(),
            }),
            tag::SPAWN => {
                let spawn_type = inner.read_packed_u32()?;
                let owner_id = inner.read_packed_i32()?;
                let flags = inner.read_u8()?;
                let count = inner.read_packed_u32()? as usize;
                if count > 16 {
                    return Err(CodecError::InvalidValue { context: "spawn component count" });
                }
                let mut components = Vec::with_capacity(count);
                for _ in 0..count {
                    let net_id = inner.read_packed_u32()?;
                    let len = inner.read_u16()? as usize;
                    if len > inner.remaining() {
                        return Err(CodecError::LengthMismatch {
                            declared: len,
                            remaining: inner.remaining(),
                        });
                    }
                    let mut data = Vec::with_capacity(len);
                    for _ in 0..len {
                        data.push(inner.read_u8()?);
                    }
                    components.push(SpawnComponent { net_id, data });
                }
                Ok(Self::Spawn { spawn_type, owner_id, flags, components })
            }
            tag::DESPAWN => Ok(Self::Despawn { net_id: inner.read_packed_u32()? }),
            tag::SCENE_CHANGE => Ok(Self::SceneChange {
                client_id: inner.read_packed_u32()?,
                scene: inner.read_string()?,
            }),
            tag::READY => Ok(Self::Ready { client_id: inner.read_packed_u32()? }),
            other => Err(CodecError::UnknownTag { tag: other, context: "game data message" }),
        }
    }

    /// Decode every message remaining in the reader.
    pub fn decode_all(reader: &mut BytesReader<'_>) -> Result<Vec<Self>, CodecError> {
        let mut messages = Vec::new();
        while reader.has_remaining() {
            messages.push(Self::decode(reader)?);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(message: GameDataMessage) {
        let mut w = BytesWriter::new();
        message.encode(&mut w);
        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        assert_eq!(GameDataMessage::decode(&mut r).unwrap(), message);
        assert!(!r.has_remaining());
    }

    #[test]
    fn rpc_roundtrip() {
        roundtrip(GameDataMessage::Rpc {
            net_id: 300,
            tag: RpcTag::CastVote,
            payload: vec![1, 2, 3],
        });
    }

    #[test]
    fn spawn_roundtrip() {
        roundtrip(GameDataMessage::Spawn {
            spawn_type: 4,
            owner_id: 1001,
            flags: 1,
            components: vec![
                SpawnComponent { net_id: 10, data: vec![0, 1] },
                SpawnComponent { net_id: 11, data: vec![] },
                SpawnComponent { net_id: 12, data: vec![5; 9] },
            ],
        });
    }

    #[test]
    fn scene_change_roundtrip() {
        roundtrip(GameDataMessage::SceneChange {
            client_id: 1001,
            scene: "OnlineGame".into(),
        });
    }

    #[test]
    fn decode_all_consumes_stream() {
        let first = GameDataMessage::Ready { client_id: 1 };
        let second = GameDataMessage::Despawn { net_id: 9 };
        let mut w = BytesWriter::new();
        first.encode(&mut w);
        second.encode(&mut w);

        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        let all = GameDataMessage::decode_all(&mut r).unwrap();
        assert_eq!(all, vec![first, second]);
    }

    #[test]
    fn unknown_inner_tag_fails() {
        let mut w = BytesWriter::new();
        let m = w.begin_message(200);
        w.write_u8(0);
        w.end_message(m);
        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        assert!(matches!(
            GameDataMessage::decode(&mut r),
            Err(CodecError::UnknownTag { tag: 200, .. })
        ));
    }

    #[test]
    fn oversized_spawn_count_fails() {
        let mut w = BytesWriter::new();
        let m = w.begin_message(4);
        w.write_packed_u32(4);
        w.write_packed_i32(-2);
        w.write_u8(0);
        w.write_packed_u32(1000);
        w.end_message(m);
        let buf = w.into_bytes();
        let mut r = BytesReader::new(&buf);
        assert!(GameDataMessage::decode(&mut r).is_err());
    }
}
