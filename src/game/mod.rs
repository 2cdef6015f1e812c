//! Room core: state machine, host policy, replicated objects, events

pub mod events;
pub mod host;
pub mod objects;
pub mod player;
pub mod room;

pub use room::{Room, RoomCommand, RoomHandle, RoomRegistry, RoomState};
