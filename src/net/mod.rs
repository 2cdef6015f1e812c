//! Datagram transport: reliability state machine and per-peer sessions

pub mod connection;
pub mod transport;

pub use connection::Connection;
pub use transport::{AckOutcome, InboundDisposition, ReliabilityState, SweepOutcome};
