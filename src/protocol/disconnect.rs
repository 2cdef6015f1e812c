//! Disconnect reasons
//!
//! Numeric values are part of the client contract and must stay
//! bit-exact across releases.

use crate::codec::CodecError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    ExitGame,
    GameFull,
    GameStarted,
    GameNotFound,
    IncorrectVersion,
    Banned,
    Kicked,
    /// Carries server-authored text shown verbatim by the client.
    Custom(String),
    Destroy,
    Error,
    ServerRequest,
}

impl DisconnectReason {
    pub fn to_wire(&self) -> u8 {
        match self {
            Self::ExitGame => 0,
            Self::GameFull => 1,
            Self::GameStarted => 2,
            Self::GameNotFound => 3,
            Self::IncorrectVersion => 5,
            Self::Banned => 6,
            Self::Kicked => 7,
            Self::Custom(_) => 8,
            Self::Destroy => 16,
            Self::Error => 17,
            Self::ServerRequest => 19,
        }
    }

    pub fn from_wire(value: u8, message: Option<String>) -> Result<Self, CodecError> {
        Ok(match value {
            0 => Self::ExitGame,
            1 => Self::GameFull,
            2 => Self::GameStarted,
            3 => Self::GameNotFound,
            5 => Self::IncorrectVersion,
            6 => Self::Banned,
            7 => Self::Kicked,
            8 => Self::Custom(message.unwrap_or_default()),
            16 => Self::Destroy,
            17 => Self::Error,
            19 => Self::ServerRequest,
            _ => return Err(CodecError::UnknownTag { tag: value, context: "disconnect reason" }),
        })
    }

    pub fn custom_message(&self) -> Option<&str> {
        match self {
            Self::Custom(text) => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_are_stable() {
        assert_eq!(DisconnectReason::ExitGame.to_wire(), 0);
        assert_eq!(DisconnectReason::GameFull.to_wire(), 1);
        assert_eq!(DisconnectReason::GameStarted.to_wire(), 2);
        assert_eq!(DisconnectReason::GameNotFound.to_wire(), 3);
        assert_eq!(DisconnectReason::IncorrectVersion.to_wire(), 5);
        assert_eq!(DisconnectReason::Banned.to_wire(), 6);
        assert_eq!(DisconnectReason::Kicked.to_wire(), 7);
        assert_eq!(DisconnectReason::Custom(String::new()).to_wire(), 8);
        assert_eq!(DisconnectReason::Destroy.to_wire(), 16);
        assert_eq!(DisconnectReason::Error.to_wire(), 17);
        assert_eq!(DisconnectReason::ServerRequest.to_wire(), 19);
    }

    #[test]
    fn custom_reason_carries_text() {
        let r = DisconnectReason::from_wire(8, Some("be nice".into())).unwrap();
        assert_eq!(r.custom_message(), Some("be nice"));
    }

    #[test]
    fn unknown_reason_is_rejected() {
        assert!(DisconnectReason::from_wire(99, None).is_err());
    }
}
