//! RPC tags and their classification

use crate::codec::CodecError;

/// Remote-procedure-call tags carried inside `GameData`.
///
/// Wire values are fixed by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RpcTag {
    PlayAnimation = 0,
    CompleteTask = 1,
    SyncSettings = 2,
    SetInfected = 3,
    Exiled = 4,
    CheckName = 5,
    SetName = 6,
    CheckColor = 7,
    SetColor = 8,
    SetHat = 9,
    SetSkin = 10,
    ReportDeadBody = 11,
    MurderPlayer = 12,
    SendChat = 13,
    StartMeeting = 14,
    SetScanner = 15,
    SendChatNote = 16,
    SetPet = 17,
    SetStartCounter = 18,
    EnterVent = 19,
    ExitVent = 20,
    SnapTo = 21,
    Close = 22,
    VotingComplete = 23,
    CastVote = 24,
    ClearVote = 25,
    AddVote = 26,
    CloseDoorsOfType = 27,
    RepairSystem = 28,
    SetTasks = 29,
    UpdateGameData = 30,
    ClimbLadder = 31,
    UsePlatform = 32,
    BootFromVent = 34,
}

impl RpcTag {
    pub fn from_wire(value: u8) -> Result<Self, CodecError> {
        Ok(match value {
            0 => Self::PlayAnimation,
            1 => Self::CompleteTask,
            2 => Self::SyncSettings,
            3 => Self::SetInfected,
            4 => Self::Exiled,
            5 => Self::CheckName,
            6 => Self::SetName,
            7 => Self::CheckColor,
            8 => Self::SetColor,
            9 => Self::SetHat,
            10 => Self::SetSkin,
            11 => Self::ReportDeadBody,
            12 => Self::MurderPlayer,
            13 => Self::SendChat,
            14 => Self::StartMeeting,
            15 => Self::SetScanner,
            16 => Self::SendChatNote,
            17 => Self::SetPet,
            18 => Self::SetStartCounter,
            19 => Self::EnterVent,
            20 => Self::ExitVent,
            21 => Self::SnapTo,
            22 => Self::Close,
            23 => Self::VotingComplete,
            24 => Self::CastVote,
            25 => Self::ClearVote,
            26 => Self::AddVote,
            27 => Self::CloseDoorsOfType,
            28 => Self::RepairSystem,
            29 => Self::SetTasks,
            30 => Self::UpdateGameData,
            31 => Self::ClimbLadder,
            32 => Self::UsePlatform,
            34 => Self::BootFromVent,
            _ => return Err(CodecError::UnknownTag { tag: value, context: "rpc" }),
        })
    }

    pub fn to_wire(self) -> u8 {
        self as u8
    }

    /// Tags only the host may originate. When the server is the host,
    /// any client sending one of these is cheating.
    pub fn is_host_only(self) -> bool {
        matches!(
            self,
            Self::Close
                | Self::Exiled
                | Self::MurderPlayer
                | Self::SetInfected
                | Self::SetTasks
                | Self::StartMeeting
                | Self::SyncSettings
                | Self::VotingComplete
                | Self::BootFromVent
                | Self::SetName
                | Self::SetColor
                | Self::UpdateGameData
        )
    }

    /// Cosmetic selection tags validated against the account inventory.
    pub fn is_cosmetic(self) -> bool {
        matches!(
            self,
            Self::CheckColor | Self::CheckName | Self::SetHat | Self::SetPet | Self::SetSkin
        )
    }

    pub fn is_vent(self) -> bool {
        matches!(self, Self::EnterVent | Self::ExitVent)
    }
}
