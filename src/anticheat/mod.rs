//! Inbound-RPC gatekeeper
//!
//! Every RPC is checked before the room applies it: the target must
//! exist, the sender must own it, and the tag must be legal for the
//! sender's authority and the component's class. Violations become
//! infractions with a severity that decides whether the RPC is
//! swallowed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::User;
use crate::codec::BytesReader;
use crate::game::objects::ComponentClass;
use crate::game::player::PlayerRole;
use crate::protocol::rpc::RpcTag;
use crate::protocol::settings::GameMap;

/// Buffered infractions flush past this size.
pub const FLUSH_THRESHOLD: usize = 100;

/// Colors the client can legitimately pick.
const COLOR_COUNT: u8 = 18;

/// Cosmetic ids below this are free for every account.
const FREE_COSMETIC_MAX: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InfractionSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum InfractionName {
    UnknownRpcInnernetObject,
    ForbiddenRpcOwnership,
    ForbiddenRpcHostOnly,
    ForbiddenRpcVent,
    ForbiddenRpcStartCounter,
    DoubleCastVote,
    InvalidCastVote,
    InvalidColor,
    CosmeticNotOwned,
    NameMismatch,
    InvalidRpcSnapTo,
    WrongRpcComponent,
    MalformedRpcPayload,
}

/// One recorded violation.
#[derive(Debug, Clone, Serialize)]
pub struct Infraction {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub game_id: Option<Uuid>,
    pub client_id: u32,
    pub created_at: DateTime<Utc>,
    pub player_ping: u32,
    pub name: InfractionName,
    pub details: String,
    pub severity: InfractionSeverity,
}

/// Everything the checks need to know about one inbound RPC.
pub struct RpcContext<'a> {
    pub tag: RpcTag,
    pub net_id: u32,
    /// Class and owner of the target component, when it resolved.
    pub component: Option<(ComponentClass, i32)>,
    pub sender_client_id: u32,
    pub sender_player_id: Option<u8>,
    pub sender_role: PlayerRole,
    pub sender_ping: u32,
    pub server_as_host: bool,
    pub sender_is_acting_host: bool,
    pub map: GameMap,
    pub auth_user: Option<&'a User>,
    pub payload: &'a [u8],
    pub already_voted: bool,
}

/// Outcome of the gate.
#[derive(Debug)]
pub enum RpcVerdict {
    Allow,
    /// Record the infraction; apply the RPC anyway.
    Observe(InfractionName, InfractionSeverity, String),
    /// Record the infraction and swallow the RPC.
    Swallow(InfractionName, InfractionSeverity, String),
}

/// Infractions a role is excused from.
pub fn anticheat_exceptions(role: PlayerRole) -> &'static [InfractionName] {
    match role {
        // Vents are the impostor's job.
        PlayerRole::Impostor => &[InfractionName::ForbiddenRpcVent],
        PlayerRole::Crewmate => &[],
    }
}

/// Expected component class per tag. `None` means any class.
fn expected_class(tag: RpcTag) -> Option<ComponentClass> {
    use ComponentClass::*;
    Some(match tag {
        RpcTag::PlayAnimation
        | RpcTag::CompleteTask
        | RpcTag::SyncSettings
        | RpcTag::SetInfected
        | RpcTag::Exiled
        | RpcTag::CheckName
        | RpcTag::SetName
        | RpcTag::CheckColor
        | RpcTag::SetColor
        | RpcTag::SetHat
        | RpcTag::SetSkin
        | RpcTag::SetPet
        | RpcTag::ReportDeadBody
        | RpcTag::MurderPlayer
        | RpcTag::SendChat
        | RpcTag::StartMeeting
        | RpcTag::SetScanner
        | RpcTag::SendChatNote
        | RpcTag::SetStartCounter
        | RpcTag::UsePlatform => PlayerControl,
        RpcTag::EnterVent | RpcTag::ExitVent | RpcTag::ClimbLadder | RpcTag::BootFromVent => {
            PlayerPhysics
        }
        RpcTag::SnapTo => CustomNetworkTransform,
        RpcTag::Close | RpcTag::VotingComplete | RpcTag::CastVote | RpcTag::ClearVote => MeetingHud,
        RpcTag::AddVote => VoteBanSystem,
        RpcTag::CloseDoorsOfType | RpcTag::RepairSystem => ShipStatus,
        RpcTag::SetTasks | RpcTag::UpdateGameData => GameData,
    })
}

/// Run the ordered checks for one RPC. `alive` resolves a player id to
/// its liveness for vote validation.
pub fn check_rpc(ctx: &RpcContext<'_>, alive: &dyn Fn(u8) -> Option<bool>) -> RpcVerdict {
    // 1. Existence.
    let Some((class, owner_id)) = ctx.component else {
        return RpcVerdict::Swallow(
            InfractionName::UnknownRpcInnernetObject,
            InfractionSeverity::Medium,
            format!("rpc {:?} targeted unknown net id {}", ctx.tag, ctx.net_id),
        );
    };

    // 2. Ownership. Client-owned components only accept their owner's
    // RPCs; -1 is the explicit wildcard owner, and room objects are
    // governed by the tag checks below.
    if owner_id >= 0 && owner_id != ctx.sender_client_id as i32 {
        return RpcVerdict::Swallow(
            InfractionName::ForbiddenRpcOwnership,
            InfractionSeverity::Critical,
            format!(
                "rpc {:?} on net id {} owned by {} from client {}",
                ctx.tag, ctx.net_id, owner_id, ctx.sender_client_id
            ),
        );
    }

    // 3. Component-class match, skipped for opaque components.
    if class != ComponentClass::Unknown {
        if let Some(expected) = expected_class(ctx.tag) {
            if expected != class {
                return RpcVerdict::Swallow(
                    InfractionName::WrongRpcComponent,
                    InfractionSeverity::Critical,
                    format!("rpc {:?} on {:?} component", ctx.tag, class),
                );
            }
        }
    }

    // 4. Host-only tags. Acting hosts hold delegated authority for
    // these, everyone else is cheating when the server is the host.
    if ctx.server_as_host && ctx.tag.is_host_only() && !ctx.sender_is_acting_host {
        return RpcVerdict::Swallow(
            InfractionName::ForbiddenRpcHostOnly,
            InfractionSeverity::Critical,
            format!("host-only rpc {:?} from client {}", ctx.tag, ctx.sender_client_id),
        );
    }

    // 5. Tag-specific rules.
    match ctx.tag {
        RpcTag::CastVote => check_cast_vote(ctx, alive),
        RpcTag::EnterVent | RpcTag::ExitVent => check_vent(ctx),
        RpcTag::SnapTo if ctx.map != GameMap::Airship => RpcVerdict::Swallow(
            InfractionName::InvalidRpcSnapTo,
            InfractionSeverity::Critical,
            format!("snap-to on {:?}", ctx.map),
        ),
        RpcTag::SetStartCounter if ctx.server_as_host && !ctx.sender_is_acting_host => {
            RpcVerdict::Swallow(
                InfractionName::ForbiddenRpcStartCounter,
                InfractionSeverity::Critical,
                format!("start counter from client {}", ctx.sender_client_id),
            )
        }
        tag if tag.is_cosmetic() => check_cosmetic(ctx),
        _ => RpcVerdict::Allow,
    }
}

fn check_cast_vote(ctx: &RpcContext<'_>, alive: &dyn Fn(u8) -> Option<bool>) -> RpcVerdict {
    let mut reader = BytesReader::new(ctx.payload);
    let (voter, suspect) = match (reader.read_u8(), reader.read_u8()) {
        (Ok(voter), Ok(suspect)) => (voter, suspect),
        _ => {
            return RpcVerdict::Swallow(
                InfractionName::MalformedRpcPayload,
                InfractionSeverity::Medium,
                "cast vote payload truncated".to_string(),
            )
        }
    };

    if ctx.sender_player_id != Some(voter) {
        return RpcVerdict::Swallow(
            InfractionName::InvalidCastVote,
            InfractionSeverity::High,
            format!("client {} voted as player {}", ctx.sender_client_id, voter),
        );
    }
    if ctx.already_voted {
        return RpcVerdict::Swallow(
            InfractionName::DoubleCastVote,
            InfractionSeverity::High,
            format!("player {} voted twice", voter),
        );
    }
    // 255 is the skip sentinel.
    if suspect != 255 && alive(suspect) != Some(true) {
        return RpcVerdict::Swallow(
            InfractionName::InvalidCastVote,
            InfractionSeverity::High,
            format!("vote for dead or unknown player {}", suspect),
        );
    }
    RpcVerdict::Allow
}

fn check_vent(ctx: &RpcContext<'_>) -> RpcVerdict {
    if anticheat_exceptions(ctx.sender_role).contains(&InfractionName::ForbiddenRpcVent) {
        return RpcVerdict::Allow;
    }
    RpcVerdict::Swallow(
        InfractionName::ForbiddenRpcVent,
        InfractionSeverity::High,
        format!("vent rpc {:?} from non-impostor client {}", ctx.tag, ctx.sender_client_id),
    )
}

fn check_cosmetic(ctx: &RpcContext<'_>) -> RpcVerdict {
    let mut reader = BytesReader::new(ctx.payload);
    match ctx.tag {
        RpcTag::CheckColor => match reader.read_u8() {
            Ok(color) if color < COLOR_COUNT => RpcVerdict::Allow,
            Ok(color) => RpcVerdict::Swallow(
                InfractionName::InvalidColor,
                InfractionSeverity::Critical,
                format!("color {} out of range", color),
            ),
            Err(_) => RpcVerdict::Swallow(
                InfractionName::MalformedRpcPayload,
                InfractionSeverity::Medium,
                "check color payload truncated".to_string(),
            ),
        },
        RpcTag::CheckName => {
            let Ok(name) = reader.read_string() else {
                return RpcVerdict::Swallow(
                    InfractionName::MalformedRpcPayload,
                    InfractionSeverity::Medium,
                    "check name payload truncated".to_string(),
                );
            };
            match ctx.auth_user {
                Some(user) if user.display_name != name => RpcVerdict::Swallow(
                    InfractionName::NameMismatch,
                    InfractionSeverity::Critical,
                    format!("name {:?} does not match account {:?}", name, user.display_name),
                ),
                _ => RpcVerdict::Allow,
            }
        }
        RpcTag::SetHat | RpcTag::SetPet | RpcTag::SetSkin => {
            let Ok(item) = reader.read_packed_u32() else {
                return RpcVerdict::Swallow(
                    InfractionName::MalformedRpcPayload,
                    InfractionSeverity::Medium,
                    "cosmetic payload truncated".to_string(),
                );
            };
            if item < FREE_COSMETIC_MAX {
                return RpcVerdict::Allow;
            }
            match ctx.auth_user {
                Some(user) if user.owned_cosmetics.contains(&item) => RpcVerdict::Allow,
                _ => RpcVerdict::Swallow(
                    InfractionName::CosmeticNotOwned,
                    InfractionSeverity::Critical,
                    format!("cosmetic {} not in inventory", item),
                ),
            }
        }
        _ => RpcVerdict::Allow,
    }
}

/// Per-room infraction buffer.
#[derive(Default)]
pub struct InfractionBuffer {
    pending: Vec<Infraction>,
}

impl InfractionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(
        &mut self,
        ctx: &RpcContext<'_>,
        game_id: Option<Uuid>,
        name: InfractionName,
        severity: InfractionSeverity,
        details: String,
    ) {
        self.pending.push(Infraction {
            id: Uuid::new_v4(),
            user_id: ctx.auth_user.map(|u| u.id),
            game_id,
            client_id: ctx.sender_client_id,
            created_at: Utc::now(),
            player_ping: ctx.sender_ping,
            name,
            details,
            severity,
        });
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn needs_flush(&self) -> bool {
        self.pending.len() > FLUSH_THRESHOLD
    }

    pub fn peek(&self) -> &[Infraction] {
        &self.pending
    }

    pub fn take(&mut self) -> Vec<Infraction> {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::BytesWriter;

    fn base_ctx<'a>(payload: &'a [u8]) -> RpcContext<'a> {
        RpcContext {
            tag: RpcTag::SendChat,
            net_id: 10,
            component: Some((ComponentClass::PlayerControl, 1001)),
            sender_client_id: 1001,
            sender_player_id: Some(0),
            sender_role: PlayerRole::Crewmate,
            sender_ping: 40,
            server_as_host: true,
            sender_is_acting_host: false,
            map: GameMap::TheSkeld,
            auth_user: None,
            payload,
            already_voted: false,
        }
    }

    fn nobody_alive(_: u8) -> Option<bool> {
        None
    }

    #[test]
    fn unknown_net_id_is_medium() {
        let mut ctx = base_ctx(&[]);
        ctx.component = None;
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, severity, _) => {
                assert_eq!(name, InfractionName::UnknownRpcInnernetObject);
                assert_eq!(severity, InfractionSeverity::Medium);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn foreign_component_ownership_is_critical() {
        let mut ctx = base_ctx(&[]);
        ctx.component = Some((ComponentClass::PlayerControl, 1002));
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, severity, _) => {
                assert_eq!(name, InfractionName::ForbiddenRpcOwnership);
                assert_eq!(severity, InfractionSeverity::Critical);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn wildcard_owner_passes_ownership() {
        let mut ctx = base_ctx(&[]);
        ctx.component = Some((ComponentClass::PlayerControl, -1));
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));
    }

    #[test]
    fn host_only_rpc_under_saah_is_critical() {
        let mut ctx = base_ctx(&[]);
        ctx.tag = RpcTag::MurderPlayer;
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, severity, _) => {
                assert_eq!(name, InfractionName::ForbiddenRpcHostOnly);
                assert_eq!(severity, InfractionSeverity::Critical);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn acting_host_may_send_host_only_rpcs() {
        let mut ctx = base_ctx(&[]);
        ctx.tag = RpcTag::SyncSettings;
        ctx.sender_is_acting_host = true;
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));
    }

    #[test]
    fn vent_rpc_from_crewmate_is_high() {
        let mut ctx = base_ctx(&[]);
        ctx.tag = RpcTag::EnterVent;
        ctx.component = Some((ComponentClass::PlayerPhysics, 1001));
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, severity, _) => {
                assert_eq!(name, InfractionName::ForbiddenRpcVent);
                assert_eq!(severity, InfractionSeverity::High);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn impostor_exception_allows_vents() {
        let mut ctx = base_ctx(&[]);
        ctx.tag = RpcTag::EnterVent;
        ctx.component = Some((ComponentClass::PlayerPhysics, 1001));
        ctx.sender_role = PlayerRole::Impostor;
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));
    }

    #[test]
    fn vote_as_someone_else_is_high() {
        let mut payload = BytesWriter::new();
        payload.write_u8(3);
        payload.write_u8(255);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::CastVote;
        ctx.component = Some((ComponentClass::MeetingHud, -2));
        ctx.sender_player_id = Some(0);
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, severity, _) => {
                assert_eq!(name, InfractionName::InvalidCastVote);
                assert_eq!(severity, InfractionSeverity::High);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn double_vote_is_high() {
        let mut payload = BytesWriter::new();
        payload.write_u8(0);
        payload.write_u8(255);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::CastVote;
        ctx.component = Some((ComponentClass::MeetingHud, -2));
        ctx.already_voted = true;
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, _, _) => assert_eq!(name, InfractionName::DoubleCastVote),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn vote_for_dead_suspect_is_rejected() {
        let mut payload = BytesWriter::new();
        payload.write_u8(0);
        payload.write_u8(4);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::CastVote;
        ctx.component = Some((ComponentClass::MeetingHud, -2));
        let dead = |pid: u8| if pid == 4 { Some(false) } else { None };
        match check_rpc(&ctx, &dead) {
            RpcVerdict::Swallow(name, _, _) => assert_eq!(name, InfractionName::InvalidCastVote),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn skip_vote_is_always_legal() {
        let mut payload = BytesWriter::new();
        payload.write_u8(0);
        payload.write_u8(255);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::CastVote;
        ctx.component = Some((ComponentClass::MeetingHud, -2));
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));
    }

    #[test]
    fn snap_to_off_airship_is_critical() {
        let mut ctx = base_ctx(&[]);
        ctx.tag = RpcTag::SnapTo;
        ctx.component = Some((ComponentClass::CustomNetworkTransform, 1001));
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, _, _) => assert_eq!(name, InfractionName::InvalidRpcSnapTo),
            other => panic!("unexpected verdict {:?}", other),
        }

        ctx.map = GameMap::Airship;
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));
    }

    #[test]
    fn class_mismatch_is_critical() {
        let mut ctx = base_ctx(&[]);
        ctx.tag = RpcTag::EnterVent;
        // EnterVent belongs on PlayerPhysics, not PlayerControl.
        ctx.component = Some((ComponentClass::PlayerControl, 1001));
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, _, _) => {
                assert_eq!(name, InfractionName::WrongRpcComponent)
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn unowned_cosmetic_is_critical() {
        let mut payload = BytesWriter::new();
        payload.write_packed_u32(500);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::SetHat;
        let user = User {
            id: Uuid::new_v4(),
            display_name: "Alice".into(),
            owned_cosmetics: vec![499],
        };
        ctx.auth_user = Some(&user);
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, _, _) => assert_eq!(name, InfractionName::CosmeticNotOwned),
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn owned_and_free_cosmetics_pass() {
        let user = User {
            id: Uuid::new_v4(),
            display_name: "Alice".into(),
            owned_cosmetics: vec![500],
        };

        let mut payload = BytesWriter::new();
        payload.write_packed_u32(500);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::SetHat;
        ctx.auth_user = Some(&user);
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));

        let mut payload = BytesWriter::new();
        payload.write_packed_u32(3);
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::SetSkin;
        assert!(matches!(check_rpc(&ctx, &nobody_alive), RpcVerdict::Allow));
    }

    #[test]
    fn name_must_match_account() {
        let mut payload = BytesWriter::new();
        payload.write_string("NotAlice");
        let bytes = payload.into_bytes();
        let mut ctx = base_ctx(&bytes);
        ctx.tag = RpcTag::CheckName;
        let user = User {
            id: Uuid::new_v4(),
            display_name: "Alice".into(),
            owned_cosmetics: vec![],
        };
        ctx.auth_user = Some(&user);
        match check_rpc(&ctx, &nobody_alive) {
            RpcVerdict::Swallow(name, severity, _) => {
                assert_eq!(name, InfractionName::NameMismatch);
                assert_eq!(severity, InfractionSeverity::Critical);
            }
            other => panic!("unexpected verdict {:?}", other),
        }
    }

    #[test]
    fn buffer_flags_flush_past_threshold() {
        let mut buffer = InfractionBuffer::new();
        let ctx = base_ctx(&[]);
        for _ in 0..=FLUSH_THRESHOLD {
            buffer.record(
                &ctx,
                None,
                InfractionName::ForbiddenRpcVent,
                InfractionSeverity::High,
                String::new(),
            );
        }
        assert!(buffer.needs_flush());
        let batch = buffer.take();
        assert_eq!(batch.len(), FLUSH_THRESHOLD + 1);
        assert!(buffer.is_empty());
        // Every infraction carries a distinct idempotency id.
        let mut ids: Vec<Uuid> = batch.iter().map(|i| i.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), batch.len());
    }
}
