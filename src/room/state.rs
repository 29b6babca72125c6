use tracing::{debug, info};

use super::RoomName;
use crate::relay::MemberId;

/// A call never involves more than this many participants.
pub const MAX_PARTICIPANTS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipDecision {
    /// Start (or restart) negotiation with the given role.
    Admit { offerer: bool },
    /// Over capacity. `announce` is set only the first time so the
    /// `{limitReached}` broadcast goes out once.
    Refuse { announce: bool },
    /// Nothing to act on.
    Ignore,
}

/// Classifies a member list. The earliest member answers, everyone joining
/// after it offers; lists beyond [`MAX_PARTICIPANTS`] are refused.
pub fn evaluate(members: &[MemberId], local_id: &str) -> MembershipDecision {
    if members.is_empty() || !members.iter().any(|m| m == local_id) {
        return MembershipDecision::Ignore;
    }
    if members.len() > MAX_PARTICIPANTS {
        return MembershipDecision::Refuse { announce: true };
    }
    MembershipDecision::Admit {
        offerer: members.len() > 1,
    }
}

pub struct RoomState {
    name: RoomName,
    local_id: MemberId,
    members: Vec<MemberId>,
    limit_announced: bool,
}

impl RoomState {
    pub fn new(name: RoomName, local_id: impl Into<MemberId>) -> Self {
        Self {
            name,
            local_id: local_id.into(),
            members: Vec::new(),
            limit_announced: false,
        }
    }

    pub fn name(&self) -> &RoomName {
        &self.name
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn members(&self) -> &[MemberId] {
        &self.members
    }

    /// Replaces the member snapshot and decides what the session should do.
    pub fn apply_members(&mut self, members: Vec<MemberId>) -> MembershipDecision {
        let decision = evaluate(&members, &self.local_id);
        info!(room = %self.name, count = members.len(), ?decision, "Room members");
        self.members = members;

        match decision {
            MembershipDecision::Refuse { .. } => {
                let announce = !self.limit_announced;
                self.limit_announced = true;
                MembershipDecision::Refuse { announce }
            }
            other => other,
        }
    }

    pub fn add_member(&mut self, member_id: MemberId) {
        if !self.members.contains(&member_id) {
            debug!(room = %self.name, member = %member_id, "Member joined");
            self.members.push(member_id);
        }
    }

    pub fn remove_member(&mut self, member_id: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|id| id != member_id);
        before != self.members.len()
    }
}
