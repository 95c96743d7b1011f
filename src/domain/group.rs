use super::tour::MemberId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupMember {
    pub member_id: MemberId,
    pub username: String,
}

/// Group definition provided by the membership store. Tour participants are
/// the owner plus every listed member.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub owner: GroupMember,
    #[serde(default)]
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn participants(&self) -> Vec<GroupMember> {
        std::iter::once(self.owner.clone())
            .chain(self.members.iter().cloned())
            .collect()
    }

    pub fn is_owner(&self, member: &MemberId) -> bool {
        &self.owner.member_id == member
    }

    /// Owner or listed member.
    pub fn includes(&self, member: &MemberId) -> bool {
        self.is_owner(member) || self.members.iter().any(|m| &m.member_id == member)
    }
}
