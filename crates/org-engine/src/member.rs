//! Organization membership models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::OrgResult;
use crate::roles::{MemberRole, MemberStatus};

/// A user's membership in an organization.
///
/// At most one membership exists per (organization, user).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    /// Membership ID
    pub id: Uuid,

    /// Organization the membership belongs to
    pub organization_id: Uuid,

    /// Platform user ID
    pub user_id: Uuid,

    /// Role within the organization
    pub role: MemberRole,

    /// Current standing
    pub status: MemberStatus,

    /// When the user joined
    pub joined_at: DateTime<Utc>,

    /// When the membership last changed
    pub updated_at: DateTime<Utc>,
}

impl Member {
    /// Create an active membership.
    pub fn new(organization_id: Uuid, user_id: Uuid, role: MemberRole) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id,
            user_id,
            role,
            status: MemberStatus::Active,
            joined_at: now,
            updated_at: now,
        }
    }

    /// Whether this membership grants access.
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Active admin or owner.
    pub fn can_administer(&self) -> bool {
        self.is_active() && self.role.is_admin()
    }
}

/// Direct add of a user to an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemberRequest {
    /// User to add
    pub user_id: Uuid,

    /// Role name as received from the request layer
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    MemberRole::Member.as_str().to_string()
}

impl AddMemberRequest {
    /// Parse the requested role.
    pub fn parse_role(&self) -> OrgResult<MemberRole> {
        self.role.parse()
    }
}

/// Role and/or status change for an existing member.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemberRequest {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl UpdateMemberRequest {
    /// Parse the string fields into typed values.
    ///
    /// # Errors
    ///
    /// `InvalidRole` or `InvalidStatus` for unknown names.
    pub fn parse(&self) -> OrgResult<(Option<MemberRole>, Option<MemberStatus>)> {
        let role = self.role.as_deref().map(str::parse::<MemberRole>).transpose()?;
        let status = self
            .status
            .as_deref()
            .map(str::parse::<MemberStatus>)
            .transpose()?;
        Ok((role, status))
    }
}

/// Filter for listing an organization's members.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberFilter {
    /// Organization to list
    pub organization_id: Uuid,

    /// Only members with this role
    #[serde(default)]
    pub role: Option<MemberRole>,

    /// Case-insensitive free text over member and user display fields
    #[serde(default)]
    pub search: Option<String>,
}

impl MemberFilter {
    /// All members of an organization.
    pub fn for_organization(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            role: None,
            search: None,
        }
    }

    /// Restrict to a role.
    pub fn with_role(mut self, role: MemberRole) -> Self {
        self.role = Some(role);
        self
    }

    /// Restrict to a search term.
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }
}

/// Display fields of a platform user, used for member search.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub display_name: Option<String>,
    pub email: Option<String>,
}
