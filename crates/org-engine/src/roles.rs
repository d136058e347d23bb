//! Roles, member statuses and the invariants guarding them
//!
//! This module defines the fixed three-tier role hierarchy, the member
//! status enumeration, and the pure checks every membership mutation runs
//! before touching storage.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{OrgError, OrgResult};

/// User role within an organization.
///
/// Roles are hierarchical: Member < Admin < Owner.
///
/// # Permission Model
///
/// - **Member**: Belongs to the organization, may create teams
/// - **Admin**: Manages members, teams and invitations
/// - **Owner**: Everything an admin can do, plus deleting the organization.
///   Exactly one per organization, granted at creation only.
///
/// # Examples
///
/// ```
/// use org_engine::MemberRole;
///
/// assert!(MemberRole::Admin.is_admin());
/// assert!(!MemberRole::Member.is_admin());
/// assert!(MemberRole::Owner > MemberRole::Admin);
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    /// Regular member
    Member = 1,

    /// Can manage members, teams and invitations
    Admin = 2,

    /// Organization owner
    Owner = 3,
}

impl MemberRole {
    /// Check if this role has admin privileges.
    ///
    /// # Returns
    ///
    /// `true` for Admin and Owner roles
    pub fn is_admin(&self) -> bool {
        *self >= MemberRole::Admin
    }

    /// Check if this is the owner role.
    pub fn is_owner(&self) -> bool {
        *self == MemberRole::Owner
    }

    /// Parse role from string representation.
    ///
    /// # Arguments
    ///
    /// * `s` - String to parse (case-insensitive)
    ///
    /// # Examples
    ///
    /// ```
    /// use org_engine::MemberRole;
    ///
    /// assert_eq!(MemberRole::parse("admin"), Some(MemberRole::Admin));
    /// assert_eq!(MemberRole::parse("OWNER"), Some(MemberRole::Owner));
    /// assert_eq!(MemberRole::parse("editor"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    /// Get string representation of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::Owner => "owner",
        }
    }

    /// Get a human-readable display name for the role.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Member => "Member",
            Self::Admin => "Admin",
            Self::Owner => "Owner",
        }
    }
}

impl Default for MemberRole {
    fn default() -> Self {
        Self::Member
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = OrgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| OrgError::InvalidRole(s.to_string()))
    }
}

/// Standing of a member within an organization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    /// Full member
    Active,

    /// Temporarily barred; keeps the row but loses access
    Suspended,

    /// Not yet activated
    Pending,
}

impl MemberStatus {
    /// Parse status from string representation (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "suspended" => Some(Self::Suspended),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Pending => "pending",
        }
    }

    /// Whether the member currently has access.
    pub fn is_active(&self) -> bool {
        *self == Self::Active
    }
}

impl Default for MemberStatus {
    fn default() -> Self {
        Self::Active
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberStatus {
    type Err = OrgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| OrgError::InvalidStatus(s.to_string()))
    }
}

/// Role a member may be given after the organization exists.
///
/// Owner is granted once, at creation; every later grant (direct add,
/// invitation, update) goes through this check.
pub fn check_assignable_role(role: MemberRole) -> OrgResult<()> {
    if role.is_owner() {
        return Err(OrgError::OwnerNotAssignable);
    }
    Ok(())
}

/// Validate a role/status change against the target's current role.
///
/// The owner keeps its role forever; nobody is promoted to owner. A status
/// change on the owner that would take away its access is treated like a
/// demotion.
pub fn check_member_transition(
    current: MemberRole,
    new_role: Option<MemberRole>,
    new_status: Option<MemberStatus>,
) -> OrgResult<()> {
    if current.is_owner() {
        if matches!(new_role, Some(role) if !role.is_owner()) {
            return Err(OrgError::CannotRemoveOwner);
        }
        if matches!(new_status, Some(status) if !status.is_active()) {
            return Err(OrgError::CannotRemoveOwner);
        }
        return Ok(());
    }

    match new_role {
        Some(role) => check_assignable_role(role),
        None => Ok(()),
    }
}

/// Validate that a member may be removed at all.
pub fn check_removable(role: MemberRole) -> OrgResult<()> {
    if role.is_owner() {
        return Err(OrgError::CannotRemoveOwner);
    }
    Ok(())
}
