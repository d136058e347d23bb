//! Quota ceilings and feature gates
//!
//! The quota guard answers "may this be created?" from counts the caller
//! has just read. Checks are count-then-create and therefore soft under
//! concurrent requests: two creations racing on the last free slot can both
//! pass. Invariants that must never be violated are backed by repository
//! uniqueness constraints instead.

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::{OrgError, OrgResult};

/// Numeric ceilings and gates taken from one configuration snapshot.
///
/// # Examples
///
/// ```
/// use org_engine::{EngineConfig, QuotaGuard};
///
/// let guard = QuotaGuard::from_config(&EngineConfig::default());
/// assert!(guard.check_members(49).is_ok());
/// assert!(guard.check_members(50).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaGuard {
    /// Organizations per creator
    pub max_organizations_per_user: u32,

    /// Members per organization
    pub max_members_per_organization: u32,

    /// Teams per organization
    pub max_teams_per_organization: u32,

    /// Self-service creation allowed
    pub enable_user_creation: bool,

    /// Members only through invitations
    pub require_invitation: bool,
}

impl QuotaGuard {
    /// Build a guard from a configuration snapshot.
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_organizations_per_user: config.max_organizations_per_user,
            max_members_per_organization: config.max_members_per_organization,
            max_teams_per_organization: config.max_teams_per_organization,
            enable_user_creation: config.enable_user_creation,
            require_invitation: config.require_invitation,
        }
    }

    /// Self-service creation gate.
    pub fn check_creation_enabled(&self) -> OrgResult<()> {
        if !self.enable_user_creation {
            return Err(OrgError::CreationDisabled);
        }
        Ok(())
    }

    /// Gate for adding members without an invitation.
    pub fn check_direct_add_allowed(&self) -> OrgResult<()> {
        if self.require_invitation {
            return Err(OrgError::InvitationRequired);
        }
        Ok(())
    }

    /// `existing` organizations already created by the user.
    pub fn check_organizations(&self, existing: u64) -> OrgResult<()> {
        if existing >= u64::from(self.max_organizations_per_user) {
            return Err(OrgError::MaxOrganizationsReached(self.max_organizations_per_user));
        }
        Ok(())
    }

    /// `existing` members already in the organization.
    pub fn check_members(&self, existing: u64) -> OrgResult<()> {
        if existing >= u64::from(self.max_members_per_organization) {
            return Err(OrgError::MaxMembersReached(self.max_members_per_organization));
        }
        Ok(())
    }

    /// `existing` teams already in the organization.
    pub fn check_teams(&self, existing: u64) -> OrgResult<()> {
        if existing >= u64::from(self.max_teams_per_organization) {
            return Err(OrgError::MaxTeamsReached(self.max_teams_per_organization));
        }
        Ok(())
    }

    /// Remaining member slots, for display.
    pub fn remaining_members(&self, existing: u64) -> u64 {
        u64::from(self.max_members_per_organization).saturating_sub(existing)
    }
}
