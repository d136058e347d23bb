//! Team models
//!
//! Teams group members of one organization. A team may be provisioned by an
//! external directory; such teams can still be edited locally, but every
//! mutation reports an [`ExternalSyncWarning`] so the caller can tell the
//! user the change may be overwritten by the next sync.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::OrgResult;
use crate::organization::validate_name;

/// A named group of members inside an organization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    /// Team ID
    pub id: Uuid,

    /// Owning organization
    pub organization_id: Uuid,

    /// Team name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Custom metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// External system that manages this team (e.g. `"scim"`)
    pub provisioned_by: Option<String>,

    /// When the team was created
    pub created_at: DateTime<Utc>,

    /// When the team was last updated
    pub updated_at: DateTime<Utc>,
}

impl Team {
    /// Create a locally managed team.
    pub fn new(organization_id: Uuid, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id,
            name: name.into(),
            description: None,
            metadata: HashMap::new(),
            provisioned_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark the team as managed by an external system.
    pub fn with_provisioned_by(mut self, source: impl Into<String>) -> Self {
        self.provisioned_by = Some(source.into());
        self
    }

    /// Whether an external directory owns this team.
    pub fn is_externally_provisioned(&self) -> bool {
        self.provisioned_by.is_some()
    }

    /// Warning to attach to a local mutation, if any.
    pub fn sync_warning(&self) -> Option<ExternalSyncWarning> {
        self.provisioned_by.as_ref().map(|source| ExternalSyncWarning {
            team_id: self.id,
            provisioned_by: source.clone(),
            message: format!(
                "team is managed by {}; local changes may be overwritten on the next sync",
                source
            ),
        })
    }
}

/// Membership of an organization member in a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    /// Team ID
    pub team_id: Uuid,

    /// Organization member ID (not the user ID)
    pub member_id: Uuid,

    /// When the member joined the team
    pub joined_at: DateTime<Utc>,
}

impl TeamMember {
    pub fn new(team_id: Uuid, member_id: Uuid) -> Self {
        Self {
            team_id,
            member_id,
            joined_at: Utc::now(),
        }
    }
}

/// Non-blocking notice that a mutated team is externally provisioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSyncWarning {
    pub team_id: Uuid,
    pub provisioned_by: String,
    pub message: String,
}

/// Result of a team update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamUpdate {
    /// The team after the update
    pub team: Team,

    /// Set when the team is externally provisioned
    pub warning: Option<ExternalSyncWarning>,
}

/// Input for creating a team.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTeamRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    pub provisioned_by: Option<String>,
}

impl CreateTeamRequest {
    /// Validate the request and build the team.
    pub fn into_team(self, organization_id: Uuid) -> OrgResult<Team> {
        let mut team = Team::new(organization_id, validate_name(&self.name)?);
        team.description = self.description;
        team.metadata = self.metadata.unwrap_or_default();
        team.provisioned_by = self.provisioned_by;
        Ok(team)
    }
}

/// Partial update of a team. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTeamRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl UpdateTeamRequest {
    /// Apply present fields and report whether anything changed.
    pub fn apply(&self, team: &mut Team) -> OrgResult<bool> {
        let mut changed = false;

        if let Some(name) = &self.name {
            let name = validate_name(name)?;
            if team.name != name {
                team.name = name;
                changed = true;
            }
        }
        if let Some(description) = &self.description {
            if team.description.as_deref() != Some(description.as_str()) {
                team.description = Some(description.clone());
                changed = true;
            }
        }
        if let Some(metadata) = &self.metadata {
            if team.metadata != *metadata {
                team.metadata = metadata.clone();
                changed = true;
            }
        }

        if changed {
            team.updated_at = Utc::now();
        }
        Ok(changed)
    }
}
