//! Event types for organization lifecycle notifications
//!
//! This module defines the envelope every lifecycle event travels in and the
//! typed events the engine emits for organizations, members, teams and
//! invitations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bus::{EventBusError, EventBusResult};

/// Lifecycle event envelope.
///
/// Typed events are converted into this envelope before publication so that
/// transports only need to route on `event_type` and serialize JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event ID
    pub id: Uuid,

    /// Event type, also the routing topic (e.g., "member.added")
    pub event_type: String,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Organization the event belongs to, if any
    pub organization_id: Option<Uuid>,

    /// User who triggered the event
    pub actor_id: Option<Uuid>,

    /// Event version for schema evolution
    pub version: u32,

    /// Event payload
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The event type string
    /// * `payload` - The event payload
    pub fn new(event_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            organization_id: None,
            actor_id: None,
            version: 1,
            payload,
        }
    }

    /// Set organization context.
    pub fn with_organization(mut self, organization_id: Uuid) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    /// Set the acting user.
    pub fn with_actor(mut self, actor_id: Uuid) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    /// Get the topic for this event.
    pub fn topic(&self) -> &str {
        &self.event_type
    }

    /// Category derived from the first topic segment.
    pub fn category(&self) -> Option<EventCategory> {
        EventCategory::from_event_type(&self.event_type)
    }

    /// Parse the payload into a specific type.
    pub fn parse_payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}

/// Event categories for filtering.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// Organization lifecycle
    Organization,
    /// Membership roster changes
    Member,
    /// Teams and team membership
    Team,
    /// Invitation state transitions
    Invitation,
}

impl EventCategory {
    /// Parse from event type string.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type.split('.').next()? {
            "organization" => Some(EventCategory::Organization),
            "member" => Some(EventCategory::Member),
            "team" => Some(EventCategory::Team),
            "invitation" => Some(EventCategory::Invitation),
            _ => None,
        }
    }
}

fn envelope<T: Serialize>(event_type: &str, organization_id: Option<Uuid>, body: &T) -> EventBusResult<Event> {
    let payload = serde_json::to_value(body)
        .map_err(|e| EventBusError::SerializationError(e.to_string()))?;
    let event = Event::new(event_type, payload);
    Ok(match organization_id {
        Some(id) => event.with_organization(id),
        None => event,
    })
}

// ============================================================================
// Organization Events
// ============================================================================

/// Organization lifecycle events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrganizationEvent {
    /// Organization was created together with its owner membership
    Created {
        organization_id: Uuid,
        app_id: Uuid,
        environment_id: Uuid,
        slug: String,
        created_by: Uuid,
    },
    /// Organization attributes changed
    Updated {
        organization_id: Uuid,
        changes: Vec<String>,
    },
    /// Organization was deleted by its owner
    Deleted {
        organization_id: Uuid,
        deleted_by: Uuid,
    },
}

impl OrganizationEvent {
    /// Convert to generic event.
    pub fn to_event(&self) -> EventBusResult<Event> {
        let (event_type, organization_id) = match self {
            OrganizationEvent::Created { organization_id, .. } => ("organization.created", organization_id),
            OrganizationEvent::Updated { organization_id, .. } => ("organization.updated", organization_id),
            OrganizationEvent::Deleted { organization_id, .. } => ("organization.deleted", organization_id),
        };
        envelope(event_type, Some(*organization_id), self)
    }
}

// ============================================================================
// Member Events
// ============================================================================

/// Membership roster events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MemberEvent {
    /// A user joined the organization
    Added {
        organization_id: Uuid,
        member_id: Uuid,
        user_id: Uuid,
        role: String,
    },
    /// Role or status of a member changed
    Updated {
        organization_id: Uuid,
        member_id: Uuid,
        role: String,
        status: String,
    },
    /// A member was removed
    Removed {
        organization_id: Uuid,
        member_id: Uuid,
        user_id: Uuid,
    },
}

impl MemberEvent {
    /// Convert to generic event.
    pub fn to_event(&self) -> EventBusResult<Event> {
        let (event_type, organization_id) = match self {
            MemberEvent::Added { organization_id, .. } => ("member.added", organization_id),
            MemberEvent::Updated { organization_id, .. } => ("member.updated", organization_id),
            MemberEvent::Removed { organization_id, .. } => ("member.removed", organization_id),
        };
        envelope(event_type, Some(*organization_id), self)
    }
}

// ============================================================================
// Team Events
// ============================================================================

/// Team events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TeamEvent {
    /// Team was created
    Created {
        organization_id: Uuid,
        team_id: Uuid,
        name: String,
    },
    /// Team attributes changed
    Updated { organization_id: Uuid, team_id: Uuid },
    /// Team was deleted
    Deleted { organization_id: Uuid, team_id: Uuid },
    /// A member joined the team
    MemberAdded {
        organization_id: Uuid,
        team_id: Uuid,
        member_id: Uuid,
    },
    /// A member left the team
    MemberRemoved {
        organization_id: Uuid,
        team_id: Uuid,
        member_id: Uuid,
    },
}

impl TeamEvent {
    /// Convert to generic event.
    pub fn to_event(&self) -> EventBusResult<Event> {
        let (event_type, organization_id) = match self {
            TeamEvent::Created { organization_id, .. } => ("team.created", organization_id),
            TeamEvent::Updated { organization_id, .. } => ("team.updated", organization_id),
            TeamEvent::Deleted { organization_id, .. } => ("team.deleted", organization_id),
            TeamEvent::MemberAdded { organization_id, .. } => ("team.member_added", organization_id),
            TeamEvent::MemberRemoved { organization_id, .. } => ("team.member_removed", organization_id),
        };
        envelope(event_type, Some(*organization_id), self)
    }
}

// ============================================================================
// Invitation Events
// ============================================================================

/// Invitation state machine events.
///
/// No event carries the invitation token. Notification delivery resolves
/// it from `invitation_id` through the invitation repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InvitationEvent {
    /// Invitation was issued
    Created {
        organization_id: Uuid,
        invitation_id: Uuid,
        email: String,
        role: String,
        expires_at: DateTime<Utc>,
    },
    /// Invitee accepted and became a member
    Accepted {
        organization_id: Uuid,
        invitation_id: Uuid,
        member_id: Uuid,
        user_id: Uuid,
    },
    /// Invitee declined
    Declined {
        organization_id: Uuid,
        invitation_id: Uuid,
    },
    /// Admin or owner revoked the invitation
    Cancelled {
        organization_id: Uuid,
        invitation_id: Uuid,
    },
    /// Invitation was read after its deadline
    Expired {
        organization_id: Uuid,
        invitation_id: Uuid,
    },
    /// Expired invitations were purged
    CleanedUp { removed: u64 },
}

impl InvitationEvent {
    /// Convert to generic event.
    pub fn to_event(&self) -> EventBusResult<Event> {
        let (event_type, organization_id) = match self {
            InvitationEvent::Created { organization_id, .. } => ("invitation.created", Some(*organization_id)),
            InvitationEvent::Accepted { organization_id, .. } => ("invitation.accepted", Some(*organization_id)),
            InvitationEvent::Declined { organization_id, .. } => ("invitation.declined", Some(*organization_id)),
            InvitationEvent::Cancelled { organization_id, .. } => ("invitation.cancelled", Some(*organization_id)),
            InvitationEvent::Expired { organization_id, .. } => ("invitation.expired", Some(*organization_id)),
            InvitationEvent::CleanedUp { .. } => ("invitation.cleaned_up", None),
        };
        envelope(event_type, organization_id, self)
    }
}
