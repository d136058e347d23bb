//! Invitation models and the invitation state machine
//!
//! ```text
//!            ┌──────────► accepted
//!            ├──────────► declined
//! pending ───┼──────────► cancelled
//!            └──(time)──► expired
//! ```
//!
//! Every right-hand state is terminal. Expiry is derived, not scheduled:
//! [`Invitation::effective_status`] reports `expired` for a stored `pending`
//! row whose deadline has passed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{OrgError, OrgResult};
use crate::roles::MemberRole;

/// Invitation lifecycle status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InvitationStatus {
    /// Waiting for a response
    Pending,
    /// Invitee joined
    Accepted,
    /// Invitee refused
    Declined,
    /// Deadline passed
    Expired,
    /// Revoked by an admin
    Cancelled,
}

impl InvitationStatus {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Declined => "declined",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvitationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvitationStatus {
    type Err = OrgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(OrgError::InvalidStatus(s.to_string())),
        }
    }
}

/// An offer for an email address to join an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invitation {
    /// Invitation ID
    pub id: Uuid,

    /// Organization the invitee would join
    pub organization_id: Uuid,

    /// Normalized invitee email
    pub email: String,

    /// Role granted on acceptance
    pub role: MemberRole,

    /// Opaque token; the only key accept and decline look up by
    pub token: String,

    /// Stored status (see [`Invitation::effective_status`])
    pub status: InvitationStatus,

    /// User who issued the invitation
    pub invited_by: Uuid,

    /// Deadline for a response
    pub expires_at: DateTime<Utc>,

    /// When the invitation was issued
    pub created_at: DateTime<Utc>,

    /// When the invitation left `pending`
    pub responded_at: Option<DateTime<Utc>>,
}

impl Invitation {
    /// Issue a pending invitation valid for `lifetime` from now.
    pub fn new(
        organization_id: Uuid,
        email: impl Into<String>,
        role: MemberRole,
        token: impl Into<String>,
        invited_by: Uuid,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            organization_id,
            email: email.into(),
            role,
            token: token.into(),
            status: InvitationStatus::Pending,
            invited_by,
            expires_at: now + lifetime,
            created_at: now,
            responded_at: None,
        }
    }

    /// Status as of `now`, with lazy expiry applied.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::{Duration, Utc};
    /// use uuid::Uuid;
    /// use org_engine::{Invitation, InvitationStatus, MemberRole};
    ///
    /// let invitation = Invitation::new(
    ///     Uuid::now_v7(),
    ///     "dev@example.com",
    ///     MemberRole::Member,
    ///     "token",
    ///     Uuid::now_v7(),
    ///     Duration::hours(72),
    /// );
    /// let later = Utc::now() + Duration::hours(73);
    /// assert_eq!(invitation.effective_status(later), InvitationStatus::Expired);
    /// ```
    pub fn effective_status(&self, now: DateTime<Utc>) -> InvitationStatus {
        if self.status == InvitationStatus::Pending && now > self.expires_at {
            InvitationStatus::Expired
        } else {
            self.status
        }
    }

    /// Whether the invitation can still be accepted or declined at `now`.
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.effective_status(now) == InvitationStatus::Pending
    }

    /// Fail unless the invitation is usable at `now`.
    ///
    /// # Errors
    ///
    /// `InvitationExpired` past the deadline, `InvitationNotPending` for any
    /// other terminal status.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> OrgResult<()> {
        match self.effective_status(now) {
            InvitationStatus::Pending => Ok(()),
            InvitationStatus::Expired => Err(OrgError::InvitationExpired),
            other => Err(OrgError::InvitationNotPending(other.to_string())),
        }
    }
}

/// Input for issuing an invitation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InviteRequest {
    /// Invitee email, normalized before storage
    pub email: String,

    /// Role name granted on acceptance
    #[serde(default = "default_invite_role")]
    pub role: String,
}

fn default_invite_role() -> String {
    MemberRole::Member.as_str().to_string()
}

/// Trim and lowercase an email, rejecting anything without a local part and
/// a domain.
///
/// # Examples
///
/// ```
/// use org_engine::invitation::normalize_email;
///
/// assert_eq!(normalize_email("  Dev@Example.COM ").unwrap(), "dev@example.com");
/// assert!(normalize_email("not-an-email").is_err());
/// ```
pub fn normalize_email(email: &str) -> OrgResult<String> {
    let normalized = email.trim().to_lowercase();
    let valid = match normalized.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !normalized.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return Err(OrgError::InvalidEmail(email.to_string()));
    }
    Ok(normalized)
}
