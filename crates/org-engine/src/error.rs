//! Error types for organization engine operations
//!
//! Every business-rule failure the engine can report is a variant of
//! [`OrgError`]. Variants are grouped into coarse [`ErrorKind`]s that the
//! request layer maps onto transport status codes.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;
use crate::repository::RepositoryError;

/// Coarse classification of an [`OrgError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Organization, member, team or invitation is absent
    NotFound,
    /// A uniqueness rule would be violated
    Conflict,
    /// A numeric ceiling has been reached
    QuotaExceeded,
    /// Input or entity state does not permit the operation
    InvalidState,
    /// The actor is not allowed to perform the operation
    Forbidden,
    /// The operation is switched off by configuration
    FeatureDisabled,
    /// Storage or configuration failure
    Internal,
}

/// Organization engine error types.
#[derive(Debug, Error)]
pub enum OrgError {
    /// Organization does not exist
    #[error("Organization not found: {0}")]
    OrganizationNotFound(String),

    /// Member does not exist
    #[error("Member not found: {0}")]
    MemberNotFound(String),

    /// Team does not exist
    #[error("Team not found: {0}")]
    TeamNotFound(Uuid),

    /// No invitation matches the id or token
    #[error("Invitation not found")]
    InvitationNotFound,

    /// Slug is taken within the (app, environment) scope
    #[error("Organization slug already exists: {0}")]
    SlugAlreadyExists(String),

    /// User already belongs to the organization
    #[error("User is already a member of this organization")]
    MemberAlreadyExists,

    /// Member already belongs to the team
    #[error("Member is already in this team")]
    TeamMemberAlreadyExists,

    /// A usable invitation for this email is still pending
    #[error("A pending invitation already exists for {0}")]
    InvitationAlreadyExists(String),

    /// Creator reached the organizations-per-user ceiling
    #[error("Maximum number of organizations reached ({0})")]
    MaxOrganizationsReached(u32),

    /// Organization reached the members ceiling
    #[error("Maximum number of members reached ({0})")]
    MaxMembersReached(u32),

    /// Organization reached the teams ceiling
    #[error("Maximum number of teams reached ({0})")]
    MaxTeamsReached(u32),

    /// Role outside owner/admin/member
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Status outside active/suspended/pending
    #[error("Invalid status: {0}")]
    InvalidStatus(String),

    /// Slug is not URL-safe
    #[error("Invalid slug: {0}")]
    InvalidSlug(String),

    /// Name is empty
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// Email is not a plausible address
    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    /// Invitation already reached a terminal status
    #[error("Invitation is not pending (status: {0})")]
    InvitationNotPending(String),

    /// Invitation deadline has passed
    #[error("Invitation has expired")]
    InvitationExpired,

    /// Actor has no active membership in the organization
    #[error("Forbidden: not a member of this organization")]
    NotMember,

    /// Actor is neither admin nor owner
    #[error("Forbidden: admin or owner role required")]
    NotAdmin,

    /// Actor is not the owner
    #[error("Forbidden: only the owner can perform this action")]
    NotOwner,

    /// The owner cannot be removed or demoted
    #[error("Cannot remove or demote the organization owner")]
    CannotRemoveOwner,

    /// The owner role is only granted at organization creation
    #[error("The owner role cannot be assigned")]
    OwnerNotAssignable,

    /// Self-service organization creation is switched off
    #[error("Organization creation is disabled")]
    CreationDisabled,

    /// Members may only join by accepting an invitation
    #[error("Members must be added through an invitation")]
    InvitationRequired,

    /// Backing store failure
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for organization engine operations.
pub type OrgResult<T> = Result<T, OrgError>;

impl OrgError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrgError::OrganizationNotFound(_)
            | OrgError::MemberNotFound(_)
            | OrgError::TeamNotFound(_)
            | OrgError::InvitationNotFound => ErrorKind::NotFound,

            OrgError::SlugAlreadyExists(_)
            | OrgError::MemberAlreadyExists
            | OrgError::TeamMemberAlreadyExists
            | OrgError::InvitationAlreadyExists(_) => ErrorKind::Conflict,

            OrgError::MaxOrganizationsReached(_)
            | OrgError::MaxMembersReached(_)
            | OrgError::MaxTeamsReached(_) => ErrorKind::QuotaExceeded,

            OrgError::InvalidRole(_)
            | OrgError::InvalidStatus(_)
            | OrgError::InvalidSlug(_)
            | OrgError::InvalidName(_)
            | OrgError::InvalidEmail(_)
            | OrgError::InvitationNotPending(_)
            | OrgError::InvitationExpired => ErrorKind::InvalidState,

            OrgError::NotMember
            | OrgError::NotAdmin
            | OrgError::NotOwner
            | OrgError::CannotRemoveOwner
            | OrgError::OwnerNotAssignable => ErrorKind::Forbidden,

            OrgError::CreationDisabled | OrgError::InvitationRequired => ErrorKind::FeatureDisabled,

            OrgError::Repository(_) | OrgError::Config(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error should be logged at error level.
    ///
    /// Business-rule failures are expected and are not server errors.
    pub fn is_server_error(&self) -> bool {
        self.kind() == ErrorKind::Internal
    }

    /// Get HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::NotFound => 404,
            ErrorKind::Forbidden => 403,
            ErrorKind::Conflict => 409,
            ErrorKind::QuotaExceeded | ErrorKind::InvalidState | ErrorKind::FeatureDisabled => 400,
            ErrorKind::Internal => 500,
        }
    }

    /// Get error code for API responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            OrgError::OrganizationNotFound(_) => "ORGANIZATION_NOT_FOUND",
            OrgError::MemberNotFound(_) => "MEMBER_NOT_FOUND",
            OrgError::TeamNotFound(_) => "TEAM_NOT_FOUND",
            OrgError::InvitationNotFound => "INVITATION_NOT_FOUND",
            OrgError::SlugAlreadyExists(_) => "SLUG_ALREADY_EXISTS",
            OrgError::MemberAlreadyExists => "MEMBER_ALREADY_EXISTS",
            OrgError::TeamMemberAlreadyExists => "TEAM_MEMBER_ALREADY_EXISTS",
            OrgError::InvitationAlreadyExists(_) => "INVITATION_ALREADY_EXISTS",
            OrgError::MaxOrganizationsReached(_) => "MAX_ORGANIZATIONS_REACHED",
            OrgError::MaxMembersReached(_) => "MAX_MEMBERS_REACHED",
            OrgError::MaxTeamsReached(_) => "MAX_TEAMS_REACHED",
            OrgError::InvalidRole(_) => "INVALID_ROLE",
            OrgError::InvalidStatus(_) => "INVALID_STATUS",
            OrgError::InvalidSlug(_) => "INVALID_SLUG",
            OrgError::InvalidName(_) => "INVALID_NAME",
            OrgError::InvalidEmail(_) => "INVALID_EMAIL",
            OrgError::InvitationNotPending(_) => "INVITATION_NOT_PENDING",
            OrgError::InvitationExpired => "INVITATION_EXPIRED",
            OrgError::NotMember => "NOT_MEMBER",
            OrgError::NotAdmin => "NOT_ADMIN",
            OrgError::NotOwner => "NOT_OWNER",
            OrgError::CannotRemoveOwner => "CANNOT_REMOVE_OWNER",
            OrgError::OwnerNotAssignable => "OWNER_NOT_ASSIGNABLE",
            OrgError::CreationDisabled => "CREATION_DISABLED",
            OrgError::InvitationRequired => "INVITATION_REQUIRED",
            OrgError::Repository(_) => "REPOSITORY_ERROR",
            OrgError::Config(_) => "CONFIG_ERROR",
        }
    }
}
