//! Persistence contracts
//!
//! The engine never talks to storage directly. Each aggregate has an async
//! repository trait; implementations own the storage mechanics, enforce the
//! uniqueness constraints listed on [`UniqueConstraint`], and cascade an
//! organization's children when it is deleted.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::invitation::{Invitation, InvitationStatus};
use crate::member::{Member, MemberFilter};
use crate::organization::{AppScope, Organization};
use crate::team::{Team, TeamMember};

/// Default page size.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Largest page a caller may request.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Storage-level uniqueness rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniqueConstraint {
    /// (app, environment, slug)
    OrganizationSlug,
    /// (organization, user)
    OrganizationMember,
    /// (team, member)
    TeamMember,
    /// (token)
    InvitationToken,
}

impl fmt::Display for UniqueConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OrganizationSlug => "organizations_app_env_slug_key",
            Self::OrganizationMember => "organization_members_org_user_key",
            Self::TeamMember => "organization_team_members_team_member_key",
            Self::InvitationToken => "organization_invitations_token_key",
        };
        f.write_str(name)
    }
}

/// Repository errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A row with the same unique key already exists
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(UniqueConstraint),

    /// The row to update or delete does not exist
    #[error("Row not found: {0}")]
    NotFound(String),

    /// The backing store could not be reached or failed
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl RepositoryError {
    /// The violated constraint, if this is a uniqueness failure.
    pub fn violated_constraint(&self) -> Option<UniqueConstraint> {
        match self {
            Self::UniqueViolation(constraint) => Some(*constraint),
            _ => None,
        }
    }
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepositoryError>;

/// Offset pagination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_PAGE_LIMIT
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_PAGE_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    /// Create a pagination window; the limit is clamped to `1..=MAX_PAGE_LIMIT`.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: limit.clamp(1, MAX_PAGE_LIMIT),
            offset,
        }
    }

    /// Cut one page out of an already filtered, ordered list.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let limit = self.limit.clamp(1, MAX_PAGE_LIMIT);
        let items = items
            .into_iter()
            .skip(self.offset as usize)
            .take(limit as usize)
            .collect();
        Page {
            items,
            total,
            limit,
            offset: self.offset,
        }
    }
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

impl<T> Page<T> {
    /// Whether more rows exist past this page.
    pub fn has_more(&self) -> bool {
        u64::from(self.offset) + (self.items.len() as u64) < self.total
    }

    /// Transform the items, keeping the window.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Organization storage.
#[async_trait]
pub trait OrganizationRepository: Send + Sync {
    /// Insert an organization. With `unique_slug` set, fails with
    /// `UniqueViolation(OrganizationSlug)` when the slug is already taken in
    /// the organization's (app, environment) scope.
    async fn create(&self, organization: Organization, unique_slug: bool) -> RepoResult<Organization>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Organization>>;

    async fn find_by_slug(&self, scope: AppScope, slug: &str) -> RepoResult<Option<Organization>>;

    /// Organizations `user_id` created within `scope`.
    async fn count_by_creator(&self, scope: AppScope, user_id: Uuid) -> RepoResult<u64>;

    async fn update(&self, organization: Organization) -> RepoResult<Organization>;

    /// Delete an organization together with its members, teams and
    /// invitations.
    async fn delete(&self, id: Uuid) -> RepoResult<()>;
}

/// Organization membership storage.
#[async_trait]
pub trait MemberRepository: Send + Sync {
    /// Insert a membership. Fails with `UniqueViolation(OrganizationMember)`
    /// when the user already belongs to the organization.
    async fn create(&self, member: Member) -> RepoResult<Member>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Member>>;

    async fn find_by_user(&self, organization_id: Uuid, user_id: Uuid) -> RepoResult<Option<Member>>;

    /// Members matching `filter`, oldest first.
    async fn list(&self, filter: &MemberFilter, page: Pagination) -> RepoResult<Page<Member>>;

    /// Every membership a user holds, across organizations.
    async fn list_by_user(&self, user_id: Uuid) -> RepoResult<Vec<Member>>;

    async fn count(&self, organization_id: Uuid) -> RepoResult<u64>;

    async fn update(&self, member: Member) -> RepoResult<Member>;

    async fn delete(&self, id: Uuid) -> RepoResult<()>;
}

/// Team and team membership storage.
#[async_trait]
pub trait TeamRepository: Send + Sync {
    async fn create(&self, team: Team) -> RepoResult<Team>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Team>>;

    async fn list(&self, organization_id: Uuid, page: Pagination) -> RepoResult<Page<Team>>;

    async fn count(&self, organization_id: Uuid) -> RepoResult<u64>;

    async fn update(&self, team: Team) -> RepoResult<Team>;

    /// Delete a team and its memberships.
    async fn delete(&self, id: Uuid) -> RepoResult<()>;

    /// Fails with `UniqueViolation(TeamMember)` on a duplicate.
    async fn add_member(&self, team_member: TeamMember) -> RepoResult<TeamMember>;

    /// Returns whether a row was removed.
    async fn remove_member(&self, team_id: Uuid, member_id: Uuid) -> RepoResult<bool>;

    async fn find_member(&self, team_id: Uuid, member_id: Uuid) -> RepoResult<Option<TeamMember>>;

    async fn list_members(&self, team_id: Uuid, page: Pagination) -> RepoResult<Page<TeamMember>>;

    /// Drop a member from every team; returns the number of rows removed.
    async fn remove_member_from_all(&self, member_id: Uuid) -> RepoResult<u64>;
}

/// Invitation storage.
#[async_trait]
pub trait InvitationRepository: Send + Sync {
    /// Fails with `UniqueViolation(InvitationToken)` on a token collision.
    async fn create(&self, invitation: Invitation) -> RepoResult<Invitation>;

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Invitation>>;

    async fn find_by_token(&self, token: &str) -> RepoResult<Option<Invitation>>;

    /// Invitations of an organization by stored status, newest first.
    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        page: Pagination,
    ) -> RepoResult<Page<Invitation>>;

    /// Stored-`pending` invitations for an email within an organization.
    async fn find_pending_by_email(&self, organization_id: Uuid, email: &str) -> RepoResult<Vec<Invitation>>;

    /// Compare-and-set the status: moves `id` from `from` to `to` and stamps
    /// `responded_at`, only if the stored status still equals `from`.
    /// Returns whether the transition happened.
    async fn transition_status(
        &self,
        id: Uuid,
        from: InvitationStatus,
        to: InvitationStatus,
        at: DateTime<Utc>,
    ) -> RepoResult<bool>;

    /// Delete invitations that are `expired`, or `pending` past their
    /// deadline at `now`. Returns the number deleted.
    async fn delete_expired(&self, now: DateTime<Utc>) -> RepoResult<u64>;
}

/// The four repositories the engine runs on.
#[derive(Clone)]
pub struct Repositories {
    pub organizations: Arc<dyn OrganizationRepository>,
    pub members: Arc<dyn MemberRepository>,
    pub teams: Arc<dyn TeamRepository>,
    pub invitations: Arc<dyn InvitationRepository>,
}

impl Repositories {
    pub fn new(
        organizations: Arc<dyn OrganizationRepository>,
        members: Arc<dyn MemberRepository>,
        teams: Arc<dyn TeamRepository>,
        invitations: Arc<dyn InvitationRepository>,
    ) -> Self {
        Self {
            organizations,
            members,
            teams,
            invitations,
        }
    }

    /// All four backed by one in-memory store.
    #[cfg(feature = "memory")]
    pub fn in_memory(store: Arc<crate::memory::MemoryStore>) -> Self {
        Self {
            organizations: store.clone(),
            members: store.clone(),
            teams: store.clone(),
            invitations: store,
        }
    }
}

impl fmt::Debug for Repositories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repositories").finish_non_exhaustive()
    }
}
