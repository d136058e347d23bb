//! Engine facade
//!
//! [`OrganizationEngine`] composes the four lifecycle managers over one set
//! of repositories, one shared configuration and an optional event bus.
//! Every externally visible operation is a single async method here.

use async_trait::async_trait;
use org_events::EventBus;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::config::{ConfigOverrides, EngineConfig, SharedConfig};
use crate::error::OrgResult;
use crate::invitation::{Invitation, InvitationStatus, InviteRequest};
use crate::member::{AddMemberRequest, Member, MemberFilter, UpdateMemberRequest};
use crate::organization::{
    AppScope, CreateOrganizationRequest, Organization, OrganizationSummary, UpdateOrganizationRequest,
};
use crate::repository::{Page, Pagination, Repositories};
use crate::service::{EventPublisher, InvitationManager, MembershipManager, OrganizationManager, TeamManager};
use crate::team::{CreateTeamRequest, ExternalSyncWarning, Team, TeamMember, TeamUpdate, UpdateTeamRequest};

/// External policy engine consulted before the built-in role check.
///
/// Permissions use the `resource:action:id` form, e.g.
/// `organization:update:0190...`.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    /// `Some(decision)` to decide, `None` to defer to the role hierarchy.
    async fn evaluate(&self, user_id: Uuid, permission: &str) -> Option<bool>;
}

/// Permission string for editing an organization.
pub fn edit_organization_permission(organization_id: Uuid) -> String {
    format!("organization:update:{}", organization_id)
}

/// Builder for [`OrganizationEngine`].
pub struct OrganizationEngineBuilder {
    repositories: Repositories,
    config: EngineConfig,
    event_bus: Option<Arc<dyn EventBus>>,
    access_policy: Option<Arc<dyn AccessPolicy>>,
}

impl OrganizationEngineBuilder {
    /// Use this configuration instead of the defaults.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Publish lifecycle events to this bus.
    pub fn event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Consult this policy in [`OrganizationEngine::can_edit_organization`].
    pub fn access_policy(mut self, policy: Arc<dyn AccessPolicy>) -> Self {
        self.access_policy = Some(policy);
        self
    }

    /// Validate the configuration and assemble the engine.
    pub fn build(self) -> OrgResult<OrganizationEngine> {
        let config = SharedConfig::new(self.config)?;
        let events = EventPublisher::new(self.event_bus);
        let repositories = self.repositories;

        let membership = MembershipManager::new(
            repositories.members.clone(),
            repositories.teams.clone(),
            config.clone(),
            events.clone(),
        );
        let organizations = OrganizationManager::new(
            repositories.organizations.clone(),
            membership.clone(),
            config.clone(),
            events.clone(),
        );
        let teams = TeamManager::new(repositories.teams.clone(), membership.clone(), config.clone(), events.clone());
        let invitations = InvitationManager::new(repositories.invitations.clone(), membership.clone(), config.clone(), events);

        Ok(OrganizationEngine {
            organizations,
            membership,
            teams,
            invitations,
            config,
            access_policy: self.access_policy,
        })
    }
}

/// Self-service organization engine.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use uuid::Uuid;
/// use org_engine::{AppScope, CreateOrganizationRequest, MemoryStore, OrganizationEngine, Repositories};
///
/// # #[tokio::main]
/// # async fn main() {
/// let engine = OrganizationEngine::builder(Repositories::in_memory(Arc::new(MemoryStore::new())))
///     .build()
///     .unwrap();
///
/// let creator = Uuid::now_v7();
/// let org = engine
///     .create_organization(CreateOrganizationRequest {
///         name: "Acme".to_string(),
///         slug: "acme".to_string(),
///         logo: None,
///         metadata: None,
///         creator_id: creator,
///         scope: AppScope::new(Uuid::now_v7(), Uuid::now_v7()),
///     })
///     .await
///     .unwrap();
/// assert!(engine.is_owner(org.id, creator).await);
/// # }
/// ```
#[derive(Clone)]
pub struct OrganizationEngine {
    organizations: OrganizationManager,
    membership: MembershipManager,
    teams: TeamManager,
    invitations: InvitationManager,
    config: SharedConfig,
    access_policy: Option<Arc<dyn AccessPolicy>>,
}

impl fmt::Debug for OrganizationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrganizationEngine")
            .field("config", &self.config)
            .field("access_policy", &self.access_policy.is_some())
            .finish_non_exhaustive()
    }
}

impl OrganizationEngine {
    /// Start building an engine over `repositories` with default settings.
    pub fn builder(repositories: Repositories) -> OrganizationEngineBuilder {
        OrganizationEngineBuilder {
            repositories,
            config: EngineConfig::default(),
            event_bus: None,
            access_policy: None,
        }
    }

    pub fn organizations(&self) -> &OrganizationManager {
        &self.organizations
    }

    pub fn membership(&self) -> &MembershipManager {
        &self.membership
    }

    pub fn teams(&self) -> &TeamManager {
        &self.teams
    }

    pub fn invitations(&self) -> &InvitationManager {
        &self.invitations
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Current configuration snapshot.
    pub async fn settings(&self) -> Arc<EngineConfig> {
        self.config.snapshot().await
    }

    /// Apply configuration overrides atomically. Invalid results are
    /// rejected and the previous configuration stays in force.
    #[instrument(skip_all)]
    pub async fn update_settings(&self, overrides: &ConfigOverrides) -> OrgResult<Arc<EngineConfig>> {
        let config = self.config.update(overrides).await?;
        info!(?overrides, "Engine settings updated");
        Ok(config)
    }

    // ------------------------------------------------------------------
    // Organizations
    // ------------------------------------------------------------------

    pub async fn create_organization(&self, request: CreateOrganizationRequest) -> OrgResult<Organization> {
        self.organizations.create(request).await
    }

    pub async fn get_organization(&self, id: Uuid) -> OrgResult<Organization> {
        self.organizations.get(id).await
    }

    pub async fn find_organization_by_slug(&self, scope: AppScope, slug: &str) -> OrgResult<Option<Organization>> {
        self.organizations.find_by_slug(scope, slug).await
    }

    pub async fn list_user_organizations(&self, user_id: Uuid, scope: AppScope) -> OrgResult<Vec<OrganizationSummary>> {
        self.organizations.list_for_user(user_id, scope).await
    }

    /// Apply a partial update. Gate it with [`Self::can_edit_organization`].
    pub async fn update_organization(&self, id: Uuid, request: &UpdateOrganizationRequest) -> OrgResult<Organization> {
        self.organizations.update(id, request).await
    }

    pub async fn delete_organization(&self, id: Uuid, requester: Uuid) -> OrgResult<()> {
        self.organizations.delete(id, requester).await
    }

    /// Whether `user_id` may edit the organization: the access policy
    /// decides when it has an opinion, otherwise admins and the owner may.
    #[instrument(skip_all, fields(organization_id = %organization_id, user_id = %user_id))]
    pub async fn can_edit_organization(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        if let Some(policy) = &self.access_policy {
            let permission = edit_organization_permission(organization_id);
            if let Some(decision) = policy.evaluate(user_id, &permission).await {
                debug!(decision, "Access policy decided");
                return decision;
            }
        }
        self.membership.is_admin(organization_id, user_id).await
    }

    // ------------------------------------------------------------------
    // Members
    // ------------------------------------------------------------------

    pub async fn add_member(&self, organization_id: Uuid, request: AddMemberRequest, actor: Uuid) -> OrgResult<Member> {
        self.membership.add_member_directly(organization_id, request, actor).await
    }

    pub async fn update_member(&self, member_id: Uuid, request: &UpdateMemberRequest, updater: Uuid) -> OrgResult<Member> {
        self.membership.update_member(member_id, request, updater).await
    }

    pub async fn remove_member(&self, member_id: Uuid, remover: Uuid) -> OrgResult<()> {
        self.membership.remove_member(member_id, remover).await
    }

    pub async fn get_member(&self, member_id: Uuid) -> OrgResult<Member> {
        self.membership.get_member(member_id).await
    }

    pub async fn get_membership(&self, organization_id: Uuid, user_id: Uuid) -> OrgResult<Member> {
        self.membership.get_membership(organization_id, user_id).await
    }

    pub async fn list_members(&self, filter: &MemberFilter, page: Pagination) -> OrgResult<Page<Member>> {
        self.membership.list_members(filter, page).await
    }

    pub async fn is_member(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        self.membership.is_member(organization_id, user_id).await
    }

    pub async fn is_admin(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        self.membership.is_admin(organization_id, user_id).await
    }

    pub async fn is_owner(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        self.membership.is_owner(organization_id, user_id).await
    }

    // ------------------------------------------------------------------
    // Teams
    // ------------------------------------------------------------------

    pub async fn create_team(&self, organization_id: Uuid, request: CreateTeamRequest, creator: Uuid) -> OrgResult<Team> {
        self.teams.create_team(organization_id, request, creator).await
    }

    pub async fn update_team(&self, team_id: Uuid, request: &UpdateTeamRequest, actor: Uuid) -> OrgResult<TeamUpdate> {
        self.teams.update_team(team_id, request, actor).await
    }

    pub async fn delete_team(&self, team_id: Uuid, actor: Uuid) -> OrgResult<Option<ExternalSyncWarning>> {
        self.teams.delete_team(team_id, actor).await
    }

    pub async fn add_team_member(&self, team_id: Uuid, member_id: Uuid, actor: Uuid) -> OrgResult<TeamMember> {
        self.teams.add_team_member(team_id, member_id, actor).await
    }

    pub async fn remove_team_member(&self, team_id: Uuid, member_id: Uuid, actor: Uuid) -> OrgResult<()> {
        self.teams.remove_team_member(team_id, member_id, actor).await
    }

    pub async fn get_team(&self, team_id: Uuid) -> OrgResult<Team> {
        self.teams.get_team(team_id).await
    }

    pub async fn list_teams(&self, organization_id: Uuid, page: Pagination) -> OrgResult<Page<Team>> {
        self.teams.list_teams(organization_id, page).await
    }

    pub async fn list_team_members(&self, team_id: Uuid, page: Pagination) -> OrgResult<Page<TeamMember>> {
        self.teams.list_team_members(team_id, page).await
    }

    // ------------------------------------------------------------------
    // Invitations
    // ------------------------------------------------------------------

    pub async fn invite_member(&self, organization_id: Uuid, request: &InviteRequest, inviter: Uuid) -> OrgResult<Invitation> {
        self.invitations.invite(organization_id, request, inviter).await
    }

    pub async fn lookup_invitation(&self, token: &str) -> OrgResult<Invitation> {
        self.invitations.lookup(token).await
    }

    pub async fn accept_invitation(&self, token: &str, user_id: Uuid) -> OrgResult<Member> {
        self.invitations.accept(token, user_id).await
    }

    pub async fn decline_invitation(&self, token: &str) -> OrgResult<Invitation> {
        self.invitations.decline(token).await
    }

    pub async fn cancel_invitation(&self, invitation_id: Uuid, canceller: Uuid) -> OrgResult<Invitation> {
        self.invitations.cancel(invitation_id, canceller).await
    }

    pub async fn list_invitations(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        page: Pagination,
        actor: Uuid,
    ) -> OrgResult<Page<Invitation>> {
        self.invitations.list(organization_id, status, page, actor).await
    }

    pub async fn cleanup_expired_invitations(&self) -> OrgResult<u64> {
        self.invitations.cleanup_expired().await
    }
}
