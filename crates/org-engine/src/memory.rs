//! In-memory repositories
//!
//! [`MemoryStore`] implements all four repository traits over one set of
//! tables behind a single lock, so constraint checks and cascades see a
//! consistent view. It is the reference implementation the engine's tests
//! run against and a usable backend for single-process deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::invitation::{Invitation, InvitationStatus};
use crate::member::{Member, MemberFilter, UserProfile};
use crate::organization::{AppScope, Organization};
use crate::repository::{
    InvitationRepository, MemberRepository, OrganizationRepository, Page, Pagination, RepoResult,
    RepositoryError, TeamRepository, UniqueConstraint,
};
use crate::team::{Team, TeamMember};

#[derive(Debug, Default)]
struct Tables {
    organizations: HashMap<Uuid, Organization>,
    members: HashMap<Uuid, Member>,
    teams: HashMap<Uuid, Team>,
    team_members: Vec<TeamMember>,
    invitations: HashMap<Uuid, Invitation>,
    profiles: HashMap<Uuid, UserProfile>,
}

/// In-memory backing store for every repository trait.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use org_engine::{MemoryStore, Repositories};
///
/// let store = Arc::new(MemoryStore::new());
/// let repositories = Repositories::in_memory(store);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record display fields for a platform user so member search can
    /// match them.
    pub async fn register_user_profile(&self, user_id: Uuid, profile: UserProfile) {
        self.tables.write().await.profiles.insert(user_id, profile);
    }
}

fn not_found(what: &str, id: Uuid) -> RepositoryError {
    RepositoryError::NotFound(format!("{} {}", what, id))
}

fn matches_search(member: &Member, profile: Option<&UserProfile>, term: &str) -> bool {
    if member.user_id.to_string().contains(term) || member.role.as_str().contains(term) {
        return true;
    }
    profile.is_some_and(|p| {
        p.display_name
            .as_deref()
            .is_some_and(|name| name.to_lowercase().contains(term))
            || p.email
                .as_deref()
                .is_some_and(|email| email.to_lowercase().contains(term))
    })
}

#[async_trait]
impl OrganizationRepository for MemoryStore {
    async fn create(&self, organization: Organization, unique_slug: bool) -> RepoResult<Organization> {
        let mut tables = self.tables.write().await;
        if unique_slug
            && tables.organizations.values().any(|o| {
                o.app_id == organization.app_id
                    && o.environment_id == organization.environment_id
                    && o.slug == organization.slug
            })
        {
            return Err(RepositoryError::UniqueViolation(UniqueConstraint::OrganizationSlug));
        }
        tables.organizations.insert(organization.id, organization.clone());
        Ok(organization)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Organization>> {
        Ok(self.tables.read().await.organizations.get(&id).cloned())
    }

    async fn find_by_slug(&self, scope: AppScope, slug: &str) -> RepoResult<Option<Organization>> {
        let tables = self.tables.read().await;
        let mut matches: Vec<&Organization> = tables
            .organizations
            .values()
            .filter(|o| o.scope() == scope && o.slug == slug)
            .collect();
        matches.sort_by_key(|o| (o.created_at, o.id));
        Ok(matches.first().map(|o| (*o).clone()))
    }

    async fn count_by_creator(&self, scope: AppScope, user_id: Uuid) -> RepoResult<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .organizations
            .values()
            .filter(|o| o.scope() == scope && o.created_by == user_id)
            .count();
        Ok(count as u64)
    }

    async fn update(&self, organization: Organization) -> RepoResult<Organization> {
        let mut tables = self.tables.write().await;
        match tables.organizations.get_mut(&organization.id) {
            Some(existing) => {
                *existing = organization.clone();
                Ok(organization)
            }
            None => Err(not_found("organization", organization.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        let mut tables = self.tables.write().await;
        if tables.organizations.remove(&id).is_none() {
            return Err(not_found("organization", id));
        }

        let team_ids: Vec<Uuid> = tables
            .teams
            .values()
            .filter(|t| t.organization_id == id)
            .map(|t| t.id)
            .collect();
        tables.team_members.retain(|tm| !team_ids.contains(&tm.team_id));
        tables.teams.retain(|_, t| t.organization_id != id);
        tables.members.retain(|_, m| m.organization_id != id);
        tables.invitations.retain(|_, i| i.organization_id != id);

        debug!(organization_id = %id, teams = team_ids.len(), "cascaded organization delete");
        Ok(())
    }
}

#[async_trait]
impl MemberRepository for MemoryStore {
    async fn create(&self, member: Member) -> RepoResult<Member> {
        let mut tables = self.tables.write().await;
        if tables
            .members
            .values()
            .any(|m| m.organization_id == member.organization_id && m.user_id == member.user_id)
        {
            return Err(RepositoryError::UniqueViolation(UniqueConstraint::OrganizationMember));
        }
        tables.members.insert(member.id, member.clone());
        Ok(member)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Member>> {
        Ok(self.tables.read().await.members.get(&id).cloned())
    }

    async fn find_by_user(&self, organization_id: Uuid, user_id: Uuid) -> RepoResult<Option<Member>> {
        let tables = self.tables.read().await;
        Ok(tables
            .members
            .values()
            .find(|m| m.organization_id == organization_id && m.user_id == user_id)
            .cloned())
    }

    async fn list(&self, filter: &MemberFilter, page: Pagination) -> RepoResult<Page<Member>> {
        let tables = self.tables.read().await;
        let term = filter
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut members: Vec<Member> = tables
            .members
            .values()
            .filter(|m| m.organization_id == filter.organization_id)
            .filter(|m| filter.role.map_or(true, |role| m.role == role))
            .filter(|m| {
                term.as_deref()
                    .map_or(true, |t| matches_search(m, tables.profiles.get(&m.user_id), t))
            })
            .cloned()
            .collect();
        members.sort_by_key(|m| (m.joined_at, m.id));
        Ok(page.slice(members))
    }

    async fn list_by_user(&self, user_id: Uuid) -> RepoResult<Vec<Member>> {
        let tables = self.tables.read().await;
        let mut members: Vec<Member> = tables
            .members
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        members.sort_by_key(|m| (m.joined_at, m.id));
        Ok(members)
    }

    async fn count(&self, organization_id: Uuid) -> RepoResult<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .members
            .values()
            .filter(|m| m.organization_id == organization_id)
            .count();
        Ok(count as u64)
    }

    async fn update(&self, member: Member) -> RepoResult<Member> {
        let mut tables = self.tables.write().await;
        match tables.members.get_mut(&member.id) {
            Some(existing) => {
                *existing = member.clone();
                Ok(member)
            }
            None => Err(not_found("member", member.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        let mut tables = self.tables.write().await;
        match tables.members.remove(&id) {
            Some(_) => Ok(()),
            None => Err(not_found("member", id)),
        }
    }
}

#[async_trait]
impl TeamRepository for MemoryStore {
    async fn create(&self, team: Team) -> RepoResult<Team> {
        self.tables.write().await.teams.insert(team.id, team.clone());
        Ok(team)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Team>> {
        Ok(self.tables.read().await.teams.get(&id).cloned())
    }

    async fn list(&self, organization_id: Uuid, page: Pagination) -> RepoResult<Page<Team>> {
        let tables = self.tables.read().await;
        let mut teams: Vec<Team> = tables
            .teams
            .values()
            .filter(|t| t.organization_id == organization_id)
            .cloned()
            .collect();
        teams.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(page.slice(teams))
    }

    async fn count(&self, organization_id: Uuid) -> RepoResult<u64> {
        let tables = self.tables.read().await;
        let count = tables
            .teams
            .values()
            .filter(|t| t.organization_id == organization_id)
            .count();
        Ok(count as u64)
    }

    async fn update(&self, team: Team) -> RepoResult<Team> {
        let mut tables = self.tables.write().await;
        match tables.teams.get_mut(&team.id) {
            Some(existing) => {
                *existing = team.clone();
                Ok(team)
            }
            None => Err(not_found("team", team.id)),
        }
    }

    async fn delete(&self, id: Uuid) -> RepoResult<()> {
        let mut tables = self.tables.write().await;
        if tables.teams.remove(&id).is_none() {
            return Err(not_found("team", id));
        }
        tables.team_members.retain(|tm| tm.team_id != id);
        Ok(())
    }

    async fn add_member(&self, team_member: TeamMember) -> RepoResult<TeamMember> {
        let mut tables = self.tables.write().await;
        if tables
            .team_members
            .iter()
            .any(|tm| tm.team_id == team_member.team_id && tm.member_id == team_member.member_id)
        {
            return Err(RepositoryError::UniqueViolation(UniqueConstraint::TeamMember));
        }
        tables.team_members.push(team_member.clone());
        Ok(team_member)
    }

    async fn remove_member(&self, team_id: Uuid, member_id: Uuid) -> RepoResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.team_members.len();
        tables
            .team_members
            .retain(|tm| !(tm.team_id == team_id && tm.member_id == member_id));
        Ok(tables.team_members.len() < before)
    }

    async fn find_member(&self, team_id: Uuid, member_id: Uuid) -> RepoResult<Option<TeamMember>> {
        let tables = self.tables.read().await;
        Ok(tables
            .team_members
            .iter()
            .find(|tm| tm.team_id == team_id && tm.member_id == member_id)
            .cloned())
    }

    async fn list_members(&self, team_id: Uuid, page: Pagination) -> RepoResult<Page<TeamMember>> {
        let tables = self.tables.read().await;
        let members: Vec<TeamMember> = tables
            .team_members
            .iter()
            .filter(|tm| tm.team_id == team_id)
            .cloned()
            .collect();
        Ok(page.slice(members))
    }

    async fn remove_member_from_all(&self, member_id: Uuid) -> RepoResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.team_members.len();
        tables.team_members.retain(|tm| tm.member_id != member_id);
        Ok((before - tables.team_members.len()) as u64)
    }
}

#[async_trait]
impl InvitationRepository for MemoryStore {
    async fn create(&self, invitation: Invitation) -> RepoResult<Invitation> {
        let mut tables = self.tables.write().await;
        if tables.invitations.values().any(|i| i.token == invitation.token) {
            return Err(RepositoryError::UniqueViolation(UniqueConstraint::InvitationToken));
        }
        tables.invitations.insert(invitation.id, invitation.clone());
        Ok(invitation)
    }

    async fn find_by_id(&self, id: Uuid) -> RepoResult<Option<Invitation>> {
        Ok(self.tables.read().await.invitations.get(&id).cloned())
    }

    async fn find_by_token(&self, token: &str) -> RepoResult<Option<Invitation>> {
        let tables = self.tables.read().await;
        Ok(tables.invitations.values().find(|i| i.token == token).cloned())
    }

    async fn list(
        &self,
        organization_id: Uuid,
        status: Option<InvitationStatus>,
        page: Pagination,
    ) -> RepoResult<Page<Invitation>> {
        let tables = self.tables.read().await;
        let mut invitations: Vec<Invitation> = tables
            .invitations
            .values()
            .filter(|i| i.organization_id == organization_id)
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        invitations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(page.slice(invitations))
    }

    async fn find_pending_by_email(&self, organization_id: Uuid, email: &str) -> RepoResult<Vec<Invitation>> {
        let tables = self.tables.read().await;
        Ok(tables
            .invitations
            .values()
            .filter(|i| {
                i.organization_id == organization_id
                    && i.email == email
                    && i.status == InvitationStatus::Pending
            })
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: InvitationStatus,
        to: InvitationStatus,
        at: DateTime<Utc>,
    ) -> RepoResult<bool> {
        let mut tables = self.tables.write().await;
        match tables.invitations.get_mut(&id) {
            Some(invitation) if invitation.status == from => {
                invitation.status = to;
                invitation.responded_at = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(not_found("invitation", id)),
        }
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> RepoResult<u64> {
        let mut tables = self.tables.write().await;
        let before = tables.invitations.len();
        tables
            .invitations
            .retain(|_, i| i.effective_status(now) != InvitationStatus::Expired);
        Ok((before - tables.invitations.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::roles::MemberRole;
    use chrono::Duration;

    fn scope() -> AppScope {
        AppScope::new(Uuid::now_v7(), Uuid::now_v7())
    }

    #[tokio::test]
    async fn test_slug_constraint_is_scoped() {
        let store = MemoryStore::new();
        let scope = scope();
        let user = Uuid::now_v7();

        OrganizationRepository::create(&store, Organization::new(scope, "Acme", "acme", user), true)
            .await
            .unwrap();
        let err = OrganizationRepository::create(&store, Organization::new(scope, "Acme 2", "acme", user), true)
            .await
            .unwrap_err();
        assert_eq!(err.violated_constraint(), Some(UniqueConstraint::OrganizationSlug));

        let other = AppScope::new(scope.app_id, Uuid::now_v7());
        assert!(OrganizationRepository::create(&store, Organization::new(other, "Acme", "acme", user), true)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_slug_constraint_can_be_disabled() {
        let store = MemoryStore::new();
        let scope = scope();
        let user = Uuid::now_v7();

        for name in ["Acme", "Acme Again"] {
            OrganizationRepository::create(&store, Organization::new(scope, name, "acme", user), false)
                .await
                .unwrap();
        }
        assert_eq!(store.count_by_creator(scope, user).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_member_constraint() {
        let store = MemoryStore::new();
        let org = Uuid::now_v7();
        let user = Uuid::now_v7();

        MemberRepository::create(&store, Member::new(org, user, MemberRole::Member))
            .await
            .unwrap();
        let err = MemberRepository::create(&store, Member::new(org, user, MemberRole::Admin))
            .await
            .unwrap_err();
        assert_eq!(err.violated_constraint(), Some(UniqueConstraint::OrganizationMember));
    }

    #[tokio::test]
    async fn test_member_search_matches_profile() {
        let store = MemoryStore::new();
        let org = Uuid::now_v7();
        let alice = Uuid::now_v7();
        let bob = Uuid::now_v7();
        store
            .register_user_profile(
                alice,
                UserProfile {
                    display_name: Some("Alice Liddell".to_string()),
                    email: Some("alice@example.com".to_string()),
                },
            )
            .await;
        MemberRepository::create(&store, Member::new(org, alice, MemberRole::Member))
            .await
            .unwrap();
        MemberRepository::create(&store, Member::new(org, bob, MemberRole::Admin))
            .await
            .unwrap();

        let filter = MemberFilter::for_organization(org).with_search("LIDDELL");
        let page = MemberRepository::list(&store, &filter, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].user_id, alice);

        let admins = MemberFilter::for_organization(org).with_role(MemberRole::Admin);
        let page = MemberRepository::list(&store, &admins, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.items[0].user_id, bob);
    }

    #[tokio::test]
    async fn test_invitation_compare_and_set() {
        let store = MemoryStore::new();
        let invitation = Invitation::new(
            Uuid::now_v7(),
            "a@b.io",
            MemberRole::Member,
            "tok",
            Uuid::now_v7(),
            Duration::hours(1),
        );
        let id = invitation.id;
        InvitationRepository::create(&store, invitation).await.unwrap();

        let now = Utc::now();
        assert!(store
            .transition_status(id, InvitationStatus::Pending, InvitationStatus::Accepted, now)
            .await
            .unwrap());
        assert!(!store
            .transition_status(id, InvitationStatus::Pending, InvitationStatus::Declined, now)
            .await
            .unwrap());

        let stored = InvitationRepository::find_by_id(&store, id).await.unwrap().unwrap();
        assert_eq!(stored.status, InvitationStatus::Accepted);
        assert_eq!(stored.responded_at, Some(now));
    }

    #[tokio::test]
    async fn test_delete_expired_keeps_live_and_answered() {
        let store = MemoryStore::new();
        let org = Uuid::now_v7();
        let inviter = Uuid::now_v7();

        let live = Invitation::new(org, "a@b.io", MemberRole::Member, "t1", inviter, Duration::hours(1));
        let stale = Invitation::new(org, "b@b.io", MemberRole::Member, "t2", inviter, Duration::hours(-1));
        let mut marked = Invitation::new(org, "c@b.io", MemberRole::Member, "t3", inviter, Duration::hours(1));
        marked.status = InvitationStatus::Expired;
        let mut accepted = Invitation::new(org, "d@b.io", MemberRole::Member, "t4", inviter, Duration::hours(-1));
        accepted.status = InvitationStatus::Accepted;

        for invitation in [live, stale, marked, accepted] {
            InvitationRepository::create(&store, invitation).await.unwrap();
        }

        assert_eq!(store.delete_expired(Utc::now()).await.unwrap(), 2);
        let remaining = InvitationRepository::list(&store, org, None, Pagination::default())
            .await
            .unwrap();
        assert_eq!(remaining.total, 2);
    }

    #[tokio::test]
    async fn test_organization_delete_cascades() {
        let store = MemoryStore::new();
        let org = Organization::new(scope(), "Acme", "acme", Uuid::now_v7());
        let org_id = org.id;
        OrganizationRepository::create(&store, org, true).await.unwrap();

        let member = MemberRepository::create(&store, Member::new(org_id, Uuid::now_v7(), MemberRole::Owner))
            .await
            .unwrap();
        let team = TeamRepository::create(&store, Team::new(org_id, "Core")).await.unwrap();
        store.add_member(TeamMember::new(team.id, member.id)).await.unwrap();

        OrganizationRepository::delete(&store, org_id).await.unwrap();

        assert_eq!(MemberRepository::count(&store, org_id).await.unwrap(), 0);
        assert_eq!(TeamRepository::count(&store, org_id).await.unwrap(), 0);
        assert!(store.find_member(team.id, member.id).await.unwrap().is_none());
    }
}
