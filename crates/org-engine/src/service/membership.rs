//! Membership manager: roster mutations and authorization predicates

use chrono::Utc;
use org_events::MemberEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::EventPublisher;
use crate::config::SharedConfig;
use crate::error::{OrgError, OrgResult};
use crate::member::{AddMemberRequest, Member, MemberFilter, UpdateMemberRequest};
use crate::quota::QuotaGuard;
use crate::repository::{MemberRepository, Page, Pagination, RepositoryError, TeamRepository, UniqueConstraint};
use crate::roles::{check_assignable_role, check_member_transition, check_removable, MemberRole};

/// Adds, updates and removes organization members.
///
/// Also the single place that answers "may this user act on this
/// organization?"; the other managers authorize through it.
#[derive(Clone)]
pub struct MembershipManager {
    members: Arc<dyn MemberRepository>,
    teams: Arc<dyn TeamRepository>,
    config: SharedConfig,
    events: EventPublisher,
}

impl MembershipManager {
    pub fn new(
        members: Arc<dyn MemberRepository>,
        teams: Arc<dyn TeamRepository>,
        config: SharedConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            members,
            teams,
            config,
            events,
        }
    }

    /// Add a user with `role`, subject to the duplicate and quota checks.
    ///
    /// This is the path organization creation (owner) and invitation
    /// acceptance (invited role) go through; it does not authorize and does
    /// not publish `member.added`.
    #[instrument(skip_all, fields(organization_id = %organization_id, user_id = %user_id, role = %role))]
    pub async fn add_member(&self, organization_id: Uuid, user_id: Uuid, role: MemberRole) -> OrgResult<Member> {
        let quota = QuotaGuard::from_config(&*self.config.snapshot().await);

        if self.members.find_by_user(organization_id, user_id).await?.is_some() {
            return Err(OrgError::MemberAlreadyExists);
        }
        quota.check_members(self.members.count(organization_id).await?)?;

        let member = self
            .members
            .create(Member::new(organization_id, user_id, role))
            .await
            .map_err(|e| match e.violated_constraint() {
                Some(UniqueConstraint::OrganizationMember) => OrgError::MemberAlreadyExists,
                _ => OrgError::from(e),
            })?;

        info!(member_id = %member.id, role = %member.role, "Member added");
        Ok(member)
    }

    /// Announce a membership once the operation that created it has
    /// committed. [`add_member`](Self::add_member) leaves this to its caller.
    pub(crate) async fn publish_added(&self, member: &Member, actor: Option<Uuid>) {
        self.events
            .publish(
                actor,
                MemberEvent::Added {
                    organization_id: member.organization_id,
                    member_id: member.id,
                    user_id: member.user_id,
                    role: member.role.to_string(),
                }
                .to_event(),
            )
            .await;
    }

    /// Direct add by an admin or owner, bypassing the invitation flow.
    ///
    /// # Errors
    ///
    /// - `InvitationRequired` when members may only join by invitation
    /// - `NotMember` / `NotAdmin` when `actor` may not manage members
    /// - `InvalidRole` / `OwnerNotAssignable` for the requested role
    #[instrument(skip_all, fields(organization_id = %organization_id, actor = %actor))]
    pub async fn add_member_directly(
        &self,
        organization_id: Uuid,
        request: AddMemberRequest,
        actor: Uuid,
    ) -> OrgResult<Member> {
        QuotaGuard::from_config(&*self.config.snapshot().await).check_direct_add_allowed()?;
        self.require_admin(organization_id, actor).await?;

        let role = request.parse_role()?;
        check_assignable_role(role)?;

        let member = self.add_member(organization_id, request.user_id, role).await?;
        self.publish_added(&member, Some(actor)).await;
        Ok(member)
    }

    /// Change a member's role and/or status.
    ///
    /// Owner protection is checked before the updater's privileges, so an
    /// attempt to demote the owner always reports `CannotRemoveOwner`.
    #[instrument(skip_all, fields(member_id = %member_id, updater = %updater))]
    pub async fn update_member(
        &self,
        member_id: Uuid,
        request: &UpdateMemberRequest,
        updater: Uuid,
    ) -> OrgResult<Member> {
        let mut member = self.get_member(member_id).await?;
        let (role, status) = request.parse()?;

        check_member_transition(member.role, role, status)?;
        self.require_admin(member.organization_id, updater).await?;

        let mut changed = false;
        if let Some(role) = role.filter(|r| *r != member.role) {
            member.role = role;
            changed = true;
        }
        if let Some(status) = status.filter(|s| *s != member.status) {
            member.status = status;
            changed = true;
        }
        if !changed {
            debug!("Member update is a no-op");
            return Ok(member);
        }

        member.updated_at = Utc::now();
        let member = self.members.update(member).await?;

        info!(role = %member.role, status = %member.status, "Member updated");
        self.events
            .publish(
                Some(updater),
                MemberEvent::Updated {
                    organization_id: member.organization_id,
                    member_id: member.id,
                    role: member.role.to_string(),
                    status: member.status.to_string(),
                }
                .to_event(),
            )
            .await;

        Ok(member)
    }

    /// Remove a member. The owner is refused before privileges are checked.
    #[instrument(skip_all, fields(member_id = %member_id, remover = %remover))]
    pub async fn remove_member(&self, member_id: Uuid, remover: Uuid) -> OrgResult<()> {
        let member = self.get_member(member_id).await?;
        check_removable(member.role)?;
        self.require_admin(member.organization_id, remover).await?;

        self.delete_member(&member).await?;

        match self.teams.remove_member_from_all(member.id).await {
            Ok(removed) if removed > 0 => debug!(removed, "Removed member from teams"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to remove member from teams"),
        }

        info!(organization_id = %member.organization_id, "Member removed");
        self.events
            .publish(
                Some(remover),
                MemberEvent::Removed {
                    organization_id: member.organization_id,
                    member_id: member.id,
                    user_id: member.user_id,
                }
                .to_event(),
            )
            .await;

        Ok(())
    }

    /// Delete a membership row without authorization, used to undo a
    /// just-created membership.
    pub(crate) async fn delete_member(&self, member: &Member) -> OrgResult<()> {
        match self.members.delete(member.id).await {
            Ok(()) | Err(RepositoryError::NotFound(_)) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_member(&self, member_id: Uuid) -> OrgResult<Member> {
        self.members
            .find_by_id(member_id)
            .await?
            .ok_or_else(|| OrgError::MemberNotFound(member_id.to_string()))
    }

    /// The membership of `user_id` in `organization_id`.
    pub async fn get_membership(&self, organization_id: Uuid, user_id: Uuid) -> OrgResult<Member> {
        self.members
            .find_by_user(organization_id, user_id)
            .await?
            .ok_or_else(|| OrgError::MemberNotFound(format!("user {} in {}", user_id, organization_id)))
    }

    #[instrument(skip_all, fields(organization_id = %filter.organization_id))]
    pub async fn list_members(&self, filter: &MemberFilter, page: Pagination) -> OrgResult<Page<Member>> {
        let page = self.members.list(filter, page).await?;
        debug!(total = page.total, "Listed members");
        Ok(page)
    }

    /// Every membership held by a user.
    pub async fn memberships_of(&self, user_id: Uuid) -> OrgResult<Vec<Member>> {
        Ok(self.members.list_by_user(user_id).await?)
    }

    pub async fn member_count(&self, organization_id: Uuid) -> OrgResult<u64> {
        Ok(self.members.count(organization_id).await?)
    }

    /// Active membership of `user_id`, or `NotMember`.
    pub async fn require_member(&self, organization_id: Uuid, user_id: Uuid) -> OrgResult<Member> {
        match self.members.find_by_user(organization_id, user_id).await? {
            Some(member) if member.is_active() => Ok(member),
            _ => Err(OrgError::NotMember),
        }
    }

    /// Active admin-or-owner membership of `user_id`.
    pub async fn require_admin(&self, organization_id: Uuid, user_id: Uuid) -> OrgResult<Member> {
        let member = self.require_member(organization_id, user_id).await?;
        if !member.role.is_admin() {
            return Err(OrgError::NotAdmin);
        }
        Ok(member)
    }

    /// Whether the user is an active member. Lookup failures count as `false`.
    pub async fn is_member(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        self.active_role(organization_id, user_id).await.is_some()
    }

    /// Whether the user is an active admin or owner.
    pub async fn is_admin(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        self.active_role(organization_id, user_id)
            .await
            .is_some_and(|role| role.is_admin())
    }

    /// Whether the user is the organization's owner.
    pub async fn is_owner(&self, organization_id: Uuid, user_id: Uuid) -> bool {
        self.active_role(organization_id, user_id)
            .await
            .is_some_and(|role| role.is_owner())
    }

    async fn active_role(&self, organization_id: Uuid, user_id: Uuid) -> Option<MemberRole> {
        match self.members.find_by_user(organization_id, user_id).await {
            Ok(Some(member)) if member.is_active() => Some(member.role),
            Ok(_) => None,
            Err(e) => {
                warn!(
                    error = %e,
                    organization_id = %organization_id,
                    user_id = %user_id,
                    "Membership lookup failed; denying"
                );
                None
            }
        }
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::roles::MemberStatus;
    use crate::service::testing::{scope, Fixture};
    use crate::team::{CreateTeamRequest, TeamMember};

    async fn org_with_owner(fx: &Fixture) -> (Uuid, Uuid, Member) {
        let owner = Uuid::now_v7();
        let org = fx
            .organizations
            .create(Fixture::create_request("Acme", "acme", owner, scope()))
            .await
            .unwrap();
        let owner_member = fx.membership.get_membership(org.id, owner).await.unwrap();
        (org.id, owner, owner_member)
    }

    fn add(user_id: Uuid, role: &str) -> AddMemberRequest {
        AddMemberRequest {
            user_id,
            role: role.to_string(),
        }
    }

    #[tokio::test]
    async fn test_direct_add_requires_admin() {
        let fx = Fixture::new();
        let (org, owner, _) = org_with_owner(&fx).await;

        let member_user = Uuid::now_v7();
        fx.membership
            .add_member_directly(org, add(member_user, "member"), owner)
            .await
            .unwrap();

        let err = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), member_user)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::NotAdmin));

        let err = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::NotMember));
    }

    #[tokio::test]
    async fn test_direct_add_refuses_owner_and_duplicates() {
        let fx = Fixture::new();
        let (org, owner, _) = org_with_owner(&fx).await;

        let err = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "owner"), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::OwnerNotAssignable));

        let err = fx
            .membership
            .add_member_directly(org, add(owner, "admin"), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::MemberAlreadyExists));
    }

    #[tokio::test]
    async fn test_direct_add_blocked_when_invitation_required() {
        let fx = Fixture::with_overrides(ConfigOverrides {
            require_invitation: Some(true),
            ..Default::default()
        });
        let (org, owner, _) = org_with_owner(&fx).await;

        let err = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::InvitationRequired));
    }

    #[tokio::test]
    async fn test_member_ceiling() {
        let fx = Fixture::with_overrides(ConfigOverrides {
            max_members_per_organization: Some(2),
            ..Default::default()
        });
        let (org, owner, _) = org_with_owner(&fx).await;

        fx.membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), owner)
            .await
            .unwrap();
        let err = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::MaxMembersReached(2)));
        assert_eq!(fx.membership.member_count(org).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_owner_cannot_be_demoted_or_removed_by_anyone() {
        let fx = Fixture::new();
        let (org, owner, owner_member) = org_with_owner(&fx).await;
        let admin = Uuid::now_v7();
        fx.membership
            .add_member_directly(org, add(admin, "admin"), owner)
            .await
            .unwrap();

        for requester in [owner, admin, Uuid::now_v7()] {
            let demote = UpdateMemberRequest {
                role: Some("member".to_string()),
                status: None,
            };
            let err = fx
                .membership
                .update_member(owner_member.id, &demote, requester)
                .await
                .unwrap_err();
            assert!(matches!(err, OrgError::CannotRemoveOwner));

            let err = fx
                .membership
                .remove_member(owner_member.id, requester)
                .await
                .unwrap_err();
            assert!(matches!(err, OrgError::CannotRemoveOwner));
        }

        assert!(fx.membership.is_owner(org, owner).await);
    }

    #[tokio::test]
    async fn test_update_member_validates_input() {
        let fx = Fixture::new();
        let (org, owner, _) = org_with_owner(&fx).await;
        let member = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), owner)
            .await
            .unwrap();

        let bad_role = UpdateMemberRequest {
            role: Some("superuser".to_string()),
            status: None,
        };
        assert!(matches!(
            fx.membership.update_member(member.id, &bad_role, owner).await,
            Err(OrgError::InvalidRole(_))
        ));

        let promote = UpdateMemberRequest {
            role: Some("owner".to_string()),
            status: None,
        };
        assert!(matches!(
            fx.membership.update_member(member.id, &promote, owner).await,
            Err(OrgError::OwnerNotAssignable)
        ));

        let suspend = UpdateMemberRequest {
            role: Some("admin".to_string()),
            status: Some("suspended".to_string()),
        };
        let updated = fx.membership.update_member(member.id, &suspend, owner).await.unwrap();
        assert_eq!(updated.role, MemberRole::Admin);
        assert_eq!(updated.status, MemberStatus::Suspended);
    }

    #[tokio::test]
    async fn test_suspended_members_fail_predicates() {
        let fx = Fixture::new();
        let (org, owner, _) = org_with_owner(&fx).await;
        let admin_user = Uuid::now_v7();
        let admin = fx
            .membership
            .add_member_directly(org, add(admin_user, "admin"), owner)
            .await
            .unwrap();
        assert!(fx.membership.is_admin(org, admin_user).await);

        let suspend = UpdateMemberRequest {
            role: None,
            status: Some("suspended".to_string()),
        };
        fx.membership.update_member(admin.id, &suspend, owner).await.unwrap();

        assert!(!fx.membership.is_member(org, admin_user).await);
        assert!(!fx.membership.is_admin(org, admin_user).await);
        assert!(matches!(
            fx.membership.require_admin(org, admin_user).await,
            Err(OrgError::NotMember)
        ));
    }

    #[tokio::test]
    async fn test_remove_member_cleans_team_memberships() {
        let fx = Fixture::new();
        let (org, owner, _) = org_with_owner(&fx).await;
        let member = fx
            .membership
            .add_member_directly(org, add(Uuid::now_v7(), "member"), owner)
            .await
            .unwrap();
        let team = fx
            .teams
            .create_team(
                org,
                CreateTeamRequest {
                    name: "Core".to_string(),
                    ..Default::default()
                },
                owner,
            )
            .await
            .unwrap();
        fx.teams.add_team_member(team.id, member.id, owner).await.unwrap();

        fx.membership.remove_member(member.id, owner).await.unwrap();

        assert!(matches!(
            fx.membership.get_member(member.id).await,
            Err(OrgError::MemberNotFound(_))
        ));
        let team_members = fx.teams.list_team_members(team.id, Pagination::default()).await.unwrap();
        assert!(team_members.items.iter().all(|tm: &TeamMember| tm.member_id != member.id));
    }

    #[tokio::test]
    async fn test_list_members_filters_role() {
        let fx = Fixture::new();
        let (org, owner, _) = org_with_owner(&fx).await;
        for role in ["admin", "member", "member"] {
            fx.membership
                .add_member_directly(org, add(Uuid::now_v7(), role), owner)
                .await
                .unwrap();
        }

        let all = fx
            .membership
            .list_members(&MemberFilter::for_organization(org), Pagination::default())
            .await
            .unwrap();
        assert_eq!(all.total, 4);

        let members = fx
            .membership
            .list_members(
                &MemberFilter::for_organization(org).with_role(MemberRole::Member),
                Pagination::new(1, 0),
            )
            .await
            .unwrap();
        assert_eq!(members.total, 2);
        assert_eq!(members.items.len(), 1);
        assert!(members.has_more());
    }
}
