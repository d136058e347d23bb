//! Team manager

use org_events::TeamEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{EventPublisher, MembershipManager};
use crate::config::SharedConfig;
use crate::error::{OrgError, OrgResult};
use crate::quota::QuotaGuard;
use crate::repository::{Page, Pagination, TeamRepository, UniqueConstraint};
use crate::team::{CreateTeamRequest, ExternalSyncWarning, Team, TeamMember, TeamUpdate, UpdateTeamRequest};

/// Creates teams and manages their membership.
///
/// Mutations other than creation are authorized against the organization
/// the team itself belongs to, never one supplied by the caller.
#[derive(Clone)]
pub struct TeamManager {
    teams: Arc<dyn TeamRepository>,
    membership: MembershipManager,
    config: SharedConfig,
    events: EventPublisher,
}

impl TeamManager {
    pub fn new(
        teams: Arc<dyn TeamRepository>,
        membership: MembershipManager,
        config: SharedConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            teams,
            membership,
            config,
            events,
        }
    }

    /// Any active member may create a team, up to the team ceiling.
    #[instrument(skip_all, fields(organization_id = %organization_id, creator = %creator))]
    pub async fn create_team(
        &self,
        organization_id: Uuid,
        request: CreateTeamRequest,
        creator: Uuid,
    ) -> OrgResult<Team> {
        self.membership.require_member(organization_id, creator).await?;

        let quota = QuotaGuard::from_config(&*self.config.snapshot().await);
        quota.check_teams(self.teams.count(organization_id).await?)?;

        let team = self.teams.create(request.into_team(organization_id)?).await?;

        info!(team_id = %team.id, name = %team.name, "Team created");
        self.events
            .publish(
                Some(creator),
                TeamEvent::Created {
                    organization_id,
                    team_id: team.id,
                    name: team.name.clone(),
                }
                .to_event(),
            )
            .await;

        Ok(team)
    }

    /// Update a team; externally provisioned teams carry a warning.
    #[instrument(skip_all, fields(team_id = %team_id, actor = %actor))]
    pub async fn update_team(&self, team_id: Uuid, request: &UpdateTeamRequest, actor: Uuid) -> OrgResult<TeamUpdate> {
        let mut team = self.get_team(team_id).await?;
        self.membership.require_admin(team.organization_id, actor).await?;

        let warning = team.sync_warning();
        if !request.apply(&mut team)? {
            debug!("Team update is a no-op");
            return Ok(TeamUpdate { team, warning });
        }

        let team = self.teams.update(team).await?;

        info!(externally_provisioned = warning.is_some(), "Team updated");
        self.events
            .publish(
                Some(actor),
                TeamEvent::Updated {
                    organization_id: team.organization_id,
                    team_id,
                }
                .to_event(),
            )
            .await;

        Ok(TeamUpdate { team, warning })
    }

    /// Delete a team and its memberships.
    ///
    /// Returns the sync warning when the team was externally provisioned.
    #[instrument(skip_all, fields(team_id = %team_id, actor = %actor))]
    pub async fn delete_team(&self, team_id: Uuid, actor: Uuid) -> OrgResult<Option<ExternalSyncWarning>> {
        let team = self.get_team(team_id).await?;
        self.membership.require_admin(team.organization_id, actor).await?;

        self.teams.delete(team_id).await?;

        info!(organization_id = %team.organization_id, "Team deleted");
        self.events
            .publish(
                Some(actor),
                TeamEvent::Deleted {
                    organization_id: team.organization_id,
                    team_id,
                }
                .to_event(),
            )
            .await;

        Ok(team.sync_warning())
    }

    /// Put an organization member into a team.
    ///
    /// # Errors
    ///
    /// - `MemberNotFound` when the member does not exist or belongs to a
    ///   different organization than the team
    /// - `TeamMemberAlreadyExists` when the member is already in the team
    #[instrument(skip_all, fields(team_id = %team_id, member_id = %member_id, actor = %actor))]
    pub async fn add_team_member(&self, team_id: Uuid, member_id: Uuid, actor: Uuid) -> OrgResult<TeamMember> {
        let team = self.get_team(team_id).await?;
        self.membership.require_admin(team.organization_id, actor).await?;

        let member = self.membership.get_member(member_id).await?;
        if member.organization_id != team.organization_id {
            return Err(OrgError::MemberNotFound(member_id.to_string()));
        }
        if self.teams.find_member(team_id, member_id).await?.is_some() {
            return Err(OrgError::TeamMemberAlreadyExists);
        }

        let team_member = self
            .teams
            .add_member(TeamMember::new(team_id, member_id))
            .await
            .map_err(|e| match e.violated_constraint() {
                Some(UniqueConstraint::TeamMember) => OrgError::TeamMemberAlreadyExists,
                _ => OrgError::from(e),
            })?;

        info!("Team member added");
        self.events
            .publish(
                Some(actor),
                TeamEvent::MemberAdded {
                    organization_id: team.organization_id,
                    team_id,
                    member_id,
                }
                .to_event(),
            )
            .await;

        Ok(team_member)
    }

    #[instrument(skip_all, fields(team_id = %team_id, member_id = %member_id, actor = %actor))]
    pub async fn remove_team_member(&self, team_id: Uuid, member_id: Uuid, actor: Uuid) -> OrgResult<()> {
        let team = self.get_team(team_id).await?;
        self.membership.require_admin(team.organization_id, actor).await?;

        if !self.teams.remove_member(team_id, member_id).await? {
            return Err(OrgError::MemberNotFound(member_id.to_string()));
        }

        info!("Team member removed");
        self.events
            .publish(
                Some(actor),
                TeamEvent::MemberRemoved {
                    organization_id: team.organization_id,
                    team_id,
                    member_id,
                }
                .to_event(),
            )
            .await;

        Ok(())
    }

    pub async fn get_team(&self, team_id: Uuid) -> OrgResult<Team> {
        self.teams
            .find_by_id(team_id)
            .await?
            .ok_or(OrgError::TeamNotFound(team_id))
    }

    pub async fn list_teams(&self, organization_id: Uuid, page: Pagination) -> OrgResult<Page<Team>> {
        Ok(self.teams.list(organization_id, page).await?)
    }

    pub async fn list_team_members(&self, team_id: Uuid, page: Pagination) -> OrgResult<Page<TeamMember>> {
        self.get_team(team_id).await?;
        Ok(self.teams.list_members(team_id, page).await?)
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::config::ConfigOverrides;
    use crate::member::AddMemberRequest;
    use crate::service::testing::{scope, Fixture};

    struct Setup {
        fx: Fixture,
        org: Uuid,
        owner: Uuid,
        member_user: Uuid,
        member_id: Uuid,
    }

    async fn setup(overrides: ConfigOverrides) -> Setup {
        let fx = Fixture::with_overrides(overrides);
        let owner = Uuid::now_v7();
        let org = fx
            .organizations
            .create(Fixture::create_request("Acme", "acme", owner, scope()))
            .await
            .unwrap()
            .id;
        let member_user = Uuid::now_v7();
        let member_id = fx
            .membership
            .add_member_directly(
                org,
                AddMemberRequest {
                    user_id: member_user,
                    role: "member".to_string(),
                },
                owner,
            )
            .await
            .unwrap()
            .id;
        Setup {
            fx,
            org,
            owner,
            member_user,
            member_id,
        }
    }

    fn named(name: &str) -> CreateTeamRequest {
        CreateTeamRequest {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_any_member_creates_teams_up_to_ceiling() {
        let s = setup(ConfigOverrides {
            max_teams_per_organization: Some(1),
            ..Default::default()
        })
        .await;

        s.fx.teams.create_team(s.org, named("Core"), s.member_user).await.unwrap();
        let err = s
            .fx
            .teams
            .create_team(s.org, named("Infra"), s.owner)
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::MaxTeamsReached(1)));

        let err = s
            .fx
            .teams
            .create_team(s.org, named("Rogue"), Uuid::now_v7())
            .await
            .unwrap_err();
        assert!(matches!(err, OrgError::NotMember));
    }

    #[tokio::test]
    async fn test_update_and_delete_require_admin() {
        let s = setup(ConfigOverrides::default()).await;
        let team = s.fx.teams.create_team(s.org, named("Core"), s.member_user).await.unwrap();

        let rename = UpdateTeamRequest {
            name: Some("Core Platform".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            s.fx.teams.update_team(team.id, &rename, s.member_user).await,
            Err(OrgError::NotAdmin)
        ));

        let update = s.fx.teams.update_team(team.id, &rename, s.owner).await.unwrap();
        assert_eq!(update.team.name, "Core Platform");
        assert!(update.warning.is_none());

        assert!(s.fx.teams.delete_team(team.id, s.owner).await.unwrap().is_none());
        assert!(matches!(
            s.fx.teams.get_team(team.id).await,
            Err(OrgError::TeamNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_provisioned_team_mutates_with_warning() {
        let s = setup(ConfigOverrides::default()).await;
        let request = CreateTeamRequest {
            name: "Directory Sync".to_string(),
            provisioned_by: Some("scim".to_string()),
            ..Default::default()
        };
        let team = s.fx.teams.create_team(s.org, request, s.owner).await.unwrap();

        let update = s
            .fx
            .teams
            .update_team(
                team.id,
                &UpdateTeamRequest {
                    description: Some("synced".to_string()),
                    ..Default::default()
                },
                s.owner,
            )
            .await
            .unwrap();
        assert_eq!(update.team.description.as_deref(), Some("synced"));
        assert_eq!(update.warning.unwrap().provisioned_by, "scim");

        let warning = s.fx.teams.delete_team(team.id, s.owner).await.unwrap();
        assert!(warning.is_some());
    }

    #[tokio::test]
    async fn test_team_membership_rules() {
        let s = setup(ConfigOverrides::default()).await;
        let team = s.fx.teams.create_team(s.org, named("Core"), s.owner).await.unwrap();

        s.fx.teams.add_team_member(team.id, s.member_id, s.owner).await.unwrap();
        assert!(matches!(
            s.fx.teams.add_team_member(team.id, s.member_id, s.owner).await,
            Err(OrgError::TeamMemberAlreadyExists)
        ));

        let other_owner = Uuid::now_v7();
        let other_org = s
            .fx
            .organizations
            .create(Fixture::create_request("Other", "other", other_owner, scope()))
            .await
            .unwrap();
        let outsider = s.fx.membership.get_membership(other_org.id, other_owner).await.unwrap();
        assert!(matches!(
            s.fx.teams.add_team_member(team.id, outsider.id, s.owner).await,
            Err(OrgError::MemberNotFound(_))
        ));

        let page = s.fx.teams.list_team_members(team.id, Pagination::default()).await.unwrap();
        assert_eq!(page.total, 1);

        s.fx.teams.remove_team_member(team.id, s.member_id, s.owner).await.unwrap();
        assert!(matches!(
            s.fx.teams.remove_team_member(team.id, s.member_id, s.owner).await,
            Err(OrgError::MemberNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_teams() {
        let s = setup(ConfigOverrides::default()).await;
        for name in ["Beta", "Alpha"] {
            s.fx.teams.create_team(s.org, named(name), s.owner).await.unwrap();
        }
        let page = s.fx.teams.list_teams(s.org, Pagination::default()).await.unwrap();
        let names: Vec<&str> = page.items.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }
}
