//! Organization lifecycle manager

use org_events::OrganizationEvent;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{EventPublisher, MembershipManager};
use crate::config::SharedConfig;
use crate::error::{OrgError, OrgResult};
use crate::organization::{
    validate_name, validate_slug, AppScope, CreateOrganizationRequest, Organization, OrganizationSummary,
    UpdateOrganizationRequest,
};
use crate::quota::QuotaGuard;
use crate::repository::{OrganizationRepository, UniqueConstraint};
use crate::roles::MemberRole;

/// Creates, updates and deletes organizations.
#[derive(Clone)]
pub struct OrganizationManager {
    organizations: Arc<dyn OrganizationRepository>,
    membership: MembershipManager,
    config: SharedConfig,
    events: EventPublisher,
}

impl OrganizationManager {
    pub fn new(
        organizations: Arc<dyn OrganizationRepository>,
        membership: MembershipManager,
        config: SharedConfig,
        events: EventPublisher,
    ) -> Self {
        Self {
            organizations,
            membership,
            config,
            events,
        }
    }

    /// Create an organization and its owner membership as one unit.
    ///
    /// # Errors
    ///
    /// - `CreationDisabled` when self-service creation is off
    /// - `InvalidName` / `InvalidSlug` for malformed input
    /// - `MaxOrganizationsReached` when the creator is at the ceiling
    /// - `SlugAlreadyExists` when the slug is taken in the scope
    ///
    /// If the owner membership cannot be created the organization is
    /// deleted again and the membership error is returned.
    #[instrument(skip_all, fields(slug = %request.slug, creator = %request.creator_id))]
    pub async fn create(&self, request: CreateOrganizationRequest) -> OrgResult<Organization> {
        let config = self.config.snapshot().await;
        let quota = QuotaGuard::from_config(&config);
        quota.check_creation_enabled()?;

        let name = validate_name(&request.name)?;
        validate_slug(&request.slug)?;

        let existing = self
            .organizations
            .count_by_creator(request.scope, request.creator_id)
            .await?;
        quota.check_organizations(existing)?;

        if config.enforce_unique_slug
            && self
                .organizations
                .find_by_slug(request.scope, &request.slug)
                .await?
                .is_some()
        {
            return Err(OrgError::SlugAlreadyExists(request.slug));
        }

        let mut organization = Organization::new(request.scope, name, request.slug.clone(), request.creator_id);
        organization.logo = request.logo;
        if let Some(metadata) = request.metadata {
            organization.metadata = metadata;
        }

        let organization = self
            .organizations
            .create(organization, config.enforce_unique_slug)
            .await
            .map_err(|e| match e.violated_constraint() {
                Some(UniqueConstraint::OrganizationSlug) => OrgError::SlugAlreadyExists(request.slug.clone()),
                _ => OrgError::from(e),
            })?;

        let owner = match self
            .membership
            .add_member(organization.id, request.creator_id, MemberRole::Owner)
            .await
        {
            Ok(owner) => owner,
            Err(e) => {
                warn!(error = %e, organization_id = %organization.id, "Owner creation failed; rolling back");
                if let Err(rollback) = self.organizations.delete(organization.id).await {
                    warn!(
                        error = %rollback,
                        organization_id = %organization.id,
                        "Failed to roll back organization without owner"
                    );
                }
                return Err(e);
            }
        };

        info!(organization_id = %organization.id, "Organization created");
        self.membership.publish_added(&owner, Some(request.creator_id)).await;
        self.events
            .publish(
                Some(request.creator_id),
                OrganizationEvent::Created {
                    organization_id: organization.id,
                    app_id: organization.app_id,
                    environment_id: organization.environment_id,
                    slug: organization.slug.clone(),
                    created_by: request.creator_id,
                }
                .to_event(),
            )
            .await;

        Ok(organization)
    }

    /// Apply a partial update. Authorization is the caller's concern.
    #[instrument(skip_all, fields(organization_id = %id))]
    pub async fn update(&self, id: Uuid, request: &UpdateOrganizationRequest) -> OrgResult<Organization> {
        let mut organization = self.get(id).await?;
        let changes = request.apply(&mut organization)?;
        if changes.is_empty() {
            debug!("Organization update is a no-op");
            return Ok(organization);
        }

        let organization = self.organizations.update(organization).await?;

        info!(changes = ?changes, "Organization updated");
        self.events
            .publish(
                None,
                OrganizationEvent::Updated {
                    organization_id: id,
                    changes,
                }
                .to_event(),
            )
            .await;

        Ok(organization)
    }

    /// Delete an organization. Only its owner, as recorded in the member
    /// repository, may do this.
    #[instrument(skip_all, fields(organization_id = %id, requester = %requester))]
    pub async fn delete(&self, id: Uuid, requester: Uuid) -> OrgResult<()> {
        self.get(id).await?;

        let is_owner = self
            .membership
            .get_membership(id, requester)
            .await
            .map(|member| member.role.is_owner())
            .or_else(|e| match e {
                OrgError::MemberNotFound(_) => Ok(false),
                other => Err(other),
            })?;
        if !is_owner {
            return Err(OrgError::NotOwner);
        }

        self.organizations.delete(id).await?;

        info!("Organization deleted");
        self.events
            .publish(
                Some(requester),
                OrganizationEvent::Deleted {
                    organization_id: id,
                    deleted_by: requester,
                }
                .to_event(),
            )
            .await;

        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> OrgResult<Organization> {
        self.organizations
            .find_by_id(id)
            .await?
            .ok_or_else(|| OrgError::OrganizationNotFound(id.to_string()))
    }

    /// Look up by slug; a miss is `None`, not an error.
    pub async fn find_by_slug(&self, scope: AppScope, slug: &str) -> OrgResult<Option<Organization>> {
        Ok(self.organizations.find_by_slug(scope, slug).await?)
    }

    /// Organizations the user actively belongs to within `scope`.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn list_for_user(&self, user_id: Uuid, scope: AppScope) -> OrgResult<Vec<OrganizationSummary>> {
        let memberships = self.membership.memberships_of(user_id).await?;

        let mut summaries = Vec::with_capacity(memberships.len());
        for membership in memberships.into_iter().filter(|m| m.is_active()) {
            let Some(organization) = self.organizations.find_by_id(membership.organization_id).await? else {
                continue;
            };
            if organization.scope() != scope {
                continue;
            }

            let member_count = match self.membership.member_count(organization.id).await {
                Ok(count) => count,
                Err(e) => {
                    warn!(error = %e, organization_id = %organization.id, "Failed to count members");
                    0
                }
            };

            summaries.push(OrganizationSummary {
                id: organization.id,
                name: organization.name,
                slug: organization.slug,
                logo: organization.logo,
                user_role: membership.role,
                member_count,
            });
        }

        debug!(count = summaries.len(), "Listed organizations for user");
        Ok(summaries)
    }
}
