//! Organization domain models
//!
//! This module provides the Organization entity: a self-service workspace a
//! user creates under a platform app and environment.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{OrgError, OrgResult};
use crate::roles::MemberRole;

/// Longest slug accepted, matching a DNS label.
pub const MAX_SLUG_LENGTH: usize = 63;

/// Platform tenant scope an organization lives in.
///
/// Slugs are unique per scope and the per-user organization ceiling is
/// counted per scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppScope {
    /// Platform app ID
    pub app_id: Uuid,

    /// Environment ID within the app
    pub environment_id: Uuid,
}

impl AppScope {
    /// Create a scope.
    pub fn new(app_id: Uuid, environment_id: Uuid) -> Self {
        Self {
            app_id,
            environment_id,
        }
    }
}

/// A user-created workspace.
///
/// # Architecture
///
/// ```text
/// App / Environment
///   └─ Organization
///        ├─ Members (exactly one owner)
///        ├─ Teams ─ TeamMembers
///        └─ Invitations
/// ```
///
/// # Examples
///
/// ```
/// use uuid::Uuid;
/// use org_engine::{AppScope, Organization};
///
/// let scope = AppScope::new(Uuid::now_v7(), Uuid::now_v7());
/// let creator = Uuid::now_v7();
/// let org = Organization::new(scope, "Acme Corp", "acme-corp", creator);
/// assert_eq!(org.slug, "acme-corp");
/// assert_eq!(org.created_by, creator);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    /// Unique identifier for the organization
    pub id: Uuid,

    /// Platform app the organization belongs to
    pub app_id: Uuid,

    /// Environment within the app
    pub environment_id: Uuid,

    /// Human-readable name
    pub name: String,

    /// URL-friendly slug (unique within app + environment)
    pub slug: String,

    /// Logo reference for branding
    pub logo: Option<String>,

    /// Custom metadata for extensibility
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// User who created the organization
    pub created_by: Uuid,

    /// When the organization was created
    pub created_at: DateTime<Utc>,

    /// When the organization was last updated
    pub updated_at: DateTime<Utc>,
}

impl Organization {
    /// Creates a new organization with a fresh UUID v7 and current timestamps.
    pub fn new(scope: AppScope, name: impl Into<String>, slug: impl Into<String>, created_by: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            app_id: scope.app_id,
            environment_id: scope.environment_id,
            name: name.into(),
            slug: slug.into(),
            logo: None,
            metadata: HashMap::new(),
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the logo reference.
    pub fn with_logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = Some(logo.into());
        self
    }

    /// Replace the metadata map.
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Scope of this organization.
    pub fn scope(&self) -> AppScope {
        AppScope::new(self.app_id, self.environment_id)
    }
}

/// Summary of an organization for a user's organization list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrganizationSummary {
    /// Organization ID
    pub id: Uuid,

    /// Organization name
    pub name: String,

    /// Slug
    pub slug: String,

    /// Logo reference
    pub logo: Option<String>,

    /// The requesting user's role in this organization
    pub user_role: MemberRole,

    /// Number of members (zero when the count could not be read)
    pub member_count: u64,
}

/// Input for creating an organization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrganizationRequest {
    /// Display name
    pub name: String,

    /// Requested slug
    pub slug: String,

    /// Optional logo reference
    #[serde(default)]
    pub logo: Option<String>,

    /// Optional metadata
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,

    /// Authenticated user creating the organization
    pub creator_id: Uuid,

    /// App and environment to create it under
    pub scope: AppScope,
}

/// Partial update of an organization.
///
/// Absent fields are left untouched; they never clear a value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateOrganizationRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

impl UpdateOrganizationRequest {
    /// Whether the request carries no change.
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.logo.is_none() && self.metadata.is_none()
    }

    /// Apply present fields and return the names of the changed ones.
    pub fn apply(&self, org: &mut Organization) -> OrgResult<Vec<String>> {
        let mut changed = Vec::new();

        if let Some(name) = &self.name {
            let name = validate_name(name)?;
            if org.name != name {
                org.name = name;
                changed.push("name".to_string());
            }
        }
        if let Some(logo) = &self.logo {
            if org.logo.as_deref() != Some(logo.as_str()) {
                org.logo = Some(logo.clone());
                changed.push("logo".to_string());
            }
        }
        if let Some(metadata) = &self.metadata {
            if org.metadata != *metadata {
                org.metadata = metadata.clone();
                changed.push("metadata".to_string());
            }
        }

        if !changed.is_empty() {
            org.updated_at = Utc::now();
        }
        Ok(changed)
    }
}

/// Validate and normalize an organization or team name.
pub fn validate_name(name: &str) -> OrgResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(OrgError::InvalidName("name must not be empty".to_string()));
    }
    Ok(trimmed.to_string())
}

/// Validate a slug: lowercase ASCII letters, digits and inner hyphens.
///
/// # Examples
///
/// ```
/// use org_engine::organization::validate_slug;
///
/// assert!(validate_slug("acme-corp").is_ok());
/// assert!(validate_slug("Acme").is_err());
/// assert!(validate_slug("-acme").is_err());
/// ```
pub fn validate_slug(slug: &str) -> OrgResult<()> {
    let invalid = |reason: &str| Err(OrgError::InvalidSlug(format!("'{}': {}", slug, reason)));

    if slug.is_empty() {
        return invalid("must not be empty");
    }
    if slug.len() > MAX_SLUG_LENGTH {
        return invalid("too long");
    }
    if !slug
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        return invalid("only lowercase letters, digits and '-' are allowed");
    }
    if slug.starts_with('-') || slug.ends_with('-') {
        return invalid("must not start or end with '-'");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> AppScope {
        AppScope::new(Uuid::now_v7(), Uuid::now_v7())
    }

    #[test]
    fn test_organization_creation() {
        let scope = scope();
        let creator = Uuid::now_v7();
        let org = Organization::new(scope, "Acme Corp", "acme-corp", creator).with_logo("logo.png");

        assert_eq!(org.name, "Acme Corp");
        assert_eq!(org.scope(), scope);
        assert_eq!(org.logo.as_deref(), Some("logo.png"));
        assert_eq!(org.created_at, org.updated_at);
    }

    #[test]
    fn test_update_applies_only_present_fields() {
        let mut org = Organization::new(scope(), "Acme", "acme", Uuid::now_v7()).with_logo("a.png");
        let request = UpdateOrganizationRequest {
            name: Some("Acme Inc".to_string()),
            ..Default::default()
        };

        let changed = request.apply(&mut org).unwrap();
        assert_eq!(changed, vec!["name".to_string()]);
        assert_eq!(org.name, "Acme Inc");
        assert_eq!(org.logo.as_deref(), Some("a.png"));
    }

    #[test]
    fn test_update_rejects_blank_name() {
        let mut org = Organization::new(scope(), "Acme", "acme", Uuid::now_v7());
        let request = UpdateOrganizationRequest {
            name: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(request.apply(&mut org), Err(OrgError::InvalidName(_))));
        assert_eq!(org.name, "Acme");
    }

    #[test]
    fn test_slug_validation() {
        assert!(validate_slug("acme").is_ok());
        assert!(validate_slug("acme-2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("acme_corp").is_err());
        assert!(validate_slug("acme-").is_err());
        assert!(validate_slug(&"a".repeat(64)).is_err());
    }
}
