//! Engine configuration
//!
//! Quota ceilings and feature gates consumed by the engine. Configuration is
//! assembled from three layers applied in a fixed order:
//!
//! 1. [`EngineConfig::default`]: documented defaults
//! 2. [`EngineConfig::from_env`]: environment variables over the defaults
//! 3. [`EngineConfig::merge`]: programmatic [`ConfigOverrides`]
//!
//! Override fields are `Option`s, so an explicit `0` or `false` is applied
//! rather than mistaken for "unset". The result is validated once with
//! [`EngineConfig::validate`] and then shared through [`SharedConfig`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration value.
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Error message.
        message: String,
    },
}

/// Engine configuration.
///
/// # Examples
///
/// ```
/// use org_engine::EngineConfig;
///
/// let config = EngineConfig::default();
/// assert_eq!(config.max_organizations_per_user, 5);
/// assert_eq!(config.invitation_expiry_hours, 72);
/// assert!(config.enforce_unique_slug);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Organizations a single user may create per (app, environment)
    #[serde(default = "default_max_organizations_per_user")]
    pub max_organizations_per_user: u32,

    /// Members an organization may hold, owner included
    #[serde(default = "default_max_members_per_organization")]
    pub max_members_per_organization: u32,

    /// Teams an organization may hold
    #[serde(default = "default_max_teams_per_organization")]
    pub max_teams_per_organization: u32,

    /// Allow any authenticated user to create organizations
    #[serde(default = "default_true")]
    pub enable_user_creation: bool,

    /// Only admit members through accepted invitations
    #[serde(default)]
    pub require_invitation: bool,

    /// Invitation lifetime in hours
    #[serde(default = "default_invitation_expiry_hours")]
    pub invitation_expiry_hours: u32,

    /// Reject duplicate slugs within an (app, environment)
    #[serde(default = "default_true")]
    pub enforce_unique_slug: bool,
}

fn default_max_organizations_per_user() -> u32 {
    5
}

fn default_max_members_per_organization() -> u32 {
    50
}

fn default_max_teams_per_organization() -> u32 {
    20
}

fn default_invitation_expiry_hours() -> u32 {
    72
}

fn default_true() -> bool {
    true
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_organizations_per_user: default_max_organizations_per_user(),
            max_members_per_organization: default_max_members_per_organization(),
            max_teams_per_organization: default_max_teams_per_organization(),
            enable_user_creation: true,
            require_invitation: false,
            invitation_expiry_hours: default_invitation_expiry_hours(),
            enforce_unique_slug: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables over the defaults.
    ///
    /// Environment variables:
    /// - `ORG_MAX_ORGANIZATIONS_PER_USER` (default: 5)
    /// - `ORG_MAX_MEMBERS_PER_ORGANIZATION` (default: 50)
    /// - `ORG_MAX_TEAMS_PER_ORGANIZATION` (default: 20)
    /// - `ORG_ENABLE_USER_CREATION` (default: true)
    /// - `ORG_REQUIRE_INVITATION` (default: false)
    /// - `ORG_INVITATION_EXPIRY_HOURS` (default: 72)
    /// - `ORG_ENFORCE_UNIQUE_SLUG` (default: true)
    ///
    /// A variable that is set but unparsable is an error, not a silent
    /// fallback to the default.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = ConfigOverrides {
            max_organizations_per_user: parse_var(&lookup, "ORG_MAX_ORGANIZATIONS_PER_USER")?,
            max_members_per_organization: parse_var(&lookup, "ORG_MAX_MEMBERS_PER_ORGANIZATION")?,
            max_teams_per_organization: parse_var(&lookup, "ORG_MAX_TEAMS_PER_ORGANIZATION")?,
            enable_user_creation: parse_flag(&lookup, "ORG_ENABLE_USER_CREATION")?,
            require_invitation: parse_flag(&lookup, "ORG_REQUIRE_INVITATION")?,
            invitation_expiry_hours: parse_var(&lookup, "ORG_INVITATION_EXPIRY_HOURS")?,
            enforce_unique_slug: parse_flag(&lookup, "ORG_ENFORCE_UNIQUE_SLUG")?,
        };
        let config = Self::default().merge(&overrides);
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides on top of this configuration.
    ///
    /// Every `Some` field replaces the current value, including `Some(0)`
    /// and `Some(false)`.
    pub fn merge(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(v) = overrides.max_organizations_per_user {
            self.max_organizations_per_user = v;
        }
        if let Some(v) = overrides.max_members_per_organization {
            self.max_members_per_organization = v;
        }
        if let Some(v) = overrides.max_teams_per_organization {
            self.max_teams_per_organization = v;
        }
        if let Some(v) = overrides.enable_user_creation {
            self.enable_user_creation = v;
        }
        if let Some(v) = overrides.require_invitation {
            self.require_invitation = v;
        }
        if let Some(v) = overrides.invitation_expiry_hours {
            self.invitation_expiry_hours = v;
        }
        if let Some(v) = overrides.enforce_unique_slug {
            self.enforce_unique_slug = v;
        }
        self
    }

    /// Check the configuration for values the engine cannot work with.
    ///
    /// A members ceiling of zero would make every organization creation fail
    /// at the owner step, and a zero invitation lifetime issues invitations
    /// that are expired on arrival.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_members_per_organization == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_members_per_organization".to_string(),
                message: "must be at least 1 to hold the owner".to_string(),
            });
        }
        if self.invitation_expiry_hours == 0 {
            return Err(ConfigError::InvalidValue {
                key: "invitation_expiry_hours".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Invitation lifetime as a duration.
    pub fn invitation_lifetime(&self) -> chrono::Duration {
        chrono::Duration::hours(i64::from(self.invitation_expiry_hours))
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
    }
}

fn parse_flag<F>(lookup: &F, key: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Some(true)),
            "false" | "0" | "no" | "off" => Ok(Some(false)),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("expected a boolean, got '{}'", other),
            }),
        },
    }
}

/// Programmatic configuration layer.
///
/// `None` leaves the underlying value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigOverrides {
    #[serde(default)]
    pub max_organizations_per_user: Option<u32>,
    #[serde(default)]
    pub max_members_per_organization: Option<u32>,
    #[serde(default)]
    pub max_teams_per_organization: Option<u32>,
    #[serde(default)]
    pub enable_user_creation: Option<bool>,
    #[serde(default)]
    pub require_invitation: Option<bool>,
    #[serde(default)]
    pub invitation_expiry_hours: Option<u32>,
    #[serde(default)]
    pub enforce_unique_slug: Option<bool>,
}

/// Configuration shared between concurrently running operations.
///
/// Readers take a cheap snapshot; an administrative update swaps the whole
/// configuration at once, so an operation never sees half of an update.
#[derive(Debug, Clone)]
pub struct SharedConfig {
    inner: Arc<RwLock<Arc<EngineConfig>>>,
}

impl SharedConfig {
    /// Wrap a validated configuration.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RwLock::new(Arc::new(config))),
        })
    }

    /// Current configuration snapshot.
    pub async fn snapshot(&self) -> Arc<EngineConfig> {
        self.inner.read().await.clone()
    }

    /// Apply overrides to the current configuration and swap it in.
    ///
    /// The merged result is validated before it becomes visible; on error
    /// the previous configuration stays in place.
    pub async fn update(&self, overrides: &ConfigOverrides) -> Result<Arc<EngineConfig>, ConfigError> {
        let mut guard = self.inner.write().await;
        let next = guard.as_ref().clone().merge(overrides);
        next.validate()?;
        let next = Arc::new(next);
        *guard = next.clone();
        Ok(next)
    }
}
