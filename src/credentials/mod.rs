//! Credential resolution
//!
//! Credentials come from an explicit, ordered list of [`CredentialProvider`]s.
//! [`CredentialChain::default_chain`] tries, in order:
//!
//! 1. environment variables (`AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`)
//! 2. keys stored in the selected config profile
//! 3. web identity token exchange (Kubernetes service account / IRSA)
//! 4. the container credentials endpoint (`AWS_CONTAINER_CREDENTIALS_*`)
//! 5. the EC2 instance metadata service (IMDSv2)
//!
//! A provider that finds nothing to work with reports
//! [`CredentialsError::NotConfigured`] and the chain moves on. Any other
//! failure ends resolution: a source that is configured but broken is never
//! skipped silently.

mod http;
pub mod providers;
pub mod remote;

pub use providers::{EnvironmentProvider, ProfileProvider, StaticProvider};
pub use remote::{ContainerProvider, InstanceMetadataProvider, WebIdentityProvider};

use crate::config::Profile;
use crate::store::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Resolved signing credentials
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Name of the provider that produced these credentials
    pub provider: &'static str,
}

impl Credentials {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
        provider: &'static str,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token,
            expires_at: None,
            provider,
        }
    }

    pub fn with_expiry(mut self, expires_at: Option<DateTime<Utc>>) -> Self {
        self.expires_at = expires_at;
        self
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now())
    }

    /// True when the credentials expire within `window` from now (or already have)
    pub fn expires_within(&self, window: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| at <= Utc::now() + window)
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "** redacted **"),
            )
            .field("expires_at", &self.expires_at)
            .field("provider", &self.provider)
            .finish()
    }
}

/// Credential resolution errors
#[derive(Error, Debug)]
pub enum CredentialsError {
    /// The provider's source is absent; the chain continues
    #[error("{0}")]
    NotConfigured(String),

    /// The source is present but its content is unusable
    #[error("{provider}: invalid credentials: {message}")]
    Invalid {
        provider: &'static str,
        message: String,
    },

    /// Fetching from a remote source failed
    #[error("{provider}: failed to fetch credentials: {message}")]
    Fetch {
        provider: &'static str,
        message: String,
    },

    /// No provider in the chain was configured
    #[error("no credentials found; tried: {}", .0.join("; "))]
    Exhausted(Vec<String>),
}

impl From<CredentialsError> for StoreError {
    fn from(err: CredentialsError) -> Self {
        StoreError::Configuration(err.to_string())
    }
}

/// One strategy for obtaining credentials
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn resolve(&self) -> Result<Credentials, CredentialsError>;
}

/// Source of environment variables
///
/// Providers read through this instead of `std::env` directly so a chain can
/// be driven from a fixed map.
#[derive(Clone)]
pub struct Env(Arc<dyn Fn(&str) -> Option<String> + Send + Sync>);

impl Env {
    /// The real process environment
    pub fn process() -> Self {
        Env(Arc::new(|name: &str| std::env::var(name).ok()))
    }

    /// An environment with no variables set
    pub fn empty() -> Self {
        Env(Arc::new(|_: &str| None))
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map: HashMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Env(Arc::new(move |name: &str| map.get(name).cloned()))
    }

    /// Value of `name`, with empty strings treated as unset
    pub fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.trim().is_empty())
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name)
            .is_some_and(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
    }
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Env")
    }
}

/// Ordered list of providers, tried first to last
pub struct CredentialChain {
    providers: Vec<Box<dyn CredentialProvider>>,
}

impl CredentialChain {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn with(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// The standard order documented at module level
    pub fn default_chain(env: Env, profile: Option<(&str, &Profile)>) -> Self {
        let mut chain = Self::new().with(EnvironmentProvider::new(env.clone()));
        if let Some((name, profile)) = profile {
            chain = chain.with(ProfileProvider::new(name, profile));
        }
        chain
            .with(WebIdentityProvider::new(env.clone()))
            .with(ContainerProvider::new(env.clone()))
            .with(InstanceMetadataProvider::new(env))
    }

    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        let mut skipped = Vec::with_capacity(self.providers.len());

        for provider in &self.providers {
            match provider.resolve().await {
                Ok(credentials) => {
                    info!(
                        provider = provider.name(),
                        access_key_id = %credentials.access_key_id,
                        temporary = credentials.session_token.is_some(),
                        "resolved credentials"
                    );
                    return Ok(credentials);
                }
                Err(CredentialsError::NotConfigured(reason)) => {
                    debug!(provider = provider.name(), reason = %reason, "credential provider skipped");
                    skipped.push(format!("{}: {}", provider.name(), reason));
                }
                Err(e) => return Err(e),
            }
        }

        Err(CredentialsError::Exhausted(skipped))
    }
}

impl Default for CredentialChain {
    fn default() -> Self {
        Self::new()
    }
}
