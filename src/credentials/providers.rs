//! Providers backed by local state: explicit keys, environment, config profile

use super::{CredentialProvider, Credentials, CredentialsError, Env};
use crate::config::Profile;
use async_trait::async_trait;

/// Fixed keys supplied by the caller
#[derive(Clone)]
pub struct StaticProvider {
    credentials: Credentials,
}

impl StaticProvider {
    pub fn new(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: Option<String>,
    ) -> Self {
        Self {
            credentials: Credentials::new(access_key_id, secret_access_key, session_token, "static"),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticProvider {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        Ok(self.credentials.clone())
    }
}

/// Reads keys from environment variables
///
/// - `AWS_ACCESS_KEY_ID` (or legacy `S3_KEY`)
/// - `AWS_SECRET_ACCESS_KEY` (or legacy `S3_SECRET`)
/// - `AWS_SESSION_TOKEN` (optional)
pub struct EnvironmentProvider {
    env: Env,
}

impl EnvironmentProvider {
    pub fn new(env: Env) -> Self {
        Self { env }
    }
}

#[async_trait]
impl CredentialProvider for EnvironmentProvider {
    fn name(&self) -> &'static str {
        "environment"
    }

    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        let access_key = self
            .env
            .get("AWS_ACCESS_KEY_ID")
            .or_else(|| self.env.get("S3_KEY"));
        let secret_key = self
            .env
            .get("AWS_SECRET_ACCESS_KEY")
            .or_else(|| self.env.get("S3_SECRET"));

        match (access_key, secret_key) {
            (Some(access_key), Some(secret_key)) => Ok(Credentials::new(
                access_key,
                secret_key,
                self.env.get("AWS_SESSION_TOKEN"),
                self.name(),
            )),
            (None, None) => Err(CredentialsError::NotConfigured(
                "AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY not set".to_string(),
            )),
            (Some(_), None) => Err(CredentialsError::Invalid {
                provider: self.name(),
                message: "AWS_ACCESS_KEY_ID is set but AWS_SECRET_ACCESS_KEY is missing"
                    .to_string(),
            }),
            (None, Some(_)) => Err(CredentialsError::Invalid {
                provider: self.name(),
                message: "AWS_SECRET_ACCESS_KEY is set but AWS_ACCESS_KEY_ID is missing"
                    .to_string(),
            }),
        }
    }
}

/// Keys stored directly in a config profile
pub struct ProfileProvider {
    profile_name: String,
    access_key: Option<String>,
    secret_key: Option<String>,
    session_token: Option<String>,
}

impl ProfileProvider {
    pub fn new(profile_name: &str, profile: &Profile) -> Self {
        Self {
            profile_name: profile_name.to_string(),
            access_key: profile.access_key.clone(),
            secret_key: profile.secret_key.clone(),
            session_token: profile.session_token.clone(),
        }
    }
}

#[async_trait]
impl CredentialProvider for ProfileProvider {
    fn name(&self) -> &'static str {
        "profile"
    }

    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        match (&self.access_key, &self.secret_key) {
            (Some(access_key), Some(secret_key)) => Ok(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                self.session_token.clone(),
                self.name(),
            )),
            (None, None) => Err(CredentialsError::NotConfigured(format!(
                "profile '{}' has no access_key/secret_key",
                self.profile_name
            ))),
            _ => Err(CredentialsError::Invalid {
                provider: self.name(),
                message: format!(
                    "profile '{}' must set both access_key and secret_key",
                    self.profile_name
                ),
            }),
        }
    }
}
