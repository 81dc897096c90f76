use crate::config::{Config, Profile};
use crate::credentials::{CredentialChain, Credentials, Env};
use crate::s3::S3Client;
use crate::store::ObjectStore;
use anyhow::{Context, Result};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Credentials this close to expiry are re-resolved before the next `open`
const REFRESH_WINDOW_SECS: i64 = 300;

/// Wiring shared by the CLI and library callers
///
/// Resolves credentials through a provider chain, then opens an
/// [`ObjectStore`] per bucket. Each store gets its own S3 client, so closing
/// one store never affects another. Temporary credentials are re-resolved
/// through the same chain when they are expired or about to expire.
#[derive(Clone)]
pub struct Core {
    pub config: Arc<Config>,
    profile_name: String,
    profile: Profile,
    /// `None` when credentials were supplied directly
    chain: Option<Arc<CredentialChain>>,
    credentials: Arc<RwLock<Credentials>>,
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("profile", &self.profile_name)
            .field("endpoint", &self.profile.endpoint_url())
            .field("credentials", &self.cached_credentials())
            .field("refreshable", &self.chain.is_some())
            .finish()
    }
}

impl Core {
    /// Select the default profile and resolve credentials through the
    /// standard provider chain
    pub async fn new(config: Config) -> Result<Self> {
        Self::with_env(config, Env::process()).await
    }

    pub async fn with_env(config: Config, env: Env) -> Result<Self> {
        let (name, profile) = config
            .get_profile(None)
            .ok_or_else(|| anyhow::anyhow!("No profile found in configuration"))?;

        let chain = CredentialChain::default_chain(env, Some((name, profile)));
        Self::with_chain(config, chain).await
    }

    /// Resolve credentials through `chain` and keep it for later refreshes
    pub async fn with_chain(config: Config, chain: CredentialChain) -> Result<Self> {
        let name = config
            .get_profile(None)
            .map(|(name, _)| name.to_string())
            .ok_or_else(|| anyhow::anyhow!("No profile found in configuration"))?;

        let credentials = chain
            .resolve()
            .await
            .with_context(|| format!("Failed to resolve credentials for profile '{}'", name))?;

        Self::build(config, credentials, Some(Arc::new(chain)))
    }

    /// Skip the provider chain and use `credentials` directly. They are never
    /// refreshed.
    pub fn with_credentials(config: Config, credentials: Credentials) -> Result<Self> {
        Self::build(config, credentials, None)
    }

    fn build(
        config: Config,
        credentials: Credentials,
        chain: Option<Arc<CredentialChain>>,
    ) -> Result<Self> {
        let (name, profile) = config
            .get_profile(None)
            .ok_or_else(|| anyhow::anyhow!("No profile found in configuration"))?;
        let (profile_name, profile) = (name.to_string(), profile.clone());

        if credentials.is_expired() {
            warn!(provider = credentials.provider, "resolved credentials are already expired");
        }

        info!(
            profile = %profile_name,
            endpoint = %profile.endpoint_url(),
            region = %profile.region,
            provider = credentials.provider,
            "core initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            profile_name,
            profile,
            chain,
            credentials: Arc::new(RwLock::new(credentials)),
        })
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Bucket from the profile, if it names one
    pub fn default_bucket(&self) -> Option<&str> {
        self.profile.bucket.as_deref()
    }

    fn cached_credentials(&self) -> Credentials {
        self.credentials
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Credentials to sign with, re-resolved through the chain when the
    /// cached ones are expired or expire within the refresh window.
    ///
    /// A failed refresh keeps the cached credentials while they are still
    /// valid and is an error once they have expired.
    pub async fn credentials(&self) -> Result<Credentials> {
        let current = self.cached_credentials();
        let Some(chain) = &self.chain else {
            return Ok(current);
        };
        if !current.expires_within(chrono::Duration::seconds(REFRESH_WINDOW_SECS)) {
            return Ok(current);
        }

        debug!(
            provider = current.provider,
            expires_at = ?current.expires_at,
            "refreshing credentials"
        );

        match chain.resolve().await {
            Ok(fresh) => {
                if fresh.is_expired() {
                    warn!(provider = fresh.provider, "refreshed credentials are already expired");
                }
                *self
                    .credentials
                    .write()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh.clone();
                Ok(fresh)
            }
            Err(e) if !current.is_expired() => {
                warn!(
                    provider = current.provider,
                    error = %e,
                    "credential refresh failed, keeping current credentials until they expire"
                );
                Ok(current)
            }
            Err(e) => Err(e).with_context(|| {
                format!(
                    "Failed to refresh expired credentials for profile '{}'",
                    self.profile_name
                )
            }),
        }
    }

    /// Build a fresh S3 client from the profile and transfer settings
    pub async fn s3_client(&self) -> Result<S3Client> {
        let transfer = &self.config.transfer;
        let client = S3Client::new(
            &self.profile.endpoint_url(),
            self.credentials().await?,
            Some(self.profile.region.clone()),
            self.profile.insecure_tls,
        )
        .context("Failed to create S3 client")?
        .with_timeout(transfer.request_timeout())
        .with_multipart(transfer.multipart());
        Ok(client)
    }

    /// Open a store for `bucket`, or for the profile's bucket when `None`
    pub async fn open(&self, bucket: Option<&str>) -> Result<Arc<ObjectStore>> {
        let bucket = bucket.or(self.default_bucket()).ok_or_else(|| {
            anyhow::anyhow!(
                "No bucket given and profile '{}' has no default bucket",
                self.profile_name
            )
        })?;

        let mut store = ObjectStore::new(bucket, Arc::new(self.s3_client().await?))
            .with_context(|| format!("Invalid bucket '{}'", bucket))?;
        if let Some(page_size) = self.config.transfer.page_size {
            store = store.with_page_size(page_size);
        }
        Ok(Arc::new(store))
    }
}
