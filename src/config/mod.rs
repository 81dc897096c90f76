use crate::credentials::Env;
use crate::s3::types::{MultipartConfig, MIN_PART_SIZE};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Connection settings for one S3 account/endpoint
///
/// Keys are optional: without them credentials come from the environment,
/// web identity, container or instance metadata providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    /// S3 endpoint URL (default: AWS regional endpoint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    /// AWS region (default: us-east-1)
    #[serde(default = "default_region")]
    pub region: String,

    /// Default bucket for commands given bare keys
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: default_region(),
            bucket: None,
            access_key: None,
            secret_key: None,
            session_token: None,
            insecure_tls: false,
        }
    }
}

impl Profile {
    /// Configured endpoint, or the AWS endpoint for the profile's region
    pub fn endpoint_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        }
    }
}

/// Transfer tuning shared by all profiles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Keys requested per listing round trip (1-1000, backend default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<usize>,

    /// Files at or above this many bytes are uploaded in parts
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold: u64,

    /// Part size in bytes for multipart uploads
    #[serde(default = "default_multipart_part_size")]
    pub multipart_part_size: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_multipart_threshold() -> u64 {
    MultipartConfig::default().threshold
}

fn default_multipart_part_size() -> usize {
    MultipartConfig::default().part_size
}

fn default_request_timeout() -> u64 {
    300
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: None,
            multipart_threshold: default_multipart_threshold(),
            multipart_part_size: default_multipart_part_size(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl TransferConfig {
    pub fn multipart(&self) -> MultipartConfig {
        MultipartConfig::default()
            .with_part_size(self.multipart_part_size)
            .with_threshold(self.multipart_threshold)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named profiles for different S3 accounts
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,

    /// Profile used when none is requested
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_profile: Option<String>,

    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a profile by name, falling back to `default_profile` and then
    /// to the only profile when there is exactly one
    pub fn get_profile(&self, name: Option<&str>) -> Option<(&str, &Profile)> {
        let name = match name.or(self.default_profile.as_deref()) {
            Some(name) => name,
            None if self.profiles.len() == 1 => self.profiles.keys().next()?.as_str(),
            None => return None,
        };
        self.profiles
            .get_key_value(name)
            .map(|(name, profile)| (name.as_str(), profile))
    }

    /// Reject settings that cannot produce a working client
    pub fn validate(&self) -> Result<()> {
        if self.profiles.is_empty() {
            anyhow::bail!("configuration defines no profiles");
        }
        if let Some(name) = &self.default_profile {
            if !self.profiles.contains_key(name) {
                anyhow::bail!("default profile '{}' is not defined", name);
            }
        }

        for (name, profile) in &self.profiles {
            if let Some(endpoint) = &profile.endpoint {
                if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                    anyhow::bail!(
                        "profile '{}': endpoint {:?} must start with http:// or https://",
                        name,
                        endpoint
                    );
                }
            }
            if profile.bucket.as_deref().is_some_and(|b| b.trim().is_empty()) {
                anyhow::bail!("profile '{}': bucket must not be empty", name);
            }
            if profile.region.trim().is_empty() {
                anyhow::bail!("profile '{}': region must not be empty", name);
            }
        }

        if let Some(page_size) = self.transfer.page_size {
            if !(1..=1000).contains(&page_size) {
                anyhow::bail!("page_size must be between 1 and 1000, got {}", page_size);
            }
        }
        if self.transfer.multipart_part_size < MIN_PART_SIZE {
            anyhow::bail!(
                "multipart_part_size must be at least {} bytes, got {}",
                MIN_PART_SIZE,
                self.transfer.multipart_part_size
            );
        }
        if self.transfer.multipart_threshold == 0 {
            anyhow::bail!("multipart_threshold must be greater than zero");
        }
        if self.transfer.request_timeout == 0 {
            anyhow::bail!("request_timeout must be greater than zero");
        }

        Ok(())
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from the process environment, after reading `.env`
/// if one exists
pub fn load_from_env() -> Result<Config> {
    let _ = dotenvy::dotenv();
    load_from_env_with(&Env::process())
}

/// Build a single `default` profile from environment variables:
///
/// - `S3_BUCKET` (optional default bucket)
/// - `S3_ENDPOINT` (optional, AWS regional endpoint otherwise)
/// - `AWS_REGION` / `AWS_DEFAULT_REGION` (default us-east-1)
/// - `S3_INSECURE_TLS`
/// - `S3_PREFIX_PAGE_SIZE`, `S3_MULTIPART_THRESHOLD`,
///   `S3_MULTIPART_PART_SIZE`, `S3_REQUEST_TIMEOUT` (seconds)
///
/// Access keys are not copied into the profile; the credential chain reads
/// them from the environment itself.
pub fn load_from_env_with(env: &Env) -> Result<Config> {
    let profile = Profile {
        endpoint: env.get("S3_ENDPOINT"),
        region: env
            .get("AWS_REGION")
            .or_else(|| env.get("AWS_DEFAULT_REGION"))
            .unwrap_or_else(default_region),
        bucket: env.get("S3_BUCKET"),
        insecure_tls: env.flag("S3_INSECURE_TLS"),
        ..Profile::default()
    };

    let mut transfer = TransferConfig::default();
    if let Some(value) = env.get("S3_PREFIX_PAGE_SIZE") {
        transfer.page_size = Some(parse_var("S3_PREFIX_PAGE_SIZE", &value)?);
    }
    if let Some(value) = env.get("S3_MULTIPART_THRESHOLD") {
        transfer.multipart_threshold = parse_var("S3_MULTIPART_THRESHOLD", &value)?;
    }
    if let Some(value) = env.get("S3_MULTIPART_PART_SIZE") {
        transfer.multipart_part_size = parse_var("S3_MULTIPART_PART_SIZE", &value)?;
    }
    if let Some(value) = env.get("S3_REQUEST_TIMEOUT") {
        transfer.request_timeout = parse_var("S3_REQUEST_TIMEOUT", &value)?;
    }

    let mut config = Config::new();
    config.profiles.insert("default".to_string(), profile);
    config.default_profile = Some("default".to_string());
    config.transfer = transfer;
    Ok(config)
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("{} has an invalid value: {:?}", name, value))
}

/// Load configuration from a YAML file when one is given, otherwise from the
/// environment, and validate it.
///
/// # Arguments
/// * `config_path` - Optional path to YAML config file
/// * `profile_name` - Optional profile to make the default
pub fn load_config(config_path: Option<&str>, profile_name: Option<&str>) -> Result<Config> {
    let mut config = match config_path {
        Some(path) => load_from_yaml(path)?,
        None => load_from_env()?,
    };

    if let Some(name) = profile_name {
        if !config.profiles.contains_key(name) {
            anyhow::bail!("Profile '{}' not found in configuration", name);
        }
        config.default_profile = Some(name.to_string());
    }

    config.validate()?;
    Ok(config)
}
