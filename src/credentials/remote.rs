//! Providers that fetch temporary credentials over HTTP
//!
//! - [`WebIdentityProvider`]: exchanges a projected service-account token for
//!   role credentials via STS `AssumeRoleWithWebIdentity`.
//! - [`ContainerProvider`]: the task/pod credentials endpoint announced through
//!   `AWS_CONTAINER_CREDENTIALS_FULL_URI` or `..._RELATIVE_URI`.
//! - [`InstanceMetadataProvider`]: IMDSv2 on EC2 hosts.

use super::http::{fetch, FetchError};
use super::{CredentialProvider, Credentials, CredentialsError, Env};
use crate::s3::types::parse_iso8601;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use hyper::{Method, StatusCode};
use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

const STS_API_VERSION: &str = "2011-06-15";
const CONTAINER_HOST: &str = "http://169.254.170.2";
const IMDS_ENDPOINT: &str = "http://169.254.169.254";
const IMDS_TOKEN_TTL_SECS: &str = "21600";

/// Credentials document served by container and instance metadata endpoints
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CredentialDocument {
    code: Option<String>,
    message: Option<String>,
    access_key_id: String,
    secret_access_key: String,
    token: Option<String>,
    expiration: Option<String>,
}

fn parse_credential_document(
    provider: &'static str,
    body: &[u8],
) -> Result<Credentials, CredentialsError> {
    let doc: CredentialDocument =
        serde_json::from_slice(body).map_err(|e| CredentialsError::Invalid {
            provider,
            message: format!("malformed credentials document: {e}"),
        })?;

    if let Some(code) = doc.code.as_deref() {
        if code != "Success" {
            return Err(CredentialsError::Fetch {
                provider,
                message: format!("{code}: {}", doc.message.unwrap_or_default()),
            });
        }
    }

    let expires_at = doc.expiration.as_deref().and_then(parse_iso8601);
    Ok(Credentials::new(doc.access_key_id, doc.secret_access_key, doc.token, provider)
        .with_expiry(expires_at))
}

/// Pull `<Credentials>` out of an `AssumeRoleWithWebIdentityResponse`
fn parse_sts_response(body: &[u8]) -> Result<Credentials, CredentialsError> {
    const PROVIDER: &str = "web-identity";

    let mut reader = Reader::from_reader(body);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut access_key = None;
    let mut secret_key = None;
    let mut session_token = None;
    let mut expiration = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape().map_err(|e| CredentialsError::Invalid {
                    provider: PROVIDER,
                    message: format!("XML parse error: {e}"),
                })?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"AccessKeyId" => access_key = Some(std::mem::take(&mut current_text)),
                    b"SecretAccessKey" => secret_key = Some(std::mem::take(&mut current_text)),
                    b"SessionToken" => session_token = Some(std::mem::take(&mut current_text)),
                    b"Expiration" => expiration = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(CredentialsError::Invalid {
                    provider: PROVIDER,
                    message: format!("XML parse error: {e}"),
                })
            }
            _ => {}
        }
    }

    match (access_key, secret_key) {
        (Some(access_key), Some(secret_key)) => {
            let expires_at = expiration.as_deref().and_then(parse_iso8601);
            Ok(Credentials::new(access_key, secret_key, session_token, PROVIDER)
                .with_expiry(expires_at))
        }
        _ => Err(CredentialsError::Invalid {
            provider: PROVIDER,
            message: "STS response has no Credentials element".to_string(),
        }),
    }
}

fn fetch_error(provider: &'static str, err: FetchError) -> CredentialsError {
    CredentialsError::Fetch {
        provider,
        message: err.to_string(),
    }
}

fn status_error(provider: &'static str, status: StatusCode, body: &[u8]) -> CredentialsError {
    CredentialsError::Fetch {
        provider,
        message: format!("{status}: {}", String::from_utf8_lossy(body).trim()),
    }
}

/// STS `AssumeRoleWithWebIdentity` using a token file
///
/// Reads `AWS_WEB_IDENTITY_TOKEN_FILE`, `AWS_ROLE_ARN` and optionally
/// `AWS_ROLE_SESSION_NAME`. The STS endpoint is regional when `AWS_REGION`
/// is set and can be overridden with `AWS_ENDPOINT_URL_STS`.
pub struct WebIdentityProvider {
    env: Env,
    timeout: Duration,
}

impl WebIdentityProvider {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn sts_endpoint(&self) -> String {
        if let Some(endpoint) = self.env.get("AWS_ENDPOINT_URL_STS") {
            return endpoint.trim_end_matches('/').to_string();
        }
        match self
            .env
            .get("AWS_REGION")
            .or_else(|| self.env.get("AWS_DEFAULT_REGION"))
        {
            Some(region) => format!("https://sts.{region}.amazonaws.com"),
            None => "https://sts.amazonaws.com".to_string(),
        }
    }
}

#[async_trait]
impl CredentialProvider for WebIdentityProvider {
    fn name(&self) -> &'static str {
        "web-identity"
    }

    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        let token_file = self.env.get("AWS_WEB_IDENTITY_TOKEN_FILE");
        let role_arn = self.env.get("AWS_ROLE_ARN");

        let (token_file, role_arn) = match (token_file, role_arn) {
            (Some(file), Some(arn)) => (file, arn),
            (None, None) => {
                return Err(CredentialsError::NotConfigured(
                    "AWS_WEB_IDENTITY_TOKEN_FILE / AWS_ROLE_ARN not set".to_string(),
                ))
            }
            _ => {
                return Err(CredentialsError::Invalid {
                    provider: self.name(),
                    message: "AWS_WEB_IDENTITY_TOKEN_FILE and AWS_ROLE_ARN must both be set"
                        .to_string(),
                })
            }
        };

        let token = tokio::fs::read_to_string(&token_file)
            .await
            .map_err(|e| CredentialsError::Invalid {
                provider: self.name(),
                message: format!("cannot read token file {token_file}: {e}"),
            })?;
        let session_name = self
            .env
            .get("AWS_ROLE_SESSION_NAME")
            .unwrap_or_else(|| format!("bucketstore-{}", Utc::now().timestamp_millis()));

        let form = format!(
            "Action=AssumeRoleWithWebIdentity&RoleArn={}&RoleSessionName={}&Version={}&WebIdentityToken={}",
            urlencoding::encode(&role_arn),
            urlencoding::encode(&session_name),
            STS_API_VERSION,
            urlencoding::encode(token.trim()),
        );

        let endpoint = format!("{}/", self.sts_endpoint());
        debug!(endpoint = %endpoint, role_arn = %role_arn, "assuming role with web identity");

        let response = fetch(
            Method::POST,
            &endpoint,
            &[(
                "content-type",
                "application/x-www-form-urlencoded".to_string(),
            )],
            Bytes::from(form),
            self.timeout,
        )
        .await
        .map_err(|e| fetch_error(self.name(), e))?;

        if !response.status.is_success() {
            return Err(status_error(self.name(), response.status, &response.body));
        }

        parse_sts_response(&response.body)
    }
}

/// Container credentials endpoint (ECS tasks, EKS pod identity)
pub struct ContainerProvider {
    env: Env,
    timeout: Duration,
}

impl ContainerProvider {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            timeout: Duration::from_secs(5),
        }
    }

    async fn authorization(&self) -> Result<Option<String>, CredentialsError> {
        if let Some(path) = self.env.get("AWS_CONTAINER_AUTHORIZATION_TOKEN_FILE") {
            let token = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| CredentialsError::Invalid {
                    provider: self.name(),
                    message: format!("cannot read authorization token file {path}: {e}"),
                })?;
            return Ok(Some(token.trim().to_string()));
        }
        Ok(self.env.get("AWS_CONTAINER_AUTHORIZATION_TOKEN"))
    }
}

#[async_trait]
impl CredentialProvider for ContainerProvider {
    fn name(&self) -> &'static str {
        "container"
    }

    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        let url = if let Some(full) = self.env.get("AWS_CONTAINER_CREDENTIALS_FULL_URI") {
            full
        } else if let Some(relative) = self.env.get("AWS_CONTAINER_CREDENTIALS_RELATIVE_URI") {
            format!("{CONTAINER_HOST}{relative}")
        } else {
            return Err(CredentialsError::NotConfigured(
                "AWS_CONTAINER_CREDENTIALS_FULL_URI / _RELATIVE_URI not set".to_string(),
            ));
        };

        let mut headers = Vec::new();
        if let Some(token) = self.authorization().await? {
            headers.push(("authorization", token));
        }

        debug!(url = %url, "fetching container credentials");
        let response = fetch(Method::GET, &url, &headers, Bytes::new(), self.timeout)
            .await
            .map_err(|e| fetch_error(self.name(), e))?;

        if !response.status.is_success() {
            return Err(status_error(self.name(), response.status, &response.body));
        }

        parse_credential_document(self.name(), &response.body)
    }
}

/// EC2 instance metadata service, IMDSv2 session tokens only
///
/// An unreachable metadata endpoint is treated as "not on EC2" rather than a
/// failure. Set `AWS_EC2_METADATA_DISABLED=true` to skip it entirely.
pub struct InstanceMetadataProvider {
    env: Env,
    timeout: Duration,
}

impl InstanceMetadataProvider {
    pub fn new(env: Env) -> Self {
        Self {
            env,
            timeout: Duration::from_secs(1),
        }
    }

    fn endpoint(&self) -> String {
        self.env
            .get("AWS_EC2_METADATA_SERVICE_ENDPOINT")
            .unwrap_or_else(|| IMDS_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string()
    }
}

#[async_trait]
impl CredentialProvider for InstanceMetadataProvider {
    fn name(&self) -> &'static str {
        "instance-metadata"
    }

    async fn resolve(&self) -> Result<Credentials, CredentialsError> {
        if self.env.flag("AWS_EC2_METADATA_DISABLED") {
            return Err(CredentialsError::NotConfigured(
                "disabled by AWS_EC2_METADATA_DISABLED".to_string(),
            ));
        }

        let endpoint = self.endpoint();

        let token = match fetch(
            Method::PUT,
            &format!("{endpoint}/latest/api/token"),
            &[(
                "x-aws-ec2-metadata-token-ttl-seconds",
                IMDS_TOKEN_TTL_SECS.to_string(),
            )],
            Bytes::new(),
            self.timeout,
        )
        .await
        {
            Ok(response) if response.status.is_success() => {
                String::from_utf8_lossy(&response.body).trim().to_string()
            }
            Ok(response) => return Err(status_error(self.name(), response.status, &response.body)),
            Err(FetchError::Unreachable(reason)) => {
                return Err(CredentialsError::NotConfigured(format!(
                    "metadata service {endpoint} {reason}"
                )))
            }
            Err(e) => return Err(fetch_error(self.name(), e)),
        };

        let auth = [("x-aws-ec2-metadata-token", token)];
        let roles_url = format!("{endpoint}/latest/meta-data/iam/security-credentials/");

        let roles = fetch(Method::GET, &roles_url, &auth, Bytes::new(), self.timeout)
            .await
            .map_err(|e| fetch_error(self.name(), e))?;
        if roles.status == StatusCode::NOT_FOUND {
            return Err(CredentialsError::NotConfigured(
                "instance has no IAM role attached".to_string(),
            ));
        }
        if !roles.status.is_success() {
            return Err(status_error(self.name(), roles.status, &roles.body));
        }

        let listing = String::from_utf8_lossy(&roles.body).to_string();
        let role = listing
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| {
                CredentialsError::NotConfigured("instance has no IAM role attached".to_string())
            })?;

        debug!(role = %role, "fetching instance role credentials");
        let response = fetch(
            Method::GET,
            &format!("{roles_url}{role}"),
            &auth,
            Bytes::new(),
            self.timeout,
        )
        .await
        .map_err(|e| fetch_error(self.name(), e))?;

        if !response.status.is_success() {
            return Err(status_error(self.name(), response.status, &response.body));
        }

        parse_credential_document(self.name(), &response.body)
    }
}
