//! S3 REST client
//!
//! - HTTP/1.1 over hyper-util's pooled client with native-tls
//! - Path-style URLs (`endpoint/bucket/key`), so MinIO and friends work unchanged
//! - UNSIGNED-PAYLOAD for object bodies, hashed payloads for small XML bodies
//! - Byte-slice tag matching when parsing XML responses
//! - One attempt per request, bounded by the configured timeout

use crate::credentials::Credentials;
use crate::s3::signer::S3SignerV4;
use crate::s3::types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    HeadObjectResponse, ListObjectsResponse, MultipartConfig, S3Object,
};
use bytes::Bytes;
use futures::StreamExt;
use http_body_util::{BodyExt, BodyStream, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::{Method, Request, Response, StatusCode};
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write as FmtWrite;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

static HEX_UPPER: &[u8; 16] = b"0123456789ABCDEF";

type HttpClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3Error {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("HTTP error: {0}")]
    Http(#[from] hyper::http::Error),

    /// Connection or transfer failure before a complete response arrived
    #[error("request failed: {0}")]
    Request(String),

    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("S3 error: {status} {}: {message}", .code.as_deref().unwrap_or("-"))]
    S3Response {
        status: StatusCode,
        code: Option<String>,
        message: String,
    },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("client is closed")]
    Closed,
}

impl From<quick_xml::Error> for S3Error {
    fn from(err: quick_xml::Error) -> Self {
        S3Error::XmlParse(err.to_string())
    }
}

impl From<hyper_util::client::legacy::Error> for S3Error {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        S3Error::Request(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, S3Error>;

/// How the request body is represented in the signature
#[derive(Clone, Copy)]
enum Payload {
    /// SHA256 of the body (empty bodies and small XML documents)
    Hashed,
    Unsigned,
}

/// S3 client bound to one endpoint and one set of credentials
///
/// Clone is cheap; clones share the connection pool, and closing any clone
/// closes all of them.
#[derive(Clone)]
pub struct S3Client {
    /// `None` once closed
    client: Arc<RwLock<Option<HttpClient>>>,
    endpoint: String,
    signer: Arc<S3SignerV4>,
    timeout: Duration,
    multipart: MultipartConfig,
}

impl std::fmt::Debug for S3Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Client")
            .field("endpoint", &self.endpoint)
            .field("region", &self.signer.region())
            .field("timeout", &self.timeout)
            .field("multipart", &self.multipart)
            .finish()
    }
}

impl S3Client {
    /// Create a client for `endpoint` (`http://` or `https://`)
    ///
    /// Pool settings:
    /// - HTTP/1.1 only
    /// - 256 idle connections per host, 90s idle timeout
    /// - TCP_NODELAY, 90s TCP keepalive
    pub fn new(
        endpoint: &str,
        credentials: Credentials,
        region: Option<String>,
        insecure_tls: bool,
    ) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(S3Error::InvalidEndpoint(format!(
                "{endpoint:?} must start with http:// or https://"
            )));
        }

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(Duration::from_secs(10)));
        http.set_keepalive(Some(Duration::from_secs(90)));

        let tls = if insecure_tls {
            warn!("insecure TLS enabled: certificate verification is disabled");
            TlsConnector::builder()
                .danger_accept_invalid_certs(true)
                .danger_accept_invalid_hostnames(true)
                .build()
        } else {
            TlsConnector::new()
        }
        .map_err(|e| S3Error::Tls(e.to_string()))?;

        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(256)
            .set_host(true)
            .build(https);

        Ok(Self {
            client: Arc::new(RwLock::new(Some(client))),
            endpoint: endpoint.to_string(),
            signer: Arc::new(S3SignerV4::new(credentials, region)),
            timeout: Duration::from_secs(300),
            multipart: MultipartConfig::default(),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_multipart(mut self, multipart: MultipartConfig) -> Self {
        self.multipart = multipart;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn multipart(&self) -> &MultipartConfig {
        &self.multipart
    }

    /// Drop the connection pool. Requests issued afterwards fail with
    /// [`S3Error::Closed`]; requests already in flight finish normally.
    pub fn close(&self) {
        let mut guard = self
            .client
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.take().is_some() {
            debug!(endpoint = %self.endpoint, "S3 connection pool released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// A clone holding its own handle on the current connection pool, so
    /// closing `self` later does not close it
    fn pinned(&self) -> Result<Self> {
        let http = self.http()?;
        Ok(Self {
            client: Arc::new(RwLock::new(Some(http))),
            ..self.clone()
        })
    }

    fn http(&self) -> Result<HttpClient> {
        self.client
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(S3Error::Closed)
    }

    fn build_request(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
        payload: Payload,
    ) -> Result<Request<Full<Bytes>>> {
        let signed_headers = match payload {
            Payload::Hashed => self.signer.sign(method.as_str(), url, headers, &body),
            Payload::Unsigned => self.signer.sign_unsigned_payload(method.as_str(), url, headers),
        };

        let mut req = Request::builder().method(method).uri(url);
        for (key, value) in signed_headers.iter() {
            req = req.header(key, value);
        }
        Ok(req.body(Full::new(body))?)
    }

    /// Send a request and wait for the response head
    async fn dispatch(&self, request: Request<Full<Bytes>>) -> Result<Response<Incoming>> {
        let client = self.http()?;
        match tokio::time::timeout(self.timeout, client.request(request)).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(S3Error::Timeout(self.timeout)),
        }
    }

    /// Send a request and collect the full response.
    /// Non-2xx statuses become [`S3Error::S3Response`].
    async fn execute(
        &self,
        method: Method,
        url: &str,
        headers: BTreeMap<String, String>,
        body: Bytes,
        payload: Payload,
    ) -> Result<(HeaderMap, Bytes)> {
        let is_head = method == Method::HEAD;
        let request = self.build_request(method, url, headers, body, payload)?;

        let exchange = async {
            let response = self.dispatch(request).await?;
            let status = response.status();
            let (parts, body) = response.into_parts();
            let body = body
                .collect()
                .await
                .map_err(|e| S3Error::Request(format!("body error: {e}")))?
                .to_bytes();
            Ok::<_, S3Error>((status, parts.headers, body))
        };

        let (status, headers, body) = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(S3Error::Timeout(self.timeout)),
        };

        if !status.is_success() {
            return Err(error_from_response(status, &body, is_head));
        }
        Ok((headers, body))
    }

    /// Encode an S3 key, preserving forward slashes
    fn encode_s3_key(key: &str) -> Cow<'_, str> {
        let needs_encoding = key.bytes().any(|b| {
            !matches!(b, b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/')
        });
        if !needs_encoding {
            return Cow::Borrowed(key);
        }
        Cow::Owned(S3SignerV4::uri_encode(key, false))
    }

    fn build_url(&self, bucket: &str, key: &str) -> String {
        let encoded_key = Self::encode_s3_key(key);
        let mut url =
            String::with_capacity(self.endpoint.len() + bucket.len() + encoded_key.len() + 2);
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(bucket);
        url.push('/');
        url.push_str(&encoded_key);
        url
    }

    /// Object URL followed by `?` ready for query parameters
    fn build_query_url(&self, bucket: &str, key: &str) -> String {
        let mut url = self.build_url(bucket, key);
        url.push('?');
        url
    }

    fn url_encode_into(buf: &mut String, s: &str) {
        for byte in s.bytes() {
            match byte {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    buf.push(byte as char);
                }
                _ => {
                    buf.push('%');
                    buf.push(HEX_UPPER[(byte >> 4) as usize] as char);
                    buf.push(HEX_UPPER[(byte & 0xf) as usize] as char);
                }
            }
        }
    }

    /// ListObjectsV2 URL with parameters in alphabetical order
    pub fn build_list_url(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: Option<usize>,
        continuation_token: Option<&str>,
    ) -> String {
        let mut url = String::with_capacity(self.endpoint.len() + bucket.len() + 256);
        url.push_str(&self.endpoint);
        url.push('/');
        url.push_str(bucket);
        url.push_str("/?");

        if let Some(token) = continuation_token {
            url.push_str("continuation-token=");
            Self::url_encode_into(&mut url, token);
            url.push('&');
        }
        url.push_str("list-type=2&max-keys=");
        let _ = write!(url, "{}", max_keys.unwrap_or(1000).clamp(1, 1000));
        if let Some(p) = prefix.filter(|p| !p.is_empty()) {
            url.push_str("&prefix=");
            Self::url_encode_into(&mut url, p);
        }

        url
    }

    /// One ListObjectsV2 page
    pub async fn list_objects_v2(
        &self,
        bucket: &str,
        prefix: Option<&str>,
        max_keys: Option<usize>,
        continuation_token: Option<&str>,
    ) -> Result<ListObjectsResponse> {
        let url = self.build_list_url(bucket, prefix, max_keys, continuation_token);
        let (_, body) = self
            .execute(Method::GET, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        parse_list_response(&body)
    }

    /// GET the whole object body
    pub async fn get_object(&self, bucket: &str, key: &str) -> Result<Bytes> {
        let url = self.build_url(bucket, key);
        let (_, body) = self
            .execute(Method::GET, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        Ok(body)
    }

    /// Stream an object into `path`, creating or truncating it.
    ///
    /// Returns the number of bytes written. Only the response head is bounded
    /// by the request timeout; the body streams for as long as it takes.
    pub async fn download_object_to_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
    ) -> Result<u64> {
        let url = self.build_url(bucket, key);
        let request = self.build_request(
            Method::GET,
            &url,
            BTreeMap::new(),
            Bytes::new(),
            Payload::Hashed,
        )?;
        let response = self.dispatch(request).await?;
        let status = response.status();

        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map_err(|e| S3Error::Request(format!("body error: {e}")))?
                .to_bytes();
            return Err(error_from_response(status, &body, false));
        }

        let file = tokio::fs::File::create(path).await?;
        let mut writer = tokio::io::BufWriter::with_capacity(256 * 1024, file);
        let mut body = BodyStream::new(response.into_body());
        let mut total_bytes = 0u64;

        while let Some(frame) = body.next().await {
            let frame = frame.map_err(|e| S3Error::Request(format!("body error: {e}")))?;
            if let Some(chunk) = frame.data_ref() {
                writer.write_all(chunk).await?;
                total_bytes += chunk.len() as u64;
            }
        }

        writer.flush().await?;
        writer.into_inner().sync_all().await?;
        Ok(total_bytes)
    }

    /// Single-request PUT. Returns the ETag without quotes.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        let url = self.build_url(bucket, key);

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert("content-md5".to_string(), content_md5(&data));

        let (response_headers, _) = self
            .execute(Method::PUT, &url, headers, data, Payload::Unsigned)
            .await?;
        Ok(etag_header(&response_headers))
    }

    pub async fn head_object(&self, bucket: &str, key: &str) -> Result<HeadObjectResponse> {
        let url = self.build_url(bucket, key);
        let (headers, _) = self
            .execute(Method::HEAD, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;

        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let content_length = match header("content-length") {
            Some(value) => value.trim().parse().map_err(|_| {
                S3Error::InvalidResponse(format!("invalid Content-Length {value:?}"))
            })?,
            None => 0,
        };
        Ok(HeadObjectResponse {
            content_length,
            last_modified: header("last-modified"),
            etag: header("etag"),
            content_type: header("content-type"),
        })
    }

    /// DELETE an object. S3 answers 204 whether or not the key existed.
    pub async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        let url = self.build_url(bucket, key);
        self.execute(Method::DELETE, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        Ok(())
    }

    // =========================================================================
    // Multipart Upload Operations
    // =========================================================================

    pub async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        content_type: &str,
    ) -> Result<CreateMultipartUploadResponse> {
        let mut url = self.build_query_url(bucket, key);
        url.push_str("uploads=");

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), content_type.to_string());

        let (_, body) = self
            .execute(Method::POST, &url, headers, Bytes::new(), Payload::Hashed)
            .await?;
        parse_create_multipart_response(&body)
    }

    /// Upload one part (numbered from 1). Every part except the last must be
    /// at least 5MB.
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<CompletedPart> {
        let mut url = self.build_query_url(bucket, key);
        let _ = write!(url, "partNumber={}&uploadId=", part_number);
        Self::url_encode_into(&mut url, upload_id);

        let mut headers = BTreeMap::new();
        headers.insert("content-length".to_string(), data.len().to_string());
        headers.insert("content-md5".to_string(), content_md5(&data));

        let (response_headers, _) = self
            .execute(Method::PUT, &url, headers, data, Payload::Unsigned)
            .await?;
        Ok(CompletedPart::new(part_number, etag_header(&response_headers)))
    }

    /// `parts` must be sorted by part number
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompleteMultipartUploadResponse> {
        let mut url = self.build_query_url(bucket, key);
        url.push_str("uploadId=");
        Self::url_encode_into(&mut url, upload_id);

        let mut xml = String::with_capacity(parts.len() * 100 + 100);
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?><CompleteMultipartUpload>");
        for part in parts {
            let _ = write!(
                xml,
                "<Part><PartNumber>{}</PartNumber><ETag>\"{}\"</ETag></Part>",
                part.part_number,
                part.etag.trim_matches('"')
            );
        }
        xml.push_str("</CompleteMultipartUpload>");
        let xml = Bytes::from(xml);

        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/xml".to_string());
        headers.insert("content-length".to_string(), xml.len().to_string());

        let (_, body) = self
            .execute(Method::POST, &url, headers, xml, Payload::Hashed)
            .await?;
        parse_complete_multipart_response(&body)
    }

    /// Discard an upload and every part stored for it
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<()> {
        let mut url = self.build_query_url(bucket, key);
        url.push_str("uploadId=");
        Self::url_encode_into(&mut url, upload_id);

        self.execute(Method::DELETE, &url, BTreeMap::new(), Bytes::new(), Payload::Hashed)
            .await?;
        Ok(())
    }

    /// Managed transfer of a local file.
    ///
    /// Empty files and files below the multipart threshold go up in one PUT;
    /// larger files are read part by part so memory stays bounded by the part
    /// size. A failed part aborts the whole upload, and so does dropping the
    /// future before it completes. Returns the final ETag.
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<String> {
        let file_size = tokio::fs::metadata(path).await?.len();

        if file_size == 0 || file_size < self.multipart.threshold {
            let data = tokio::fs::read(path).await?;
            return self
                .put_object(bucket, key, Bytes::from(data), content_type)
                .await;
        }

        let upload = self.create_multipart_upload(bucket, key, content_type).await?;
        debug!(
            bucket = %bucket,
            key = %key,
            upload_id = %upload.upload_id,
            file_size,
            "started multipart upload"
        );

        let mut guard = AbortOnDrop::new(self, bucket, key, &upload.upload_id);
        let result = match self
            .upload_parts(bucket, key, &upload.upload_id, path, file_size)
            .await
        {
            Ok(parts) => self
                .complete_multipart_upload(bucket, key, &upload.upload_id, &parts)
                .await
                .map(|complete| complete.etag),
            Err(e) => Err(e),
        };

        match result {
            Ok(etag) => {
                guard.disarm();
                Ok(etag)
            }
            Err(e) => {
                guard.abort().await;
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        path: &Path,
        file_size: u64,
    ) -> Result<Vec<CompletedPart>> {
        let part_size = self.multipart.part_size_for(file_size);
        let num_parts = file_size.div_ceil(part_size as u64) as usize;
        let mut parts = Vec::with_capacity(num_parts);

        let mut file = tokio::fs::File::open(path).await?;

        for index in 0..num_parts {
            let mut buffer = vec![0u8; part_size];
            let mut filled = 0;
            while filled < part_size {
                let n = file.read(&mut buffer[filled..]).await?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            buffer.truncate(filled);

            let part_number = (index + 1) as u32;
            let part = self
                .upload_part(bucket, key, upload_id, part_number, Bytes::from(buffer))
                .await?;
            parts.push(part);
        }

        Ok(parts)
    }
}

/// Aborts a multipart upload that is dropped before it completes or fails,
/// which is what cancellation does to an in-flight `upload_file`
struct AbortOnDrop {
    client: S3Client,
    bucket: String,
    key: String,
    upload_id: String,
    armed: bool,
}

impl AbortOnDrop {
    fn new(client: &S3Client, bucket: &str, key: &str, upload_id: &str) -> Self {
        // The store is usually closed right after it cancels the upload
        Self {
            client: client.pinned().unwrap_or_else(|_| client.clone()),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: upload_id.to_string(),
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Abort in place; if this future is dropped too, `Drop` still spawns one
    async fn abort(mut self) {
        if let Err(e) = self
            .client
            .abort_multipart_upload(&self.bucket, &self.key, &self.upload_id)
            .await
        {
            warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "failed to abort multipart upload"
            );
        }
        self.disarm();
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                "no runtime to abort interrupted multipart upload"
            );
            return;
        };

        let client = self.client.clone();
        let bucket = std::mem::take(&mut self.bucket);
        let key = std::mem::take(&mut self.key);
        let upload_id = std::mem::take(&mut self.upload_id);
        debug!(key = %key, upload_id = %upload_id, "aborting interrupted multipart upload");

        handle.spawn(async move {
            if let Err(e) = client
                .abort_multipart_upload(&bucket, &key, &upload_id)
                .await
            {
                warn!(
                    key = %key,
                    upload_id = %upload_id,
                    error = %e,
                    "failed to abort interrupted multipart upload"
                );
            }
        });
    }
}

/// Base64 MD5 digest; S3 rejects the upload if the body does not match
fn content_md5(data: &[u8]) -> String {
    base64::Engine::encode(
        &base64::engine::general_purpose::STANDARD,
        md5::compute(data).0,
    )
}

fn etag_header(headers: &HeaderMap) -> String {
    headers
        .get("etag")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.trim_matches('"').to_string())
        .unwrap_or_default()
}

/// Build an error from a non-2xx response, reading `<Code>` and `<Message>`
/// from the XML error document when there is one
fn error_from_response(status: StatusCode, body: &[u8], is_head: bool) -> S3Error {
    let (code, message) = if is_head || body.is_empty() {
        (None, None)
    } else {
        parse_error_document(body)
    };

    S3Error::S3Response {
        status,
        code,
        message: message.unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("unexpected status")
                .to_string()
        }),
    }
}

fn parse_error_document(xml_data: &[u8]) -> (Option<String>, Option<String>) {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut code = None;
    let mut message = None;
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                if let Ok(text) = e.unescape() {
                    current_text.push_str(&text);
                }
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Code" => code = Some(std::mem::take(&mut current_text)),
                    b"Message" => message = Some(std::mem::take(&mut current_text)),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
    }

    (code, message)
}

/// Parse a ListObjectsV2 XML response.
///
/// Text is kept verbatim: keys may start or end with spaces, or be nothing
/// but spaces.
pub(crate) fn parse_list_response(xml_data: &[u8]) -> Result<ListObjectsResponse> {
    let mut reader = Reader::from_reader(xml_data);

    let mut response = ListObjectsResponse::new();
    let mut current_object: Option<S3Object> = None;
    let mut current_text = String::with_capacity(256);

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if e.local_name().as_ref() == b"Contents" {
                    current_object = Some(S3Object::new(String::new(), 0));
                }
                current_text.clear();
            }
            Ok(Event::Text(e)) => current_text.push_str(&e.unescape()?),
            Ok(Event::End(e)) => {
                match (e.local_name().as_ref(), current_object.as_mut()) {
                    (b"Key", Some(obj)) => obj.key = std::mem::take(&mut current_text),
                    (b"Size", Some(obj)) => {
                        obj.size = current_text.trim().parse().map_err(|_| {
                            S3Error::InvalidResponse(format!(
                                "invalid Size {:?} for key {:?}",
                                current_text, obj.key
                            ))
                        })?
                    }
                    (b"LastModified", Some(obj)) => {
                        obj.last_modified = Some(current_text.trim().to_string())
                    }
                    (b"ETag", Some(obj)) => obj.etag = Some(current_text.trim().to_string()),
                    (b"Contents", _) => {
                        if let Some(obj) = current_object.take() {
                            response.contents.push(obj);
                        }
                    }
                    (b"Prefix", None) => response.prefix = Some(std::mem::take(&mut current_text)),
                    (b"IsTruncated", None) => {
                        response.is_truncated = current_text.trim() == "true"
                    }
                    (b"NextContinuationToken", None) => {
                        response.next_continuation_token = Some(current_text.trim().to_string())
                    }
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(response)
}

fn parse_create_multipart_response(xml_data: &[u8]) -> Result<CreateMultipartUploadResponse> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut bucket = String::new();
    let mut key = String::new();
    let mut upload_id = String::new();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"UploadId" => upload_id = std::mem::take(&mut current_text),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    if upload_id.is_empty() {
        return Err(S3Error::InvalidResponse(
            "missing UploadId in response".to_string(),
        ));
    }

    Ok(CreateMultipartUploadResponse {
        bucket,
        key,
        upload_id,
    })
}

fn parse_complete_multipart_response(xml_data: &[u8]) -> Result<CompleteMultipartUploadResponse> {
    let mut reader = Reader::from_reader(xml_data);
    reader.config_mut().trim_text_start = true;
    reader.config_mut().trim_text_end = true;

    let mut location = None;
    let mut bucket = String::new();
    let mut key = String::new();
    let mut etag = String::new();
    let mut current_text = String::with_capacity(128);

    loop {
        match reader.read_event() {
            Ok(Event::Text(e)) => {
                current_text.clear();
                current_text.push_str(&e.unescape()?);
            }
            Ok(Event::End(e)) => {
                match e.local_name().as_ref() {
                    b"Location" => location = Some(std::mem::take(&mut current_text)),
                    b"Bucket" => bucket = std::mem::take(&mut current_text),
                    b"Key" => key = std::mem::take(&mut current_text),
                    b"ETag" => etag = current_text.trim_matches('"').to_string(),
                    _ => {}
                }
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.into()),
            _ => {}
        }
    }

    Ok(CompleteMultipartUploadResponse {
        location,
        bucket,
        key,
        etag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> S3Client {
        S3Client::new(
            "http://localhost:9000/",
            Credentials::new("access", "secret", None, "static"),
            None,
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_endpoint_without_scheme() {
        let err = S3Client::new(
            "localhost:9000",
            Credentials::new("a", "b", None, "static"),
            None,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, S3Error::InvalidEndpoint(_)));
    }

    #[test]
    fn test_encode_s3_key() {
        let result = S3Client::encode_s3_key("path/to/file.txt");
        assert!(matches!(result, Cow::Borrowed(_)));

        let result = S3Client::encode_s3_key("path/to/file with spaces.txt");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "path/to/file%20with%20spaces.txt");
    }

    #[test]
    fn test_build_urls() {
        let client = client();
        assert_eq!(client.endpoint(), "http://localhost:9000");
        assert_eq!(
            client.build_url("bucket", "a/b c.txt"),
            "http://localhost:9000/bucket/a/b%20c.txt"
        );
        assert_eq!(
            client.build_list_url("bucket", Some("logs/"), Some(2), Some("tok+en")),
            "http://localhost:9000/bucket/?continuation-token=tok%2Ben&list-type=2&max-keys=2&prefix=logs%2F"
        );
        assert_eq!(
            client.build_list_url("bucket", Some(""), None, None),
            "http://localhost:9000/bucket/?list-type=2&max-keys=1000"
        );
    }

    #[test]
    fn test_parse_list_response() {
        let xml = br#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>bucket</Name>
  <Prefix>logs/</Prefix>
  <KeyCount>2</KeyCount>
  <MaxKeys>2</MaxKeys>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr</NextContinuationToken>
  <Contents>
    <Key>logs/a.txt</Key>
    <LastModified>2009-10-12T17:50:30.000Z</LastModified>
    <ETag>&quot;fba9dede5f27731c9771645a39863328&quot;</ETag>
    <Size>434234</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>logs/b &amp; c.txt</Key>
    <Size>0</Size>
  </Contents>
</ListBucketResult>"#;

        let response = parse_list_response(xml).unwrap();
        assert!(response.is_truncated);
        assert_eq!(response.next_continuation_token.as_deref(), Some("1ueGcxLPRx1Tr"));
        assert_eq!(response.prefix.as_deref(), Some("logs/"));
        assert_eq!(response.contents.len(), 2);
        assert_eq!(response.contents[0].key, "logs/a.txt");
        assert_eq!(response.contents[0].size, 434234);
        assert_eq!(response.contents[1].key, "logs/b & c.txt");

        let info = response.contents[0].clone().into_info().unwrap();
        assert_eq!(info.etag, "fba9dede5f27731c9771645a39863328");
    }

    #[test]
    fn test_parse_list_keeps_key_whitespace() {
        let xml = b"<ListBucketResult>\n  <IsTruncated>false</IsTruncated>\n  \
<Contents>\n    <Key>trailing </Key>\n    <Size>1</Size>\n  </Contents>\n  \
<Contents>\n    <Key>  lead</Key>\n    <Size>2</Size>\n  </Contents>\n  \
<Contents>\n    <Key>   </Key>\n    <Size>3</Size>\n  </Contents>\n\
</ListBucketResult>";

        let response = parse_list_response(xml).unwrap();
        let keys: Vec<&str> = response.contents.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["trailing ", "  lead", "   "]);
        assert_eq!(response.contents[2].size, 3);
        assert!(!response.is_truncated);
    }

    #[test]
    fn test_parse_list_rejects_bad_size() {
        let xml = b"<ListBucketResult><Contents><Key>k</Key><Size>lots</Size></Contents></ListBucketResult>";
        let err = parse_list_response(xml).unwrap_err();
        assert!(matches!(err, S3Error::InvalidResponse(ref m) if m.contains("lots")));
    }

    #[test]
    fn test_parse_empty_list_response() {
        let xml = br#"<ListBucketResult><Name>bucket</Name><KeyCount>0</KeyCount><IsTruncated>false</IsTruncated></ListBucketResult>"#;
        let response = parse_list_response(xml).unwrap();
        assert!(response.contents.is_empty());
        assert!(!response.is_truncated);
        assert!(response.next_continuation_token.is_none());
    }

    #[test]
    fn test_error_from_response_reads_code() {
        let xml = br#"<Error><Code>NoSuchKey</Code><Message>The specified key does not exist.</Message></Error>"#;
        match error_from_response(StatusCode::NOT_FOUND, xml, false) {
            S3Error::S3Response { status, code, message } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(code.as_deref(), Some("NoSuchKey"));
                assert_eq!(message, "The specified key does not exist.");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match error_from_response(StatusCode::FORBIDDEN, b"", true) {
            S3Error::S3Response { code, message, .. } => {
                assert!(code.is_none());
                assert_eq!(message, "Forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_parse_multipart_responses() {
        let created = parse_create_multipart_response(
            b"<InitiateMultipartUploadResult><Bucket>b</Bucket><Key>k</Key><UploadId>abc123</UploadId></InitiateMultipartUploadResult>",
        )
        .unwrap();
        assert_eq!(created.upload_id, "abc123");

        let missing = parse_create_multipart_response(b"<InitiateMultipartUploadResult/>");
        assert!(matches!(missing, Err(S3Error::InvalidResponse(_))));

        let completed = parse_complete_multipart_response(
            b"<CompleteMultipartUploadResult><Location>http://x/b/k</Location><Bucket>b</Bucket><Key>k</Key><ETag>&quot;3858f62230ac3c915f300c664312c11f-9&quot;</ETag></CompleteMultipartUploadResult>",
        )
        .unwrap();
        assert_eq!(completed.etag, "3858f62230ac3c915f300c664312c11f-9");
        assert_eq!(completed.location.as_deref(), Some("http://x/b/k"));
    }

    #[test]
    fn test_content_md5() {
        assert_eq!(content_md5(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[tokio::test]
    async fn test_closed_client_rejects_requests() {
        let client = client();
        let clone = client.clone();
        client.close();
        client.close();
        assert!(clone.is_closed());

        let err = clone.get_object("bucket", "key").await.unwrap_err();
        assert!(matches!(err, S3Error::Closed));
    }
}
