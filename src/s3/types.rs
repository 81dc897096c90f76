//! S3 types and response structures

use crate::s3::client::S3Error;
use crate::store::ObjectInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One `<Contents>` entry of a ListObjectsV2 response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Object {
    /// Object key
    pub key: String,
    /// Object size in bytes
    pub size: u64,
    /// Last modified timestamp as sent by the server (ISO 8601)
    pub last_modified: Option<String>,
    /// ETag, usually quoted
    pub etag: Option<String>,
}

impl S3Object {
    pub fn new(key: String, size: u64) -> Self {
        Self {
            key,
            size,
            last_modified: None,
            etag: None,
        }
    }

    /// Normalize into the facade's record. A missing timestamp becomes the
    /// Unix epoch; one that does not parse is an error.
    pub fn into_info(self) -> Result<ObjectInfo, S3Error> {
        let last_modified = match self.last_modified.as_deref() {
            Some(value) => parse_iso8601(value).ok_or_else(|| {
                S3Error::InvalidResponse(format!(
                    "invalid LastModified {value:?} for key {:?}",
                    self.key
                ))
            })?,
            None => DateTime::default(),
        };
        Ok(ObjectInfo {
            key: self.key,
            size: self.size,
            last_modified,
            etag: self.etag.as_deref().map(unquote_etag).unwrap_or_default(),
        })
    }
}

/// Response from ListObjectsV2 operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListObjectsResponse {
    pub contents: Vec<S3Object>,
    pub is_truncated: bool,
    /// Continuation token for next request
    pub next_continuation_token: Option<String>,
    pub prefix: Option<String>,
}

impl ListObjectsResponse {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Headers of a HEAD object response
#[derive(Debug, Clone, Default)]
pub struct HeadObjectResponse {
    pub content_length: u64,
    /// `Last-Modified` header (RFC 7231 HTTP-date)
    pub last_modified: Option<String>,
    pub etag: Option<String>,
    pub content_type: Option<String>,
}

impl HeadObjectResponse {
    pub fn into_info(self, key: &str) -> Result<ObjectInfo, S3Error> {
        let last_modified = match self.last_modified.as_deref() {
            Some(value) => parse_http_date(value).ok_or_else(|| {
                S3Error::InvalidResponse(format!(
                    "invalid Last-Modified {value:?} for key {key:?}"
                ))
            })?,
            None => DateTime::default(),
        };
        Ok(ObjectInfo {
            key: key.to_string(),
            size: self.content_length,
            last_modified,
            etag: self.etag.as_deref().map(unquote_etag).unwrap_or_default(),
        })
    }
}

// =============================================================================
// Multipart Upload Types
// =============================================================================

/// Response from CreateMultipartUpload operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMultipartUploadResponse {
    pub bucket: String,
    pub key: String,
    /// Upload ID for subsequent UploadPart and CompleteMultipartUpload requests
    pub upload_id: String,
}

/// Part information for CompleteMultipartUpload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletedPart {
    /// Part number (1-10000)
    pub part_number: u32,
    /// ETag returned from UploadPart
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: String) -> Self {
        Self { part_number, etag }
    }
}

/// Response from CompleteMultipartUpload operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteMultipartUploadResponse {
    pub location: Option<String>,
    pub bucket: String,
    pub key: String,
    pub etag: String,
}

/// Managed-transfer policy for file uploads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartConfig {
    /// Part size in bytes (S3 minimum 5MB, except the last part)
    pub part_size: usize,
    /// Files at or above this size go through multipart upload
    pub threshold: u64,
}

/// S3 rejects parts smaller than this (other than the last one)
pub const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3 accepts at most this many parts per upload
pub const MAX_PARTS: u64 = 10_000;

impl Default for MultipartConfig {
    fn default() -> Self {
        Self {
            part_size: 8 * 1024 * 1024,
            threshold: 64 * 1024 * 1024,
        }
    }
}

impl MultipartConfig {
    pub fn with_part_size(mut self, size: usize) -> Self {
        self.part_size = size.max(MIN_PART_SIZE);
        self
    }

    pub fn with_threshold(mut self, threshold: u64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Part size for a file of `file_size` bytes, grown as needed to stay
    /// within the 10,000 part limit
    pub fn part_size_for(&self, file_size: u64) -> usize {
        let min_for_limit = file_size.div_ceil(MAX_PARTS) as usize;
        self.part_size.max(min_for_limit)
    }
}

/// Strip the quotes S3 puts around ETags
pub fn unquote_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

/// Parse the ISO 8601 timestamps used in XML bodies (`2009-10-12T17:50:30.000Z`)
pub fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse an HTTP-date header (`Wed, 21 Oct 2015 07:28:00 GMT`)
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
