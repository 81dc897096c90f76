//! Command-line front end
//!
//! Objects are addressed either as `s3://bucket/key` or as a bare key, which
//! resolves against the profile's default bucket.
//!
//! ```bash
//! bucketstore ls s3://bucket/logs/
//! bucketstore put ./report.pdf s3://bucket/reports/2024.pdf
//! bucketstore get reports/2024.pdf ./report.pdf
//! bucketstore cat s3://bucket/config.json
//! bucketstore rm s3://bucket/tmp/scratch
//! bucketstore stat s3://bucket/reports/2024.pdf --json
//! bucketstore health
//! ```

pub mod commands;

use anyhow::Result;

/// A parsed object address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectPath {
    /// `None` means "the profile's default bucket"
    pub bucket: Option<String>,
    /// Key or prefix; may be empty for bucket-level commands
    pub key: String,
}

impl ObjectPath {
    /// Accepts `s3://bucket/key`, `s3/bucket/key` (mc style) or a bare key
    pub fn parse(path: &str) -> Result<Self> {
        let path = path.trim();

        let stripped = match path
            .strip_prefix("s3://")
            .or_else(|| path.strip_prefix("s3/"))
        {
            Some(rest) => rest,
            None => {
                return Ok(Self {
                    bucket: None,
                    key: path.trim_start_matches('/').to_string(),
                })
            }
        };

        let (bucket, key) = stripped.split_once('/').unwrap_or((stripped, ""));
        if bucket.is_empty() {
            anyhow::bail!("Bucket name cannot be empty in {:?}", path);
        }

        Ok(Self {
            bucket: Some(bucket.to_string()),
            key: key.to_string(),
        })
    }

    /// The key, failing for bucket-only paths
    pub fn require_key(&self) -> Result<&str> {
        if self.key.is_empty() {
            anyhow::bail!("An object key is required");
        }
        Ok(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uri() {
        assert_eq!(
            ObjectPath::parse("s3://mybucket/path/to/key").unwrap(),
            ObjectPath {
                bucket: Some("mybucket".to_string()),
                key: "path/to/key".to_string()
            }
        );
        assert_eq!(
            ObjectPath::parse("s3/mybucket").unwrap(),
            ObjectPath {
                bucket: Some("mybucket".to_string()),
                key: String::new()
            }
        );
    }

    #[test]
    fn test_parse_bare_key() {
        let path = ObjectPath::parse("/reports/2024.pdf").unwrap();
        assert_eq!(path.bucket, None);
        assert_eq!(path.key, "reports/2024.pdf");
    }

    #[test]
    fn test_empty_bucket_rejected() {
        assert!(ObjectPath::parse("s3:///key").is_err());
    }

    #[test]
    fn test_require_key() {
        assert!(ObjectPath::parse("s3://bucket/").unwrap().require_key().is_err());
        assert_eq!(
            ObjectPath::parse("s3://bucket/k").unwrap().require_key().unwrap(),
            "k"
        );
    }
}
