//! [`ObjectBackend`] implementation for [`S3Client`]

use crate::s3::client::{S3Client, S3Error};
use crate::s3::types::S3Object;
use crate::store::{ListPage, ObjectBackend, ObjectInfo, Result, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;
use std::path::Path;
use tracing::debug;

impl S3Error {
    /// Map onto the store taxonomy. `resource` names what was being accessed
    /// (`bucket/key`) and ends up in the message.
    pub fn into_store_error(self, resource: &str) -> StoreError {
        match self {
            S3Error::S3Response {
                status,
                code,
                message,
            } => {
                let detail = match &code {
                    Some(code) => format!("{resource}: {code}: {message}"),
                    None => format!("{resource}: {message}"),
                };
                if status == StatusCode::NOT_FOUND {
                    StoreError::NotFound(detail)
                } else if status == StatusCode::UNAUTHORIZED
                    || status == StatusCode::FORBIDDEN
                    || code.as_deref() == Some("AccessDenied")
                {
                    StoreError::Permission(detail)
                } else if status == StatusCode::REQUEST_TIMEOUT
                    || status == StatusCode::TOO_MANY_REQUESTS
                    || status.is_server_error()
                {
                    StoreError::TransientBackend(detail)
                } else {
                    StoreError::Backend {
                        status: Some(status.as_u16()),
                        message: detail,
                    }
                }
            }
            S3Error::Request(_) | S3Error::Timeout(_) => {
                StoreError::TransientBackend(format!("{resource}: {self}"))
            }
            S3Error::InvalidEndpoint(_) | S3Error::Tls(_) => {
                StoreError::Configuration(self.to_string())
            }
            S3Error::Io(e) => StoreError::Io(e),
            S3Error::Closed => StoreError::Closed,
            S3Error::Http(_) | S3Error::XmlParse(_) | S3Error::InvalidResponse(_) => {
                StoreError::backend(format!("{resource}: {self}"))
            }
        }
    }
}

impl From<S3Error> for StoreError {
    fn from(err: S3Error) -> Self {
        err.into_store_error("s3")
    }
}

fn resource(bucket: &str, key: &str) -> String {
    format!("{bucket}/{key}")
}

#[async_trait]
impl ObjectBackend for S3Client {
    fn scheme(&self) -> &str {
        "s3"
    }

    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&str>,
        max_keys: Option<usize>,
    ) -> Result<ListPage> {
        let response = self
            .list_objects_v2(bucket, Some(prefix), max_keys, cursor)
            .await
            .map_err(|e| e.into_store_error(bucket))?;

        // A truncated page without a token would loop forever; treat as the end
        let next_cursor = if response.is_truncated {
            response.next_continuation_token
        } else {
            None
        };

        debug!(
            bucket = %bucket,
            prefix = %prefix,
            count = response.contents.len(),
            truncated = response.is_truncated,
            "fetched listing page"
        );

        let objects = response
            .contents
            .into_iter()
            .map(S3Object::into_info)
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| e.into_store_error(bucket))?;

        Ok(ListPage {
            objects,
            next_cursor,
        })
    }

    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<()> {
        self.put_object(bucket, key, data, content_type)
            .await
            .map_err(|e| e.into_store_error(&resource(bucket, key)))?;
        Ok(())
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<()> {
        self.upload_file(bucket, key, path, content_type)
            .await
            .map_err(|e| e.into_store_error(&resource(bucket, key)))?;
        Ok(())
    }

    async fn get_bytes(&self, bucket: &str, key: &str) -> Result<Bytes> {
        self.get_object(bucket, key)
            .await
            .map_err(|e| e.into_store_error(&resource(bucket, key)))
    }

    async fn get_to_file(&self, bucket: &str, key: &str, path: &Path) -> Result<u64> {
        self.download_object_to_file(bucket, key, path)
            .await
            .map_err(|e| e.into_store_error(&resource(bucket, key)))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectInfo> {
        let head = self
            .head_object(bucket, key)
            .await
            .map_err(|e| e.into_store_error(&resource(bucket, key)))?;
        head.into_info(key)
            .map_err(|e| e.into_store_error(&resource(bucket, key)))
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool> {
        self.delete_object(bucket, key)
            .await
            .map_err(|e| e.into_store_error(&resource(bucket, key)))?;
        Ok(true)
    }

    fn close(&self) {
        S3Client::close(self);
    }
}
