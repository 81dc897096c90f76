//! S3 backend with AWS SigV4 signing
//!
//! This module provides:
//! - AWS Signature Version 4 signing, including temporary credentials
//! - Async S3 operations (list, get, put, head, delete, multipart)
//! - The [`ObjectBackend`](crate::store::ObjectBackend) implementation used by the facade

mod backend;
pub mod client;
pub mod signer;
pub mod types;

pub use client::{Result, S3Client, S3Error};
pub use signer::S3SignerV4;
pub use types::{
    CompleteMultipartUploadResponse, CompletedPart, CreateMultipartUploadResponse,
    HeadObjectResponse, ListObjectsResponse, MultipartConfig, S3Object,
};
