//! bucketstore - a small object-store facade over S3
//!
//! [`ObjectStore`] offers list, upload, download, delete and exists on one
//! bucket of any [`ObjectBackend`]. [`S3Client`] is the production backend and
//! [`MemoryBackend`] an in-process one. [`Core`] wires configuration and the
//! credential provider chain into a ready store.

pub mod cli;
pub mod config;
pub mod core;
pub mod credentials;
pub mod s3;
pub mod store;

pub use config::Config;
pub use core::Core;
pub use credentials::{CredentialChain, CredentialProvider, Credentials, CredentialsError};
pub use s3::S3Client;
pub use store::memory::MemoryBackend;
pub use store::{ErrorKind, ListPage, ObjectBackend, ObjectInfo, ObjectStore, StoreError};
pub use tokio_util::sync::CancellationToken;
