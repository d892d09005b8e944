//! WebDAV transport for the media relay.
//!
//! - Remote path construction with per-segment percent-encoding
//! - Directory provisioning (MKCOL) cached once per prefix per process
//! - Streaming PUT with per-chunk progress, pause/abort hooks and linear retry
//! - Connectivity probe (PROPFIND with OPTIONS fallback)

pub mod client;
pub mod config;
pub mod dir_cache;
pub mod error;
pub mod executor;
pub mod path;
pub mod probe;
pub mod source;

pub use client::WebDavClient;
pub use config::WebDavConfig;
pub use dir_cache::{CollectionCreator, DirectoryCache, ProvisionOutcome};
pub use error::TransferError;
pub use executor::{NoopObserver, TransferExecutor, TransferObserver};
pub use path::RemotePath;
pub use probe::{ProbeResult, test_connection};
pub use source::{ByteSource, ByteStream, FileSource, MemorySource};
