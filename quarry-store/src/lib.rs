//! # quarry-store
//!
//! The local half of the quarry repository system:
//! - [`tracking`] — file-locked key-value records colocated with cached files
//! - [`layout`] — coordinate → relative path mapping
//! - [`local`] — simple and enhanced local repository managers
//! - [`sync`] — cross-process mutual exclusion keyed by coordinate fingerprints

pub mod error;
pub mod layout;
pub mod local;
pub mod sync;
pub mod tracking;

pub use error::StoreError;
pub use local::{
    default_basedir, EnhancedLocalRepositoryManager, LocalArtifactRegistration,
    LocalArtifactRequest, LocalArtifactResult, LocalMetadataRegistration, LocalMetadataRequest,
    LocalMetadataResult, LocalRepositoryManager, SimpleLocalRepositoryManager,
};
pub use sync::{SyncContext, SyncContextFactory};
