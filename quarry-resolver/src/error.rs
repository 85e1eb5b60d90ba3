//! Error types for quarry-resolver.
//!
//! Per-request failures are value-like (cloneable, message-carrying) so they
//! can be collected into results, replayed from the error cache and rendered
//! into events. The batch-level errors carry the full result lists.

use thiserror::Error;

use crate::artifact::ArtifactResult;
use crate::metadata::MetadataResult;

/// A failure attached to a single request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// The external version resolver could not bind a concrete version.
    #[error("failed to resolve version for {coordinates}: {reason}")]
    VersionResolution { coordinates: String, reason: String },

    /// Confirmed absence, or cached absence that policy forbids retrying.
    #[error("artifact {coordinates} was not found in {location}")]
    ArtifactNotFound { coordinates: String, location: String },

    #[error("metadata {coordinates} was not found in {location}")]
    MetadataNotFound { coordinates: String, location: String },

    #[error("failed to transfer artifact {coordinates} from {repository}: {reason}")]
    ArtifactTransfer {
        coordinates: String,
        repository: String,
        reason: String,
    },

    #[error("failed to transfer metadata {coordinates} from {repository}: {reason}")]
    MetadataTransfer {
        coordinates: String,
        repository: String,
        reason: String,
    },

    /// Refused because the session is offline and the repository is not in
    /// the offline allow lists.
    #[error("repository {repository} is not accessible in offline mode")]
    RepositoryOffline { repository: String },

    /// No connector factory accepted the repository.
    #[error("no connector available for repository {repository}")]
    NoConnector { repository: String },

    #[error("installation of {item} failed: {reason}")]
    Installation { item: String, reason: String },

    #[error("deployment of {item} failed: {reason}")]
    Deployment { item: String, reason: String },
}

impl ResolveError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ResolveError::ArtifactNotFound { .. } | ResolveError::MetadataNotFound { .. }
        )
    }
}

/// Batch-level failure: at least one artifact request ended without a file.
/// Carries every result, including the successful ones.
#[derive(Debug, Clone, Error)]
pub struct ArtifactResolutionError {
    pub results: Vec<ArtifactResult>,
}

impl std::fmt::Display for ArtifactResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed = self.results.iter().filter(|r| !r.is_resolved()).count();
        write!(
            f,
            "could not resolve {failed} of {} artifact request(s)",
            self.results.len()
        )
    }
}

/// Batch-level failure for metadata resolution.
#[derive(Debug, Clone, Error)]
pub struct MetadataResolutionError {
    pub results: Vec<MetadataResult>,
}

impl std::fmt::Display for MetadataResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let failed = self.results.iter().filter(|r| !r.is_resolved()).count();
        write!(
            f,
            "could not resolve {failed} of {} metadata request(s)",
            self.results.len()
        )
    }
}
