//! The repository connector interface and its transfer carriers.
//!
//! A connector performs the wire-level transfers for exactly one remote
//! repository. The resolver batches all downloads of a resolution group into
//! one `get` call; whether the connector parallelizes within the batch is its
//! own business (the `quarry.*.threads` session keys are its hint).

use std::path::PathBuf;

use quarry_core::session::RepositorySession;
use quarry_core::types::{Artifact, ChecksumPolicy, Metadata, RemoteRepository};

use crate::error::ResolveError;

/// One artifact transfer from a remote into a local file.
#[derive(Debug, Clone)]
pub struct ArtifactDownload {
    pub artifact: Artifact,
    /// Destination (or, for existence checks, the already-present file).
    pub file: PathBuf,
    /// When set, the connector only verifies that the remote offers the
    /// artifact instead of transferring the bytes again.
    pub existence_check: bool,
    pub checksum_policy: ChecksumPolicy,
    /// The request context the download was issued for.
    pub context: String,
    /// Contexts beyond [`ArtifactDownload::context`] the transfer may satisfy.
    pub supported_contexts: Vec<String>,
    /// The mirrored repositories of a repository manager, for connectors that
    /// rewrite or verify against the member URLs.
    pub repositories: Vec<RemoteRepository>,
    /// Set by the connector on failure.
    pub error: Option<ResolveError>,
}

impl ArtifactDownload {
    pub fn new(artifact: Artifact, file: PathBuf, context: impl Into<String>) -> Self {
        Self {
            artifact,
            file,
            existence_check: false,
            checksum_policy: ChecksumPolicy::default(),
            context: context.into(),
            supported_contexts: Vec::new(),
            repositories: Vec::new(),
            error: None,
        }
    }

    /// The contexts a successful transfer is registered under; defaults to
    /// the request context.
    pub fn effective_contexts(&self) -> Vec<String> {
        if self.supported_contexts.is_empty() {
            vec![self.context.clone()]
        } else {
            self.supported_contexts.clone()
        }
    }
}

/// One metadata transfer from a remote into a local file.
#[derive(Debug, Clone)]
pub struct MetadataDownload {
    pub metadata: Metadata,
    pub file: PathBuf,
    pub checksum_policy: ChecksumPolicy,
    pub context: String,
    pub error: Option<ResolveError>,
}

impl MetadataDownload {
    pub fn new(metadata: Metadata, file: PathBuf, context: impl Into<String>) -> Self {
        Self {
            metadata,
            file,
            checksum_policy: ChecksumPolicy::default(),
            context: context.into(),
            error: None,
        }
    }
}

/// One artifact transfer from a local file up to a remote.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub artifact: Artifact,
    pub file: PathBuf,
    pub error: Option<ResolveError>,
}

/// One metadata transfer from a local file up to a remote.
#[derive(Debug, Clone)]
pub struct MetadataUpload {
    pub metadata: Metadata,
    pub file: PathBuf,
    pub error: Option<ResolveError>,
}

/// Wire-level transfers for one remote repository. Implementations record
/// per-transfer failures on the carriers instead of aborting the batch.
/// Connection teardown happens on drop.
pub trait RepositoryConnector {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]);

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]);
}

/// Yields a connector for a remote, or [`ResolveError::NoConnector`] when no
/// transport supports it.
pub trait RepositoryConnectorProvider: Send + Sync {
    fn connector<'a>(
        &'a self,
        session: &RepositorySession,
        repository: &RemoteRepository,
    ) -> Result<Box<dyn RepositoryConnector + 'a>, ResolveError>;
}
