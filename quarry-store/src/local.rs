//! Local repository managers — simple and enhanced.
//!
//! Both flavors map coordinates to the same on-disk layout. The simple
//! manager treats any existing file as available; the enhanced manager keeps
//! a `_remote.repositories` sidecar per artifact directory recording which
//! remote (and request context) contributed each file, so an artifact
//! installed from repository A is not assumed present in repository B.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use quarry_core::session::RepositorySession;
use quarry_core::types::{Artifact, LocalRepository, Metadata, RemoteRepository};

use crate::{layout, tracking};

/// Filename of the enhanced manager's sidecar index.
pub const REMOTE_INDEX_FILE: &str = "_remote.repositories";

/// Marks an index entry contributed by a local install rather than a remote.
const LOCAL_ORIGIN: &str = "";

// ---------------------------------------------------------------------------
// Request / result / registration value types
// ---------------------------------------------------------------------------

/// One artifact lookup: which coordinates, acceptable origins, and the
/// request context the caller is resolving in.
#[derive(Debug, Clone, Copy)]
pub struct LocalArtifactRequest<'a> {
    pub artifact: &'a Artifact,
    pub repositories: &'a [RemoteRepository],
    pub context: &'a str,
}

/// The manager's answer for one lookup. `available` means the file is known
/// to be the correct artifact for one of the requested remotes in the
/// requested context; the file may still be returned with `available ==
/// false` when it was installed locally or fetched for a different origin.
#[derive(Debug, Clone, Default)]
pub struct LocalArtifactResult {
    pub file: Option<PathBuf>,
    pub available: bool,
    pub repository: Option<RemoteRepository>,
}

/// Records that an artifact file was placed in the local repository, either
/// from a local install (`repository == None`) or from a remote.
#[derive(Debug, Clone, Copy)]
pub struct LocalArtifactRegistration<'a> {
    pub artifact: &'a Artifact,
    pub repository: Option<&'a RemoteRepository>,
    pub contexts: &'a [String],
}

#[derive(Debug, Clone, Copy)]
pub struct LocalMetadataRequest<'a> {
    pub metadata: &'a Metadata,
    pub repository: Option<&'a RemoteRepository>,
    pub context: &'a str,
}

/// Metadata lookups carry no availability bit; presence is all there is.
#[derive(Debug, Clone, Default)]
pub struct LocalMetadataResult {
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct LocalMetadataRegistration<'a> {
    pub metadata: &'a Metadata,
    pub repository: Option<&'a RemoteRepository>,
}

// ---------------------------------------------------------------------------
// Manager trait
// ---------------------------------------------------------------------------

/// Coordinate → path mapping plus per-remote availability tracking.
pub trait LocalRepositoryManager: Send + Sync {
    fn repository(&self) -> &LocalRepository;

    /// Relative path of a locally installed artifact.
    fn path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf;

    /// Relative path for an artifact cached from `remote`.
    fn path_for_remote_artifact(
        &self,
        artifact: &Artifact,
        remote: &RemoteRepository,
        context: &str,
    ) -> PathBuf;

    fn path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf;

    fn path_for_remote_metadata(
        &self,
        metadata: &Metadata,
        remote: &RemoteRepository,
        context: &str,
    ) -> PathBuf;

    fn find_artifact(
        &self,
        session: &RepositorySession,
        request: &LocalArtifactRequest<'_>,
    ) -> LocalArtifactResult;

    /// Registration failures degrade the cache, never the caller: they are
    /// logged and swallowed.
    fn add_artifact(&self, session: &RepositorySession, registration: &LocalArtifactRegistration<'_>);

    fn find_metadata(
        &self,
        session: &RepositorySession,
        request: &LocalMetadataRequest<'_>,
    ) -> LocalMetadataResult;

    fn add_metadata(&self, session: &RepositorySession, registration: &LocalMetadataRegistration<'_>);
}

/// Default basedir for a local repository: `~/.quarry/repository`.
pub fn default_basedir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".quarry").join("repository"))
}

/// Stable identity of a remote for cache records: the normalized URL, plus
/// the sorted mirrored URLs for repository managers.
pub fn remote_data_key(remote: &RemoteRepository) -> String {
    let mut key = normalize_url(&remote.url);
    if remote.repository_manager {
        let mut urls: Vec<String> = remote
            .mirrored
            .iter()
            .map(|mirrored| normalize_url(&mirrored.url))
            .collect();
        urls.sort();
        urls.dedup();
        for url in urls {
            key.push('+');
            key.push_str(&url);
        }
    }
    key
}

/// URLs compare with a trailing slash so `…/repo` and `…/repo/` coincide.
pub fn normalize_url(url: &str) -> String {
    if url.is_empty() || url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

// ---------------------------------------------------------------------------
// Simple manager
// ---------------------------------------------------------------------------

/// Path mapping only: any existing file counts as available, and downloads
/// are indistinguishable from local installs.
#[derive(Debug)]
pub struct SimpleLocalRepositoryManager {
    repository: LocalRepository,
}

impl SimpleLocalRepositoryManager {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            repository: LocalRepository::new(basedir),
        }
    }

    fn absolute(&self, relative: &Path) -> PathBuf {
        self.repository.basedir.join(relative)
    }
}

impl LocalRepositoryManager for SimpleLocalRepositoryManager {
    fn repository(&self) -> &LocalRepository {
        &self.repository
    }

    fn path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf {
        layout::local_artifact(artifact)
    }

    fn path_for_remote_artifact(
        &self,
        artifact: &Artifact,
        remote: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        layout::remote_artifact(artifact, remote, context)
    }

    fn path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf {
        layout::local_metadata(metadata)
    }

    fn path_for_remote_metadata(
        &self,
        metadata: &Metadata,
        remote: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        layout::remote_metadata(metadata, remote, context)
    }

    fn find_artifact(
        &self,
        _session: &RepositorySession,
        request: &LocalArtifactRequest<'_>,
    ) -> LocalArtifactResult {
        let file = self.absolute(&layout::local_artifact(request.artifact));
        if file.is_file() {
            LocalArtifactResult {
                file: Some(file),
                available: true,
                repository: None,
            }
        } else {
            LocalArtifactResult::default()
        }
    }

    fn add_artifact(
        &self,
        _session: &RepositorySession,
        _registration: &LocalArtifactRegistration<'_>,
    ) {
        // nothing to track
    }

    fn find_metadata(
        &self,
        _session: &RepositorySession,
        request: &LocalMetadataRequest<'_>,
    ) -> LocalMetadataResult {
        let relative = match request.repository {
            Some(remote) => layout::remote_metadata(request.metadata, remote, request.context),
            None => layout::local_metadata(request.metadata),
        };
        let file = self.absolute(&relative);
        LocalMetadataResult {
            file: file.is_file().then_some(file),
        }
    }

    fn add_metadata(
        &self,
        _session: &RepositorySession,
        _registration: &LocalMetadataRegistration<'_>,
    ) {
        // nothing to track
    }
}

// ---------------------------------------------------------------------------
// Enhanced manager
// ---------------------------------------------------------------------------

/// Same layout as the simple manager plus a per-directory sidecar index
/// recording `(file, origin, context)` triples.
#[derive(Debug)]
pub struct EnhancedLocalRepositoryManager {
    repository: LocalRepository,
}

impl EnhancedLocalRepositoryManager {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            repository: LocalRepository::new(basedir),
        }
    }

    fn absolute(&self, relative: &Path) -> PathBuf {
        self.repository.basedir.join(relative)
    }

    fn index_path(file: &Path) -> PathBuf {
        match file.parent() {
            Some(parent) => parent.join(REMOTE_INDEX_FILE),
            None => PathBuf::from(REMOTE_INDEX_FILE),
        }
    }

    fn entry_key(file: &Path, origin: &str, context: &str) -> String {
        let filename = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{filename}>{origin}+{context}")
    }
}

impl LocalRepositoryManager for EnhancedLocalRepositoryManager {
    fn repository(&self) -> &LocalRepository {
        &self.repository
    }

    fn path_for_local_artifact(&self, artifact: &Artifact) -> PathBuf {
        layout::local_artifact(artifact)
    }

    fn path_for_remote_artifact(
        &self,
        artifact: &Artifact,
        remote: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        layout::remote_artifact(artifact, remote, context)
    }

    fn path_for_local_metadata(&self, metadata: &Metadata) -> PathBuf {
        layout::local_metadata(metadata)
    }

    fn path_for_remote_metadata(
        &self,
        metadata: &Metadata,
        remote: &RemoteRepository,
        context: &str,
    ) -> PathBuf {
        layout::remote_metadata(metadata, remote, context)
    }

    fn find_artifact(
        &self,
        _session: &RepositorySession,
        request: &LocalArtifactRequest<'_>,
    ) -> LocalArtifactResult {
        let file = self.absolute(&layout::local_artifact(request.artifact));
        if !file.is_file() {
            return LocalArtifactResult::default();
        }

        let index = tracking::read(&Self::index_path(&file));
        let mut available = false;
        let mut repository = None;

        if request.repositories.is_empty() {
            available =
                index.contains_key(&Self::entry_key(&file, LOCAL_ORIGIN, request.context));
        } else {
            for remote in request.repositories {
                let key = Self::entry_key(&file, &remote_data_key(remote), request.context);
                if index.contains_key(&key) {
                    available = true;
                    repository = Some(remote.clone());
                    break;
                }
            }
        }

        LocalArtifactResult {
            file: Some(file),
            available,
            repository,
        }
    }

    fn add_artifact(
        &self,
        _session: &RepositorySession,
        registration: &LocalArtifactRegistration<'_>,
    ) {
        let file = self.absolute(&layout::local_artifact(registration.artifact));
        let origin = registration
            .repository
            .map(remote_data_key)
            .unwrap_or_else(|| LOCAL_ORIGIN.to_string());

        let default_context = [String::new()];
        let contexts: &[String] = if registration.contexts.is_empty() {
            &default_context
        } else {
            registration.contexts
        };

        let mut updates = BTreeMap::new();
        for context in contexts {
            updates.insert(Self::entry_key(&file, &origin, context), Some("1".to_string()));
        }
        tracking::update(&Self::index_path(&file), &updates);
    }

    fn find_metadata(
        &self,
        _session: &RepositorySession,
        request: &LocalMetadataRequest<'_>,
    ) -> LocalMetadataResult {
        let relative = match request.repository {
            Some(remote) => layout::remote_metadata(request.metadata, remote, request.context),
            None => layout::local_metadata(request.metadata),
        };
        let file = self.absolute(&relative);
        LocalMetadataResult {
            file: file.is_file().then_some(file),
        }
    }

    fn add_metadata(
        &self,
        _session: &RepositorySession,
        _registration: &LocalMetadataRegistration<'_>,
    ) {
        // metadata carries no availability tracking
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
