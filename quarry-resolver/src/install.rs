//! Publishing artifacts and metadata into the local repository.

use std::path::Path;
use std::sync::Arc;

use quarry_core::events::{EventDispatcher, EventType, RepositoryEvent};
use quarry_core::session::RepositorySession;
use quarry_core::types::{Artifact, Metadata};
use quarry_store::local::{
    LocalArtifactRegistration, LocalMetadataRegistration, LocalRepositoryManager,
};
use quarry_store::sync::SyncContextFactory;

use crate::error::ResolveError;
use crate::spi::FileProcessor;

/// Artifacts and metadata to install in one synchronized pass.
#[derive(Debug, Clone, Default)]
pub struct InstallRequest {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
}

impl InstallRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn artifact(mut self, artifact: Artifact) -> Self {
        self.artifacts.push(artifact);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.push(metadata);
        self
    }
}

/// The installed items, their files rewritten to the local repository paths.
#[derive(Debug, Clone, Default)]
pub struct InstallResult {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
}

/// Copies sources into the local repository under an exclusive sync context
/// and registers them with the manager.
pub struct Installer {
    lrm: Arc<dyn LocalRepositoryManager>,
    dispatcher: Arc<dyn EventDispatcher>,
    files: Arc<dyn FileProcessor>,
    sync_factory: SyncContextFactory,
}

impl Installer {
    pub fn new(
        lrm: Arc<dyn LocalRepositoryManager>,
        dispatcher: Arc<dyn EventDispatcher>,
        files: Arc<dyn FileProcessor>,
    ) -> Self {
        let sync_factory = SyncContextFactory::new(lrm.repository());
        Self {
            lrm,
            dispatcher,
            files,
            sync_factory,
        }
    }

    /// Install every item or fail on the first broken one. The paired
    /// `*Installing` / `*Installed` events fire even on failure, the latter
    /// carrying the error.
    pub fn install(
        &self,
        session: &RepositorySession,
        request: InstallRequest,
    ) -> Result<InstallResult, ResolveError> {
        for artifact in &request.artifacts {
            validate_source(artifact.file.as_deref(), artifact)?;
        }
        for metadata in &request.metadata {
            validate_source(metadata.file.as_deref(), metadata)?;
        }

        let mut sync = self.sync_factory.context(false);
        let artifacts: Vec<&Artifact> = request.artifacts.iter().collect();
        let metadata: Vec<&Metadata> = request.metadata.iter().collect();
        if let Err(err) = sync.acquire(&artifacts, &metadata) {
            tracing::warn!("proceeding without coordinate locks: {err}");
        }

        let basedir = self.lrm.repository().basedir.clone();
        let mut result = InstallResult::default();

        for artifact in &request.artifacts {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::ArtifactInstalling).with_artifact(artifact),
            );

            let source = artifact.file.clone().expect("validated above");
            let destination = basedir.join(self.lrm.path_for_local_artifact(artifact));
            let placed = self.place(&source, &destination).map_err(|err| {
                ResolveError::Installation {
                    item: artifact.to_string(),
                    reason: err.to_string(),
                }
            });

            let mut installed = artifact.clone();
            installed.file = Some(destination);
            match placed {
                Ok(()) => {
                    self.lrm.add_artifact(
                        session,
                        &LocalArtifactRegistration {
                            artifact: &installed,
                            repository: None,
                            contexts: &[],
                        },
                    );
                    self.dispatcher.dispatch(
                        RepositoryEvent::new(EventType::ArtifactInstalled)
                            .with_artifact(&installed),
                    );
                    result.artifacts.push(installed);
                }
                Err(err) => {
                    self.dispatcher.dispatch(
                        RepositoryEvent::new(EventType::ArtifactInstalled)
                            .with_artifact(artifact)
                            .with_errors(vec![err.to_string()]),
                    );
                    return Err(err);
                }
            }
        }

        for metadata in &request.metadata {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::MetadataInstalling).with_metadata(metadata),
            );

            let source = metadata.file.clone().expect("validated above");
            let destination = basedir.join(self.lrm.path_for_local_metadata(metadata));
            let placed = self.place(&source, &destination).map_err(|err| {
                ResolveError::Installation {
                    item: metadata.to_string(),
                    reason: err.to_string(),
                }
            });

            let mut installed = metadata.clone();
            installed.file = Some(destination);
            match placed {
                Ok(()) => {
                    self.lrm.add_metadata(
                        session,
                        &LocalMetadataRegistration {
                            metadata: &installed,
                            repository: None,
                        },
                    );
                    self.dispatcher.dispatch(
                        RepositoryEvent::new(EventType::MetadataInstalled)
                            .with_metadata(&installed),
                    );
                    result.metadata.push(installed);
                }
                Err(err) => {
                    self.dispatcher.dispatch(
                        RepositoryEvent::new(EventType::MetadataInstalled)
                            .with_metadata(metadata)
                            .with_errors(vec![err.to_string()]),
                    );
                    return Err(err);
                }
            }
        }

        Ok(result)
    }

    /// Copy `source` to `destination` preserving the source mtime. Skips the
    /// copy when both are the same file, or when the destination already has
    /// identical length and mtime (repeated installs are no-ops on disk).
    fn place(&self, source: &Path, destination: &Path) -> std::io::Result<()> {
        if same_file(source, destination) {
            return Ok(());
        }

        let source_meta = source.metadata()?;
        let source_mtime = filetime::FileTime::from_last_modification_time(&source_meta);
        let up_to_date = destination
            .metadata()
            .map(|meta| {
                meta.len() == source_meta.len()
                    && filetime::FileTime::from_last_modification_time(&meta) == source_mtime
            })
            .unwrap_or(false);
        if up_to_date {
            tracing::debug!("unchanged: {}", destination.display());
            return Ok(());
        }

        self.files.copy(source, destination, None)?;
        filetime::set_file_mtime(destination, source_mtime)?;
        tracing::info!("installed: {}", destination.display());
        Ok(())
    }
}

fn validate_source(
    file: Option<&Path>,
    item: &dyn std::fmt::Display,
) -> Result<(), ResolveError> {
    match file {
        None => Err(ResolveError::Installation {
            item: item.to_string(),
            reason: "no file attached".to_string(),
        }),
        Some(file) if !file.is_file() => Err(ResolveError::Installation {
            item: item.to_string(),
            reason: format!("{} is not a regular file", file.display()),
        }),
        Some(_) => Ok(()),
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
