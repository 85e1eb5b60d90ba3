//! Publishing artifacts and metadata to a remote repository.

use std::path::Path;
use std::sync::Arc;

use quarry_core::events::{EventDispatcher, EventType, RepositoryEvent};
use quarry_core::session::RepositorySession;
use quarry_core::types::{Artifact, Metadata, RemoteRepository, RepositoryRef};
use quarry_store::local::LocalRepositoryManager;
use quarry_store::sync::SyncContextFactory;

use crate::connector::{ArtifactUpload, MetadataUpload, RepositoryConnectorProvider};
use crate::error::ResolveError;
use crate::offline::OfflineController;

/// Artifacts and metadata to upload to one remote repository.
#[derive(Debug, Clone)]
pub struct DeployRequest {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
    pub repository: RemoteRepository,
}

impl DeployRequest {
    pub fn new(repository: RemoteRepository) -> Self {
        Self {
            artifacts: Vec::new(),
            metadata: Vec::new(),
            repository,
        }
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

/// The deployed items.
#[derive(Debug, Clone, Default)]
pub struct DeployResult {
    pub artifacts: Vec<Artifact>,
    pub metadata: Vec<Metadata>,
}

/// Uploads through the connector under an exclusive sync context.
pub struct Deployer {
    connectors: Arc<dyn RepositoryConnectorProvider>,
    dispatcher: Arc<dyn EventDispatcher>,
    offline: OfflineController,
    sync_factory: SyncContextFactory,
}

impl Deployer {
    pub fn new(
        lrm: &dyn LocalRepositoryManager,
        connectors: Arc<dyn RepositoryConnectorProvider>,
        dispatcher: Arc<dyn EventDispatcher>,
    ) -> Self {
        Self {
            connectors,
            dispatcher,
            offline: OfflineController,
            sync_factory: SyncContextFactory::new(lrm.repository()),
        }
    }

    pub fn deploy(
        &self,
        session: &RepositorySession,
        request: DeployRequest,
    ) -> Result<DeployResult, ResolveError> {
        self.offline
            .check_offline(session, &request.repository)
            .map_err(|err| ResolveError::Deployment {
                item: request.repository.to_string(),
                reason: err.to_string(),
            })?;

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

        let repository = &request.repository;
        let connector = self
            .connectors
            .connector(session, repository)
            .map_err(|err| ResolveError::Deployment {
                item: repository.to_string(),
                reason: err.to_string(),
            })?;

        let mut artifact_uploads: Vec<ArtifactUpload> = request
            .artifacts
            .iter()
            .map(|artifact| ArtifactUpload {
                artifact: artifact.clone(),
                file: artifact.file.clone().expect("validated above"),
                error: None,
            })
            .collect();
        let mut metadata_uploads: Vec<MetadataUpload> = request
            .metadata
            .iter()
            .map(|metadata| MetadataUpload {
                metadata: metadata.clone(),
                file: metadata.file.clone().expect("validated above"),
                error: None,
            })
            .collect();

        for upload in &artifact_uploads {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::ArtifactDeploying)
                    .with_artifact(&upload.artifact)
                    .with_repository(RepositoryRef::Remote(repository.clone())),
            );
        }
        for upload in &metadata_uploads {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::MetadataDeploying)
                    .with_metadata(&upload.metadata)
                    .with_repository(RepositoryRef::Remote(repository.clone())),
            );
        }

        connector.put(&mut artifact_uploads, &mut metadata_uploads);
        drop(connector);

        let mut first_error = None;
        let mut result = DeployResult::default();

        for upload in &artifact_uploads {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::ArtifactDeployed)
                    .with_artifact(&upload.artifact)
                    .with_repository(RepositoryRef::Remote(repository.clone()))
                    .with_errors(upload.error.iter().map(ToString::to_string).collect()),
            );
            match &upload.error {
                None => result.artifacts.push(upload.artifact.clone()),
                Some(error) => {
                    first_error.get_or_insert_with(|| ResolveError::Deployment {
                        item: upload.artifact.to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }
        for upload in &metadata_uploads {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::MetadataDeployed)
                    .with_metadata(&upload.metadata)
                    .with_repository(RepositoryRef::Remote(repository.clone()))
                    .with_errors(upload.error.iter().map(ToString::to_string).collect()),
            );
            match &upload.error {
                None => result.metadata.push(upload.metadata.clone()),
                Some(error) => {
                    first_error.get_or_insert_with(|| ResolveError::Deployment {
                        item: upload.metadata.to_string(),
                        reason: error.to_string(),
                    });
                }
            }
        }

        match first_error {
            None => Ok(result),
            Some(error) => Err(error),
        }
    }
}

fn validate_source(
    file: Option<&Path>,
    item: &dyn std::fmt::Display,
) -> Result<(), ResolveError> {
    match file {
        None => Err(ResolveError::Deployment {
            item: item.to_string(),
            reason: "no file attached".to_string(),
        }),
        Some(file) if !file.is_file() => Err(ResolveError::Deployment {
            item: item.to_string(),
            reason: format!("{} is not a regular file", file.display()),
        }),
        Some(_) => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use quarry_core::events::DefaultEventDispatcher;
    use quarry_store::local::SimpleLocalRepositoryManager;
    use tempfile::TempDir;

    use super::*;
    use crate::connector::{ArtifactDownload, MetadataDownload, RepositoryConnector};

    struct RejectingProvider;

    impl RepositoryConnectorProvider for RejectingProvider {
        fn connector<'a>(
            &'a self,
            _session: &RepositorySession,
            repository: &RemoteRepository,
        ) -> Result<Box<dyn RepositoryConnector + 'a>, ResolveError> {
            Err(ResolveError::NoConnector {
                repository: repository.to_string(),
            })
        }
    }

    struct AcceptingProvider;

    struct NoopConnector;

    impl RepositoryConnector for NoopConnector {
        fn get(&self, _artifacts: &mut [ArtifactDownload], _metadata: &mut [MetadataDownload]) {}

        fn put(&self, _artifacts: &mut [ArtifactUpload], _metadata: &mut [MetadataUpload]) {}
    }

    impl RepositoryConnectorProvider for AcceptingProvider {
        fn connector<'a>(
            &'a self,
            _session: &RepositorySession,
            _repository: &RemoteRepository,
        ) -> Result<Box<dyn RepositoryConnector + 'a>, ResolveError> {
            Ok(Box::new(NoopConnector))
        }
    }

    fn deployer(basedir: &Path, connectors: Arc<dyn RepositoryConnectorProvider>) -> Deployer {
        Deployer::new(
            &SimpleLocalRepositoryManager::new(basedir),
            connectors,
            Arc::new(DefaultEventDispatcher::new()),
        )
    }

    #[test]
    fn offline_sessions_cannot_deploy() {
        let repo = TempDir::new().unwrap();
        let session = RepositorySession::new().offline(true);
        let request = DeployRequest::new(RemoteRepository::new("central", "https://repo.example.org/"));

        let err = deployer(repo.path(), Arc::new(AcceptingProvider))
            .deploy(&session, request)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Deployment { .. }));
    }

    #[test]
    fn missing_connector_fails_deployment() {
        let repo = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let source = work.path().join("widget.jar");
        std::fs::write(&source, b"bytes").unwrap();
        let mut artifact = Artifact::new("g", "widget", "jar", "1.0");
        artifact.file = Some(source);

        let request = DeployRequest::new(RemoteRepository::new("central", "https://repo.example.org/"))
            .artifact(artifact);
        let err = deployer(repo.path(), Arc::new(RejectingProvider))
            .deploy(&RepositorySession::new(), request)
            .unwrap_err();
        assert!(matches!(err, ResolveError::Deployment { .. }));
    }

    #[test]
    fn successful_deploy_returns_all_items() {
        let repo = TempDir::new().unwrap();
        let work = TempDir::new().unwrap();
        let source = work.path().join("widget.jar");
        std::fs::write(&source, b"bytes").unwrap();
        let mut artifact = Artifact::new("g", "widget", "jar", "1.0");
        artifact.file = Some(source);

        let request = DeployRequest::new(RemoteRepository::new("central", "https://repo.example.org/"))
            .artifact(artifact);
        let result = deployer(repo.path(), Arc::new(AcceptingProvider))
            .deploy(&RepositorySession::new(), request)
            .unwrap();
        assert_eq!(result.artifacts.len(), 1);
    }
}
