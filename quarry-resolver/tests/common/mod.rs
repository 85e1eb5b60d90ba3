//! Shared fixtures for the resolver integration tests: a scripted in-memory
//! connector, a recording listener and session/resolver builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use quarry_core::events::{
    DefaultEventDispatcher, EventType, RepositoryEvent, RepositoryListener,
};
use quarry_core::session::RepositorySession;
use quarry_core::types::{Artifact, Metadata, RemoteRepository};
use quarry_resolver::artifact::ArtifactResolver;
use quarry_resolver::connector::{
    ArtifactDownload, ArtifactUpload, MetadataDownload, MetadataUpload, RepositoryConnector,
    RepositoryConnectorProvider,
};
use quarry_resolver::error::ResolveError;
use quarry_resolver::metadata::MetadataResolver;
use quarry_resolver::spi::{DefaultFileProcessor, IdentityVersionResolver};
use quarry_store::local::EnhancedLocalRepositoryManager;

// ---------------------------------------------------------------------------
// Recording listener
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RepositoryEvent>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RepositoryEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Event types recorded for the artifact with the given artifact id, in
    /// dispatch order.
    pub fn artifact_events(&self, artifact_id: &str) -> Vec<EventType> {
        self.events()
            .into_iter()
            .filter(|event| {
                event
                    .artifact
                    .as_ref()
                    .is_some_and(|artifact| artifact.artifact_id == artifact_id)
            })
            .map(|event| event.event_type)
            .collect()
    }

    pub fn metadata_events(&self, artifact_id: &str) -> Vec<EventType> {
        self.events()
            .into_iter()
            .filter(|event| {
                event
                    .metadata
                    .as_ref()
                    .is_some_and(|metadata| metadata.artifact_id == artifact_id)
            })
            .map(|event| event.event_type)
            .collect()
    }
}

impl RepositoryListener for RecordingListener {
    fn event(&self, event: &RepositoryEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ---------------------------------------------------------------------------
// Scripted connector
// ---------------------------------------------------------------------------

/// What the stub remote answers for one coordinate.
#[derive(Debug, Clone)]
pub enum StubResponse {
    Bytes(Vec<u8>),
    NotFound,
    TransferError(String),
}

/// In-memory remote repository content, shared by every connector the
/// provider hands out. Records the size of each `get` batch.
#[derive(Default)]
pub struct StubConnectorProvider {
    artifacts: Mutex<HashMap<String, StubResponse>>,
    metadata: Mutex<HashMap<String, StubResponse>>,
    get_batches: Mutex<Vec<usize>>,
    uploads: Mutex<Vec<String>>,
}

impl StubConnectorProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn host_artifact(&self, artifact: &Artifact, bytes: &[u8]) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(artifact.to_string(), StubResponse::Bytes(bytes.to_vec()));
    }

    pub fn script_artifact(&self, artifact: &Artifact, response: StubResponse) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(artifact.to_string(), response);
    }

    pub fn host_metadata(&self, metadata: &Metadata, bytes: &[u8]) {
        self.metadata
            .lock()
            .unwrap()
            .insert(metadata.to_string(), StubResponse::Bytes(bytes.to_vec()));
    }

    /// Download counts of every `get` call so far.
    pub fn get_batches(&self) -> Vec<usize> {
        self.get_batches.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

impl RepositoryConnectorProvider for StubConnectorProvider {
    fn connector<'a>(
        &'a self,
        _session: &RepositorySession,
        _repository: &RemoteRepository,
    ) -> Result<Box<dyn RepositoryConnector + 'a>, ResolveError> {
        Ok(Box::new(StubConnector { provider: self }))
    }
}

struct StubConnector<'a> {
    provider: &'a StubConnectorProvider,
}

impl RepositoryConnector for StubConnector<'_> {
    fn get(&self, artifacts: &mut [ArtifactDownload], metadata: &mut [MetadataDownload]) {
        self.provider
            .get_batches
            .lock()
            .unwrap()
            .push(artifacts.len() + metadata.len());

        for download in artifacts.iter_mut() {
            let response = self
                .provider
                .artifacts
                .lock()
                .unwrap()
                .get(&download.artifact.to_string())
                .cloned();
            match response {
                Some(StubResponse::Bytes(bytes)) => {
                    if !download.existence_check {
                        write_file(&download.file, &bytes);
                    }
                }
                Some(StubResponse::TransferError(reason)) => {
                    download.error = Some(ResolveError::ArtifactTransfer {
                        coordinates: download.artifact.to_string(),
                        repository: "stub".to_string(),
                        reason,
                    });
                }
                Some(StubResponse::NotFound) | None => {
                    download.error = Some(ResolveError::ArtifactNotFound {
                        coordinates: download.artifact.to_string(),
                        location: "stub".to_string(),
                    });
                }
            }
        }

        for download in metadata.iter_mut() {
            let response = self
                .provider
                .metadata
                .lock()
                .unwrap()
                .get(&download.metadata.to_string())
                .cloned();
            match response {
                Some(StubResponse::Bytes(bytes)) => write_file(&download.file, &bytes),
                Some(StubResponse::TransferError(reason)) => {
                    download.error = Some(ResolveError::MetadataTransfer {
                        coordinates: download.metadata.to_string(),
                        repository: "stub".to_string(),
                        reason,
                    });
                }
                Some(StubResponse::NotFound) | None => {
                    download.error = Some(ResolveError::MetadataNotFound {
                        coordinates: download.metadata.to_string(),
                        location: "stub".to_string(),
                    });
                }
            }
        }
    }

    fn put(&self, artifacts: &mut [ArtifactUpload], metadata: &mut [MetadataUpload]) {
        let mut uploads = self.provider.uploads.lock().unwrap();
        for upload in artifacts.iter() {
            uploads.push(upload.artifact.to_string());
        }
        for upload in metadata.iter() {
            uploads.push(upload.metadata.to_string());
        }
    }
}

fn write_file(path: &Path, bytes: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, bytes).unwrap();
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub struct Harness {
    pub lrm: Arc<EnhancedLocalRepositoryManager>,
    pub provider: Arc<StubConnectorProvider>,
    pub listener: Arc<RecordingListener>,
    pub resolver: ArtifactResolver,
    pub metadata_resolver: MetadataResolver,
}

/// An artifact resolver over an enhanced local repository at `basedir`, a
/// scripted connector and a recording listener.
pub fn harness(basedir: &Path) -> Harness {
    let lrm = Arc::new(EnhancedLocalRepositoryManager::new(basedir));
    let provider = StubConnectorProvider::new();
    let listener = RecordingListener::new();

    let mut dispatcher = DefaultEventDispatcher::new();
    dispatcher.add_listener(listener.clone());
    let dispatcher = Arc::new(dispatcher);

    let resolver = ArtifactResolver::new(
        lrm.clone(),
        Arc::new(IdentityVersionResolver),
        None,
        provider.clone(),
        dispatcher.clone(),
        Arc::new(DefaultFileProcessor),
    );
    let metadata_resolver = MetadataResolver::new(lrm.clone(), provider.clone(), dispatcher);

    Harness {
        lrm,
        provider,
        listener,
        resolver,
        metadata_resolver,
    }
}

pub fn remote(id: &str, url: &str) -> RemoteRepository {
    RemoteRepository::new(id, url)
}
