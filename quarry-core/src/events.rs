//! Repository lifecycle events and listener fan-out.

use std::path::PathBuf;
use std::sync::Arc;

use crate::types::{Artifact, Metadata, RepositoryRef};

/// Lifecycle stages reported while resolving, installing and deploying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    ArtifactResolving,
    ArtifactResolved,
    ArtifactDownloading,
    ArtifactDownloaded,
    ArtifactInstalling,
    ArtifactInstalled,
    ArtifactDeploying,
    ArtifactDeployed,
    MetadataResolving,
    MetadataResolved,
    MetadataDownloading,
    MetadataDownloaded,
    MetadataInstalling,
    MetadataInstalled,
    MetadataDeploying,
    MetadataDeployed,
}

/// One lifecycle event. Built via [`RepositoryEvent::new`] and the `with_*`
/// setters; only the fields relevant to the event type are populated.
#[derive(Debug, Clone)]
pub struct RepositoryEvent {
    pub event_type: EventType,
    pub artifact: Option<Artifact>,
    pub metadata: Option<Metadata>,
    pub repository: Option<RepositoryRef>,
    pub file: Option<PathBuf>,
    /// Rendered messages of the errors accumulated for the item so far.
    pub errors: Vec<String>,
}

impl RepositoryEvent {
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_type,
            artifact: None,
            metadata: None,
            repository: None,
            file: None,
            errors: Vec::new(),
        }
    }

    pub fn with_artifact(mut self, artifact: &Artifact) -> Self {
        self.file = artifact.file.clone();
        self.artifact = Some(artifact.clone());
        self
    }

    pub fn with_metadata(mut self, metadata: &Metadata) -> Self {
        self.file = metadata.file.clone();
        self.metadata = Some(metadata.clone());
        self
    }

    pub fn with_repository(mut self, repository: RepositoryRef) -> Self {
        self.repository = Some(repository);
        self
    }

    pub fn with_errors(mut self, errors: Vec<String>) -> Self {
        self.errors = errors;
        self
    }
}

/// Receives every event dispatched during a session.
pub trait RepositoryListener: Send + Sync {
    fn event(&self, event: &RepositoryEvent);
}

/// Fan-out of lifecycle events to listeners.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: RepositoryEvent);
}

/// Dispatches to all registered listeners in registration order.
#[derive(Default)]
pub struct DefaultEventDispatcher {
    listeners: Vec<Arc<dyn RepositoryListener>>,
}

impl DefaultEventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&mut self, listener: Arc<dyn RepositoryListener>) {
        self.listeners.push(listener);
    }
}

impl EventDispatcher for DefaultEventDispatcher {
    fn dispatch(&self, event: RepositoryEvent) {
        for listener in &self.listeners {
            listener.event(&event);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
