//! # quarry-core
//!
//! Domain model for the quarry repository system:
//! - [`types`] — artifact/metadata coordinates, repositories, policies
//! - [`session`] — per-invocation configuration and shared session state
//! - [`events`] — lifecycle events and listener fan-out

pub mod events;
pub mod session;
pub mod types;

pub use events::{
    DefaultEventDispatcher, EventDispatcher, EventType, RepositoryEvent, RepositoryListener,
};
pub use session::{config_keys, error_policy, RepositorySession, SessionData};
pub use types::{
    property_keys, Artifact, ArtifactType, ChecksumPolicy, LocalRepository, Metadata, Nature,
    Proxy, RemoteRepository, RepositoryPolicy, RepositoryRef, UpdatePolicy,
};
