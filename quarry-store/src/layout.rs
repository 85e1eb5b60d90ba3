//! Coordinate → relative path mapping inside a local repository.
//!
//! Artifacts live under
//! `g/r/o/u/p/artifactId/baseVersion/artifactId-version[-classifier].ext`;
//! dots in the group id become directory separators, and timestamped snapshot
//! files sit in their base-version directory. Metadata filenames carry a
//! repository marker (`-local`, `-<repoId>`) so records from different
//! origins do not collide.

use std::path::PathBuf;

use quarry_core::types::{Artifact, Metadata, RemoteRepository};

/// Relative path of a locally installed artifact.
pub fn local_artifact(artifact: &Artifact) -> PathBuf {
    let mut path = PathBuf::new();
    for segment in artifact.group_id.split('.') {
        path.push(segment);
    }
    path.push(&artifact.artifact_id);
    path.push(artifact.base_version());
    path.push(artifact_filename(artifact));
    path
}

/// Relative path of an artifact cached from a remote repository. Downloads
/// and local installs share one path; the enhanced manager's sidecar index
/// tells them apart.
pub fn remote_artifact(
    artifact: &Artifact,
    _remote: &RemoteRepository,
    _context: &str,
) -> PathBuf {
    local_artifact(artifact)
}

/// Relative path of locally installed metadata.
pub fn local_metadata(metadata: &Metadata) -> PathBuf {
    metadata_path(metadata, "local")
}

/// Relative path of metadata cached from a remote repository.
pub fn remote_metadata(
    metadata: &Metadata,
    remote: &RemoteRepository,
    _context: &str,
) -> PathBuf {
    metadata_path(metadata, &remote.id)
}

fn artifact_filename(artifact: &Artifact) -> String {
    let mut name = format!("{}-{}", artifact.artifact_id, artifact.version);
    if !artifact.classifier.is_empty() {
        name.push('-');
        name.push_str(&artifact.classifier);
    }
    if !artifact.extension.is_empty() {
        name.push('.');
        name.push_str(&artifact.extension);
    }
    name
}

fn metadata_path(metadata: &Metadata, origin: &str) -> PathBuf {
    let mut path = PathBuf::new();
    if !metadata.group_id.is_empty() {
        for segment in metadata.group_id.split('.') {
            path.push(segment);
        }
        if !metadata.artifact_id.is_empty() {
            path.push(&metadata.artifact_id);
            if !metadata.version.is_empty() {
                path.push(&metadata.version);
            }
        }
    }
    path.push(metadata_filename(&metadata.kind, origin));
    path
}

/// Inserts the origin marker before the extension: `versions.xml` from
/// `central` becomes `versions-central.xml`.
fn metadata_filename(kind: &str, origin: &str) -> String {
    match kind.rsplit_once('.') {
        Some((stem, extension)) => format!("{stem}-{origin}.{extension}"),
        None => format!("{kind}-{origin}"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
