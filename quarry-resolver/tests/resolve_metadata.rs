//! End-to-end metadata resolution against a scripted connector.

mod common;

use quarry_core::events::EventType;
use quarry_core::session::{error_policy, RepositorySession};
use quarry_core::types::{Metadata, Nature, RepositoryRef, UpdatePolicy};
use quarry_resolver::error::ResolveError;
use quarry_resolver::metadata::MetadataRequest;
use tempfile::TempDir;

use common::{harness, remote};

fn versions() -> Metadata {
    Metadata::new("org.example", "widget", "", "versions.xml", Nature::Release)
}

#[test]
fn remote_metadata_downloads_into_the_marked_filename() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());
    let central = remote("central", "https://repo.example.org/");
    h.provider.host_metadata(&versions(), b"<versions/>");

    let session = RepositorySession::new();
    let results = h
        .metadata_resolver
        .resolve_metadata(
            &session,
            vec![MetadataRequest::new(versions(), Some(central))],
        )
        .unwrap();

    let file = results[0].metadata.as_ref().unwrap().file.clone().unwrap();
    assert_eq!(
        file,
        repo.path().join("org/example/widget/versions-central.xml")
    );
    assert_eq!(std::fs::read(&file).unwrap(), b"<versions/>");
    assert!(matches!(
        results[0].repository,
        Some(RepositoryRef::Remote(ref r)) if r.id == "central"
    ));

    assert_eq!(
        h.listener.metadata_events("widget"),
        vec![
            EventType::MetadataResolving,
            EventType::MetadataDownloading,
            EventType::MetadataDownloaded,
            EventType::MetadataResolved,
        ]
    );
}

#[test]
fn local_metadata_resolves_from_the_local_marker() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());

    let local_file = repo.path().join("org/example/widget/versions-local.xml");
    std::fs::create_dir_all(local_file.parent().unwrap()).unwrap();
    std::fs::write(&local_file, b"<local/>").unwrap();

    let session = RepositorySession::new();
    let results = h
        .metadata_resolver
        .resolve_metadata(&session, vec![MetadataRequest::new(versions(), None)])
        .unwrap();

    assert_eq!(
        results[0].metadata.as_ref().unwrap().file.clone().unwrap(),
        local_file
    );
    assert!(matches!(results[0].repository, Some(RepositoryRef::Local)));
    assert!(h.provider.get_batches().is_empty());
}

#[test]
fn missing_local_metadata_fails_the_batch() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());

    let session = RepositorySession::new();
    let failed = h
        .metadata_resolver
        .resolve_metadata(&session, vec![MetadataRequest::new(versions(), None)])
        .unwrap_err();

    assert!(failed.results[0]
        .errors
        .iter()
        .any(|error| matches!(error, ResolveError::MetadataNotFound { .. })));
    assert_eq!(
        h.listener.metadata_events("widget"),
        vec![EventType::MetadataResolving, EventType::MetadataResolved]
    );
}

#[test]
fn cached_metadata_not_found_suppresses_the_network() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());
    let central = remote("central", "https://repo.example.org/");
    // nothing hosted

    let session = RepositorySession::new().resolution_error_policy(error_policy::CACHE_ALL);
    h.metadata_resolver
        .resolve_metadata(
            &session,
            vec![MetadataRequest::new(versions(), Some(central.clone()))],
        )
        .unwrap_err();
    assert_eq!(h.provider.get_batches().len(), 1);

    // fresh session, daily policy: the recorded absence is still fresh
    let later = RepositorySession::new().resolution_error_policy(error_policy::CACHE_ALL);
    let replayed = h
        .metadata_resolver
        .resolve_metadata(
            &later,
            vec![MetadataRequest::new(versions(), Some(central))],
        )
        .unwrap_err();

    assert_eq!(h.provider.get_batches().len(), 1, "connector must not be called");
    assert!(replayed.results[0]
        .errors
        .iter()
        .any(|error| matches!(error, ResolveError::MetadataNotFound { .. })));
}

#[test]
fn disabled_nature_policy_skips_the_remote() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());
    let mut central = remote("central", "https://repo.example.org/");
    central.snapshot_policy.enabled = false;
    let snapshots = Metadata::new("org.example", "widget", "", "versions.xml", Nature::Snapshot);
    h.provider.host_metadata(&snapshots, b"<versions/>");

    let session = RepositorySession::new();
    let failed = h
        .metadata_resolver
        .resolve_metadata(
            &session,
            vec![MetadataRequest::new(snapshots, Some(central))],
        )
        .unwrap_err();

    assert!(h.provider.get_batches().is_empty());
    assert!(failed.results[0]
        .errors
        .iter()
        .any(|error| matches!(error, ResolveError::MetadataNotFound { .. })));
}

#[test]
fn equivalent_remotes_share_one_download_batch() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());
    let a = remote("central", "https://repo.example.org/");
    let b = remote("mirror-of-central", "https://repo.example.org/");

    let group_scope = Metadata::new("org.example", "", "", "index.xml", Nature::Release);
    h.provider.host_metadata(&versions(), b"<versions/>");
    h.provider.host_metadata(&group_scope, b"<index/>");

    let session = RepositorySession::new();
    let results = h
        .metadata_resolver
        .resolve_metadata(
            &session,
            vec![
                MetadataRequest::new(versions(), Some(a)),
                MetadataRequest::new(group_scope, Some(b)),
            ],
        )
        .unwrap();

    assert!(results.iter().all(|result| result.is_resolved()));
    assert_eq!(h.provider.get_batches(), vec![2]);
}

#[test]
fn favor_local_suppresses_the_remote_check_for_fresh_installs() {
    let repo = TempDir::new().unwrap();
    let h = harness(repo.path());
    let mut central = remote("central", "https://repo.example.org/");
    central.release_policy.update_policy = UpdatePolicy::Daily;
    h.provider.host_metadata(&versions(), b"<versions/>");

    // freshly installed local copy
    let local_file = repo.path().join("org/example/widget/versions-local.xml");
    std::fs::create_dir_all(local_file.parent().unwrap()).unwrap();
    std::fs::write(&local_file, b"<local/>").unwrap();

    let session = RepositorySession::new();
    let failed = h
        .metadata_resolver
        .resolve_metadata(
            &session,
            vec![MetadataRequest::new(versions(), Some(central)).favor_local(true)],
        )
        .unwrap_err();

    // the remote copy was neither fetched nor present locally, but no
    // network round-trip happened either
    assert!(h.provider.get_batches().is_empty());
    assert!(!failed.results[0].is_resolved());
}
