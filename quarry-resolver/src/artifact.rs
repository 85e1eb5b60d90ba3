//! Artifact resolution: workspace → local cache → remote download.
//!
//! Each request walks the pipeline in order — unhosted short-circuit, version
//! binding, workspace lookup, local-repository lookup — and only the leftover
//! requests are grouped per equivalent remote and handed to the connector in
//! one batch. Download outcomes are persisted through the update-check
//! manager, registered with the local repository manager, and reported as
//! events: `ArtifactResolving`, zero or more `ArtifactDownloading` /
//! `ArtifactDownloaded` pairs, then `ArtifactResolved`.

use std::path::PathBuf;
use std::sync::Arc;

use quarry_core::events::{EventDispatcher, EventType, RepositoryEvent};
use quarry_core::session::{config_keys, error_policy, RepositorySession};
use quarry_core::types::{Artifact, RemoteRepository, RepositoryRef};
use quarry_store::local::{
    LocalArtifactRegistration, LocalArtifactRequest, LocalArtifactResult, LocalRepositoryManager,
};
use quarry_store::sync::SyncContextFactory;

use crate::connector::{ArtifactDownload, RepositoryConnectorProvider};
use crate::error::{ArtifactResolutionError, ResolveError};
use crate::offline::OfflineController;
use crate::spi::{FileProcessor, VersionRequest, VersionResolver, VersionResult, WorkspaceReader};
use crate::update_check::{ArtifactUpdateCheck, UpdateCheck, UpdateCheckManager};

/// One artifact to resolve against an ordered list of remotes.
#[derive(Debug, Clone)]
pub struct ArtifactRequest {
    pub artifact: Artifact,
    pub repositories: Vec<RemoteRepository>,
    /// Caller-supplied reason for the fetch; participates in availability
    /// tracking.
    pub context: String,
}

impl ArtifactRequest {
    pub fn new(artifact: Artifact, repositories: Vec<RemoteRepository>) -> Self {
        Self {
            artifact,
            repositories,
            context: String::new(),
        }
    }

    pub fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// Outcome for one request. On success `artifact` carries the resolved file;
/// on failure `errors` explains every attempted source.
#[derive(Debug, Clone)]
pub struct ArtifactResult {
    pub request: ArtifactRequest,
    pub artifact: Option<Artifact>,
    pub repository: Option<RepositoryRef>,
    pub errors: Vec<ResolveError>,
}

impl ArtifactResult {
    fn new(request: ArtifactRequest) -> Self {
        Self {
            request,
            artifact: None,
            repository: None,
            errors: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.artifact
            .as_ref()
            .is_some_and(|artifact| artifact.file.is_some())
    }
}

struct ResolutionGroup {
    repository: RemoteRepository,
    items: Vec<ResolutionItem>,
}

struct ResolutionItem {
    /// Index into the results (and the per-request resolved flags).
    index: usize,
    artifact: Artifact,
    local_file: Option<PathBuf>,
    context: String,
    download: Option<usize>,
    update_check: Option<ArtifactUpdateCheck>,
}

/// Drives the workspace/local/remote pipeline for artifact batches.
pub struct ArtifactResolver {
    lrm: Arc<dyn LocalRepositoryManager>,
    version_resolver: Arc<dyn VersionResolver>,
    workspace: Option<Arc<dyn WorkspaceReader>>,
    connectors: Arc<dyn RepositoryConnectorProvider>,
    update_checks: UpdateCheckManager,
    offline: OfflineController,
    dispatcher: Arc<dyn EventDispatcher>,
    sync_factory: SyncContextFactory,
    files: Arc<dyn FileProcessor>,
}

impl ArtifactResolver {
    pub fn new(
        lrm: Arc<dyn LocalRepositoryManager>,
        version_resolver: Arc<dyn VersionResolver>,
        workspace: Option<Arc<dyn WorkspaceReader>>,
        connectors: Arc<dyn RepositoryConnectorProvider>,
        dispatcher: Arc<dyn EventDispatcher>,
        files: Arc<dyn FileProcessor>,
    ) -> Self {
        let sync_factory = SyncContextFactory::new(lrm.repository());
        Self {
            lrm,
            version_resolver,
            workspace,
            connectors,
            update_checks: UpdateCheckManager,
            offline: OfflineController,
            dispatcher,
            sync_factory,
            files,
        }
    }

    pub fn resolve_artifact(
        &self,
        session: &RepositorySession,
        request: ArtifactRequest,
    ) -> Result<ArtifactResult, ArtifactResolutionError> {
        self.resolve_artifacts(session, vec![request])
            .map(|mut results| results.remove(0))
    }

    /// Resolve a batch. Every request yields a result; the call fails as a
    /// whole iff any result ends without a file, and the error carries all
    /// results.
    pub fn resolve_artifacts(
        &self,
        session: &RepositorySession,
        requests: Vec<ArtifactRequest>,
    ) -> Result<Vec<ArtifactResult>, ArtifactResolutionError> {
        let mut sync = self.sync_factory.context(false);
        let hosted: Vec<&Artifact> = requests
            .iter()
            .map(|request| &request.artifact)
            .filter(|artifact| artifact.local_path().is_none())
            .collect();
        if let Err(err) = sync.acquire(&hosted, &[]) {
            tracing::warn!("proceeding without coordinate locks: {err}");
        }

        let results = self.resolve(session, requests);
        drop(sync);

        if results.iter().any(|result| !result.is_resolved()) {
            Err(ArtifactResolutionError { results })
        } else {
            Ok(results)
        }
    }

    fn resolve(
        &self,
        session: &RepositorySession,
        requests: Vec<ArtifactRequest>,
    ) -> Vec<ArtifactResult> {
        let mut results: Vec<ArtifactResult> = Vec::with_capacity(requests.len());
        let mut resolved = vec![false; requests.len()];
        let mut groups: Vec<ResolutionGroup> = Vec::new();

        for request in requests {
            let index = results.len();
            let mut artifact = request.artifact.clone();
            let mut repositories = request.repositories.clone();
            let context = request.context.clone();
            let mut result = ArtifactResult::new(request);

            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::ArtifactResolving).with_artifact(&artifact),
            );

            // Unhosted artifacts carry their own path; no repository applies.
            if let Some(local_path) = artifact.local_path() {
                if local_path.is_file() {
                    artifact.file = Some(local_path);
                    result.artifact = Some(artifact.clone());
                    self.artifact_resolved(&artifact, None, &result.errors);
                } else {
                    result.errors.push(ResolveError::ArtifactNotFound {
                        coordinates: artifact.to_string(),
                        location: "the local filesystem".to_string(),
                    });
                }
                results.push(result);
                continue;
            }

            let version_result = match self.version_resolver.resolve_version(
                session,
                &VersionRequest {
                    artifact: &artifact,
                    repositories: &repositories,
                    context: &context,
                },
            ) {
                Ok(version_result) => version_result,
                Err(err) => {
                    // this request fails; the rest of the batch continues
                    result.errors.push(err);
                    results.push(result);
                    continue;
                }
            };
            artifact.version = version_result.version.clone();

            match &version_result.repository {
                Some(RepositoryRef::Remote(remote)) => repositories = vec![remote.clone()],
                Some(_) => repositories.clear(),
                None => {}
            }

            if let Some(workspace) = &self.workspace {
                if let Some(file) = workspace.find_artifact(&artifact) {
                    artifact.file = Some(file);
                    result.artifact = Some(artifact.clone());
                    result.repository = Some(RepositoryRef::Workspace);
                    self.artifact_resolved(&artifact, Some(RepositoryRef::Workspace), &[]);
                    results.push(result);
                    continue;
                }
            }

            let local = self.lrm.find_artifact(
                session,
                &LocalArtifactRequest {
                    artifact: &artifact,
                    repositories: &repositories,
                    context: &context,
                },
            );
            if is_locally_installed(&local, &version_result, repositories.is_empty()) {
                result.repository = Some(
                    local
                        .repository
                        .clone()
                        .map(RepositoryRef::Remote)
                        .unwrap_or(RepositoryRef::Local),
                );
                let file = local.file.clone().expect("locally installed implies file");
                match self.normalized_file(session, &artifact, file) {
                    Ok(file) => {
                        artifact.file = Some(file);
                        result.artifact = Some(artifact.clone());
                        self.artifact_resolved(&artifact, result.repository.clone(), &[]);
                    }
                    Err(err) => result.errors.push(err),
                }
                if !local.available {
                    // the file predates availability tracking; sync the index
                    // for the current request context
                    self.lrm.add_artifact(
                        session,
                        &LocalArtifactRegistration {
                            artifact: &artifact,
                            repository: None,
                            contexts: std::slice::from_ref(&context),
                        },
                    );
                }
                results.push(result);
                continue;
            } else if let Some(file) = &local.file {
                tracing::debug!(
                    "verifying availability of {} against the requested remotes",
                    file.display()
                );
            }

            // Group the leftover work per equivalent remote, preserving each
            // request's repository preference order across groups.
            let mut search_from = 0;
            for remote in &repositories {
                if !remote.policy(artifact.is_snapshot()).enabled {
                    continue;
                }
                if let Err(err) = self.offline.check_offline(session, remote) {
                    result.errors.push(err);
                    continue;
                }

                let item = ResolutionItem {
                    index,
                    artifact: artifact.clone(),
                    local_file: local.file.clone(),
                    context: context.clone(),
                    download: None,
                    update_check: None,
                };
                match groups[search_from..]
                    .iter()
                    .position(|group| group.repository.equivalent_for_batching(remote))
                {
                    Some(offset) => {
                        let position = search_from + offset;
                        groups[position].items.push(item);
                        search_from = position + 1;
                    }
                    None => {
                        groups.push(ResolutionGroup {
                            repository: remote.clone(),
                            items: vec![item],
                        });
                        search_from = groups.len();
                    }
                }
            }
            results.push(result);
        }

        for group in &mut groups {
            self.perform_downloads(session, group, &mut results, &mut resolved);
        }

        for result in &mut results {
            if !result.is_resolved() {
                if result.errors.is_empty() {
                    result.errors.push(ResolveError::ArtifactNotFound {
                        coordinates: result.request.artifact.to_string(),
                        location: "any of the configured repositories".to_string(),
                    });
                }
                let artifact = result.request.artifact.clone();
                self.artifact_resolved(&artifact, None, &result.errors);
            }
        }

        results
    }

    fn perform_downloads(
        &self,
        session: &RepositorySession,
        group: &mut ResolutionGroup,
        results: &mut [ArtifactResult],
        resolved: &mut [bool],
    ) {
        let mut downloads = self.gather_downloads(session, group, results, resolved);
        if downloads.is_empty() {
            return;
        }

        for download in &downloads {
            self.dispatcher.dispatch(
                RepositoryEvent::new(EventType::ArtifactDownloading)
                    .with_artifact(&download.artifact)
                    .with_repository(RepositoryRef::Remote(group.repository.clone())),
            );
        }

        match self.connectors.connector(session, &group.repository) {
            Ok(connector) => connector.get(&mut downloads, &mut []),
            Err(err) => {
                // fold the missing connector into per-download failures
                for download in &mut downloads {
                    download.error = Some(ResolveError::ArtifactTransfer {
                        coordinates: download.artifact.to_string(),
                        repository: group.repository.to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        self.evaluate_downloads(session, group, &downloads, results, resolved);
    }

    fn gather_downloads(
        &self,
        session: &RepositorySession,
        group: &mut ResolutionGroup,
        results: &mut [ArtifactResult],
        resolved: &[bool],
    ) -> Vec<ArtifactDownload> {
        let basedir = self.lrm.repository().basedir.clone();
        let mut downloads: Vec<ArtifactDownload> = Vec::new();

        for item in &mut group.items {
            if resolved[item.index] {
                // resolved by an earlier group
                continue;
            }

            let mut download = ArtifactDownload::new(
                item.artifact.clone(),
                PathBuf::new(),
                item.context.clone(),
            );
            if let Some(file) = &item.local_file {
                download.file = file.clone();
                download.existence_check = true;
            } else {
                let path = self.lrm.path_for_remote_artifact(
                    &item.artifact,
                    &group.repository,
                    &item.context,
                );
                download.file = basedir.join(path);
            }

            let policy = group.repository.policy(item.artifact.is_snapshot());

            if session.resolution_error_policy & error_policy::CACHE_ALL != 0 {
                let mut check = UpdateCheck::new(
                    item.artifact.clone(),
                    download.file.clone(),
                    group.repository.clone(),
                    policy.update_policy,
                );
                check.file_valid = !download.existence_check;
                self.update_checks.check_artifact(session, &mut check);
                let required = check.required;
                if let Some(error) = check.error.take() {
                    results[item.index].errors.push(error);
                }
                item.update_check = Some(check);
                if !required {
                    continue;
                }
            }

            download.checksum_policy = policy.checksum_policy;
            download.repositories = group.repository.mirrored.clone();
            item.download = Some(downloads.len());
            downloads.push(download);
        }

        downloads
    }

    fn evaluate_downloads(
        &self,
        session: &RepositorySession,
        group: &mut ResolutionGroup,
        downloads: &[ArtifactDownload],
        results: &mut [ArtifactResult],
        resolved: &mut [bool],
    ) {
        for item in &mut group.items {
            let Some(download_index) = item.download.take() else {
                continue;
            };
            let download = &downloads[download_index];

            if let Some(mut check) = item.update_check.take() {
                check.error = download.error.clone();
                self.update_checks.touch_artifact(session, &check);
            }

            let result = &mut results[item.index];
            match &download.error {
                None => {
                    resolved[item.index] = true;
                    result.repository = Some(RepositoryRef::Remote(group.repository.clone()));
                    let mut artifact = download.artifact.clone();
                    match self.normalized_file(session, &artifact, download.file.clone()) {
                        Ok(file) => {
                            artifact.file = Some(file);
                            result.artifact = Some(artifact.clone());
                        }
                        Err(err) => {
                            result.errors.push(err);
                            continue;
                        }
                    }
                    self.lrm.add_artifact(
                        session,
                        &LocalArtifactRegistration {
                            artifact: &artifact,
                            repository: Some(&group.repository),
                            contexts: &download.effective_contexts(),
                        },
                    );
                    self.artifact_downloaded(&artifact, &group.repository, None);
                    self.artifact_resolved(
                        &artifact,
                        Some(RepositoryRef::Remote(group.repository.clone())),
                        &[],
                    );
                }
                Some(error) => {
                    result.errors.push(error.clone());
                    self.artifact_downloaded(&download.artifact, &group.repository, Some(error));
                }
            }
        }
    }

    /// Snapshot normalization: keep a base-named sibling of a timestamped
    /// snapshot file, byte-identical and co-timestamped, and hand the
    /// base-named file to the caller. Skips the copy when length and mtime
    /// already match.
    fn normalized_file(
        &self,
        session: &RepositorySession,
        artifact: &Artifact,
        file: PathBuf,
    ) -> Result<PathBuf, ResolveError> {
        let base_version = artifact.base_version();
        let enabled = session.config_bool(config_keys::SNAPSHOT_NORMALIZATION, true);
        if !(enabled && artifact.is_snapshot() && artifact.version != base_version) {
            return Ok(file);
        }

        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().replace(&artifact.version, &base_version))
            .unwrap_or_default();
        let destination = file.with_file_name(name);

        let transfer_failed = |err: std::io::Error| ResolveError::ArtifactTransfer {
            coordinates: artifact.to_string(),
            repository: "the local repository".to_string(),
            reason: err.to_string(),
        };

        let source_meta = file.metadata().map_err(transfer_failed)?;
        let source_mtime = filetime::FileTime::from_last_modification_time(&source_meta);
        let up_to_date = destination
            .metadata()
            .map(|meta| {
                meta.len() == source_meta.len()
                    && filetime::FileTime::from_last_modification_time(&meta) == source_mtime
            })
            .unwrap_or(false);

        if !up_to_date {
            self.files
                .copy(&file, &destination, None)
                .map_err(transfer_failed)?;
            filetime::set_file_mtime(&destination, source_mtime).map_err(transfer_failed)?;
        }

        Ok(destination)
    }

    fn artifact_resolved(
        &self,
        artifact: &Artifact,
        repository: Option<RepositoryRef>,
        errors: &[ResolveError],
    ) {
        let mut event = RepositoryEvent::new(EventType::ArtifactResolved)
            .with_artifact(artifact)
            .with_errors(errors.iter().map(ToString::to_string).collect());
        if let Some(repository) = repository {
            event = event.with_repository(repository);
        }
        self.dispatcher.dispatch(event);
    }

    fn artifact_downloaded(
        &self,
        artifact: &Artifact,
        repository: &RemoteRepository,
        error: Option<&ResolveError>,
    ) {
        let event = RepositoryEvent::new(EventType::ArtifactDownloaded)
            .with_artifact(artifact)
            .with_repository(RepositoryRef::Remote(repository.clone()))
            .with_errors(error.iter().map(ToString::to_string).collect());
        self.dispatcher.dispatch(event);
    }
}

/// A local lookup satisfies the request when the index says so, or when the
/// file exists and the version was bound locally (snapshot install) or the
/// lookup ran without remotes (version-range fallback).
fn is_locally_installed(
    local: &LocalArtifactResult,
    version_result: &VersionResult,
    no_repositories: bool,
) -> bool {
    if local.available {
        return true;
    }
    local.file.is_some()
        && (matches!(version_result.repository, Some(RepositoryRef::Local))
            || (version_result.repository.is_none() && no_repositories))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn local_result(file: bool, available: bool) -> LocalArtifactResult {
        LocalArtifactResult {
            file: file.then(|| PathBuf::from("/repo/widget-1.0.jar")),
            available,
            repository: None,
        }
    }

    fn bound_to(repository: Option<RepositoryRef>) -> VersionResult {
        VersionResult {
            version: "1.0".to_string(),
            repository,
        }
    }

    #[test]
    fn available_file_is_locally_installed() {
        assert!(is_locally_installed(
            &local_result(true, true),
            &bound_to(None),
            false
        ));
    }

    #[test]
    fn locally_bound_version_accepts_unavailable_file() {
        assert!(is_locally_installed(
            &local_result(true, false),
            &bound_to(Some(RepositoryRef::Local)),
            false
        ));
    }

    #[test]
    fn version_range_fallback_requires_empty_repository_list() {
        assert!(is_locally_installed(
            &local_result(true, false),
            &bound_to(None),
            true
        ));
        assert!(!is_locally_installed(
            &local_result(true, false),
            &bound_to(None),
            false
        ));
    }

    #[test]
    fn missing_file_is_never_locally_installed() {
        assert!(!is_locally_installed(
            &local_result(false, false),
            &bound_to(Some(RepositoryRef::Local)),
            true
        ));
    }
}
